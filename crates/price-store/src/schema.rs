/// Tables shared by the engine and the HTTP surface.
///
/// `valid_after` and `created_at` are unix nanoseconds in UTC. `price` is the
/// canonical decimal text so no precision is lost to REAL.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    color TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS prices (
    stock_id INTEGER NOT NULL REFERENCES stocks(id),
    valid_after INTEGER NOT NULL,
    price TEXT NOT NULL,
    PRIMARY KEY (stock_id, valid_after)
);
";
