mod schema;
mod sqlite;

pub use schema::SCHEMA;
pub use sqlite::{DbPool, SqlitePriceStore};
