use std::{
    env, fmt,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use market_core::DEFAULT_HISTORY_WINDOW;
use strategy::GeneratorConfig;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DB_PATH: &str = "data/market.db";
const DEFAULT_DB_POOL_SIZE: u32 = 4;
const DEFAULT_INTERVAL_SECS: u64 = 15;
const DEFAULT_AUTOSTART: bool = true;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    pub db_pool_size: u32,
    pub interval: Duration,
    pub history_window: usize,
    pub generator: GeneratorConfig,
    pub autostart: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidListenAddr(AddrParseError),
    InvalidDbPath,
    InvalidDbPoolSize,
    InvalidInterval,
    InvalidHistoryWindow,
    InvalidGenerator(String),
    InvalidAutostart,
    NonUnicode(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidListenAddr(err) => {
                write!(f, "MARKET_SERVER_ADDR is not a valid socket address: {err}")
            }
            Self::InvalidDbPath => {
                write!(f, "MARKET_DB_PATH must not be empty or whitespace")
            }
            Self::InvalidDbPoolSize => {
                write!(f, "MARKET_DB_POOL_SIZE must be a positive integer")
            }
            Self::InvalidInterval => {
                write!(f, "MARKET_INTERVAL_SECS must be a positive integer")
            }
            Self::InvalidHistoryWindow => {
                write!(f, "MARKET_HISTORY_WINDOW must be a positive integer")
            }
            Self::InvalidGenerator(reason) => {
                write!(f, "MARKET_GENERATOR is not a valid generator: {reason}")
            }
            Self::InvalidAutostart => {
                write!(f, "MARKET_AUTOSTART must be true or false")
            }
            Self::NonUnicode(key) => write!(f, "{key} contains non-unicode data"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidListenAddr(err) => Some(err),
            _ => None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = match read_env("MARKET_SERVER_ADDR")? {
            Some(value) => value.parse().map_err(ConfigError::InvalidListenAddr)?,
            None => DEFAULT_LISTEN_ADDR
                .parse()
                .map_err(ConfigError::InvalidListenAddr)?,
        };

        let db_path = match read_env("MARKET_DB_PATH")? {
            Some(value) if value.trim().is_empty() => return Err(ConfigError::InvalidDbPath),
            Some(value) => PathBuf::from(value),
            None => PathBuf::from(DEFAULT_DB_PATH),
        };

        let db_pool_size = parse_positive("MARKET_DB_POOL_SIZE", ConfigError::InvalidDbPoolSize)?
            .unwrap_or(DEFAULT_DB_POOL_SIZE);

        let interval_secs = parse_positive("MARKET_INTERVAL_SECS", ConfigError::InvalidInterval)?
            .unwrap_or(DEFAULT_INTERVAL_SECS);

        let history_window =
            parse_positive("MARKET_HISTORY_WINDOW", ConfigError::InvalidHistoryWindow)?
                .unwrap_or(DEFAULT_HISTORY_WINDOW);

        let generator = match read_env("MARKET_GENERATOR")? {
            Some(value) => serde_json::from_str::<GeneratorConfig>(&value)
                .map_err(|err| ConfigError::InvalidGenerator(err.to_string()))?,
            None => GeneratorConfig::default(),
        };
        generator
            .build()
            .map_err(|err| ConfigError::InvalidGenerator(err.to_string()))?;

        let autostart = match read_env("MARKET_AUTOSTART")? {
            Some(value) => parse_bool(value.as_str()).ok_or(ConfigError::InvalidAutostart)?,
            None => DEFAULT_AUTOSTART,
        };

        Ok(Self {
            listen_addr,
            db_path,
            db_pool_size,
            interval: Duration::from_secs(interval_secs),
            history_window,
            generator,
            autostart,
        })
    }
}

fn read_env(key: &'static str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NonUnicode(key)),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_positive<T>(
    key: &'static str,
    invalid_error: ConfigError,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(value) = read_env(key)? else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(Some(parsed)),
        _ => Err(invalid_error),
    }
}

#[cfg(test)]
mod tests {
    use std::{env, sync::Mutex, time::Duration};

    use strategy::GeneratorConfig;

    use super::{Config, ConfigError, DEFAULT_LISTEN_ADDR};

    static ENV_LOCK: Mutex<()> = Mutex::new(());
    const ENV_ADDR_KEY: &str = "MARKET_SERVER_ADDR";
    const ENV_DB_KEY: &str = "MARKET_DB_PATH";
    const ENV_POOL_KEY: &str = "MARKET_DB_POOL_SIZE";
    const ENV_INTERVAL_KEY: &str = "MARKET_INTERVAL_SECS";
    const ENV_WINDOW_KEY: &str = "MARKET_HISTORY_WINDOW";
    const ENV_GENERATOR_KEY: &str = "MARKET_GENERATOR";
    const ENV_AUTOSTART_KEY: &str = "MARKET_AUTOSTART";

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<std::ffi::OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = env::var_os(key);
            env::set_var(key, value);
            Self { key, previous }
        }

        fn unset(key: &'static str) -> Self {
            let previous = env::var_os(key);
            env::remove_var(key);
            Self { key, previous }
        }

        #[cfg(unix)]
        fn set_os(key: &'static str, value: std::ffi::OsString) -> Self {
            let previous = env::var_os(key);
            env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.previous.take() {
                Some(value) => env::set_var(self.key, value),
                None => env::remove_var(self.key),
            }
        }
    }

    fn reset_config_env_baseline() -> [EnvVarGuard; 7] {
        [
            EnvVarGuard::unset(ENV_ADDR_KEY),
            EnvVarGuard::unset(ENV_DB_KEY),
            EnvVarGuard::unset(ENV_POOL_KEY),
            EnvVarGuard::unset(ENV_INTERVAL_KEY),
            EnvVarGuard::unset(ENV_WINDOW_KEY),
            EnvVarGuard::unset(ENV_GENERATOR_KEY),
            EnvVarGuard::unset(ENV_AUTOSTART_KEY),
        ]
    }

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();

        let config = Config::from_env().unwrap();

        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
        assert_eq!(config.db_path.to_str(), Some("data/market.db"));
        assert_eq!(config.db_pool_size, 4);
        assert_eq!(config.interval, Duration::from_secs(15));
        assert_eq!(config.history_window, 10);
        assert_eq!(config.generator, GeneratorConfig::default());
        assert!(config.autostart);
    }

    #[test]
    fn uses_overrides_from_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _addr = EnvVarGuard::set(ENV_ADDR_KEY, "127.0.0.1:9090");
        let _db = EnvVarGuard::set(ENV_DB_KEY, "/tmp/prices.db");
        let _interval = EnvVarGuard::set(ENV_INTERVAL_KEY, "5");
        let _window = EnvVarGuard::set(ENV_WINDOW_KEY, "3");
        let _autostart = EnvVarGuard::set(ENV_AUTOSTART_KEY, "false");

        let config = Config::from_env().unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.db_path.to_str(), Some("/tmp/prices.db"));
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.history_window, 3);
        assert!(!config.autostart);
    }

    #[test]
    fn parses_generator_json() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set(
            ENV_GENERATOR_KEY,
            r#"{"kind":"bounded-walk","start_value":"50","min_value":"1","max_change":"2"}"#,
        );

        let config = Config::from_env().unwrap();

        assert!(matches!(config.generator, GeneratorConfig::BoundedWalk { .. }));
    }

    #[test]
    fn rejects_generator_with_invalid_parameters() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set(
            ENV_GENERATOR_KEY,
            r#"{"kind":"gaussian-walk","start_value":"50","min_value":"1","sigma":-1.0}"#,
        );

        let err = Config::from_env().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidGenerator(_)));
        assert!(err.to_string().starts_with("MARKET_GENERATOR"));
    }

    #[test]
    fn returns_error_for_invalid_listen_address_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set(ENV_ADDR_KEY, "not-an-addr");

        let err = Config::from_env().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidListenAddr(_)));
    }

    #[test]
    fn returns_error_for_zero_interval() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set(ENV_INTERVAL_KEY, "0");

        let err = Config::from_env().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidInterval));
    }

    #[test]
    fn returns_error_for_non_numeric_history_window() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set(ENV_WINDOW_KEY, "ten");

        let err = Config::from_env().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidHistoryWindow));
    }

    #[test]
    fn returns_error_for_whitespace_db_path() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set(ENV_DB_KEY, "   ");

        let err = Config::from_env().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidDbPath));
    }

    #[test]
    fn returns_error_for_invalid_autostart() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set(ENV_AUTOSTART_KEY, "yes");

        let err = Config::from_env().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidAutostart));
    }

    #[cfg(unix)]
    #[test]
    fn returns_error_for_non_unicode_env_var() {
        use std::os::unix::ffi::OsStringExt;

        let _lock = ENV_LOCK.lock().unwrap();
        let _baseline = reset_config_env_baseline();
        let _guard = EnvVarGuard::set_os(
            ENV_ADDR_KEY,
            std::ffi::OsString::from_vec(vec![0x66, 0x6f, 0x80]),
        );

        let err = Config::from_env().unwrap_err();

        assert!(matches!(err, ConfigError::NonUnicode("MARKET_SERVER_ADDR")));
    }
}
