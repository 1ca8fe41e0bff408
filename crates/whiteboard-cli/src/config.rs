use std::path::PathBuf;
use std::time::Duration;
use whiteboard_core::SyncConfig;

/// CLI configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding persisted room documents and exports
    pub data_dir: PathBuf,
    /// Undo depth for local sessions
    pub history_limit: usize,
    /// Delay before a trainee asks the room for state
    pub request_state_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `WHITEBOARD_DATA_DIR`: data directory (supports ~ for home directory).
    ///   Defaults to `<local data dir>/whiteboard`.
    /// - `WHITEBOARD_HISTORY_LIMIT`: undo depth (default 50)
    /// - `WHITEBOARD_REQUEST_DELAY_MS`: bootstrap request delay (default 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = SyncConfig::default();

        let data_dir = match lookup("WHITEBOARD_DATA_DIR") {
            Some(dir) => expand_tilde(&dir),
            None => dirs::data_local_dir()
                .map(|dir| dir.join("whiteboard"))
                .ok_or(ConfigError::NoDataDir)?,
        };

        let history_limit = match lookup("WHITEBOARD_HISTORY_LIMIT") {
            Some(value) => parse_var("WHITEBOARD_HISTORY_LIMIT", &value)?,
            None => defaults.history_limit,
        };

        let request_state_delay = match lookup("WHITEBOARD_REQUEST_DELAY_MS") {
            Some(value) => Duration::from_millis(parse_var("WHITEBOARD_REQUEST_DELAY_MS", &value)?),
            None => defaults.request_state_delay,
        };

        Ok(Self {
            data_dir,
            history_limit,
            request_state_delay,
        })
    }

    /// Session config for engines started by this process.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            history_limit: self.history_limit,
            request_state_delay: self.request_state_delay,
            ..SyncConfig::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No data directory: set WHITEBOARD_DATA_DIR")]
    NoDataDir,

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_explicit_values() {
        let config = Config::from_lookup(lookup(&[
            ("WHITEBOARD_DATA_DIR", "/tmp/wb"),
            ("WHITEBOARD_HISTORY_LIMIT", "10"),
            ("WHITEBOARD_REQUEST_DELAY_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/wb"));
        assert_eq!(config.sync_config().history_limit, 10);
        assert_eq!(config.sync_config().request_state_delay, Duration::ZERO);
    }

    #[test]
    fn test_defaults_follow_sync_config() {
        let config = Config::from_lookup(lookup(&[("WHITEBOARD_DATA_DIR", "/tmp/wb")])).unwrap();
        assert_eq!(config.sync_config(), SyncConfig::default());
    }

    #[test]
    fn test_invalid_history_limit() {
        let err = Config::from_lookup(lookup(&[
            ("WHITEBOARD_DATA_DIR", "/tmp/wb"),
            ("WHITEBOARD_HISTORY_LIMIT", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "WHITEBOARD_HISTORY_LIMIT", .. }));
    }

    #[test]
    fn test_expand_tilde_plain_path() {
        assert_eq!(expand_tilde("/var/data"), PathBuf::from("/var/data"));
    }
}
