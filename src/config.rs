//! Client endpoint configuration.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// Endpoints of the two services a filesystem client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// `host:port` of the extent service.
    pub extent_addr: String,
    /// `host:port` of the lock service.
    pub lock_addr: String,
}

impl Config {
    pub fn new(extent_addr: impl Into<String>, lock_addr: impl Into<String>) -> Self {
        Self { extent_addr: extent_addr.into(), lock_addr: lock_addr.into() }
    }

    /// Loads a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

/// Errors from reading or parsing the config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config unreadable: {err}"),
            ConfigError::Parse(err) => write!(f, "config invalid: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn loads_a_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "extent_addr = \"127.0.0.1:3770\"").expect("write");
        writeln!(file, "lock_addr = \"127.0.0.1:3772\"").expect("write");

        let config = Config::load(file.path()).expect("load");
        assert_eq!(config, Config::new("127.0.0.1:3770", "127.0.0.1:3772"));
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "extent_addr = \"127.0.0.1:3770\"").expect("write");
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(Config::load("/nonexistent/extfs.toml"), Err(ConfigError::Io(_))));
    }
}
