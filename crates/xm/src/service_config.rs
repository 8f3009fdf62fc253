use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use common::crypto::{KeyError, PublicKey};

pub const DEFAULT_LOG_LEVEL: tracing::Level = tracing::Level::INFO;

#[derive(Debug, Clone)]
pub struct Config {
    /// address for the responder to listen on
    pub listen_addr: SocketAddr,
    /// directory served to requesters
    pub root: PathBuf,
    /// if set, only requests carrying this public key are answered
    pub authorized_key: Option<PublicKey>,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

/// On-disk counterpart of [`Config`]; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// hex encoded public key
    #[serde(default)]
    pub authorized_key: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_toml = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&config_toml)?)
    }
}

/// Values given on the command line, taking precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen_addr: Option<SocketAddr>,
    pub root: Option<PathBuf>,
    pub authorized_key: Option<String>,
    pub log_level: Option<tracing::Level>,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Result<Self, ConfigError> {
        let listen_addr = overrides
            .listen_addr
            .or(file.listen_addr)
            .ok_or(ConfigError::MissingListenAddr)?;

        let root = overrides
            .root
            .or(file.root)
            .unwrap_or_else(|| PathBuf::from("."));

        let authorized_key = overrides
            .authorized_key
            .or(file.authorized_key)
            .map(|hex| PublicKey::from_hex(&hex))
            .transpose()?;

        let log_level = match overrides.log_level {
            Some(level) => level,
            None => match file.log_level {
                Some(level) => tracing::Level::from_str(&level)
                    .map_err(|_| ConfigError::InvalidLogLevel(level))?,
                None => DEFAULT_LOG_LEVEL,
            },
        };

        Ok(Self {
            listen_addr,
            root,
            authorized_key,
            log_level,
            log_dir: overrides.log_dir.or(file.log_dir),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no listen address given")]
    MissingListenAddr,
    #[error("invalid authorized key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    const KEY: &str = "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a";

    #[test]
    fn test_flags_override_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:8000"
            root = "/srv/files"
            log_level = "debug"
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            listen_addr: Some("0.0.0.0:9000".parse().unwrap()),
            ..Default::default()
        };

        let config = Config::resolve(file, overrides).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.root, PathBuf::from("/srv/files"));
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert!(config.authorized_key.is_none());
    }

    #[test]
    fn test_defaults() {
        let overrides = Overrides {
            listen_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..Default::default()
        };
        let config = Config::resolve(ConfigFile::default(), overrides).unwrap();
        assert_eq!(config.root, PathBuf::from("."));
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_authorized_key_from_file() {
        let file = ConfigFile {
            listen_addr: Some("127.0.0.1:0".parse().unwrap()),
            authorized_key: Some(KEY.to_string()),
            ..Default::default()
        };
        let config = Config::resolve(file, Overrides::default()).unwrap();
        assert_eq!(config.authorized_key.unwrap().to_hex(), KEY);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::resolve(ConfigFile::default(), Overrides::default()),
            Err(ConfigError::MissingListenAddr)
        ));

        let file = ConfigFile {
            listen_addr: Some("127.0.0.1:0".parse().unwrap()),
            authorized_key: Some("abcd".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::resolve(file, Overrides::default()),
            Err(ConfigError::InvalidKey(_))
        ));

        let file = ConfigFile {
            listen_addr: Some("127.0.0.1:0".parse().unwrap()),
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::resolve(file, Overrides::default()),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xm.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:1\"\n").unwrap();
        assert!(matches!(
            ConfigFile::load(&path),
            Err(ConfigError::TomlDe(_))
        ));

        std::fs::write(&path, "root = \"/tmp\"\n").unwrap();
        let file = ConfigFile::load(&path).unwrap();
        assert_eq!(file.root, Some(PathBuf::from("/tmp")));
    }
}
