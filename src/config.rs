//! Configuration loader and validator for the alert engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub flags: AlertFlags,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Hard cap on the in-memory alert sequence; excess is tombstoned
    /// oldest-first.
    pub max_alerts: usize,
}

/// Per-category alert enablement, immutable for the session. A disabled
/// category suppresses alert creation silently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AlertFlags {
    pub cloud_enabled: bool,
    pub contacts_enabled: bool,

    pub cloud_newfiles: bool,
    pub cloud_newshare: bool,
    pub cloud_delshare: bool,
    pub contacts_request_incoming: bool,
    pub contacts_request_deleted: bool,
    pub contacts_request_accepted: bool,
}

impl Default for AlertFlags {
    fn default() -> Self {
        AlertFlags {
            cloud_enabled: true,
            contacts_enabled: true,
            cloud_newfiles: true,
            cloud_newshare: true,
            cloud_delshare: true,
            contacts_request_incoming: true,
            contacts_request_deleted: true,
            contacts_request_accepted: true,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.max_alerts == 0 {
        return Err(ConfigError::Invalid("app.max_alerts must be > 0"));
    }
    Ok(())
}

/// Example YAML with every key at its default.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  max_alerts: 200

flags:
  cloud_enabled: true
  contacts_enabled: true
  cloud_newfiles: true
  cloud_newshare: true
  cloud_delshare: true
  contacts_request_incoming: true
  contacts_request_deleted: true
  contacts_request_accepted: true
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.max_alerts, 200);
        assert!(cfg.flags.cloud_enabled);
    }

    #[test]
    fn flags_default_when_absent() {
        let cfg: Config = serde_yaml::from_str("app:\n  data_dir: d\n  max_alerts: 10\n").unwrap();
        assert_eq!(cfg.flags, AlertFlags::default());
    }

    #[test]
    fn invalid_limits() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.max_alerts = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("max_alerts")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.data_dir, "./data");
    }
}
