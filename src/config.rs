use std::path::PathBuf;
use thiserror::Error;

/// Default location of the session database
pub const DEFAULT_DATABASE: &str = "data/callstats.db";
/// Default directory for guild configs and member preferences
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub discord_token: String,
    pub database_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DISCORD_TOKEN`: bot token from the Discord Developer Portal
    ///
    /// Optional:
    /// - `CALLSTATS_DATABASE`: SQLite file holding session state
    /// - `CALLSTATS_DATA_DIR`: directory for YAML guild and member settings
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let discord_token = lookup("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;
        if discord_token.trim().is_empty() {
            return Err(ConfigError::Empty("DISCORD_TOKEN"));
        }

        let database_path = path_or(&lookup, "CALLSTATS_DATABASE", DEFAULT_DATABASE);
        let data_dir = path_or(&lookup, "CALLSTATS_DATA_DIR", DEFAULT_DATA_DIR);

        Ok(Self {
            discord_token,
            database_path,
            data_dir,
        })
    }
}

fn path_or(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: &str) -> PathBuf {
    match lookup(var) {
        Some(val) if !val.trim().is_empty() => PathBuf::from(val.trim()),
        _ => PathBuf::from(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults_apply() {
        let config = Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "abc")])).unwrap();
        assert_eq!(config.discord_token, "abc");
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn test_overrides_apply() {
        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("CALLSTATS_DATABASE", "/tmp/stats.db"),
            ("CALLSTATS_DATA_DIR", " /tmp/settings "),
            ("UNRELATED", "x"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/stats.db"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/settings"));
    }

    #[test]
    fn test_missing_token() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DISCORD_TOKEN"));
        assert_eq!(err.to_string(), "DISCORD_TOKEN environment variable is required");
    }

    #[test]
    fn test_blank_token() {
        let err = Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty("DISCORD_TOKEN"));
    }

    #[test]
    fn test_blank_path_falls_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("CALLSTATS_DATABASE", ""),
        ]))
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE));
    }
}
