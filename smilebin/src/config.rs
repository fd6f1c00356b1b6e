//! User configuration loaded from `$XDG_CONFIG_HOME/smilebin/config.toml`.
//!
//! Every key is optional. A missing file means defaults; a file that cannot be
//! read or parsed is logged at warn level and also means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::git::process::DEFAULT_PROCESS_TIMEOUT;

/// Emoticon used when none is given.
pub const DEFAULT_EMOTICON: &str = "smiley";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the SQLite annotation database.
    pub database: PathBuf,
    /// `git` executable to spawn.
    pub git: String,
    /// Upper bound on one subprocess, in seconds.
    pub process_timeout_secs: u64,
    /// Author recorded on new annotations.
    pub user_id: String,
    pub emoticon: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            git: "git".to_owned(),
            process_timeout_secs: DEFAULT_PROCESS_TIMEOUT.as_secs(),
            user_id: std::env::var("USER")
                .ok()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| "anonymous".to_owned()),
            emoticon: DEFAULT_EMOTICON.to_owned(),
        }
    }
}

impl Config {
    /// Loads the config from [`config_path`].
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Loads the config from `path`. Never fails; see the module docs.
    pub fn load_from(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config unreadable; using defaults");
                return Self::default();
            }
        };
        Self::parse(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "config parse error; using defaults");
            Self::default()
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn process_timeout(&self) -> Duration {
        if self.process_timeout_secs == 0 {
            DEFAULT_PROCESS_TIMEOUT
        } else {
            Duration::from_secs(self.process_timeout_secs)
        }
    }
}

/// Returns the path to the smilebin config file.
///
/// Prefers `$XDG_CONFIG_HOME/smilebin/config.toml`; falls back to
/// `~/.config/smilebin/config.toml` when the env var is absent.
pub fn config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
        .join("smilebin")
        .join("config.toml")
}

/// `$XDG_DATA_HOME/smilebin/annotations.db`, or under `~/.local/share`.
fn default_database_path() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
        .join("smilebin")
        .join("annotations.db")
}

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(home_relative))
        })
        .unwrap_or_else(|| PathBuf::from(home_relative))
}
