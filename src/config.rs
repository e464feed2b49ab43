//! Persisted CLI configuration
//!
//! The config file lives at `~/.config/nftcodec/config.json` (XDG config
//! directory) unless a path is given explicitly. Every field has a default,
//! so a missing or partial file is never an error.

use crate::core::error::Result;
use crate::core::table::TableFamily;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILE: &str = "config.json";

/// Defaults applied by the CLI when a command does not name a table or chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub family: TableFamily,
    #[serde(default = "default_chain")]
    pub chain: String,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            family: TableFamily::default(),
            chain: default_chain(),
            log_level: default_log_level(),
        }
    }
}

fn default_table() -> String {
    "filter".to_string()
}

fn default_chain() -> String {
    "input".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "nftcodec", "nftcodec").map(|pd| pd.config_dir().to_path_buf())
}

pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Loads the config from `path` (or the default location), falling back to
/// defaults when the file is absent or unreadable.
pub fn load_config(path: Option<&Path>) -> AppConfig {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
        return AppConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(json) => match serde_json::from_str(&json) {
            Ok(config) => {
                debug!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring invalid config {}: {e}", path.display());
                AppConfig::default()
            }
        },
        Err(e) => {
            debug!("No config at {} ({e}), using defaults", path.display());
            AppConfig::default()
        }
    }
}

/// Saves the config using an atomic write pattern.
/// 1. Writes to a temporary file in the target directory.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames it over the target path.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(config)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(json.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    debug!("Saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"table":"nat"}"#).unwrap();
        assert_eq!(config.table, "nat");
        assert_eq!(config.chain, "input");
        assert_eq!(config.family, TableFamily::Inet);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = AppConfig {
            table: "edge".into(),
            family: TableFamily::Ip6,
            chain: "forward".into(),
            log_level: "debug".into(),
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(Some(&path)), config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_invalid_or_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        assert_eq!(load_config(Some(&path)), AppConfig::default());

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(load_config(Some(&path)), AppConfig::default());
    }
}
