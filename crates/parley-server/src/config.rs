//! Server configuration: TOML file + CLI overrides.

use parley_core::{ParleyError, ParleyResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub files: FilesSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    #[serde(default = "default_wait_tick_secs")]
    pub wait_tick_secs: u64,
    #[serde(default = "default_db_path")]
    pub db: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_active: default_max_active(),
            wait_tick_secs: default_wait_tick_secs(),
            db: default_db_path(),
        }
    }
}

/// `[files]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesSection {
    #[serde(default = "default_files_dir")]
    pub dir: String,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            dir: default_files_dir(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_port() -> u16 {
    9876
}
fn default_max_active() -> usize {
    3
}
fn default_wait_tick_secs() -> u64 {
    10
}
fn default_db_path() -> String {
    "parley.db".to_string()
}
fn default_files_dir() -> String {
    "server-files".to_string()
}
fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "jpeg", "jpg", "docx"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_active: usize,
    pub wait_tick_secs: u64,
    pub db_path: PathBuf,
    pub files_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let file = ConfigFile {
            server: ServerSection::default(),
            files: FilesSection::default(),
        };
        Self::from_file(file)
    }
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_max_active: Option<usize>,
        cli_wait_tick: Option<u64>,
        cli_db: Option<&str>,
        cli_files_dir: Option<&str>,
    ) -> ParleyResult<Self> {
        let file_config = match config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| ParleyError::Other(format!("config parse error: {e}")))?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile {
                    server: ServerSection::default(),
                    files: FilesSection::default(),
                }
            }
            None => ConfigFile {
                server: ServerSection::default(),
                files: FilesSection::default(),
            },
        };

        let mut config = Self::from_file(file_config);

        // Merge CLI overrides
        if let Some(port) = cli_port {
            config.port = port;
        }
        if let Some(max_active) = cli_max_active {
            config.max_active = max_active;
        }
        if let Some(tick) = cli_wait_tick {
            config.wait_tick_secs = tick;
        }
        if let Some(db) = cli_db {
            config.db_path = PathBuf::from(db);
        }
        if let Some(dir) = cli_files_dir {
            config.files_dir = PathBuf::from(dir);
        }

        if config.max_active == 0 {
            return Err(ParleyError::Other("max_active must be at least 1".into()));
        }
        // A zero-period tick interval panics at runtime.
        if config.wait_tick_secs == 0 {
            return Err(ParleyError::Other(
                "wait_tick_secs must be at least 1".into(),
            ));
        }

        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Self {
        Self {
            port: file.server.port,
            max_active: file.server.max_active,
            wait_tick_secs: file.server.wait_tick_secs,
            db_path: PathBuf::from(file.server.db),
            files_dir: PathBuf::from(file.files.dir),
            allowed_extensions: file
                .files
                .allowed_extensions
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 9876);
        assert_eq!(cfg.max_active, 3);
        assert_eq!(cfg.wait_tick_secs, 10);
        assert_eq!(cfg.allowed_extensions, vec!["pdf", "jpeg", "jpg", "docx"]);
    }

    #[test]
    fn file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 4000
max_active = 8

[files]
allowed_extensions = ["PDF", "txt"]
"#,
        )
        .unwrap();

        let cfg = ServerConfig::load(Some(&path), Some(4100), None, None, None, None).unwrap();
        assert_eq!(cfg.port, 4100); // CLI wins
        assert_eq!(cfg.max_active, 8);
        // Extensions normalized to lowercase
        assert_eq!(cfg.allowed_extensions, vec!["pdf", "txt"]);
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(ServerConfig::load(None, None, Some(0), None, None, None).is_err());
    }

    #[test]
    fn zero_wait_tick_rejected() {
        assert!(ServerConfig::load(None, None, None, Some(0), None, None).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[server]\nwait_tick_secs = 0\n").unwrap();
        assert!(ServerConfig::load(Some(&path), None, None, None, None, None).is_err());
    }
}
