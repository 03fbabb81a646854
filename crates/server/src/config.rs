// Server configuration.
//
// Loaded from the path in `COEDIT_CONFIG`, falling back to
// `~/.coedit/config.toml`, falling back to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "COEDIT_CONFIG";

/// Path to the default config file: `~/.coedit/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".coedit").join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket server.
    pub listen_addr: String,
    /// Path to the sqlite database file.
    pub database_path: PathBuf,
    /// How long a buffered delete may wait for its insert before it is
    /// dropped, in seconds.
    pub orphan_ttl_secs: i64,
    /// Maximum accepted WebSocket frame size in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_path: PathBuf::from("coedit.db"),
            orphan_ttl_secs: 10,
            max_frame_bytes: 1 << 20,
        }
    }
}

impl ServerConfig {
    /// Resolve the config: `COEDIT_CONFIG` if set, otherwise
    /// `~/.coedit/config.toml` if present, otherwise defaults. An explicitly
    /// named file that fails to load is an error; a missing default file is
    /// not.
    pub fn load() -> anyhow::Result<Self> {
        use anyhow::Context;

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path))
                .with_context(|| format!("failed to load config from {path}"));
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn orphan_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.orphan_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sensible() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.orphan_ttl_secs, 10);
        assert_eq!(config.max_frame_bytes, 1 << 20);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
listen_addr = "127.0.0.1:9000"
orphan_ttl_secs = 30
"#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.orphan_ttl_secs, 30);
        assert_eq!(config.database_path, PathBuf::from("coedit.db"));
    }

    #[test]
    fn loads_from_a_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database_path = \"/var/lib/coedit/coedit.db\"\n").unwrap();

        let config = ServerConfig::load_from(&path).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/coedit/coedit.db"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(ServerConfig::load_from(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn orphan_ttl_converts_to_a_duration() {
        let config = ServerConfig { orphan_ttl_secs: 45, ..ServerConfig::default() };
        assert_eq!(config.orphan_ttl(), chrono::Duration::seconds(45));
    }
}
