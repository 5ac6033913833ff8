//! Checker configuration.
//!
//! Loaded from `routecheck.toml` at the project root. A missing file means
//! defaults; CLI flags override whatever the file says.
//!
//! ```toml
//! client_prefix = "/api"
//! server_prefix = ""
//! jape_package = "jape"
//! include_tests = false
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{CheckError, Result};

/// Default config file name, looked up in the analyzed root.
pub const CONFIG_FILE: &str = "routecheck.toml";

/// Options that shape how routes are extracted and compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Prefix trimmed from client paths before normalization.
    pub client_prefix: String,
    /// Prefix trimmed from server paths before normalization.
    pub server_prefix: String,
    /// Package name under which the jape library is imported.
    pub jape_package: String,
    /// Analyze `_test.go` files too.
    pub include_tests: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            client_prefix: String::new(),
            server_prefix: String::new(),
            jape_package: "jape".to_string(),
            include_tests: false,
        }
    }
}

impl CheckConfig {
    /// Load config from `path`. Falls back to defaults when the file does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| CheckError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| CheckError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse config from TOML text.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply CLI overrides on top of the loaded values.
    pub fn with_prefixes(mut self, client: Option<String>, server: Option<String>) -> Self {
        if let Some(client) = client {
            self.client_prefix = client;
        }
        if let Some(server) = server {
            self.server_prefix = server;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, CheckConfig::default());
        assert_eq!(config.jape_package, "jape");
    }

    #[test]
    fn test_partial_file() {
        let config = CheckConfig::from_toml("client_prefix = \"/api\"\n").unwrap();
        assert_eq!(config.client_prefix, "/api");
        assert_eq!(config.server_prefix, "");
        assert!(!config.include_tests);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "client_prefix = [").unwrap();
        assert!(matches!(
            CheckConfig::load(&path),
            Err(CheckError::Config { .. })
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let config = CheckConfig::default().with_prefixes(Some("/api".into()), None);
        assert_eq!(config.client_prefix, "/api");
        assert_eq!(config.server_prefix, "");
    }
}
