//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// A peer study server holding some participants' telemetry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedServer {
    /// Display name used in logs and reports.
    pub name: String,

    /// Performance-report endpoint URL.
    pub url: String,

    /// Shared key authorizing report requests.
    pub request_key: String,

    /// Sources whose participants are enrolled with this server.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl fmt::Debug for FederatedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedServer")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("request_key", &"[REDACTED]")
            .field("sources", &self.sources)
            .finish()
    }
}

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Worker threads used by the reconciliation pool.
    pub worker_threads: usize,

    /// Cap on sources audited per reconcile run.
    pub max_sources_per_run: Option<usize>,

    /// Peer study servers; their sources are reconciled remotely.
    #[serde(default)]
    pub federated_servers: Vec<FederatedServer>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("worker_threads", &self.worker_threads)
            .field("max_sources_per_run", &self.max_sources_per_run)
            .field("federated_servers", &self.federated_servers)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("bw.db"),
            worker_threads: 4,
            max_sources_per_run: None,
            federated_servers: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (BW_*)
        figment = figment.merge(Env::prefixed("BW_"));

        figment.extract()
    }

    /// Returns the federated server a source is assigned to, if any.
    pub fn federated_server_for(&self, source: &str) -> Option<&FederatedServer> {
        self.federated_servers
            .iter()
            .find(|server| server.sources.iter().any(|candidate| candidate == source))
    }

    /// Whether a source's telemetry lives on a peer server.
    pub fn is_federated(&self, source: &str) -> bool {
        self.federated_server_for(source).is_some()
    }
}

/// Returns the platform-specific config directory for bw.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("bw"))
}

/// Returns the platform-specific data directory for bw.
///
/// On Linux: `~/.local/share/bw`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("bw"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str, sources: &[&str]) -> FederatedServer {
        FederatedServer {
            name: name.to_string(),
            url: format!("https://{name}.example.com/report"),
            request_key: "secret-key".to_string(),
            sources: sources.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_dirs_data_path_returns_some() {
        assert!(dirs_data_path().is_some());
    }

    #[test]
    fn test_dirs_data_path_ends_with_bw() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "bw");
    }

    #[test]
    fn test_default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("bw.db"));
    }

    #[test]
    fn test_default_config_has_no_source_cap() {
        let config = Config::default();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.max_sources_per_run, None);
        assert!(config.federated_servers.is_empty());
    }

    #[test]
    fn federated_server_lookup_matches_assigned_sources() {
        let config = Config {
            federated_servers: vec![
                server("north", &["participant.1", "participant.2"]),
                server("south", &["participant.3"]),
            ],
            ..Config::default()
        };

        assert_eq!(
            config.federated_server_for("participant.3").map(|s| s.name.as_str()),
            Some("south")
        );
        assert!(config.is_federated("participant.1"));
        assert!(!config.is_federated("participant.9"));
    }

    #[test]
    fn debug_output_redacts_request_keys() {
        let config = Config {
            federated_servers: vec![server("north", &["participant.1"])],
            ..Config::default()
        };

        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret-key"));
    }
}
