//! Configuration loading from `~/.l2l/config.toml` with defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default bound on the "wait until online" poll before a request is sent.
pub const DEFAULT_ONLINE_TIMEOUT_MS: u64 = 3000;

/// Runtime configuration for a peer serving and consuming remote modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// This peer's session id. A random one is generated when omitted.
    pub session_id: String,
    /// Address the session node listens on.
    pub listen_addr: String,
    /// Peers to connect to at startup.
    pub peers: Vec<String>,
    /// Root directory of the served module graph and of fs requests.
    pub base_dir: PathBuf,
    /// Name of the module system the services answer for by default.
    pub system_name: String,
    /// Wait bound for session readiness, in milliseconds.
    pub online_timeout_ms: u64,
    /// Depth of the textual rendering of relayed `doitresult` values.
    pub inspect_depth: usize,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            peers: Vec::new(),
            base_dir: PathBuf::from("."),
            system_name: "default".to_string(),
            online_timeout_ms: DEFAULT_ONLINE_TIMEOUT_MS,
            inspect_depth: 1,
        }
    }
}

impl ModulesConfig {
    /// The online wait bound as a `Duration`.
    pub fn online_timeout(&self) -> Duration {
        Duration::from_millis(self.online_timeout_ms)
    }
}

/// Load configuration from a TOML file, with defaults.
///
/// A missing, unreadable, or malformed file yields the default config; the
/// reason is logged.
pub fn load_config(path: Option<&Path>) -> ModulesConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return ModulesConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            return ModulesConfig::default();
        }
    };

    match toml::from_str::<ModulesConfig>(&contents) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to parse config, using defaults"
            );
            ModulesConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    l2l_home().join("config.toml")
}

/// Get the default l2l home directory.
pub fn l2l_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".l2l")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ModulesConfig::default();
        assert_eq!(config.online_timeout_ms, 3000);
        assert_eq!(config.inspect_depth, 1);
        assert_eq!(config.system_name, "default");
        assert!(!config.session_id.is_empty());
    }

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/l2l.toml")));
        assert_eq!(config.online_timeout_ms, DEFAULT_ONLINE_TIMEOUT_MS);
    }

    #[test]
    fn test_load_config_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "session_id = \"tracker:abc\"").unwrap();
        writeln!(f, "online_timeout_ms = 500").unwrap();
        writeln!(f, "peers = [\"127.0.0.1:9100\"]").unwrap();
        drop(f);

        let config = load_config(Some(&path));
        assert_eq!(config.session_id, "tracker:abc");
        assert_eq!(config.online_timeout(), Duration::from_millis(500));
        assert_eq!(config.peers, vec!["127.0.0.1:9100".to_string()]);
        assert_eq!(config.inspect_depth, 1);
    }

    #[test]
    fn test_load_config_malformed_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "online_timeout_ms = \"soon\"").unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.online_timeout_ms, DEFAULT_ONLINE_TIMEOUT_MS);
    }
}
