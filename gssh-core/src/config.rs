use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root prefix joined in front of every identity path.
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub keygen: KeygenConfig,
    #[serde(default)]
    pub clipboard: ClipboardConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: default_store(),
            backend: BackendConfig::default(),
            agent: AgentConfig::default(),
            keygen: KeygenConfig::default(),
            clipboard: ClipboardConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type", default = "default_backend_kind")]
    pub kind: String,
    /// Program name or path of the backend CLI.
    #[serde(default = "default_backend_binary")]
    pub binary: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            binary: default_backend_binary(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent socket; `$SSH_AUTH_SOCK` when unset.
    #[serde(default)]
    pub socket: Option<PathBuf>,
    /// Default key lifetime in seconds; 0 keeps the key until the agent exits.
    #[serde(default)]
    pub lifetime_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygenConfig {
    #[serde(rename = "type", default = "default_key_type")]
    pub key_type: String,
    #[serde(default = "default_bits")]
    pub bits: usize,
    #[serde(default = "default_password_length")]
    pub password_length: usize,
    #[serde(default = "default_true")]
    pub symbols: bool,
}

impl Default for KeygenConfig {
    fn default() -> Self {
        Self {
            key_type: default_key_type(),
            bits: default_bits(),
            password_length: default_password_length(),
            symbols: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardConfig {
    #[serde(default = "default_clipboard_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_clipboard_timeout(),
        }
    }
}

fn default_store() -> String {
    "ssh-keys".to_string()
}

fn default_backend_kind() -> String {
    "gopass".to_string()
}

fn default_backend_binary() -> String {
    "gopass".to_string()
}

fn default_key_type() -> String {
    "ed25519".to_string()
}

fn default_bits() -> usize {
    4096
}

fn default_password_length() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_clipboard_timeout() -> u64 {
    45
}

/// `$XDG_CONFIG_HOME/gssh/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("gssh").join("config.toml")
}

/// Load the config at `path`; a missing file yields the defaults.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    use anyhow::Context as _;

    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store, "ssh-keys");
        assert_eq!(config.backend.kind, "gopass");
        assert_eq!(config.backend.binary, "gopass");
        assert_eq!(config.agent.socket, None);
        assert_eq!(config.agent.lifetime_secs, 0);
        assert_eq!(config.keygen.key_type, "ed25519");
        assert_eq!(config.keygen.bits, 4096);
        assert_eq!(config.keygen.password_length, 32);
        assert!(config.keygen.symbols);
        assert_eq!(config.clipboard.timeout_secs, 45);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            store = "keys"

            [agent]
            lifetime_secs = 300

            [keygen]
            type = "rsa"
            "#,
        )
        .unwrap();
        assert_eq!(config.store, "keys");
        assert_eq!(config.agent.lifetime_secs, 300);
        assert_eq!(config.keygen.key_type, "rsa");
        assert_eq!(config.keygen.bits, 4096);
        assert_eq!(config.backend.binary, "gopass");
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = std::env::temp_dir().join(format!(
            "gssh-config-missing-{}/config.toml",
            std::process::id()
        ));
        let config = load(&path).unwrap();
        assert_eq!(config.store, "ssh-keys");
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = std::env::temp_dir().join(format!("gssh-config-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "store = [").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
