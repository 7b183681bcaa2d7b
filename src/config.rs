//! Configuration for AgentProbe.
//!
//! Loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`~/.config/agentprobe/config.toml`)
//! 3. Built-in defaults (lowest)

use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_PROXY_PORT: u16 = 9090;
const DEFAULT_WEB_PORT: u16 = 9091;
const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10 MiB
const DEFAULT_MAX_REQUESTS_IN_MEMORY: usize = 2000;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub proxy_port: u16,
    pub web_port: u16,
    pub data_dir: PathBuf,
    pub headless: bool,
    /// Body-size cap; bodies beyond this are truncated with a marker.
    pub max_body_size: usize,
    /// Bounds the flow controller's in-flight `pending` map so a client
    /// that never completes a response can't leak memory unboundedly.
    pub max_requests_in_memory: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".parse().unwrap(),
            proxy_port: DEFAULT_PROXY_PORT,
            web_port: DEFAULT_WEB_PORT,
            data_dir: default_data_dir(),
            headless: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_requests_in_memory: DEFAULT_MAX_REQUESTS_IN_MEMORY,
        }
    }
}

/// Subset of [`Config`] that may come from the TOML file; every field is
/// optional so a partial file only overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    proxy_port: Option<u16>,
    web_port: Option<u16>,
    data_dir: Option<String>,
    headless: Option<bool>,
    max_body_size: Option<usize>,
    max_requests_in_memory: Option<usize>,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".agentprobe")
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("agentprobe.db")
    }

    pub fn ca_bundle_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mitmproxy")
            .join("mitmproxy-ca-cert.pem")
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agentprobe").join("config.toml"))
    }

    /// Write the default config as a template if no file exists yet.
    /// Config is optional, so any filesystem error here is silently
    /// ignored — the process still runs on built-in defaults.
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else { return };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    fn to_toml(&self) -> String {
        format!(
            "# AgentProbe configuration\n\
             host = \"{}\"\n\
             proxy_port = {}\n\
             web_port = {}\n\
             data_dir = \"{}\"\n\
             headless = {}\n\
             max_body_size = {}\n\
             max_requests_in_memory = {}\n",
            self.host,
            self.proxy_port,
            self.web_port,
            self.data_dir.display(),
            self.headless,
            self.max_body_size,
            self.max_requests_in_memory,
        )
    }

    /// Read and parse the config file. A missing file is not an error
    /// (defaults apply); a present-but-unparsable file is fatal — broken
    /// configuration should be surfaced loudly, not silently ignored.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else { return FileConfig::default() };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => return FileConfig::default(),
        };
        match toml::from_str(&contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                eprintln!(
                    "┌─ Invalid configuration file ─────────────────────────\n\
                     │ {}\n\
                     │\n\
                     │ {err}\n\
                     └───────────────────────────────────────────────────────",
                    path.display()
                );
                std::process::exit(1);
            }
        }
    }

    /// Resolve the effective configuration: environment variables override
    /// the config file, which overrides built-in defaults.
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        let defaults = Self::default();

        let host = std::env::var("AGENTPROBE_HOST")
            .ok()
            .or(file.host)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.host);

        let proxy_port = std::env::var("AGENTPROBE_PROXY_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(file.proxy_port)
            .unwrap_or(defaults.proxy_port);

        let web_port = std::env::var("AGENTPROBE_WEB_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(file.web_port)
            .unwrap_or(defaults.web_port);

        let data_dir = std::env::var("AGENTPROBE_DATA_DIR")
            .ok()
            .or(file.data_dir)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let headless = std::env::var("AGENTPROBE_HEADLESS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(file.headless)
            .unwrap_or(defaults.headless);

        let max_body_size = file.max_body_size.unwrap_or(defaults.max_body_size);
        let max_requests_in_memory = file.max_requests_in_memory.unwrap_or(defaults.max_requests_in_memory);

        Self { host, proxy_port, web_port, data_dir, headless, max_body_size, max_requests_in_memory }
    }

    #[cfg(test)]
    pub fn test_default() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.proxy_port, 9090);
        assert_eq!(config.web_port, 9091);
        assert!(config.data_dir.ends_with(".agentprobe"));
    }

    #[test]
    fn database_path_is_under_data_dir() {
        let config = Config::default();
        assert_eq!(config.database_path(), config.data_dir.join("agentprobe.db"));
    }
}
