//! CA-trust installation and proxy environment-variable helpers.
//!
//! AgentProbe relies on an external MITM engine (e.g. mitmproxy) to generate
//! the CA used for TLS interception; this module only installs that existing
//! certificate into the system trust store and prints the shell exports a
//! client needs to route traffic through the proxy.

use crate::config::Config;
use std::collections::BTreeMap;
use std::path::Path;

const LINUX_CA_DIR: &str = "/usr/local/share/ca-certificates";
const MACOS_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

/// Install the CA certificate into the platform trust store. Returns `false`
/// (never panics) on any failure — the CLI maps that to a non-zero exit.
pub fn install_ca_certificate(config: &Config) -> bool {
    let cert_path = Config::ca_bundle_path();
    if !cert_path.exists() {
        eprintln!(
            "mitmproxy CA not found at {} — run the proxy once to generate it",
            cert_path.display()
        );
        return false;
    }
    let _ = config;

    match std::env::consts::OS {
        "linux" => install_linux(&cert_path),
        "macos" => install_macos(&cert_path),
        other => {
            eprintln!("unsupported platform '{other}' for automatic CA install");
            false
        }
    }
}

fn install_linux(cert_path: &Path) -> bool {
    let dest_dir = Path::new(LINUX_CA_DIR);
    if std::fs::create_dir_all(dest_dir).is_err() {
        eprintln!("failed to create {}", dest_dir.display());
        return false;
    }
    let dest = dest_dir.join("agentprobe-ca.crt");
    if std::fs::copy(cert_path, &dest).is_err() {
        eprintln!("failed to copy CA cert to {}", dest.display());
        return false;
    }
    match which("update-ca-certificates") {
        Some(bin) => match std::process::Command::new(bin).status() {
            Ok(status) if status.success() => true,
            _ => {
                eprintln!("update-ca-certificates failed");
                false
            }
        },
        None => {
            eprintln!("copied cert to {} but update-ca-certificates was not found", dest.display());
            true
        }
    }
}

fn install_macos(cert_path: &Path) -> bool {
    let status = std::process::Command::new("security")
        .args(["add-trusted-cert", "-d", "-r", "trustRoot", "-k", MACOS_KEYCHAIN])
        .arg(cert_path)
        .status();
    matches!(status, Ok(s) if s.success())
}

fn which(bin: &str) -> Option<std::path::PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).map(|dir| dir.join(bin)).find(|p| p.exists())
    })
}

/// Environment variables a client should export to route through the proxy
/// and trust its CA.
pub fn env_vars(config: &Config) -> BTreeMap<String, String> {
    let proxy_url = format!("http://{}:{}", config.host, config.proxy_port);
    let cert = Config::ca_bundle_path().display().to_string();
    let mut vars = BTreeMap::new();
    vars.insert("HTTP_PROXY".to_string(), proxy_url.clone());
    vars.insert("HTTPS_PROXY".to_string(), proxy_url.clone());
    vars.insert("http_proxy".to_string(), proxy_url.clone());
    vars.insert("https_proxy".to_string(), proxy_url);
    vars.insert("NODE_EXTRA_CA_CERTS".to_string(), cert.clone());
    vars.insert("REQUESTS_CA_BUNDLE".to_string(), cert.clone());
    vars.insert("SSL_CERT_FILE".to_string(), cert);
    vars
}

/// Render `env_vars` as `export KEY=value` lines, shell-quoting values that
/// need it.
pub fn format_env_export(vars: &BTreeMap<String, String>) -> String {
    vars.iter().map(|(k, v)| format!("export {k}={}", shell_quote(v))).collect::<Vec<_>>().join("\n")
}

fn shell_quote(value: &str) -> String {
    if value.contains(' ') || value.contains('\'') || value.contains('"') {
        format!("'{}'", value.replace('\'', "'\\''"))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_cover_both_cases_and_ca_bundle() {
        let config = Config::test_default();
        let vars = env_vars(&config);
        assert_eq!(vars.get("HTTP_PROXY"), vars.get("HTTPS_PROXY"));
        assert!(vars.contains_key("NODE_EXTRA_CA_CERTS"));
        assert!(vars.contains_key("SSL_CERT_FILE"));
    }

    #[test]
    fn format_export_quotes_values_with_spaces() {
        let mut vars = BTreeMap::new();
        vars.insert("FOO".to_string(), "has space".to_string());
        assert_eq!(format_env_export(&vars), "export FOO='has space'");
    }

    #[test]
    fn format_export_leaves_plain_values_bare() {
        let mut vars = BTreeMap::new();
        vars.insert("FOO".to_string(), "http://127.0.0.1:9090".to_string());
        assert_eq!(format_env_export(&vars), "export FOO=http://127.0.0.1:9090");
    }
}
