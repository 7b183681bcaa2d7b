// CLI module - command-line argument parsing and handlers
//
// Subcommands: `start` runs the proxy + web UI (the default when no
// subcommand is given); `init` reports on the data directory and CA cert;
// `trust` installs the CA into the system trust store; `env` prints the
// shell exports a client needs; `version` prints the crate version.

use crate::config::{Config, VERSION};
use clap::{Parser, Subcommand};

/// AgentProbe - local intercepting proxy for LLM agent traffic
#[derive(Parser)]
#[command(name = "agentprobe")]
#[command(version = VERSION)]
#[command(about = "Local intercepting proxy that captures and classifies LLM agent API traffic", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the proxy and web UI
    Start {
        #[arg(long, default_value_t = 9090)]
        proxy_port: u16,

        #[arg(long, default_value_t = 9091)]
        web_port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Skip launching the web UI
        #[arg(long)]
        headless: bool,
    },
    /// Report on the data directory and CA certificate
    Init,
    /// Install the CA certificate into the system trust store
    Trust,
    /// Print shell exports to route traffic through the proxy
    Env,
    /// Print the version and exit
    Version,
}

/// Outcome of a handled subcommand, mapped to a process exit code by the
/// caller. `Start` is not handled here — it falls through to the normal
/// proxy startup path in `main`.
pub enum Handled {
    NotHandled(StartArgs),
    Exit(i32),
}

pub struct StartArgs {
    pub proxy_port: u16,
    pub web_port: u16,
    pub host: String,
    pub headless: bool,
}

impl Default for StartArgs {
    fn default() -> Self {
        let defaults = Config::default();
        Self { proxy_port: defaults.proxy_port, web_port: defaults.web_port, host: defaults.host.to_string(), headless: defaults.headless }
    }
}

/// Parse argv and dispatch. Returns `Handled::NotHandled` (with the
/// resolved `start` flags) when the proxy itself should run.
pub fn handle_cli() -> Handled {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Start { proxy_port, web_port, host, headless }) => {
            Handled::NotHandled(StartArgs { proxy_port, web_port, host, headless })
        }
        Some(Commands::Init) => {
            handle_init();
            Handled::Exit(0)
        }
        Some(Commands::Trust) => Handled::Exit(handle_trust()),
        Some(Commands::Env) => {
            handle_env();
            Handled::Exit(0)
        }
        Some(Commands::Version) => {
            println!("agentprobe {VERSION}");
            Handled::Exit(0)
        }
        None => Handled::NotHandled(StartArgs::default()),
    }
}

fn handle_init() {
    let config = Config::from_env();
    println!("data directory: {}", config.data_dir.display());
    let ca_path = Config::ca_bundle_path();
    if ca_path.exists() {
        println!("CA cert found: {}", ca_path.display());
    } else {
        println!("CA cert not found at {}", ca_path.display());
        println!("  Run the proxy once to generate it, then `agentprobe trust`.");
    }
}

fn handle_trust() -> i32 {
    let config = Config::from_env();
    if crate::cert::install_ca_certificate(&config) {
        println!("CA certificate installed to system trust store");
        0
    } else {
        eprintln!("failed to install CA certificate");
        1
    }
}

fn handle_env() {
    let config = Config::from_env();
    let vars = crate::cert::env_vars(&config);
    println!("{}", crate::cert::format_env_export(&vars));
}
