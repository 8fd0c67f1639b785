//! # kece server binary
//!
//! Loads configuration, opens the storage engine and runs the server until
//! SIGINT or SIGTERM.
//!
//! # Configuration Priority
//! 1. Command line arguments (highest priority)
//! 2. Environment variables (`KECE_PORT`, `KECE_AUTH`, ...)
//! 3. Configuration file (kece.toml)
//! 4. Default values (lowest priority)

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use kece::{store, Config, Server};

/// Command line arguments; every flag overrides the matching config entry.
#[derive(Debug, Parser)]
#[command(name = "kece", version, about = "Line-protocol key-value server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "kece.toml")]
    config: PathBuf,

    /// Address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Network family: tcp, tcp4 or tcp6
    #[arg(short, long)]
    network: Option<String>,

    /// Shared secret required by AUTH (empty disables auth)
    #[arg(short, long)]
    auth: Option<String>,

    /// Storage engine: rwlock or sled
    #[arg(long)]
    engine: Option<String>,

    /// Storage path for the sled engine
    #[arg(long)]
    storage_path: Option<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(auth) = self.auth {
            config.auth = auth;
        }
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(path) = self.storage_path {
            config.storage_path = path;
        }
    }
}

fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug kece
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let store = store::open(&config)?;
        log::info!("Using {} storage engine", config.engine);
        Server::new(config, store).run().await
    })
}
