//! portfwdd - port forwarding daemon
//!
//! Restores every stored forwarding rule, then serves the HTTP control
//! surface until Ctrl-C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use portfwdd::{server, DaemonConfig, FwdMgr, JsonFileStore, NatDriver, RelayDriver, DEFAULT_CONFIG_PATH};

/// Port forwarding daemon
#[derive(Parser, Debug)]
#[command(name = "portfwdd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Control surface listen address
    #[arg(short = 'l', long, env = "PORTFWD_LISTEN")]
    listen: Option<SocketAddr>,

    /// Public IP matched by NAT rules
    #[arg(long, env = "SERVER_PUBLIC_IP")]
    public_ip: Option<String>,

    /// Desired-state table location
    #[arg(short = 's', long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log_level);
    info!("--- Starting portfwdd ---");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Config file, then command line overrides
fn load_config(args: &Args) -> anyhow::Result<DaemonConfig> {
    let mut config = DaemonConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(public_ip) = &args.public_ip {
        config.nat.public_ip = Some(public_ip.clone());
    }
    if let Some(store) = &args.store {
        config.store.path = store.clone();
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let public_ip = config.public_ip()?.to_string();
    info!("Public IP: {}", public_ip);
    info!("Store: {}", config.store.path.display());

    let relay = RelayDriver::new(config.relay.socat_cmd.clone(), config.startup_grace());
    let nat = NatDriver::new(
        config.nat.iptables_cmd.clone(),
        public_ip,
        config.command_timeout(),
    );
    let store = JsonFileStore::new(config.store.path.clone());

    let mut mgr = FwdMgr::new(store, Box::new(relay), Box::new(nat));
    let report = mgr.startup_sync().await.context("startup sync")?;
    for (key, e) in &report.failed {
        warn!(key = %key, "Rule kept but not live: {}", e);
    }

    server::serve(config.server.listen_addr, Arc::new(Mutex::new(mgr))).await?;

    info!("portfwdd exiting; live forwards are left in place");
    Ok(())
}
