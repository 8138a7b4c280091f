//! # RA-Mutex Peer
//!
//! One symmetric peer of the distributed mutex.
//!
//! ## Startup Sequence
//!
//! 1. Load the peer file, select the local entry by `--row`
//! 2. Apply environment overrides (`RA_BIND_ADDRESS`, `RA_BID_TIMEOUT_MS`)
//! 3. Start listening for `AskPermission`
//! 4. Register every other entry (connections are opened lazily)
//! 5. Read commands from stdin until `exit` or Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

use node_runtime::config::NodeConfig;
use node_runtime::frontend::Frontend;
use node_runtime::telemetry::init_tracing;
use ra_mutual_exclusion::{ExclusionService, TcpPeerConnector, TcpPermissionServer};

/// RA-Mutex peer: Ricart-Agrawala mutual exclusion over TCP
#[derive(Parser, Debug)]
#[command(name = "node-runtime")]
#[command(about = "Symmetric peer of a Ricart-Agrawala distributed mutex")]
struct Args {
    /// Peer file (TOML)
    #[arg(short, long, default_value = "peers.toml")]
    config: PathBuf,

    /// Row of the peer file describing this peer
    #[arg(short, long, default_value_t = 0)]
    row: usize,

    /// Display name of this peer
    #[arg(short, long)]
    name: Option<String>,
}

async fn run(args: Args) -> Result<()> {
    let mut config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env_overrides();

    let topology = config
        .topology(args.row, args.name.as_deref())
        .context("selecting the local peer")?;
    info!(
        peer = %topology.local,
        peers = topology.peers.len(),
        "Loaded peer settings"
    );

    let connector = TcpPeerConnector::new().with_connect_timeout(config.timing.connect_timeout());
    let service = ExclusionService::with_config(
        topology.local.clone(),
        connector,
        config.timing.service_config(),
    );

    // Listen before dialing anyone.
    let endpoint = config.bind_endpoint(&topology.local);
    let server = TcpPermissionServer::bind(&endpoint, Arc::new(service.clone()))
        .await
        .context("binding the permission server")?;
    let mut serving = tokio::spawn(server.serve());

    let registered = service.register_peers(topology.peers);
    info!(registered, "Prepared connections to other peers");

    let frontend = Frontend::new(service, config.timing.clone());
    let stdin = BufReader::new(tokio::io::stdin());

    tokio::select! {
        result = frontend.run(stdin) => result?,
        result = &mut serving => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Permission server stopped"),
                Err(e) => error!(error = %e, "Permission server task failed"),
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
    }

    serving.abort();
    info!("Peer shut down");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?;
    let result = runtime.block_on(run(args));

    // A pending stdin read would otherwise keep the process alive.
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}
