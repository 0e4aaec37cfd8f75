//! Tally bootstrap node entry point.
//!
//! Loads the TOML config, builds the static token policy from it, and runs
//! the handshake listener until Ctrl-C.
//!
//! # Wiring
//!
//! ```text
//! main()
//!  └─ load_config()           -- tally.toml, or TALLY_CONFIG
//!  └─ StaticTokenPolicy       -- token table from [[tokens]]
//!  └─ SessionManager::serve   -- accept loop, one task per handshake
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally_node::audit::TracingAudit;
use tally_node::config::{load_config, SessionConfig};
use tally_node::hooks::PartyProfile;
use tally_node::policy::StaticTokenPolicy;
use tally_node::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("TALLY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("tally.toml"));
    let config = load_config(&config_path)?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.node.log_level.clone())),
        )
        .init();

    info!(config = %config_path.display(), "tally bootstrap node starting");

    // The reference policy serves its provisions from the first cadre peer;
    // real deployments inject their own `TallyPolicy`.
    let endpoint = config
        .node
        .cadre_peer_addrs
        .first()
        .cloned()
        .unwrap_or_else(|| "127.0.0.1:5432".to_string());
    let policy = Arc::new(StaticTokenPolicy::from_config(&config.tokens, endpoint));

    let manager = Arc::new(SessionManager::new(
        policy,
        Arc::new(TracingAudit),
        PartyProfile {
            party_id: config.node.party_id.clone(),
            cadre_peer_addrs: config.node.cadre_peer_addrs.clone(),
        },
        SessionConfig::from(&config.session),
    ));

    let bind_addr = format!("{}:{}", config.network.bind_address, config.network.listen_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, tokens = config.tokens.len(), "listening for handshakes");

    let serve = tokio::spawn(Arc::clone(&manager).serve(listener));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    serve.abort();

    let counts = manager.active_session_counts();
    info!(
        listener_sessions = counts.listener,
        dialer_sessions = counts.dialer,
        "tally bootstrap node stopped"
    );
    Ok(())
}
