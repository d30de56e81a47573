//! Dotbox Relay Server
//!
//! Real-time lobby and game-room relay for Dotbox.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dotbox::network::{open_log, AuthConfig, JwtResolver, RelayServer, ServerConfig};
use dotbox::VERSION;

#[derive(Parser, Debug)]
#[command(name = "dotbox-relay")]
#[command(version, about = "Dotbox relay server - lobby chat, challenges and live game rooms")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "DOTBOX_ADDR", default_value = "0.0.0.0:8090")]
    addr: SocketAddr,

    /// Path to SQLite database file. History stays in memory when unset.
    #[arg(long, env = "DOTBOX_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Maximum concurrent connections.
    #[arg(long, env = "DOTBOX_MAX_CONNECTIONS", default_value_t = 1000)]
    max_connections: usize,

    /// Outbound frames a client may have queued before it is dropped.
    #[arg(long, env = "DOTBOX_OUTBOUND_CAPACITY", default_value_t = 256)]
    outbound_capacity: usize,

    /// Close connections idle for this many seconds.
    #[arg(long, env = "DOTBOX_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    /// Only admit the two paired players to a game room.
    #[arg(long, env = "DOTBOX_REQUIRE_PARTICIPANT")]
    require_participant: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "DOTBOX_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "dotbox=info".into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(version = VERSION, addr = %args.addr, "Starting dotbox-relay");

    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        anyhow::bail!("no token verification key: set AUTH_SECRET or AUTH_PUBLIC_KEY_PEM");
    }
    if auth.skip_expiry {
        warn!("Token expiry checks are disabled");
    }

    let log = open_log(args.db_path.as_deref()).await?;

    let config = ServerConfig {
        bind_addr: args.addr,
        max_connections: args.max_connections,
        outbound_capacity: args.outbound_capacity,
        idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
        require_participant: args.require_participant,
        ..Default::default()
    };
    let server = RelayServer::new(config, Arc::new(JwtResolver::new(auth)), log);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
