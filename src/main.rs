//! Sendpath demo server - Entry Point
//!
//! Accepts TCP clients and feeds each one a greeting followed by heartbeat
//! packets through its own send path.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use sendpath::connection::{ClientId, ConnectionManager};
use sendpath::protocol::tag;
use sendpath::{Config, SendPath, VERSION};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // Load configuration
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Initialize tracing/logging
    sendpath::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting sendpath server"
    );

    // Initialize metrics if enabled
    if config.metrics.enabled {
        sendpath::metrics::init_metrics(&config.metrics)?;
        info!(
            bind_addr = %config.metrics.bind_addr,
            "Metrics endpoint started"
        );
    }

    let config = Arc::new(config);
    let manager = ConnectionManager::new();
    let listener = TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!(bind_addr = %config.server.bind_addr, "Server listening");

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut sessions = JoinSet::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    sessions.spawn(run_session(
                        stream,
                        addr,
                        config.clone(),
                        manager.clone(),
                        shutdown_tx.subscribe(),
                    ));
                }
                Err(e) => warn!(error = %e, "Failed to accept client"),
            },
            _ = &mut shutdown => {
                info!(
                    clients = manager.connection_count(),
                    "Shutdown signal received, disconnecting clients..."
                );
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    while let Some(joined) = sessions.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Session task failed");
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Register a client, serve it until it goes away, then clean up
async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<Config>,
    manager: Arc<ConnectionManager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let id = manager.register(addr);

    if let Err(e) = serve_client(id, stream, &config, &manager, &mut shutdown_rx).await {
        warn!(client_id = %id, error = %e, "Session ended with error");
    }

    manager.unregister(id);
}

async fn serve_client(
    id: ClientId,
    stream: TcpStream,
    config: &Config,
    manager: &Arc<ConnectionManager>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<()> {
    // The writer thread does blocking writes
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;

    let path = Arc::new(
        SendPath::builder(id, Arc::new(stream), manager.clone())
            .config(config.send.clone())
            .on_write_failure(|failure| {
                debug!(
                    client_id = %failure.client_id,
                    len = failure.handle.len(),
                    error = %failure.error,
                    "Packet lost"
                );
            })
            .build(),
    );
    path.start()?;

    path.send_packet(tag::HELLO, format!("sendpath {VERSION}").as_bytes())?;

    let mut ticker = tokio::time::interval(config.server.heartbeat_interval());
    let mut seq: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if manager.is_pending_termination(id) {
                    break;
                }
                seq = seq.wrapping_add(1);
                if !path.send_packet(tag::HEARTBEAT, &seq.to_le_bytes())? {
                    debug!(client_id = %id, seq, "Heartbeat dropped");
                }
            }
            _ = shutdown_rx.recv() => {
                if path.send_packet(tag::DISCONNECT, &[])? {
                    wait_for_termination(manager, id, config.send.write_timeout()).await;
                }
                break;
            }
        }
    }

    let stopping = path.clone();
    tokio::task::spawn_blocking(move || stopping.reset()).await??;
    Ok(())
}

/// Give the writer time to flush a disconnect packet
async fn wait_for_termination(manager: &ConnectionManager, id: ClientId, limit: Duration) {
    let start = Instant::now();
    while !manager.is_pending_termination(id) && start.elapsed() < limit {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
