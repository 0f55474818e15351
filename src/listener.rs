//! Listener: accepts TCP connections and spawns a handler per connection.
//!
//! Grounded on the teacher's `run_record`/`RecordingManager` shutdown shape
//! (`src/main.rs`, `src/manager.rs`) and on the reference emulator's
//! accept-loop-with-periodic-timeout pattern (`ZwoEmulator.start`'s
//! `server_socket.settimeout(1.0)`).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::connection;
use crate::error::{Result, ServerError};
use crate::seed::SeedSource;
use crate::session::now_epoch_secs;

/// How often the accept loop wakes up to re-check the shutdown flag when
/// no connection is pending — mirrors the reference emulator's 1s accept
/// timeout.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bind and serve until `quit` is issued on some connection or the process
/// receives a termination signal (checked by the caller; see `main.rs`).
pub async fn run(config: ServerConfig) -> Result<()> {
    let addr = SocketAddr::new(config.host, config.port);
    let listener = bind(addr, config.backlog)?;
    serve(listener, config).await
}

/// Serve an already-bound listener. Split out from [`run`] so tests can bind
/// to an OS-assigned port (`:0`) and learn the real address before serving.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> Result<()> {
    let local_addr = listener.local_addr().map_err(ServerError::Io)?;
    let startup_time = now_epoch_secs() as u64;
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut seeds = SeedSource::new(config.seed);

    info!(addr = %local_addr, backlog = config.backlog, seeded = config.seed.is_some(), "listening");

    while !shutdown.load(Ordering::SeqCst) {
        match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let profile = config.camera.clone();
                let seed = seeds.next_seed();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    connection::handle(stream, peer, profile, seed, startup_time, shutdown).await;
                });
            }
            Ok(Err(e)) => {
                warn!(error = %e, "accept failed");
            }
            Err(_) => {
                // Timed out waiting for a connection; loop back and
                // re-check the shutdown flag.
            }
        }
    }

    info!("shutdown flag observed, listener exiting");
    Ok(())
}

pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(ServerError::Io)?;
    socket.set_reuse_address(true).map_err(ServerError::Io)?;
    socket.set_nonblocking(true).map_err(ServerError::Io)?;
    socket.bind(&addr.into()).map_err(ServerError::Io)?;
    socket.listen(backlog.max(5) as i32).map_err(ServerError::Io)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(ServerError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_on_ephemeral_port_succeeds() {
        let addr = SocketAddr::new("127.0.0.1".parse().unwrap(), 0);
        let listener = bind(addr, 8).expect("bind should succeed");
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn bind_enforces_minimum_backlog() {
        let addr = SocketAddr::new("127.0.0.1".parse().unwrap(), 0);
        // A requested backlog below the floor should still succeed, not panic.
        let listener = bind(addr, 0);
        assert!(listener.is_ok());
    }
}
