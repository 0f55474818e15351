//! Connection handler: the line framer over one TCP connection. Reads
//! bytes, splits them into LF/CR-terminated commands, drives the
//! dispatcher, and writes each reply (text line, then optional binary
//! payload) back before reading the next command.
//!
//! Grounded on the teacher's per-camera ingestion loop shape
//! (`src/ingestion.rs`) generalized from "accumulate until a deadline" to
//! "accumulate until a terminator".

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::camera::CameraProfile;
use crate::dispatcher;
use crate::producer;
use crate::session::{SessionPhase, SessionState};

const READ_CHUNK: usize = 4096;

/// Handle one accepted connection until it closes, errors, or `quit` is
/// issued. Always leaves the session `closed` and its producer joined on
/// return.
pub async fn handle(
    mut stream: TcpStream,
    peer: SocketAddr,
    profile: CameraProfile,
    seed: u64,
    startup_time: u64,
    shutdown: Arc<AtomicBool>,
) {
    info!(%peer, "connection accepted");

    let session = Arc::new(Mutex::new(SessionState::new(&profile, seed, startup_time)));
    let mut producer_handle: Option<JoinHandle<()>> = None;
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    'conn: loop {
        while let Some(pos) = find_terminator(&buf) {
            let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (text, payload) =
                dispatcher::dispatch(&session, &mut producer_handle, &shutdown, trimmed).await;
            debug!(%peer, command = trimmed, reply = %text, "dispatched command");

            if stream.write_all(text.as_bytes()).await.is_err()
                || stream.write_all(b"\n").await.is_err()
            {
                warn!(%peer, "write failed, closing connection");
                break 'conn;
            }
            if let Some(p) = payload {
                if stream.write_all(&p).await.is_err() {
                    warn!(%peer, "payload write failed, closing connection");
                    break 'conn;
                }
            }
        }

        match stream.read(&mut chunk).await {
            Ok(0) => {
                info!(%peer, "connection closed by peer");
                break;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                warn!(%peer, error = %e, "read error, closing connection");
                break;
            }
        }
    }

    {
        let mut s = session.lock();
        s.phase = SessionPhase::Closed;
    }
    producer::stop_and_join(&mut producer_handle).await;
    info!(%peer, "connection torn down");
}

/// Index of the first LF or CR in `buf`, if any.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n' || b == b'\r')
}
