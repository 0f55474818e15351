//! Command dispatcher — parses one line of the wire protocol, validates it
//! against the session's current state, mutates the session, and returns
//! `(text_reply, optional_binary_payload)`.
//!
//! Grounded on `handle_command` in
//! `original_source/src/py/zwo_emulator.py`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::producer;
use crate::session::{now_epoch_secs, SessionPhase, SharedSession};
use crate::synth;

const ERR_NOT_OPEN: &str = "-Eerr=21";
const ERR_NOT_IDLE: &str = "-Eerr=22";
const ERR_NO_DATA: &str = "-Eerr=23";
const ERR_NOT_STREAMING: &str = "-Eerr=24";
const ERR_UNKNOWN_COMMAND: &str = "-Eunknown command";
const ERR_INVALID_COMMAND: &str = "-Einvalid command";
const ERR_NO_DATA_TIMEOUT: &str = "-Enodata";

/// The reply to one dispatched command: a text line and, for `data`/`next`,
/// the raw frame bytes that follow it.
pub type Reply = (String, Option<Vec<u8>>);

fn ok(text: impl Into<String>) -> Reply {
    (text.into(), None)
}

/// Poll interval used while `next` waits for a fresher frame than the one
/// last delivered on this connection.
const NEXT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Dispatch one already-trimmed command line. `producer_handle` is the
/// connection's own video producer handle (if a stream is running);
/// `shutdown` is the process-wide shutdown flag `quit` sets.
pub async fn dispatch(
    session: &SharedSession,
    producer_handle: &mut Option<JoinHandle<()>>,
    shutdown: &Arc<AtomicBool>,
    line: &str,
) -> Reply {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((cmd, args)) = tokens.split_first() else {
        return ok(ERR_INVALID_COMMAND);
    };
    let cmd = cmd.to_lowercase();

    match cmd.as_str() {
        "version" => {
            let s = session.lock();
            ok(format!("1.0.4 {} {}", s.cookie, s.startup_time))
        }
        "offtime" => {
            let mut s = session.lock();
            if let Some(t) = args.first().and_then(|a| a.parse::<i64>().ok()) {
                s.offtime = now_epoch_secs() - t;
            }
            ok(s.offtime.to_string())
        }
        "asigetnum" => ok("1"),
        "asigetserialnumber" => {
            let s = session.lock();
            ok(s.serial_number.clone())
        }
        "open" => {
            let mut s = session.lock();
            if s.phase == SessionPhase::Closed {
                s.phase = SessionPhase::Idle;
            }
            ok(format!(
                "{} {} {} {} {} {}",
                s.width, s.height, s.cooler, s.color, s.bit_depth, s.model
            ))
        }
        "close" => {
            {
                let mut s = session.lock();
                s.phase = SessionPhase::Closed;
            }
            producer::stop_and_join(producer_handle).await;
            ok("OK")
        }
        "setup" => dispatch_setup(session, args),
        "exptime" => {
            let mut s = session.lock();
            if s.phase == SessionPhase::Closed {
                return ok(ERR_NOT_OPEN);
            }
            if let Some(v) = args.first().and_then(|a| a.parse::<f64>().ok()) {
                s.exp_time = v;
            }
            ok(format!("{:.6}", s.exp_time))
        }
        "gain" => {
            let mut s = session.lock();
            if s.phase == SessionPhase::Closed {
                return ok(ERR_NOT_OPEN);
            }
            if let Some(v) = args.first().and_then(|a| a.parse::<i32>().ok()) {
                s.gain = v;
            }
            ok(s.gain.to_string())
        }
        "offset" => {
            let mut s = session.lock();
            if s.phase == SessionPhase::Closed {
                return ok(ERR_NOT_OPEN);
            }
            if let Some(v) = args.first().and_then(|a| a.parse::<i32>().ok()) {
                s.offset = v;
            }
            ok(s.offset.to_string())
        }
        "status" => {
            let mut s = session.lock();
            s.settle_exposure();
            if s.phase == SessionPhase::Exposing {
                let elapsed = s.exposure_start.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
                ok(format!("exposing {:.1}", elapsed))
            } else {
                ok(s.phase.as_str())
            }
        }
        "expose" => {
            let mut s = session.lock();
            if s.phase != SessionPhase::Idle {
                return ok(ERR_NOT_IDLE);
            }
            s.phase = SessionPhase::Exposing;
            s.exposure_start = Some(Instant::now());
            ok("OK")
        }
        "data" => dispatch_data(session, args),
        "tempcon" => dispatch_tempcon(session, args),
        "fancon" => {
            let mut s = session.lock();
            match args.first().map(|a| a.to_lowercase()) {
                Some(ref v) if v == "on" => s.fan_on = 1,
                Some(ref v) if v == "off" => s.fan_on = 0,
                _ => {}
            }
            ok(s.fan_on.to_string())
        }
        "filters" => {
            let s = session.lock();
            ok(s.filter_count.to_string())
        }
        "filter" => {
            let mut s = session.lock();
            if let Some(v) = args.first().and_then(|a| a.parse::<i32>().ok()) {
                s.filter_position = v;
            }
            ok(s.filter_position.to_string())
        }
        "start" => {
            let mut s = session.lock();
            if s.phase != SessionPhase::Idle {
                return ok(ERR_NOT_IDLE);
            }
            s.phase = SessionPhase::Streaming;
            s.video_seq = 0;
            s.video_last = 0;
            s.video_data.clear();
            s.star_initialized = false;
            drop(s);
            *producer_handle = Some(producer::spawn(session.clone()));
            ok("OK")
        }
        "stop" => {
            {
                let mut s = session.lock();
                if s.phase == SessionPhase::Streaming {
                    s.phase = SessionPhase::Idle;
                }
            }
            producer::stop_and_join(producer_handle).await;
            ok("OK")
        }
        "next" => dispatch_next(session, args).await,
        "quit" => {
            {
                let mut s = session.lock();
                s.phase = SessionPhase::Closed;
            }
            producer::stop_and_join(producer_handle).await;
            shutdown.store(true, Ordering::SeqCst);
            ok("OK")
        }
        _ => ok(ERR_UNKNOWN_COMMAND),
    }
}

fn dispatch_setup(session: &SharedSession, args: &[&str]) -> Reply {
    let mut s = session.lock();
    if s.phase != SessionPhase::Idle {
        return ok(ERR_NOT_IDLE);
    }

    if let Some(first) = args.first() {
        let low = first.to_lowercase();
        if low.starts_with("def") {
            // No change — reply reflects current values.
        } else if low.starts_with("image") || low.starts_with("video") {
            let bin = args.get(1).and_then(|a| a.parse::<u32>().ok()).unwrap_or(1).max(1);
            s.roi_x = 0;
            s.roi_y = 0;
            s.binning = bin;
            s.roi_w = s.width / bin;
            s.roi_h = s.height / bin;
            s.bits = if low.starts_with("image") { 16 } else { 8 };
        } else if args.len() >= 6 {
            let parsed: Option<(u32, u32, u32, u32, u32, u8)> = (|| {
                Some((
                    args[0].parse().ok()?,
                    args[1].parse().ok()?,
                    args[2].parse().ok()?,
                    args[3].parse().ok()?,
                    args[4].parse().ok()?,
                    args[5].parse().ok()?,
                ))
            })();
            if let Some((x, y, w, h, bin, bits)) = parsed {
                s.roi_x = x;
                s.roi_y = y;
                s.roi_w = (w / 8) * 8;
                s.roi_h = (h / 2) * 2;
                s.binning = bin;
                s.bits = bits;
            }
        }
    }

    ok(format!(
        "{} {} {} {} {} {}",
        s.roi_x, s.roi_y, s.roi_w, s.roi_h, s.binning, s.bits
    ))
}

fn dispatch_data(session: &SharedSession, args: &[&str]) -> Reply {
    let mut s = session.lock();
    s.settle_exposure();

    let payload = if s.phase == SessionPhase::Streaming {
        if s.video_data.is_empty() {
            return ok(ERR_NO_DATA);
        }
        s.video_data.clone()
    } else if s.phase == SessionPhase::Idle {
        synth::synthesize(&mut s, false)
    } else {
        return ok(ERR_NOT_IDLE);
    };

    let max_size = args
        .first()
        .and_then(|a| a.parse::<i64>().ok())
        .unwrap_or(payload.len() as i64);

    if max_size > 0 {
        let n = (max_size as usize).min(payload.len());
        (n.to_string(), Some(payload[..n].to_vec()))
    } else {
        // Matches the reference emulator: a non-positive max size reports
        // the full frame length but sends no payload.
        (payload.len().to_string(), None)
    }
}

fn dispatch_tempcon(session: &SharedSession, args: &[&str]) -> Reply {
    let mut s = session.lock();
    match args.first() {
        Some(a) if a.eq_ignore_ascii_case("off") => s.cooler_power = 0.0,
        Some(a) => {
            if let Ok(target) = a.parse::<f64>() {
                s.target_temp = target;
                if s.temperature > s.target_temp {
                    s.temperature = (s.temperature - 0.5).max(s.target_temp);
                } else if s.temperature < s.target_temp {
                    s.temperature = (s.temperature + 0.5).min(s.target_temp);
                }
                s.cooler_power = (50.0 + (s.temperature - s.target_temp) * 5.0).clamp(0.0, 100.0);
            }
        }
        None => {}
    }
    ok(format!("{:.1} {:.0}", s.temperature, s.cooler_power))
}

async fn dispatch_next(session: &SharedSession, args: &[&str]) -> Reply {
    let timeout = args.first().and_then(|a| a.parse::<f64>().ok()).unwrap_or(0.0);

    let current_last = {
        let s = session.lock();
        if s.phase != SessionPhase::Streaming {
            return ok(ERR_NOT_STREAMING);
        }
        s.video_last
    };

    let wait_start = Instant::now();
    loop {
        let seq = session.lock().video_seq;
        if seq > current_last {
            break;
        }
        if wait_start.elapsed().as_secs_f64() >= timeout {
            break;
        }
        tokio::time::sleep(NEXT_POLL_INTERVAL).await;
    }

    let mut s = session.lock();
    if s.video_seq > current_last {
        s.video_last = s.video_seq;
        let payload = s.video_data.clone();
        let reply = format!("{} {:.1} {:.0}", s.video_last, s.temperature, s.cooler_power);
        (reply, Some(payload))
    } else {
        ok(ERR_NO_DATA_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraProfile;
    use crate::session::SessionState;
    use parking_lot::Mutex;

    fn fresh_session() -> SharedSession {
        let profile = CameraProfile::default();
        Arc::new(Mutex::new(SessionState::new(&profile, 1, 1_000)))
    }

    async fn run(session: &SharedSession, line: &str) -> Reply {
        let mut handle = None;
        let shutdown = Arc::new(AtomicBool::new(false));
        dispatch(session, &mut handle, &shutdown, line).await
    }

    #[tokio::test]
    async fn version_matches_expected_shape() {
        let session = fresh_session();
        let (text, payload) = run(&session, "version").await;
        assert!(payload.is_none());
        let parts: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1.0.4");
    }

    #[tokio::test]
    async fn exptime_requires_open_camera() {
        let session = fresh_session();
        let (text, _) = run(&session, "exptime 0.1").await;
        assert_eq!(text, ERR_NOT_OPEN);
    }

    #[tokio::test]
    async fn open_then_exptime_round_trips() {
        let session = fresh_session();
        run(&session, "open").await;
        let (text, _) = run(&session, "exptime 0.25").await;
        assert_eq!(text, "0.250000");
        let (text2, _) = run(&session, "exptime").await;
        assert_eq!(text2, "0.250000");
    }

    #[tokio::test]
    async fn setup_aligns_dimensions() {
        let session = fresh_session();
        run(&session, "open").await;
        let (text, _) = run(&session, "setup 0 0 100 101 1 16").await;
        assert_eq!(text, "0 0 96 100 1 16");
    }

    #[tokio::test]
    async fn expose_requires_idle_and_rejects_double_expose() {
        let session = fresh_session();
        run(&session, "open").await;
        let (text, _) = run(&session, "expose").await;
        assert_eq!(text, "OK");
        let (text2, _) = run(&session, "expose").await;
        assert_eq!(text2, ERR_NOT_IDLE);
    }

    #[tokio::test]
    async fn data_while_closed_would_need_open_first() {
        let session = fresh_session();
        let (text, _) = run(&session, "data").await;
        assert_eq!(text, ERR_NOT_IDLE);
    }

    #[tokio::test]
    async fn still_capture_round_trip() {
        let session = fresh_session();
        run(&session, "open").await;
        run(&session, "setup 0 0 256 256 1 16").await;
        run(&session, "exptime 0.001").await;
        run(&session, "expose").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (status, _) = run(&session, "status").await;
        assert_eq!(status, "idle");
        let (text, payload) = run(&session, "data").await;
        assert_eq!(text, "131072");
        assert_eq!(payload.unwrap().len(), 131072);
    }

    #[tokio::test]
    async fn next_without_streaming_rejected() {
        let session = fresh_session();
        run(&session, "open").await;
        let (text, _) = run(&session, "next 0.01").await;
        assert_eq!(text, ERR_NOT_STREAMING);
    }
}
