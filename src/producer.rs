//! Video producer — the background worker spawned by `start` that keeps a
//! streaming session supplied with fresh frames at roughly the exposure
//! cadence.
//!
//! Grounded on the teacher's camera ingestion loop shape
//! (`src/ingestion.rs`'s `CameraWorker::run`: sleep, re-check state under
//! lock, produce, repeat) and on `_video_thread_func` in
//! `original_source/src/py/zwo_emulator.py`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::{SessionPhase, SharedSession};
use crate::synth;

/// Grace period `stop`/teardown waits for the producer to notice the phase
/// change and exit before forcibly aborting it.
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// Spawn the producer loop for `session`. Exits on its own once the
/// session phase is no longer [`SessionPhase::Streaming`].
pub fn spawn(session: SharedSession) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let exp_time = {
                let guard = session.lock();
                if guard.phase != SessionPhase::Streaming {
                    break;
                }
                guard.exp_time
            };

            tokio::time::sleep(Duration::from_secs_f64(exp_time.max(0.0))).await;

            let mut guard = session.lock();
            if guard.phase != SessionPhase::Streaming {
                debug!("producer observed phase change after sleep, exiting");
                break;
            }
            let frame = synth::synthesize(&mut guard, true);
            guard.video_data = frame;
            guard.video_seq += 1;
            debug!(seq = guard.video_seq, "produced streaming frame");
        }
    })
}

/// Stop a running producer (if any) and join it with a bounded grace
/// period, aborting if it doesn't exit in time. The caller is responsible
/// for having already flipped the session's phase away from `Streaming`.
pub async fn stop_and_join(handle: &mut Option<JoinHandle<()>>) {
    let Some(h) = handle.take() else {
        return;
    };
    let abort_handle = h.abort_handle();
    if tokio::time::timeout(JOIN_GRACE, h).await.is_err() {
        debug!("producer did not exit within grace period, aborting");
        abort_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraProfile;
    use crate::session::SessionState;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn producer_stops_when_phase_leaves_streaming() {
        let profile = CameraProfile::default();
        let mut state = SessionState::new(&profile, 1, 0);
        state.roi_w = 16;
        state.roi_h = 8;
        state.bits = 8;
        state.exp_time = 0.001;
        state.phase = SessionPhase::Streaming;
        let session: SharedSession = Arc::new(Mutex::new(state));

        let handle = spawn(session.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let mut s = session.lock();
            assert!(s.video_seq >= 1);
            s.phase = SessionPhase::Idle;
        }
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("producer should exit promptly")
            .expect("producer task should not panic");
    }
}
