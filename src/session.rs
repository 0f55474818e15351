//! Per-connection session state: the state machine, ROI/exposure/thermal
//! configuration, and the deterministic RNG a session synthesizes frames
//! from.
//!
//! Mutated exclusively by the command dispatcher (see [`crate::dispatcher`])
//! and the video producer (see [`crate::producer`]) while holding the
//! session's mutex — see [`SharedSession`].

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::camera::CameraProfile;

/// The four states a connection moves through. `Closed` is the initial and
/// post-teardown state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Idle,
    Exposing,
    Streaming,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Closed => "closed",
            SessionPhase::Idle => "idle",
            SessionPhase::Exposing => "exposing",
            SessionPhase::Streaming => "streaming",
        }
    }
}

/// Shared, lock-guarded session state handed to the dispatcher and the
/// video producer. One instance per connection.
pub type SharedSession = Arc<Mutex<SessionState>>;

pub struct SessionState {
    pub phase: SessionPhase,

    // Camera identity — constant for the session lifetime.
    pub width: u32,
    pub height: u32,
    pub cooler: u8,
    pub color: u8,
    pub bit_depth: u8,
    pub model: String,
    pub serial_number: String,

    // Startup metadata.
    pub startup_time: u64,
    pub cookie: u32,
    pub offtime: i64,

    // ROI.
    pub roi_x: u32,
    pub roi_y: u32,
    pub roi_w: u32,
    pub roi_h: u32,
    pub binning: u32,
    pub bits: u8,

    // Exposure.
    pub exp_time: f64,
    pub gain: i32,
    pub offset: i32,
    pub exposure_start: Option<Instant>,

    // Thermal.
    pub temperature: f64,
    pub target_temp: f64,
    pub cooler_power: f64,
    pub fan_on: u8,

    // Filter wheel.
    pub filter_count: i32,
    pub filter_position: i32,

    // Video stream — valid only while `phase == Streaming`.
    pub video_seq: u64,
    pub video_last: u64,
    pub video_data: Vec<u8>,

    // Tracking star for streaming frames.
    pub star_center_x: f64,
    pub star_center_y: f64,
    pub star_x: f64,
    pub star_y: f64,
    pub star_initialized: bool,

    pub rng: StdRng,
}

/// Seconds since the Unix epoch, used for `startup_time` and `offtime`.
pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}

impl SessionState {
    /// Construct a fresh, `closed` session. `seed` drives the session RNG;
    /// the serial number index is drawn here, before any frame synthesis,
    /// so that seed -> serial is stable (see design notes on serial
    /// number selection).
    pub fn new(profile: &CameraProfile, seed: u64, startup_time: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let cookie: u32 = rng.gen();
        let serial_idx = rng.gen_range(0..profile.serial_numbers.len());
        let serial_number = profile.serial_numbers[serial_idx].clone();

        let roi_w = profile.width;
        let roi_h = profile.height;

        SessionState {
            phase: SessionPhase::Closed,

            width: profile.width,
            height: profile.height,
            cooler: profile.cooler,
            color: profile.color,
            bit_depth: profile.bit_depth,
            model: profile.model.clone(),
            serial_number,

            startup_time,
            cookie,
            offtime: 0,

            roi_x: 0,
            roi_y: 0,
            roi_w,
            roi_h,
            binning: 1,
            bits: 16,

            exp_time: profile.initial_exp_time,
            gain: profile.initial_gain,
            offset: profile.initial_offset,
            exposure_start: None,

            temperature: profile.initial_temperature,
            target_temp: profile.initial_target_temp,
            cooler_power: profile.initial_cooler_power,
            fan_on: profile.initial_fan_on,

            filter_count: profile.filter_count,
            filter_position: 0,

            video_seq: 0,
            video_last: 0,
            video_data: Vec::new(),

            star_center_x: 0.0,
            star_center_y: 0.0,
            star_x: 0.0,
            star_y: 0.0,
            star_initialized: false,

            rng,
        }
    }

    /// Bytes per pixel for the current ROI depth.
    pub fn bytes_per_pixel(&self) -> u32 {
        (self.bits as u32) / 8
    }

    /// Declared frame length for the current ROI.
    pub fn frame_len(&self) -> usize {
        (self.roi_w * self.roi_h * self.bytes_per_pixel()) as usize
    }

    /// If exposing and the exposure has completed by wall clock, transition
    /// to `idle`. Mirrors the same check done by both `status` and `data`.
    pub fn settle_exposure(&mut self) {
        if self.phase == SessionPhase::Exposing {
            if let Some(start) = self.exposure_start {
                if start.elapsed().as_secs_f64() >= self.exp_time {
                    self.phase = SessionPhase::Idle;
                }
            }
        }
    }
}
