//! Image synthesizer — produces a raw pixel buffer modeling shot and read
//! noise plus an optional star, as a pure(ish) function of the session's
//! ROI/depth/exposure parameters and its RNG state.
//!
//! Grounded on `original_source/src/py/zwo_emulator.py`'s
//! `generate_random_image` / `_draw_gaussian_star`.

use byteorder::{LittleEndian, WriteBytesExt};
use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};

use crate::session::SessionState;

/// Still-capture star density: roughly one star per 10,000 pixels.
const STAR_DENSITY: f64 = 1e-4;

/// Synthesize a frame for the session's current ROI/bits, mutating the
/// session's RNG (and, in streaming mode, its tracked star position) along
/// the way. Returns the raw little-endian pixel buffer.
pub fn synthesize(session: &mut SessionState, streaming: bool) -> Vec<u8> {
    match session.bits {
        8 => synthesize_8bit(session, streaming),
        _ => synthesize_16bit(session, streaming),
    }
}

fn synthesize_8bit(session: &mut SessionState, streaming: bool) -> Vec<u8> {
    let w = session.roi_w as usize;
    let h = session.roi_h as usize;
    let n = w * h;

    let base_level = (30 + session.offset) as f64;
    let poisson = poisson_dist(base_level);
    let mut plane: Vec<f64> = (0..n).map(|_| poisson.sample(&mut session.rng)).collect();

    if streaming {
        update_star(session, w as f64, h as f64);
        draw_gaussian_star(&mut plane, w, h, session.star_x, session.star_y, 180.0, 2.0, 255.0);
    } else {
        sprinkle_stars(&mut plane, session, n, 100.0, 255.0);
    }

    // 8-bit values are truncated (wrapped) to a byte, matching the
    // reference emulator's `ndarray.astype(uint8)`.
    plane.into_iter().map(|v| (v.round() as i64) as u8).collect()
}

fn synthesize_16bit(session: &mut SessionState, streaming: bool) -> Vec<u8> {
    let w = session.roi_w as usize;
    let h = session.roi_h as usize;
    let n = w * h;

    let max_val = ((1u32 << session.bit_depth as u32) - 1) as f64;
    let base_level = 200.0 + session.offset as f64 * 10.0;
    let poisson = poisson_dist(base_level);
    let normal = Normal::new(0.0, 5.0).expect("fixed read-noise sigma is always valid");

    let mut plane: Vec<f64> = (0..n)
        .map(|_| {
            let shot = poisson.sample(&mut session.rng);
            let read = normal.sample(&mut session.rng);
            (shot + read).clamp(0.0, max_val)
        })
        .collect();

    if streaming {
        update_star(session, w as f64, h as f64);
        draw_gaussian_star(
            &mut plane,
            w,
            h,
            session.star_x,
            session.star_y,
            max_val * 0.7,
            2.5,
            max_val,
        );
    } else {
        sprinkle_stars(&mut plane, session, n, max_val * 0.3, max_val);
    }

    let mut out = Vec::with_capacity(n * 2);
    for v in plane {
        let px = v.round().clamp(0.0, max_val) as u16;
        out.write_u16::<LittleEndian>(px).expect("Vec<u8> writes never fail");
    }
    out
}

fn poisson_dist(lambda: f64) -> Poisson<f64> {
    // Poisson requires a strictly positive rate; a non-positive base level
    // (a large negative `offset`) degenerates to a near-empty frame.
    Poisson::new(lambda.max(1e-3)).expect("clamped lambda is always positive")
}

/// Advance the tracking star for one streaming frame. First frame of a
/// stream re-initializes near the ROI center; subsequent frames drift and
/// clip to stay within 10px of center and within the frame margins.
fn update_star(session: &mut SessionState, w: f64, h: f64) {
    if !session.star_initialized {
        session.star_center_x = w / 2.0;
        session.star_center_y = h / 2.0;
        session.star_x = session.star_center_x + session.rng.gen_range(-5.0..5.0);
        session.star_y = session.star_center_y + session.rng.gen_range(-5.0..5.0);
        session.star_initialized = true;
    } else {
        session.star_x += session.rng.gen_range(-2.0..2.0);
        session.star_y += session.rng.gen_range(-2.0..2.0);
        session.star_x = session
            .star_x
            .clamp(session.star_center_x - 10.0, session.star_center_x + 10.0)
            .clamp(10.0, w - 10.0);
        session.star_y = session
            .star_y
            .clamp(session.star_center_y - 10.0, session.star_center_y + 10.0)
            .clamp(10.0, h - 10.0);
    }
}

/// Add a sub-pixel-centered Gaussian profile to `plane`, clipping to the
/// frame bounds and to `max_val`.
fn draw_gaussian_star(
    plane: &mut [f64],
    w: usize,
    h: usize,
    sx: f64,
    sy: f64,
    brightness: f64,
    sigma: f64,
    max_val: f64,
) {
    let radius = (5.0 * sigma).ceil() as i64;
    let x_int = sx.round() as i64;
    let y_int = sy.round() as i64;

    let x_min = (x_int - radius).max(0);
    let x_max = (x_int + radius + 1).min(w as i64);
    let y_min = (y_int - radius).max(0);
    let y_max = (y_int + radius + 1).min(h as i64);
    if x_max <= x_min || y_max <= y_min {
        return;
    }

    for y in y_min..y_max {
        for x in x_min..x_max {
            let dist_sq = (x as f64 - sx).powi(2) + (y as f64 - sy).powi(2);
            let contribution = brightness * (-dist_sq / (2.0 * sigma * sigma)).exp();
            let idx = y as usize * w + x as usize;
            plane[idx] = (plane[idx] + contribution).clamp(0.0, max_val);
        }
    }
}

/// Overwrite ~`n * STAR_DENSITY` random pixels with a bright value uniform
/// in `[lo, hi]`, for still captures.
fn sprinkle_stars(plane: &mut [f64], session: &mut SessionState, n: usize, lo: f64, hi: f64) {
    let num_stars = (n as f64 * STAR_DENSITY) as usize;
    for _ in 0..num_stars {
        let idx = session.rng.gen_range(0..n);
        plane[idx] = session.rng.gen_range(lo..=hi);
    }
}
