//! Camera identity — the fixed sensor constants a session reports on `open`.
//!
//! These mirror the defaults of the reference ZWO emulator (an ASI294MM
//! Pro-shaped sensor) and can be overridden by the optional config file
//! (see [`crate::config`]).

use serde::Deserialize;

/// The three-entry serial number table the reference emulator draws from.
/// Kept as the shipped default; a config file may supply its own table.
pub const DEFAULT_SERIAL_NUMBERS: [&str; 3] =
    ["02a1b3c4d5e6f789", "124494e37ecc280e", "98f7e6d5c4b3a210"];

/// Sensor identity and thermal/filter defaults, established once at process
/// startup and shared (read-only, cloned per session) for the process
/// lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraProfile {
    pub width: u32,
    pub height: u32,
    pub cooler: u8,
    pub color: u8,
    pub bit_depth: u8,
    pub model: String,
    pub serial_numbers: Vec<String>,
    pub filter_count: i32,
    pub initial_temperature: f64,
    pub initial_target_temp: f64,
    pub initial_cooler_power: f64,
    pub initial_fan_on: u8,
    pub initial_exp_time: f64,
    pub initial_gain: i32,
    pub initial_offset: i32,
}

impl Default for CameraProfile {
    fn default() -> Self {
        CameraProfile {
            width: 4656,
            height: 3520,
            cooler: 1,
            color: 0,
            bit_depth: 12,
            model: "ASI294MM_Pro".to_string(),
            serial_numbers: DEFAULT_SERIAL_NUMBERS.iter().map(|s| s.to_string()).collect(),
            filter_count: 7,
            initial_temperature: -10.0,
            initial_target_temp: -10.0,
            initial_cooler_power: 50.0,
            initial_fan_on: 1,
            initial_exp_time: 0.02,
            initial_gain: 0,
            initial_offset: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_emulator() {
        let profile = CameraProfile::default();
        assert_eq!(profile.width, 4656);
        assert_eq!(profile.height, 3520);
        assert_eq!(profile.bit_depth, 12);
        assert_eq!(profile.model, "ASI294MM_Pro");
        assert_eq!(profile.serial_numbers.len(), 3);
    }
}
