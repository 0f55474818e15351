// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::camera::CameraProfile;
use crate::error::{Result, ServerError};

/// Command-line options for `zwocam serve`.
#[derive(Debug, Parser)]
#[command(name = "zwocam", about = "ZWO camera protocol emulator", version)]
pub struct Cli {
    /// Port to listen on.
    #[arg(short, long, default_value_t = default_port())]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// RNG seed for reproducible images. Omitted = nondeterministic (OS entropy).
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Optional TOML file overriding camera identity defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub fn default_port() -> u16 {
    52311
}

/// Optional on-disk override of [`CameraProfile`] and server-level knobs.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub camera: CameraProfilePartial,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

fn default_backlog() -> u32 {
    8
}

/// Mirrors [`CameraProfile`] with every field optional, so a config file only
/// needs to name the fields it wants to override.
#[derive(Debug, Deserialize, Default)]
pub struct CameraProfilePartial {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub cooler: Option<u8>,
    pub color: Option<u8>,
    pub bit_depth: Option<u8>,
    pub model: Option<String>,
    pub serial_numbers: Option<Vec<String>>,
    pub filter_count: Option<i32>,
    pub initial_temperature: Option<f64>,
    pub initial_target_temp: Option<f64>,
    pub initial_cooler_power: Option<f64>,
    pub initial_fan_on: Option<u8>,
    pub initial_exp_time: Option<f64>,
    pub initial_gain: Option<i32>,
    pub initial_offset: Option<i32>,
}

/// Fully resolved server configuration: CLI flags merged over optional file
/// overrides merged over the built-in defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: u32,
    pub seed: Option<u64>,
    pub camera: CameraProfile,
}

impl ServerConfig {
    /// Resolve a [`ServerConfig`] from parsed CLI options, loading and
    /// merging the optional config file if one was given.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut camera = CameraProfile::default();
        let mut backlog = default_backlog();

        if let Some(path) = &cli.config {
            let file = load_config_file(path)?;
            backlog = file.backlog;
            apply_overrides(&mut camera, file.camera);
        }

        Ok(ServerConfig {
            host: cli.host,
            port: cli.port,
            backlog,
            seed: cli.seed,
            camera,
        })
    }
}

fn load_config_file(path: &std::path::Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ServerError::Config(format!("Cannot read config file: {e}")))?;
    toml::from_str(&content).map_err(|e| ServerError::Config(format!("Invalid TOML: {e}")))
}

fn apply_overrides(camera: &mut CameraProfile, p: CameraProfilePartial) {
    if let Some(v) = p.width {
        camera.width = v;
    }
    if let Some(v) = p.height {
        camera.height = v;
    }
    if let Some(v) = p.cooler {
        camera.cooler = v;
    }
    if let Some(v) = p.color {
        camera.color = v;
    }
    if let Some(v) = p.bit_depth {
        camera.bit_depth = v;
    }
    if let Some(v) = p.model {
        camera.model = v;
    }
    if let Some(v) = p.serial_numbers {
        camera.serial_numbers = v;
    }
    if let Some(v) = p.filter_count {
        camera.filter_count = v;
    }
    if let Some(v) = p.initial_temperature {
        camera.initial_temperature = v;
    }
    if let Some(v) = p.initial_target_temp {
        camera.initial_target_temp = v;
    }
    if let Some(v) = p.initial_cooler_power {
        camera.initial_cooler_power = v;
    }
    if let Some(v) = p.initial_fan_on {
        camera.initial_fan_on = v;
    }
    if let Some(v) = p.initial_exp_time {
        camera.initial_exp_time = v;
    }
    if let Some(v) = p.initial_gain {
        camera.initial_gain = v;
    }
    if let Some(v) = p.initial_offset {
        camera.initial_offset = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_without_config_file_uses_defaults() {
        let cli = Cli {
            port: 52311,
            host: "0.0.0.0".parse().unwrap(),
            seed: Some(42),
            config: None,
        };
        let cfg = ServerConfig::resolve(&cli).expect("resolve");
        assert_eq!(cfg.port, 52311);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.camera.model, "ASI294MM_Pro");
        assert_eq!(cfg.backlog, 8);
    }
}
