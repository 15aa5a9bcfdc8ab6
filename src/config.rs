/*
 *  config.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Layered configuration: defaults, YAML file, command line
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::display::driver::DriverOptions;
use crate::display::protocol::DEFAULT_CONTRAST;
use crate::display::scheduler::DEFAULT_FLUSH_INTERVAL;
use crate::display::sync::Polarity;
use crate::display::traits::{Geometry, SurfaceGeometry};

/// Default i2c-dev node
pub const DEFAULT_I2C_BUS: &str = "/dev/i2c-1";

/// Default 7-bit controller address
pub const DEFAULT_I2C_ADDRESS: u8 = 0x3C;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration. Every field optional so layers can stack.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub display: Option<DisplayConfig>,
    pub surface: Option<SurfaceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DisplayConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub column_offset: Option<u8>,     // 2 on many 1.3" modules
    pub contrast: Option<u8>,          // sent during init
    pub polarity: Option<Polarity>,
    pub flush_interval_ms: Option<u64>,
    pub power_off_on_exit: Option<bool>,
    pub bus: Option<BusConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SurfaceConfig {
    /// Framebuffer file to map, e.g. /dev/fb1 or /dev/shm/oled.fb
    pub path: Option<PathBuf>,
    /// Bytes per row, packed when unset
    pub stride: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusConfig {
    I2c {
        bus: String,        // e.g. "/dev/i2c-1"
        address: u8,        // e.g. 0x3C (7-bit)
    },
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig::I2c { bus: DEFAULT_I2C_BUS.to_string(), address: DEFAULT_I2C_ADDRESS }
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "sh1106-fbsync", version, about = "Mirror a 1bpp framebuffer onto an SH1106 OLED")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Shorthand for --log-level debug
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long)]
    pub column_offset: Option<u8>,
    #[arg(long, value_enum)]
    pub polarity: Option<PolarityArg>,
    /// Milliseconds between flushes
    #[arg(long)]
    pub interval_ms: Option<u64>,
    /// i2c-dev node, e.g. /dev/i2c-1
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub bus: Option<String>,
    /// 7-bit address, decimal or 0x hex
    #[arg(long, value_parser = parse_address)]
    pub address: Option<u8>,
    /// Framebuffer file to map
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub surface: Option<PathBuf>,
    #[arg(long)]
    pub stride: Option<usize>,
    /// Leave the panel lit on exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_power_off: bool,
    /// Contrast to apply once attached (0-255)
    #[arg(long)]
    pub contrast: Option<String>,
    /// Record bus traffic instead of opening the i2c device
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,
    /// Push a single frame and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub once: bool,
    /// Draw a test pattern instead of mapping a surface
    #[arg(long, action = ArgAction::SetTrue)]
    pub test_pattern: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PolarityArg {
    Normal,
    Inverted,
}

impl From<PolarityArg> for Polarity {
    fn from(arg: PolarityArg) -> Self {
        match arg {
            PolarityArg::Normal => Polarity::Normal,
            PolarityArg::Inverted => Polarity::Inverted,
        }
    }
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    match parsed {
        Ok(addr) if addr <= 0x7F => Ok(addr),
        Ok(addr) => Err(format!("address 0x{addr:02X} is not a 7-bit address")),
        Err(e) => Err(format!("bad address '{s}': {e}")),
    }
}

/// Public entry point: read YAML, merge CLI over it, validate.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;

    Ok(cfg)
}

/// Pretty YAML of the effective config
pub fn dump(cfg: &Config) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(cfg)?)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/sh1106-fbsync/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/sh1106-fbsync/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/sh1106-fbsync.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["sh1106-fbsync.yaml", "config/sh1106-fbsync.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    // top-level
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    // display
    match (&mut dst.display, src.display) {
        (None, Some(c)) => dst.display = Some(c),
        (Some(d), Some(s)) => merge_display(d, s),
        _ => {}
    }
    // surface
    match (&mut dst.surface, src.surface) {
        (None, Some(c)) => dst.surface = Some(c),
        (Some(d), Some(s)) => {
            if s.path.is_some()   { d.path = s.path; }
            if s.stride.is_some() { d.stride = s.stride; }
        }
        _ => {}
    }
}

fn merge_display(dst: &mut DisplayConfig, src: DisplayConfig) {
    if src.width.is_some()              { dst.width = src.width; }
    if src.height.is_some()             { dst.height = src.height; }
    if src.column_offset.is_some()      { dst.column_offset = src.column_offset; }
    if src.contrast.is_some()           { dst.contrast = src.contrast; }
    if src.polarity.is_some()           { dst.polarity = src.polarity; }
    if src.flush_interval_ms.is_some()  { dst.flush_interval_ms = src.flush_interval_ms; }
    if src.power_off_on_exit.is_some()  { dst.power_off_on_exit = src.power_off_on_exit; }
    if src.bus.is_some()                { dst.bus = src.bus; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()  { cfg.log_level = cli.log_level.clone(); }
    if cli.debug                { cfg.log_level = Some("debug".to_string()); }

    let any_display = cli.width.is_some()
        || cli.height.is_some()
        || cli.column_offset.is_some()
        || cli.polarity.is_some()
        || cli.interval_ms.is_some()
        || cli.bus.is_some()
        || cli.address.is_some()
        || cli.no_power_off;

    if any_display && cfg.display.is_none() {
        cfg.display = Some(DisplayConfig::default());
    }
    if let Some(display) = cfg.display.as_mut() {
        if cli.width.is_some()          { display.width = cli.width; }
        if cli.height.is_some()         { display.height = cli.height; }
        if cli.column_offset.is_some()  { display.column_offset = cli.column_offset; }
        if let Some(p) = cli.polarity   { display.polarity = Some(p.into()); }
        if cli.interval_ms.is_some()    { display.flush_interval_ms = cli.interval_ms; }
        if cli.no_power_off             { display.power_off_on_exit = Some(false); }
        if cli.bus.is_some() || cli.address.is_some() {
            let BusConfig::I2c { bus, address } = display.bus.take().unwrap_or_default();
            display.bus = Some(BusConfig::I2c {
                bus: cli.bus.clone().unwrap_or(bus),
                address: cli.address.unwrap_or(address),
            });
        }
    }

    if cli.surface.is_some() || cli.stride.is_some() {
        let surface = cfg.surface.get_or_insert_with(SurfaceConfig::default);
        if cli.surface.is_some() { surface.path = cli.surface.clone(); }
        if cli.stride.is_some()  { surface.stride = cli.stride; }
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    cfg.geometry()
        .validate()
        .map_err(|e| ConfigError::Validation(e.to_string()))?;

    if let Some(display) = cfg.display.as_ref() {
        if display.flush_interval_ms == Some(0) {
            return Err(ConfigError::Validation("display flush_interval_ms must be > 0".into()));
        }
        if let Some(BusConfig::I2c { address, .. }) = display.bus.as_ref() {
            if *address > 0x7F {
                return Err(ConfigError::Validation(format!(
                    "i2c address 0x{address:02X} is not a 7-bit address"
                )));
            }
        }
    }

    let packed = cfg.surface_geometry();
    if let Some(stride) = cfg.surface.as_ref().and_then(|s| s.stride) {
        if stride < packed.stride {
            return Err(ConfigError::Validation(format!(
                "surface stride {} is shorter than a {} pixel row",
                stride, packed.width
            )));
        }
    }
    Ok(())
}

impl Config {
    fn display(&self) -> DisplayConfig {
        self.display.clone().unwrap_or_default()
    }

    /// Effective log filter
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn geometry(&self) -> Geometry {
        let display = self.display();
        let default = Geometry::default();
        Geometry::new(display.width.unwrap_or(default.width), display.height.unwrap_or(default.height))
            .with_column_offset(display.column_offset.unwrap_or(0))
    }

    /// Surface layout, sized to the panel
    pub fn surface_geometry(&self) -> SurfaceGeometry {
        let geometry = self.geometry();
        let mut surface = SurfaceGeometry::packed(geometry.width, geometry.height);
        if let Some(stride) = self.surface.as_ref().and_then(|s| s.stride) {
            surface.stride = stride;
        }
        surface
    }

    pub fn surface_path(&self) -> Option<&Path> {
        self.surface.as_ref().and_then(|s| s.path.as_deref())
    }

    pub fn bus(&self) -> BusConfig {
        self.display().bus.unwrap_or_default()
    }

    pub fn driver_options(&self) -> DriverOptions {
        let display = self.display();
        DriverOptions {
            geometry: self.geometry(),
            polarity: display.polarity.unwrap_or_default(),
            contrast: display.contrast.unwrap_or(DEFAULT_CONTRAST),
            flush_interval: display
                .flush_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FLUSH_INTERVAL),
            power_off_on_exit: display.power_off_on_exit.unwrap_or(true),
        }
    }
}
