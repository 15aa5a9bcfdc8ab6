/*
 *  main.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use embedded_graphics::{
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
};

#[cfg(unix)] // Only compile this block on Unix-like systems
use tokio::signal::unix::{signal, SignalKind}; // Import specific Unix signals

use sh1106_fbsync::config::{self, BusConfig, Cli, Config};
use sh1106_fbsync::display::contrast::parse_contrast;
use sh1106_fbsync::display::drivers::mock::RecordingTransport;
use sh1106_fbsync::display::{MappedSurface, MemorySurface, Sh1106Fb, Surface, Transport};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
/// Once a signal is caught, it logs the event and returns, allowing for
/// graceful shutdown.
async fn signal_handler() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

/// Border plus an 8 pixel checkerboard, every page and column gets traffic
fn draw_test_pattern(surface: &mut MemorySurface) -> Result<()> {
    let size = surface.size();
    surface.clear(BinaryColor::Off)?;

    let cell = 8;
    for cy in (0..size.height).step_by(cell as usize) {
        for cx in (0..size.width).step_by(cell as usize) {
            if (cx / cell + cy / cell) % 2 == 0 {
                Rectangle::new(Point::new(cx as i32, cy as i32), Size::new(cell, cell))
                    .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
                    .draw(surface)?;
            }
        }
    }
    Rectangle::new(Point::zero(), size)
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(surface)?;
    Ok(())
}

fn open_surface(cfg: &Config, cli: &Cli) -> Result<Box<dyn Surface>> {
    let geometry = cfg.surface_geometry();

    if cli.test_pattern {
        let mut surface = MemorySurface::with_stride(geometry.width, geometry.height, geometry.stride)?;
        draw_test_pattern(&mut surface)?;
        info!("Using {}x{} test pattern", geometry.width, geometry.height);
        return Ok(Box::new(surface));
    }

    match cfg.surface_path() {
        Some(path) => {
            let surface = MappedSurface::open(path, geometry)
                .with_context(|| format!("cannot map surface {}", path.display()))?;
            info!("Mapped surface {} ({} bytes per row)", path.display(), geometry.stride);
            Ok(Box::new(surface))
        }
        None => bail!("no surface configured, set surface.path, --surface or --test-pattern"),
    }
}

/// Attach, push the first frame, then either exit (--once) or keep the
/// panel in step until a signal arrives.
async fn run<T: Transport + 'static>(transport: T, cfg: &Config, cli: &Cli) -> Result<()> {
    let surface = open_surface(cfg, cli)?;
    let mut fb = Sh1106Fb::attach(transport, surface, cfg.driver_options())
        .context("SH1106 attach failed")?;

    if let Some(value) = cli.contrast.clone() {
        // two blocking bus writes under the bus lock, keep them off the runtime
        let control = fb.contrast();
        match tokio::task::spawn_blocking(move || control.store(&value)).await {
            Ok(Ok(applied)) => info!("Contrast set to {}", applied),
            Ok(Err(e)) => warn!("Contrast not changed: {}", e),
            Err(e) => error!("Contrast task failed: {}", e),
        }
    }

    let first = fb.flush_now().await;
    if cli.once {
        fb.detach().await?;
        let writes = first.context("flush failed")?;
        info!("Single frame pushed ({} bus writes)", writes);
        return Ok(());
    }
    if let Err(e) = first {
        // the scheduler retries on the next tick
        warn!("First frame failed: {}", e);
    }

    fb.arm();
    info!("Flushing every {:?}", fb.options().flush_interval);

    if let Err(e) = signal_handler().await {
        error!("Signal handler failed: {}", e);
    }

    let counts = fb.detach().await?;
    info!(
        "Stopped after {} frames ({} failed, {} dropped)",
        counts.completed, counts.failed, counts.dropped
    );
    Ok(())
}

#[tokio::main] // Requires the `tokio` runtime with `macros` and `rt-multi-thread` features
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        println!("{}", config::dump(&cfg)?);
        return Ok(());
    }

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level()))
        .format_timestamp_secs()
        .init();

    info!("This is {} keeping the glass honest", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    // refuse bad input before touching the bus
    if let Some(value) = cli.contrast.as_deref() {
        parse_contrast(value).with_context(|| format!("invalid --contrast '{}'", value.trim()))?;
    }

    if cli.dry_run {
        let recorder = RecordingTransport::sink();
        info!("Dry run, bus traffic is recorded only");
        run(recorder.clone(), &cfg, &cli).await?;
        info!("Dry run complete, {} bus writes", recorder.completed());
        return Ok(());
    }

    let BusConfig::I2c { bus, address } = cfg.bus();
    open_i2c_and_run(&bus, address, &cfg, &cli).await
}

#[cfg(feature = "i2c")]
async fn open_i2c_and_run(bus: &str, address: u8, cfg: &Config, cli: &Cli) -> Result<()> {
    use sh1106_fbsync::display::drivers::i2c::I2cTransport;

    let transport = I2cTransport::open(bus, address)
        .with_context(|| format!("cannot open {} at 0x{:02X}", bus, address))?;
    info!("SH1106 on {} at 0x{:02X}", bus, address);
    run(transport, cfg, cli).await
}

#[cfg(not(feature = "i2c"))]
async fn open_i2c_and_run(bus: &str, _address: u8, _cfg: &Config, _cli: &Cli) -> Result<()> {
    bail!("built without i2c support, cannot open {}; use --dry-run", bus)
}
