/*
 *  display/driver.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Driver context: attach, arm, detach
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

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::display::bitmap::DeviceBitmap;
use crate::display::contrast::ContrastControl;
use crate::display::dispatcher::{Admission, FlushCounts, FlushDispatcher, FlushJob};
use crate::display::error::DisplayError;
use crate::display::protocol::{self, DEFAULT_CONTRAST};
use crate::display::scheduler::{FlushScheduler, DEFAULT_FLUSH_INTERVAL};
use crate::display::sync::Polarity;
use crate::display::traits::{Geometry, Surface, Transport};
use crate::display::transport::SharedTransport;

/// Runtime options for one attached panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub geometry: Geometry,
    pub polarity: Polarity,

    /// Contrast sent during init and reported by the contrast control
    pub contrast: u8,

    pub flush_interval: Duration,

    /// Send display-off during detach
    pub power_off_on_exit: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            polarity: Polarity::Normal,
            contrast: DEFAULT_CONTRAST,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            power_off_on_exit: true,
        }
    }
}

/// One SH1106 panel kept in step with one surface
pub struct Sh1106Fb<S, T> {
    options: DriverOptions,
    bus: SharedTransport<T>,
    contrast: ContrastControl<T>,
    dispatcher: FlushDispatcher<S, SharedTransport<T>>,
    scheduler: Option<FlushScheduler>,
}

impl<S, T> Sh1106Fb<S, T>
where
    S: Surface + 'static,
    T: Transport + 'static,
{
    /// Validate, initialize the controller and bring up the flush worker.
    ///
    /// Must be called from inside a tokio runtime. On any failure the
    /// transport and surface are dropped before the error is returned.
    pub fn attach(transport: T, surface: S, options: DriverOptions) -> Result<Self, DisplayError> {
        let geometry = options.geometry;
        geometry.validate()?;

        let mut bus = SharedTransport::new(transport);
        protocol::initialize(&mut bus, options.contrast)?;

        let bitmap = DeviceBitmap::new(&geometry);
        let job = FlushJob::new(surface, bitmap, bus.clone(), options.polarity, geometry.column_offset);
        let dispatcher = FlushDispatcher::start(job);
        let contrast = ContrastControl::new(bus.clone(), options.contrast);

        info!(
            "SH1106 attached: {}x{}, {} pages, column offset {}, contrast {}",
            geometry.width,
            geometry.height,
            geometry.pages(),
            geometry.column_offset,
            options.contrast
        );

        Ok(Self {
            options,
            bus,
            contrast,
            dispatcher,
            scheduler: None,
        })
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Start periodic flushing. Arming twice is a no-op.
    pub fn arm(&mut self) {
        if self.scheduler.is_some() {
            warn!("flush scheduler already armed");
            return;
        }
        self.scheduler = Some(FlushScheduler::arm(self.dispatcher.handle(), self.options.flush_interval));
    }

    pub fn is_armed(&self) -> bool {
        self.scheduler.as_ref().is_some_and(FlushScheduler::is_armed)
    }

    pub fn request_flush(&self) -> Admission {
        self.dispatcher.request_flush()
    }

    /// Push one frame now and wait for it
    pub async fn flush_now(&self) -> Result<usize, DisplayError> {
        self.dispatcher.flush_now().await
    }

    /// Handle on the contrast setting, usable from any thread
    pub fn contrast(&self) -> ContrastControl<T> {
        self.contrast.clone()
    }

    pub fn stats(&self) -> FlushCounts {
        self.dispatcher.counts()
    }

    /// Ordered teardown: stop the clock, drain the worker, optionally blank
    /// the panel, then drop the bitmap and the bus. Teardown always runs to
    /// the end; a worker that died earlier is reported as `WorkerGone`.
    pub async fn detach(self) -> Result<FlushCounts, DisplayError> {
        let Self { options, mut bus, contrast, dispatcher, scheduler } = self;

        if let Some(mut scheduler) = scheduler {
            scheduler.disarm().await;
        }

        let flusher = dispatcher.handle();
        let drained = dispatcher.shutdown().await;
        let counts = flusher.counts();
        drop(flusher);
        match &drained {
            Ok(_) => debug!("flush worker drained"),
            Err(e) => error!("flush worker did not drain cleanly: {}", e),
        }

        if options.power_off_on_exit {
            if let Err(e) = protocol::power_off(&mut bus) {
                warn!("display power off failed: {}", e);
            }
        }

        // bitmap and surface go with the job; the transport is dropped here
        // even while contrast handles are still out
        let released = drained.map(drop);
        drop(bus.release());
        drop(contrast);
        info!(
            "SH1106 detached: {} flushes, {} failed, {} dropped",
            counts.completed, counts.failed, counts.dropped
        );
        released.map(|()| counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::drivers::mock::RecordingTransport;
    use crate::display::surface::MemorySurface;

    fn fast_options() -> DriverOptions {
        DriverOptions {
            flush_interval: Duration::from_millis(10),
            ..DriverOptions::default()
        }
    }

    #[tokio::test]
    async fn test_attach_runs_init_only() {
        let recorder = RecordingTransport::new();
        let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default()).unwrap();

        assert_eq!(recorder.writes().len(), 21);
        assert_eq!(recorder.writes()[0], vec![0x00, 0xAE]);
        assert_eq!(recorder.writes()[20], vec![0x00, 0xAF]);
        assert!(!fb.is_armed());
        assert_eq!(fb.contrast().get(), 127);

        fb.detach().await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_rejects_bad_geometry() {
        let recorder = RecordingTransport::new();
        let options = DriverOptions { geometry: Geometry::new(100, 64), ..DriverOptions::default() };
        let result = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(100, 64), options);

        assert!(matches!(result, Err(DisplayError::InvalidConfiguration(_))));
        assert_eq!(recorder.attempts(), 0);
    }

    #[tokio::test]
    async fn test_attach_init_failure() {
        let recorder = RecordingTransport::new();
        recorder.fail_at(4);
        let result = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default());

        assert!(matches!(result, Err(DisplayError::InitializationFailed(_))));
        assert_eq!(recorder.attempts(), 5);
    }

    #[tokio::test]
    async fn test_flush_now_after_attach() {
        let recorder = RecordingTransport::new();
        let surface = MemorySurface::new(128, 64);
        surface.set(0, 1, true);
        let fb = Sh1106Fb::attach(recorder.clone(), surface, DriverOptions::default()).unwrap();
        recorder.reset();

        assert_eq!(fb.flush_now().await.unwrap(), 88);
        let writes = recorder.writes();
        assert_eq!(writes[0], vec![0x00, 0xB0]);
        assert_eq!(writes[3][0], 0x40);
        assert_eq!(writes[3][1], 0x02);
        assert_eq!(fb.stats().completed, 1);

        fb.detach().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detach_powers_off_last() {
        let recorder = RecordingTransport::sink();
        let mut fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), fast_options()).unwrap();
        fb.arm();
        fb.arm();
        assert!(fb.is_armed());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let counts = fb.detach().await.unwrap();
        assert!(counts.completed >= 1);

        // 21 init writes, 88 per flush, one display-off at the end
        let completed = recorder.completed();
        assert_eq!((completed - 21 - 1) % 88, 0);
    }

    #[tokio::test]
    async fn test_detach_without_power_off() {
        let recorder = RecordingTransport::new();
        let options = DriverOptions { power_off_on_exit: false, ..DriverOptions::default() };
        let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), options).unwrap();
        fb.detach().await.unwrap();

        assert_eq!(recorder.writes().len(), 21);
    }

    #[tokio::test]
    async fn test_contrast_between_flushes() {
        let recorder = RecordingTransport::new();
        let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default()).unwrap();
        let contrast = fb.contrast();
        recorder.reset();

        fb.flush_now().await.unwrap();
        contrast.store("32").unwrap();
        fb.flush_now().await.unwrap();

        let writes = recorder.writes();
        assert_eq!(writes.len(), 88 * 2 + 2);
        assert_eq!(writes[88], vec![0x00, 0x81]);
        assert_eq!(writes[89], vec![0x00, 32]);

        fb.detach().await.unwrap();
        assert_eq!(contrast.get(), 32);
    }

    #[tokio::test]
    async fn test_contrast_after_detach_is_refused() {
        let recorder = RecordingTransport::new();
        let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default()).unwrap();
        let contrast = fb.contrast();
        fb.detach().await.unwrap();
        let after_detach = recorder.writes();

        assert!(matches!(contrast.set(10), Err(DisplayError::Detached)));
        assert_eq!(contrast.get(), 127);
        assert_eq!(recorder.writes(), after_detach);
        assert_eq!(after_detach.last(), Some(&vec![0x00, 0xAE]));
    }
}
