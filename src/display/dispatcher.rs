/*
 *  display/dispatcher.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Single-flight flush dispatcher
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::display::bitmap::DeviceBitmap;
use crate::display::error::DisplayError;
use crate::display::protocol;
use crate::display::sync::{sync, Polarity};
use crate::display::traits::{Surface, Transport};

/// Outcome of a flush request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Token taken, work handed to the worker
    Scheduled,
    /// A flush is already pending or running, request dropped
    Busy,
    /// Controller link not up yet (or lost), nothing to do
    Offline,
    /// Dispatcher is shutting down
    Closed,
}

/// Plain copy of the flush counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushCounts {
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct FlushStats {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// State shared by every handle and the worker
#[derive(Debug, Default)]
struct Gate {
    /// the pending-flush token: set on admission, cleared when the work completes
    pending: AtomicBool,
    online: AtomicBool,
    closed: AtomicBool,
    stats: FlushStats,
}

/// Everything one flush cycle touches. Owned by the worker, so the bitmap
/// has exactly one writer and needs no lock.
pub struct FlushJob<S, T> {
    pub surface: S,
    pub bitmap: DeviceBitmap,
    pub transport: T,
    pub polarity: Polarity,
    pub column_offset: u8,
    scratch: Vec<u8>,
}

impl<S: Surface, T: Transport> FlushJob<S, T> {
    pub fn new(surface: S, bitmap: DeviceBitmap, transport: T, polarity: Polarity, column_offset: u8) -> Self {
        let scratch = Vec::with_capacity(bitmap.as_bytes().len());
        Self { surface, bitmap, transport, polarity, column_offset, scratch }
    }

    /// One cycle: surface -> bitmap -> bus. Returns the bus write count.
    pub fn run(&mut self) -> Result<usize, DisplayError> {
        sync(&self.surface, &mut self.bitmap, self.polarity, &mut self.scratch)?;
        protocol::flush(&mut self.transport, &self.bitmap, self.column_offset)
    }
}

enum Request {
    Flush(Option<oneshot::Sender<Result<usize, DisplayError>>>),
    Shutdown,
}

/// Cheap clonable front door to the dispatcher, safe to call from the
/// scheduler: it never blocks and never touches the bus.
#[derive(Clone)]
pub struct FlushHandle {
    gate: Arc<Gate>,
    tx: mpsc::Sender<Request>,
}

impl FlushHandle {
    pub fn is_online(&self) -> bool {
        self.gate.online.load(Ordering::Acquire)
    }

    pub fn is_pending(&self) -> bool {
        self.gate.pending.load(Ordering::Acquire)
    }

    /// Ask for a flush. Dropped (not queued) when one is pending or running.
    pub fn request_flush(&self) -> Admission {
        match self.admit() {
            Ok(()) => {}
            Err(admission) => return admission,
        }
        match self.tx.try_send(Request::Flush(None)) {
            Ok(()) => Admission::Scheduled,
            Err(_) => {
                self.gate.pending.store(false, Ordering::Release);
                Admission::Closed
            }
        }
    }

    /// Run one full cycle and wait for its result, waiting out any flush
    /// already in progress first.
    pub async fn flush_now(&self) -> Result<usize, DisplayError> {
        loop {
            match self.admit() {
                Ok(()) => break,
                Err(Admission::Busy) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(Admission::Offline) => {
                    return Err(DisplayError::Other("controller link is offline".to_string()))
                }
                Err(_) => return Err(DisplayError::WorkerGone),
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Request::Flush(Some(reply_tx))).await.is_err() {
            self.gate.pending.store(false, Ordering::Release);
            return Err(DisplayError::WorkerGone);
        }
        reply_rx.await.unwrap_or(Err(DisplayError::WorkerGone))
    }

    /// Take the token or say why not
    fn admit(&self) -> Result<(), Admission> {
        if self.gate.closed.load(Ordering::Acquire) {
            return Err(Admission::Closed);
        }
        if !self.gate.online.load(Ordering::Acquire) {
            return Err(Admission::Offline);
        }
        if self
            .gate
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.gate.stats.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("flush already in flight, request dropped");
            return Err(Admission::Busy);
        }
        Ok(())
    }

    pub fn counts(&self) -> FlushCounts {
        let stats = &self.gate.stats;
        FlushCounts {
            completed: stats.completed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Owns the worker task that runs flush cycles on the blocking pool.
pub struct FlushDispatcher<S, T> {
    handle: FlushHandle,
    worker: Option<JoinHandle<Option<FlushJob<S, T>>>>,
}

impl<S, T> FlushDispatcher<S, T>
where
    S: Surface + 'static,
    T: Transport + 'static,
{
    /// Spawn the worker; must be called from inside a tokio runtime.
    /// The link is considered online from here on.
    pub fn start(job: FlushJob<S, T>) -> Self {
        let gate = Arc::new(Gate::default());
        gate.online.store(true, Ordering::Release);

        // flush requests are single-flight, the slack is for flush_now and shutdown
        let (tx, rx) = mpsc::channel::<Request>(4);
        let worker = tokio::spawn(worker_loop(job, rx, Arc::clone(&gate)));

        Self {
            handle: FlushHandle { gate, tx },
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> FlushHandle {
        self.handle.clone()
    }

    pub fn request_flush(&self) -> Admission {
        self.handle.request_flush()
    }

    pub async fn flush_now(&self) -> Result<usize, DisplayError> {
        self.handle.flush_now().await
    }

    pub fn counts(&self) -> FlushCounts {
        self.handle.counts()
    }

    /// Mark the controller link up or down; requests are skipped while down
    pub fn set_online(&self, online: bool) {
        self.handle.gate.online.store(online, Ordering::Release);
    }

    /// Stop admitting, let pending or running work finish, and hand back
    /// the flush state. Errors if the worker died along the way.
    pub async fn shutdown(mut self) -> Result<FlushJob<S, T>, DisplayError> {
        let gate = &self.handle.gate;
        gate.closed.store(true, Ordering::Release);
        gate.online.store(false, Ordering::Release);

        // queued behind any admitted flush, so that one still runs
        let _ = self.handle.tx.send(Request::Shutdown).await;

        let Some(worker) = self.worker.take() else {
            return Err(DisplayError::WorkerGone);
        };
        match worker.await {
            Ok(Some(job)) => {
                info!("flush dispatcher drained ({:?})", self.handle.counts());
                Ok(job)
            }
            Ok(None) => Err(DisplayError::WorkerGone),
            Err(e) => {
                error!("flush worker failed to join: {}", e);
                Err(DisplayError::WorkerGone)
            }
        }
    }
}

impl<S, T> Drop for FlushDispatcher<S, T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            // not shut down explicitly: stop admitting and let the worker
            // finish on its own, it exits once the queue is empty
            self.handle.gate.closed.store(true, Ordering::Release);
            let _ = self.handle.tx.try_send(Request::Shutdown);
        }
    }
}

async fn worker_loop<S, T>(
    mut job: FlushJob<S, T>,
    mut rx: mpsc::Receiver<Request>,
    gate: Arc<Gate>,
) -> Option<FlushJob<S, T>>
where
    S: Surface + 'static,
    T: Transport + 'static,
{
    debug!("flush worker started");
    while let Some(request) = rx.recv().await {
        let reply = match request {
            Request::Flush(reply) => reply,
            Request::Shutdown => break,
        };

        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = job.run();
            (job, result)
        })
        .await;

        // completion, success or failure, releases the token
        gate.pending.store(false, Ordering::Release);

        let result = match outcome {
            Ok((returned, result)) => {
                job = returned;
                result
            }
            Err(e) => {
                error!("flush worker panicked: {}", e);
                gate.stats.failed.fetch_add(1, Ordering::Relaxed);
                gate.online.store(false, Ordering::Release);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(DisplayError::WorkerGone));
                }
                return None;
            }
        };

        match &result {
            Ok(writes) => {
                gate.stats.completed.fetch_add(1, Ordering::Relaxed);
                trace!("flush done, {} writes in {:?}", writes, started.elapsed());
            }
            Err(e) if e.is_transient() => {
                gate.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("flush failed after {:?}, retrying next tick: {}", started.elapsed(), e);
            }
            Err(e) => {
                gate.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("flush failed after {:?}, will not clear by itself: {}", started.elapsed(), e);
            }
        }
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }
    debug!("flush worker stopped");
    Some(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::drivers::mock::RecordingTransport;
    use crate::display::surface::MemorySurface;
    use crate::display::traits::Geometry;

    fn job(recorder: &RecordingTransport) -> FlushJob<MemorySurface, RecordingTransport> {
        let geometry = Geometry::default();
        FlushJob::new(
            MemorySurface::new(128, 64),
            DeviceBitmap::new(&geometry),
            recorder.clone(),
            Polarity::Normal,
            0,
        )
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_flush_now_runs_full_cycle() {
        let recorder = RecordingTransport::new();
        let dispatcher = FlushDispatcher::start(job(&recorder));

        assert_eq!(dispatcher.flush_now().await.unwrap(), 88);
        assert_eq!(recorder.writes().len(), 88);
        assert_eq!(dispatcher.counts().completed, 1);
        assert!(!dispatcher.handle().is_pending());

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_flight_drops_overlapping_requests() {
        let recorder = RecordingTransport::new();
        let dispatcher = FlushDispatcher::start(job(&recorder));
        let handle = dispatcher.handle();

        recorder.pause();
        assert_eq!(handle.request_flush(), Admission::Scheduled);
        // worker is now parked inside the first bus write
        wait_until(|| recorder.attempts() == 1).await;

        for _ in 0..25 {
            assert_eq!(handle.request_flush(), Admission::Busy);
        }
        assert!(handle.is_pending());

        recorder.resume();
        wait_until(|| !handle.is_pending()).await;

        let counts = handle.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.dropped, 25);
        assert_eq!(recorder.completed(), 88);

        // token released, the next request is admitted again
        assert_eq!(handle.request_flush(), Admission::Scheduled);
        wait_until(|| handle.counts().completed == 2).await;

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_clears_token_and_next_cycle_recovers() {
        let recorder = RecordingTransport::new();
        let dispatcher = FlushDispatcher::start(job(&recorder));

        recorder.fail_at(30);
        assert!(dispatcher.flush_now().await.is_err());
        assert!(!dispatcher.handle().is_pending());
        assert_eq!(dispatcher.counts().failed, 1);

        recorder.reset();
        recorder.state().lock().unwrap().fail_at = None;
        assert_eq!(dispatcher.flush_now().await.unwrap(), 88);
        assert_eq!(dispatcher.counts().completed, 1);

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_requests_are_skipped() {
        let recorder = RecordingTransport::new();
        let dispatcher = FlushDispatcher::start(job(&recorder));
        dispatcher.set_online(false);

        assert_eq!(dispatcher.request_flush(), Admission::Offline);
        assert!(dispatcher.flush_now().await.is_err());
        assert_eq!(recorder.attempts(), 0);

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_drains_running_flush() {
        let recorder = RecordingTransport::new();
        let dispatcher = FlushDispatcher::start(job(&recorder));
        let handle = dispatcher.handle();

        recorder.pause();
        assert_eq!(handle.request_flush(), Admission::Scheduled);
        wait_until(|| recorder.attempts() == 1).await;

        let resumer = recorder.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            resumer.resume();
        });

        let job = dispatcher.shutdown().await.unwrap();
        assert_eq!(recorder.completed(), 88);
        assert_eq!(job.bitmap.as_bytes().len(), 1024);
        assert_eq!(handle.request_flush(), Admission::Closed);
    }
}
