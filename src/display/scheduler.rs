/*
 *  display/scheduler.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Periodic flush scheduler
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

use log::{debug, error, info, trace};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::display::dispatcher::{Admission, FlushHandle};

/// Default period between flush requests
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(300);

/// Fires a flush request every period until disarmed.
///
/// The tick itself only asks the dispatcher for work; it never blocks and
/// never touches the bus.
pub struct FlushScheduler {
    period: Duration,
    stop_sender: Option<mpsc::Sender<()>>,
    tick_handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Start ticking, first request one full period from now.
    /// Must be called from inside a tokio runtime.
    pub fn arm(flusher: FlushHandle, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let tick_handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            // a late tick is pushed back, never doubled up
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !flusher.is_online() {
                            trace!("flush tick skipped, controller offline");
                            continue;
                        }
                        match flusher.request_flush() {
                            Admission::Scheduled => trace!("flush tick scheduled"),
                            Admission::Busy => trace!("flush tick dropped, previous flush still in flight"),
                            Admission::Offline => trace!("flush tick skipped, controller offline"),
                            Admission::Closed => {
                                debug!("flush dispatcher closed, scheduler exiting");
                                break;
                            }
                        }
                    }
                    _ = stop_rx.recv() => {
                        debug!("flush scheduler received stop signal");
                        break;
                    }
                }
            }
        });

        info!("flush scheduler armed, every {:?}", period);
        Self {
            period,
            stop_sender: Some(stop_tx),
            tick_handle: Some(tick_handle),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_armed(&self) -> bool {
        self.tick_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop ticking. Returns once the tick task has exited, so no request
    /// can be raised after this.
    pub async fn disarm(&mut self) {
        if let Some(sender) = self.stop_sender.take() {
            // the task may already be gone (dispatcher closed), that's fine
            let _ = sender.send(()).await;
        }
        if let Some(handle) = self.tick_handle.take() {
            handle.await.unwrap_or_else(|e| error!("flush scheduler failed to join: {}", e));
        }
        info!("flush scheduler disarmed");
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        if let Some(sender) = self.stop_sender.take() {
            let _ = sender.try_send(());
        }
    }
}
