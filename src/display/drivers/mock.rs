/*
 *  display/drivers/mock.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Recording transport for dry runs and tests without hardware
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

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::trace;

use crate::display::error::DisplayError;
use crate::display::traits::Transport;

/// Transport that records every write instead of touching a bus
///
/// This transport is useful for:
/// - Unit and integration tests
/// - `--dry-run` on machines without the panel attached
///
/// Clones share state, so a test can keep one handle for inspection while
/// the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<RecorderState>>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

/// Internal state for the recorder (shared for inspection in tests)
#[derive(Debug, Default)]
pub struct RecorderState {
    /// Successful writes, in bus order (only when `keep_writes`)
    pub writes: Vec<Vec<u8>>,

    /// Every write attempt, including failed ones
    pub attempts: usize,

    /// Successful writes, kept even when the payloads are discarded
    pub completed: usize,

    /// Fail the attempt with this zero-based index
    pub fail_at: Option<usize>,

    /// Fail every attempt from now on
    pub fail_all: bool,

    /// Record payloads (off for long dry runs)
    pub keep_writes: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.lock().keep_writes = true;
        transport
    }

    /// Counts writes but drops the payloads
    pub fn sink() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get reference to state for inspection in tests
    pub fn state(&self) -> Arc<Mutex<RecorderState>> {
        Arc::clone(&self.state)
    }

    /// Snapshot of the recorded writes
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn completed(&self) -> usize {
        self.lock().completed
    }

    /// Forget recorded writes and counters, keep failure settings
    pub fn reset(&self) {
        let mut state = self.lock();
        state.writes.clear();
        state.attempts = 0;
        state.completed = 0;
    }

    pub fn fail_at(&self, attempt: usize) {
        self.lock().fail_at = Some(attempt);
    }

    pub fn fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    /// Make every following write block until [`resume`](Self::resume)
    pub fn pause(&self) {
        let (held, _) = &*self.gate;
        *held.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
    }

    pub fn resume(&self) {
        let (held, wake) = &*self.gate;
        *held.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
        wake.notify_all();
    }

    fn wait_gate(&self) {
        let (held, wake) = &*self.gate;
        let mut paused = held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while *paused {
            paused = wake.wait(paused).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl Transport for RecordingTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
        let attempt = {
            let mut state = self.lock();
            state.attempts += 1;
            state.attempts - 1
        };

        self.wait_gate();

        let mut state = self.lock();
        if state.fail_all || state.fail_at == Some(attempt) {
            return Err(DisplayError::WriteFailed {
                write: attempt,
                reason: "simulated bus failure".to_string(),
            });
        }
        trace!("bus <- {:02X?}", bytes);
        state.completed += 1;
        if state.keep_writes {
            state.writes.push(bytes.to_vec());
        }
        Ok(())
    }
}
