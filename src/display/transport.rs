/*
 *  display/transport.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Bus handle shared between the flush worker and the contrast control
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

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::display::error::DisplayError;
use crate::display::traits::Transport;

/// Clonable handle to one transport.
///
/// The lock is taken per write, the same granularity the kernel's adapter
/// lock gives i2c-dev, so a contrast change can slot in between two data
/// chunks of a running flush. Once released, every handle fails with
/// `DisplayError::Detached` and the transport itself is dropped.
pub struct SharedTransport<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for SharedTransport<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Transport> SharedTransport<T> {
    pub fn new(transport: T) -> Self {
        Self { inner: Arc::new(Mutex::new(Some(transport))) }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hold the bus across several writes that must not be interleaved
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> Result<R, DisplayError>) -> Result<R, DisplayError> {
        match self.lock().as_mut() {
            Some(transport) => f(transport),
            None => Err(DisplayError::Detached),
        }
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }

    /// Take the transport away from every handle; later writes fail
    pub fn release(&self) -> Option<T> {
        let transport = self.lock().take();
        if transport.is_some() {
            debug!("bus released");
        }
        transport
    }
}

impl<T: Transport> Transport for SharedTransport<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
        self.with(|transport| transport.write(bytes))
    }
}
