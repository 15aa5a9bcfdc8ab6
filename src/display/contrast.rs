/*
 *  display/contrast.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Contrast control channel
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

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{info, warn};

use crate::display::error::{ContrastError, DisplayError};
use crate::display::protocol;
use crate::display::traits::Transport;
use crate::display::transport::SharedTransport;

/// Why a contrast store was refused
#[derive(Debug)]
pub enum ContrastStoreError {
    /// Bad input, nothing was sent
    Invalid(ContrastError),

    /// Input was fine but the controller did not take it
    Bus(DisplayError),
}

impl fmt::Display for ContrastStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContrastStoreError::Invalid(err) => write!(f, "{}", err),
            ContrastStoreError::Bus(err) => write!(f, "Contrast not applied: {}", err),
        }
    }
}

impl std::error::Error for ContrastStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContrastStoreError::Invalid(err) => Some(err),
            ContrastStoreError::Bus(err) => Some(err),
        }
    }
}

impl From<ContrastError> for ContrastStoreError {
    fn from(err: ContrastError) -> Self {
        ContrastStoreError::Invalid(err)
    }
}

impl From<DisplayError> for ContrastStoreError {
    fn from(err: DisplayError) -> Self {
        ContrastStoreError::Bus(err)
    }
}

/// Parse user input the way a sysfs attribute would: decimal, surrounding
/// whitespace (and the trailing newline `echo` adds) ignored, 0..=255.
pub fn parse_contrast(input: &str) -> Result<u8, ContrastError> {
    let trimmed = input.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| ContrastError::NotANumber(trimmed.to_string()))?;
    u8::try_from(value).map_err(|_| ContrastError::OutOfRange(value))
}

/// Readable/writable contrast setting bound to one controller.
///
/// Clones share the value and the bus.
pub struct ContrastControl<T> {
    value: Arc<AtomicU8>,
    bus: SharedTransport<T>,
}

impl<T> Clone for ContrastControl<T> {
    fn clone(&self) -> Self {
        Self { value: Arc::clone(&self.value), bus: self.bus.clone() }
    }
}

impl<T: Transport> ContrastControl<T> {
    /// `initial` must already be in effect on the controller (init sent it)
    pub fn new(bus: SharedTransport<T>, initial: u8) -> Self {
        Self { value: Arc::new(AtomicU8::new(initial)), bus }
    }

    pub fn get(&self) -> u8 {
        self.value.load(Ordering::Acquire)
    }

    /// Text form of the current value, newline terminated
    pub fn show(&self) -> String {
        format!("{}\n", self.get())
    }

    /// Validate, send, then commit. Any rejection keeps the previous value.
    pub fn store(&self, input: &str) -> Result<u8, ContrastStoreError> {
        let value = parse_contrast(input).map_err(|e| {
            warn!("contrast input rejected: {}", e);
            e
        })?;
        self.set(value)?;
        Ok(value)
    }

    /// Send SET_CONTRAST and the value, commit once both writes went out
    pub fn set(&self, value: u8) -> Result<(), DisplayError> {
        // hold the bus so a concurrent set cannot interleave its two bytes with ours
        self.bus.with(|bus| protocol::send_contrast(bus, value))?;
        self.value.store(value, Ordering::Release);
        info!("contrast set to {}", value);
        Ok(())
    }
}
