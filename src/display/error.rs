/*
 *  display/error.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Unified error types for the flush pipeline
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
use std::error::Error;

/// Unified error type for all display operations
#[derive(Debug)]
pub enum DisplayError {
    /// Controller power-up sequence failed, attach must abort
    InitializationFailed(Box<DisplayError>),

    /// I2C communication error
    I2cError(String),

    /// A single bus write was rejected, `write` is the zero-based index
    /// of the failing write within the current transaction
    WriteFailed { write: usize, reason: String },

    /// Invalid geometry or configuration
    InvalidConfiguration(String),

    /// Surface snapshot does not cover its own declared geometry
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Surface could not be opened or read
    SurfaceError(String),

    /// Flush worker is gone (dispatcher shut down or worker panicked)
    WorkerGone,

    /// The panel was detached and its bus released
    Detached,

    /// Generic error with message
    Other(String),
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::InitializationFailed(err) =>
                write!(f, "Display initialization failed: {}", err),
            DisplayError::I2cError(msg) =>
                write!(f, "I2C communication error: {}", msg),
            DisplayError::WriteFailed { write, reason } =>
                write!(f, "Bus write #{} failed: {}", write, reason),
            DisplayError::InvalidConfiguration(msg) =>
                write!(f, "Invalid configuration: {}", msg),
            DisplayError::BufferSizeMismatch { expected, actual } =>
                write!(f, "Buffer size mismatch: expected {} bytes, got {}", expected, actual),
            DisplayError::SurfaceError(msg) =>
                write!(f, "Surface error: {}", msg),
            DisplayError::WorkerGone =>
                write!(f, "Flush worker is not running"),
            DisplayError::Detached =>
                write!(f, "Display has been detached"),
            DisplayError::Other(msg) =>
                write!(f, "{}", msg),
        }
    }
}

impl Error for DisplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DisplayError::InitializationFailed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl DisplayError {
    /// True for errors that the next flush cycle may clear on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, DisplayError::I2cError(_) | DisplayError::WriteFailed { .. })
    }
}

/// Rejections from the contrast control channel
///
/// The previous contrast value is always retained when one of these is returned.
#[derive(Debug, PartialEq, Eq)]
pub enum ContrastError {
    /// Input did not parse as a decimal integer
    NotANumber(String),

    /// Parsed value lies outside 0..=255
    OutOfRange(i64),
}

impl fmt::Display for ContrastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContrastError::NotANumber(input) =>
                write!(f, "Contrast must be a decimal integer, got {:?}", input),
            ContrastError::OutOfRange(value) =>
                write!(f, "Contrast {} out of range (must be 0..=255)", value),
        }
    }
}

impl Error for ContrastError {}
