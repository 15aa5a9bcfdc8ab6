/*
 *  display/traits.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Core trait definitions and panel geometry
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

use crate::display::error::DisplayError;

/// Data bytes carried by one data write, excluding the control byte
pub const CHUNK_SIZE: usize = 16;

/// Rows per controller page
pub const PAGE_HEIGHT: u32 = 8;

/// Column RAM of the SH1106, wider than the usual 128 pixel glass
pub const SH1106_RAM_COLUMNS: u32 = 132;

/// Row drivers on the SH1106
pub const SH1106_MAX_ROWS: u32 = 64;

/// Panel geometry as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Display width in pixels
    pub width: u32,

    /// Display height in pixels
    pub height: u32,

    /// First RAM column the glass is wired to (0 or 2 on most modules)
    pub column_offset: u8,
}

impl Default for Geometry {
    fn default() -> Self {
        Self { width: 128, height: 64, column_offset: 0 }
    }
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, column_offset: 0 }
    }

    pub fn with_column_offset(mut self, offset: u8) -> Self {
        self.column_offset = offset;
        self
    }

    /// Number of 8-row pages, rounded up
    pub fn pages(&self) -> u32 {
        self.height.div_ceil(PAGE_HEIGHT)
    }

    /// Size in bytes of the page-layout bitmap
    pub fn bitmap_len(&self) -> usize {
        self.width as usize * self.pages() as usize
    }

    /// Reject anything the chunked page protocol cannot carry
    pub fn validate(&self) -> Result<(), DisplayError> {
        if self.width == 0 || self.height == 0 {
            return Err(DisplayError::InvalidConfiguration(
                format!("display size must be non-zero, got {}x{}", self.width, self.height)
            ));
        }
        if self.width as usize % CHUNK_SIZE != 0 {
            return Err(DisplayError::InvalidConfiguration(
                format!("display width {} is not a multiple of {}", self.width, CHUNK_SIZE)
            ));
        }
        if self.height % PAGE_HEIGHT != 0 {
            return Err(DisplayError::InvalidConfiguration(
                format!("display height {} is not a multiple of {}", self.height, PAGE_HEIGHT)
            ));
        }
        if self.height > SH1106_MAX_ROWS {
            return Err(DisplayError::InvalidConfiguration(
                format!("display height {} exceeds {} rows", self.height, SH1106_MAX_ROWS)
            ));
        }
        if self.width + self.column_offset as u32 > SH1106_RAM_COLUMNS {
            return Err(DisplayError::InvalidConfiguration(
                format!(
                    "width {} + column offset {} exceeds the {} column RAM",
                    self.width, self.column_offset, SH1106_RAM_COLUMNS
                )
            ));
        }
        Ok(())
    }
}

/// Bus link to the controller
///
/// Each call to `write` is one atomic bus transaction. Implementations may
/// block and may fail; callers abort whatever sequence they were running on
/// the first error.
pub trait Transport: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), DisplayError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
        (**self).write(bytes)
    }
}

/// Dimensions of a 1bpp row-major surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceGeometry {
    pub width: u32,
    pub height: u32,

    /// Bytes per row, at least `ceil(width / 8)`
    pub stride: usize,
}

impl SurfaceGeometry {
    /// Tightly packed rows
    pub fn packed(width: u32, height: u32) -> Self {
        Self { width, height, stride: width.div_ceil(8) as usize }
    }

    /// Bytes needed to hold every row
    pub fn len(&self) -> usize {
        self.stride * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of the generic bitmap that gets mirrored to the glass
///
/// `snapshot` copies the current content into `out` (resized as needed) and
/// reports the geometry it was taken at. It is called once per flush cycle
/// from the worker, never from the scheduler.
pub trait Surface: Send {
    fn snapshot(&self, out: &mut Vec<u8>) -> Result<SurfaceGeometry, DisplayError>;
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn snapshot(&self, out: &mut Vec<u8>) -> Result<SurfaceGeometry, DisplayError> {
        (**self).snapshot(out)
    }
}
