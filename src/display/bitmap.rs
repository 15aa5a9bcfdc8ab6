/*
 *  display/bitmap.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Page-addressed device bitmap, the controller's native pixel layout
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

use log::warn;

use crate::display::traits::{Geometry, PAGE_HEIGHT};

/// How `set_pixel` combines with the existing bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelMode {
    Set,
    Clear,
    Toggle,
}

/// 1bpp bitmap in controller page order.
///
/// Byte `x + page * width` holds column `x` of rows `page*8 .. page*8+7`,
/// least significant bit on top. A set bit is a lit pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBitmap {
    buf: Vec<u8>,
    w: usize,
    h: usize,
}

impl DeviceBitmap {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            buf: vec![0u8; geometry.bitmap_len()],
            w: geometry.width as usize,
            h: geometry.height as usize,
        }
    }

    pub fn width(&self) -> usize { self.w }
    pub fn height(&self) -> usize { self.h }

    pub fn pages(&self) -> usize {
        self.h.div_ceil(PAGE_HEIGHT as usize)
    }

    /// Immutable raw access
    pub fn as_bytes(&self) -> &[u8] { &self.buf }

    /// The `width` bytes of one page; empty when `page` is past the end
    pub fn page(&self, page: usize) -> &[u8] {
        let start = page * self.w;
        self.buf.get(start..start + self.w).unwrap_or(&[])
    }

    /// All pixels off
    pub fn clear(&mut self) {
        self.buf.fill(0);
    }

    /// Map (x,y) to byte index and bit mask; None if out of bounds
    #[inline]
    fn locate(&self, x: i32, y: i32) -> Option<(usize, u8)> {
        if x < 0 || y < 0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.w || y >= self.h {
            return None;
        }
        Some((x + (y / 8) * self.w, 1 << (y & 7)))
    }

    /// Draw one pixel.
    ///
    /// Out of range coordinates are logged and dropped; the rest of the
    /// frame still gets drawn.
    pub fn set_pixel(&mut self, x: i32, y: i32, mode: PixelMode) {
        let Some((idx, mask)) = self.locate(x, y) else {
            warn!("pixel ({}, {}) outside {}x{} bitmap, dropped", x, y, self.w, self.h);
            return;
        };
        match mode {
            PixelMode::Set => self.buf[idx] |= mask,
            PixelMode::Clear => self.buf[idx] &= !mask,
            PixelMode::Toggle => self.buf[idx] ^= mask,
        }
    }

    pub fn get_pixel(&self, x: i32, y: i32) -> Option<bool> {
        self.locate(x, y).map(|(idx, mask)| self.buf[idx] & mask != 0)
    }

    /// Count lit pixels
    #[cfg(test)]
    pub(crate) fn count_on_pixels(&self) -> usize {
        self.buf.iter().map(|b| b.count_ones() as usize).sum()
    }
}
