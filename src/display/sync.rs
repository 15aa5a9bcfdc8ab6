/*
 *  display/sync.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Row-major surface to page-layout bitmap conversion
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

use serde::{Deserialize, Serialize};

use crate::display::bitmap::{DeviceBitmap, PixelMode};
use crate::display::error::DisplayError;
use crate::display::traits::{Surface, SurfaceGeometry};

/// Which surface bit value lights a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// surface bit 1 = lit
    #[default]
    Normal,
    /// surface bit 1 = dark
    Inverted,
}

impl Polarity {
    #[inline]
    fn mode_for(self, bit: u8) -> PixelMode {
        match (self, bit != 0) {
            (Polarity::Normal, true) | (Polarity::Inverted, false) => PixelMode::Set,
            _ => PixelMode::Clear,
        }
    }
}

/// Rewrite the whole bitmap from a snapshot of `surface`.
///
/// `scratch` is the reusable snapshot buffer; keeping it across cycles
/// avoids an allocation per frame.
pub fn sync<S: Surface + ?Sized>(
    surface: &S,
    bitmap: &mut DeviceBitmap,
    polarity: Polarity,
    scratch: &mut Vec<u8>,
) -> Result<SurfaceGeometry, DisplayError> {
    let geometry = surface.snapshot(scratch)?;
    sync_from_bytes(scratch, &geometry, bitmap, polarity)?;
    Ok(geometry)
}

/// Same as [`sync`] for a snapshot already in hand
pub fn sync_from_bytes(
    data: &[u8],
    geometry: &SurfaceGeometry,
    bitmap: &mut DeviceBitmap,
    polarity: Polarity,
) -> Result<(), DisplayError> {
    let row_bytes = geometry.width.div_ceil(8) as usize;
    if geometry.stride < row_bytes {
        return Err(DisplayError::InvalidConfiguration(
            format!("surface stride {} shorter than a {} pixel row", geometry.stride, geometry.width)
        ));
    }
    if data.len() < geometry.len() {
        return Err(DisplayError::BufferSizeMismatch {
            expected: geometry.len(),
            actual: data.len(),
        });
    }

    // a surface larger than the panel is clipped, not reported pixel by pixel
    let width = (geometry.width as usize).min(bitmap.width());
    let height = (geometry.height as usize).min(bitmap.height());

    for y in 0..height {
        let row = &data[y * geometry.stride..y * geometry.stride + row_bytes];
        for x in 0..width {
            let bit = (row[x / 8] >> (x % 8)) & 1;
            bitmap.set_pixel(x as i32, y as i32, polarity.mode_for(bit));
        }
    }
    Ok(())
}
