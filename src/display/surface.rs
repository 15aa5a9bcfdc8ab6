/*
 *  display/surface.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Generic 1bpp surfaces: in-memory and memory-mapped
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

use core::convert::Infallible;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use embedded_graphics::geometry::{OriginDimensions, Size};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use memmap2::{Mmap, MmapOptions};
use log::{debug, info};

use crate::display::error::DisplayError;
use crate::display::traits::{Surface, SurfaceGeometry};

/// Shared in-memory surface.
///
/// Clones share the same pixels, so a producer can keep drawing into one
/// handle while the flush worker snapshots another.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    geometry: SurfaceGeometry,
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemorySurface {
    /// Tightly packed surface, all pixels off
    pub fn new(width: u32, height: u32) -> Self {
        let geometry = SurfaceGeometry::packed(width, height);
        Self {
            geometry,
            data: Arc::new(RwLock::new(vec![0u8; geometry.len()])),
        }
    }

    /// Surface with padded rows, as framebuffers with a fixed line length have
    pub fn with_stride(width: u32, height: u32, stride: usize) -> Result<Self, DisplayError> {
        let min = width.div_ceil(8) as usize;
        if stride < min {
            return Err(DisplayError::InvalidConfiguration(
                format!("stride {} too small for width {} (need {})", stride, width, min)
            ));
        }
        let geometry = SurfaceGeometry { width, height, stride };
        Ok(Self {
            geometry,
            data: Arc::new(RwLock::new(vec![0u8; geometry.len()])),
        })
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[inline]
    fn locate(&self, x: u32, y: u32) -> Option<(usize, u8)> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        Some((y as usize * self.geometry.stride + (x / 8) as usize, 1 << (x % 8)))
    }

    /// Write one pixel; out of range is ignored
    pub fn set(&self, x: u32, y: u32, on: bool) {
        if let Some((idx, mask)) = self.locate(x, y) {
            let mut data = self.write();
            if on { data[idx] |= mask } else { data[idx] &= !mask }
        }
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.locate(x, y)
            .map(|(idx, mask)| self.read()[idx] & mask != 0)
            .unwrap_or(false)
    }

    /// Every pixel on or off
    pub fn fill(&self, on: bool) {
        self.write().fill(if on { 0xFF } else { 0x00 });
    }
}

impl Surface for MemorySurface {
    fn snapshot(&self, out: &mut Vec<u8>) -> Result<SurfaceGeometry, DisplayError> {
        let data = self.read();
        out.clear();
        out.extend_from_slice(&data);
        Ok(self.geometry)
    }
}

impl OriginDimensions for MemorySurface {
    fn size(&self) -> Size {
        Size::new(self.geometry.width, self.geometry.height)
    }
}

impl DrawTarget for MemorySurface {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let mut data = self.write();
        for Pixel(p, c) in pixels {
            if p.x < 0 || p.y < 0 {
                continue;
            }
            if let Some((idx, mask)) = self.locate(p.x as u32, p.y as u32) {
                if c.is_on() { data[idx] |= mask } else { data[idx] &= !mask }
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.fill(color.is_on());
        Ok(())
    }
}

/// Surface backed by a memory-mapped file, e.g. `/dev/fb1` or a `/dev/shm`
/// segment written by another process.
pub struct MappedSurface {
    _file: File, // keep the descriptor for the lifetime of the mapping
    mmap: Mmap,
    path: PathBuf,
    geometry: SurfaceGeometry,
}

impl MappedSurface {
    pub fn open(path: &Path, geometry: SurfaceGeometry) -> Result<Self, DisplayError> {
        let min = geometry.width.div_ceil(8) as usize;
        if geometry.stride < min {
            return Err(DisplayError::InvalidConfiguration(
                format!("stride {} too small for width {} (need {})", geometry.stride, geometry.width, min)
            ));
        }

        let file = File::open(path)
            .map_err(|e| DisplayError::SurfaceError(format!("Failed to open {}: {}", path.display(), e)))?;

        let metadata = file
            .metadata()
            .map_err(|e| DisplayError::SurfaceError(format!("Failed to stat {}: {}", path.display(), e)))?;

        // device nodes (/dev/fb1) report no length, only plain files can be
        // checked; mapping past the end of a short file faults on first read
        if metadata.is_file() && metadata.len() < geometry.len() as u64 {
            return Err(DisplayError::BufferSizeMismatch {
                expected: geometry.len(),
                actual: metadata.len() as usize,
            });
        }

        // Safety: the mapping is only ever read, and copied out in one go per
        // flush cycle; a writer racing the copy just produces tearing.
        let mmap = unsafe { MmapOptions::new().len(geometry.len()).map(&file) }
            .map_err(|e| DisplayError::SurfaceError(format!("Failed to map {}: {}", path.display(), e)))?;
        debug!("mapped {} bytes from {}", mmap.len(), path.display());
        info!(
            "Surface {} ({}x{}, stride {})",
            path.display(), geometry.width, geometry.height, geometry.stride
        );

        Ok(Self { _file: file, mmap, path: path.to_path_buf(), geometry })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Surface for MappedSurface {
    fn snapshot(&self, out: &mut Vec<u8>) -> Result<SurfaceGeometry, DisplayError> {
        out.clear();
        out.extend_from_slice(&self.mmap[..self.geometry.len()]);
        Ok(self.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::primitives::{Line, PrimitiveStyle};
    use std::io::Write;

    #[test]
    fn test_memory_surface_bit_order() {
        let surface = MemorySurface::new(128, 64);
        surface.set(0, 0, true);
        surface.set(9, 1, true);

        let mut snap = Vec::new();
        let geometry = surface.snapshot(&mut snap).unwrap();
        assert_eq!(geometry.stride, 16);
        assert_eq!(snap[0], 0x01);
        assert_eq!(snap[16 + 1], 0x02);
    }

    #[test]
    fn test_memory_surface_clones_share_pixels() {
        let producer = MemorySurface::new(16, 8);
        let consumer = producer.clone();
        producer.set(3, 3, true);
        assert!(consumer.get(3, 3));
        producer.fill(false);
        assert!(!consumer.get(3, 3));
    }

    #[test]
    fn test_stride_validation() {
        assert!(MemorySurface::with_stride(128, 64, 15).is_err());
        let padded = MemorySurface::with_stride(128, 64, 20).unwrap();
        assert_eq!(padded.geometry().len(), 20 * 64);
    }

    #[test]
    fn test_draw_target_line() {
        let mut surface = MemorySurface::new(128, 64);
        Line::new(Point::new(0, 0), Point::new(10, 0))
            .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
            .draw(&mut surface)
            .unwrap();
        assert!(surface.get(0, 0));
        assert!(surface.get(10, 0));
        assert!(!surface.get(11, 0));
    }

    #[test]
    fn test_mapped_surface_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut content = vec![0u8; 1024];
        content[16] = 0xFF;
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let surface = MappedSurface::open(file.path(), SurfaceGeometry::packed(128, 64)).unwrap();
        let mut snap = Vec::new();
        surface.snapshot(&mut snap).unwrap();
        assert_eq!(snap.len(), 1024);
        assert_eq!(snap[16], 0xFF);
    }

    #[test]
    fn test_mapped_character_device() {
        // character devices report a zero length, the mapping is sized from the geometry
        let surface = MappedSurface::open(Path::new("/dev/zero"), SurfaceGeometry::packed(128, 64)).unwrap();
        let mut snap = Vec::new();
        let geometry = surface.snapshot(&mut snap).unwrap();
        assert_eq!(geometry.len(), 1024);
        assert_eq!(snap.len(), 1024);
        assert!(snap.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mapped_surface_too_small() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 100]).unwrap();
        file.flush().unwrap();

        let result = MappedSurface::open(file.path(), SurfaceGeometry::packed(128, 64));
        assert!(matches!(result, Err(DisplayError::BufferSizeMismatch { expected: 1024, actual: 100 })));
    }
}
