/*
 *  display/mod.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display subsystem - surface sync, flush pipeline and SH1106 protocol
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

// Core trait definitions
pub mod traits;
pub mod error;

// Pixel storage and surface sources
pub mod bitmap;
pub mod surface;
pub mod sync;

// Controller wire protocol and bus links
pub mod protocol;
pub mod transport;
pub mod drivers;

// Flush pipeline
pub mod dispatcher;
pub mod scheduler;
pub mod contrast;
pub mod driver;

// Re-exports for convenience
pub use traits::{Geometry, Surface, SurfaceGeometry, Transport};
pub use error::{ContrastError, DisplayError};
pub use bitmap::{DeviceBitmap, PixelMode};
pub use surface::{MappedSurface, MemorySurface};
pub use sync::Polarity;
pub use transport::SharedTransport;
pub use dispatcher::{Admission, FlushCounts};
pub use contrast::{ContrastControl, ContrastStoreError};
pub use driver::{DriverOptions, Sh1106Fb};
