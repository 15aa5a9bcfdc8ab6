/*
 *  lib.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
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

//! Keeps an SH1106 OLED panel in step with a 1bpp framebuffer surface.
//!
//! A scheduler asks for a flush every few hundred milliseconds; a single
//! worker copies the surface into the controller's page layout and streams
//! it over I2C in 16 byte chunks. Requests that arrive while a flush is in
//! flight are dropped, never queued.

pub mod config;
pub mod display;
