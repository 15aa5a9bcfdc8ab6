/*
 *  display/protocol.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  SH1106 command/data framing, power-up sequence and page streaming
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

use log::{debug, error, info, warn};

use crate::display::bitmap::DeviceBitmap;
use crate::display::error::DisplayError;
use crate::display::traits::{Transport, CHUNK_SIZE, PAGE_HEIGHT, SH1106_MAX_ROWS};

/// Control byte announcing a single command byte
pub const CONTROL_COMMAND: u8 = 0x00;

/// Control byte announcing a run of display RAM data
pub const CONTROL_DATA: u8 = 0x40;

/// Contrast the controller powers up with
pub const DEFAULT_CONTRAST: u8 = 0x7F;

/// Pages the page address command can reach (0xB0..=0xB7)
pub const MAX_PAGES: usize = (SH1106_MAX_ROWS / PAGE_HEIGHT) as usize;

/// SH1106 commands
#[allow(dead_code)]
pub mod cmd {
    pub const DISPLAY_OFF: u8 = 0xAE;
    pub const DISPLAY_ON: u8 = 0xAF;
    pub const SET_CLOCK_DIV: u8 = 0xD5;
    pub const SET_MUX_RATIO: u8 = 0xA8;
    pub const SET_DISPLAY_OFFSET: u8 = 0xD3;
    pub const SET_START_LINE: u8 = 0x40;
    pub const SET_SEG_REMAP: u8 = 0xA1;
    pub const SET_COM_SCAN_DEC: u8 = 0xC8;
    pub const SET_COM_PINS: u8 = 0xDA;
    pub const SET_CONTRAST: u8 = 0x81;
    pub const ENTIRE_DISPLAY_RESUME: u8 = 0xA4;
    pub const SET_NORMAL: u8 = 0xA6;
    pub const SET_INVERSE: u8 = 0xA7;
    pub const SET_CHARGE_PUMP: u8 = 0x8D;
    pub const SET_ADDRESSING_MODE: u8 = 0x20;
    pub const SET_PAGE_ADDR: u8 = 0xB0;
    pub const SET_LOW_COLUMN: u8 = 0x00;
    pub const SET_HIGH_COLUMN: u8 = 0x10;
}

/// One step of the power-up script: a command and its optional parameter
pub type InitStep = (u8, Option<u8>);

/// Power-up script.
///
/// The controller is a state machine: the charge pump has to be running
/// before DISPLAY_ON or the glass stays dark, so order matters.
pub fn init_sequence(contrast: u8) -> [InitStep; 14] {
    [
        (cmd::DISPLAY_OFF, None),
        (cmd::SET_CLOCK_DIV, Some(0x80)),
        (cmd::SET_MUX_RATIO, Some(0x3F)),
        (cmd::SET_DISPLAY_OFFSET, Some(0x00)),
        (cmd::SET_START_LINE, None),
        (cmd::SET_SEG_REMAP, None),
        (cmd::SET_COM_SCAN_DEC, None),
        (cmd::SET_COM_PINS, Some(0x12)),
        (cmd::SET_CONTRAST, Some(contrast)),
        (cmd::ENTIRE_DISPLAY_RESUME, None),
        (cmd::SET_NORMAL, None),
        (cmd::SET_CHARGE_PUMP, Some(0x14)),
        (cmd::SET_ADDRESSING_MODE, Some(0x02)),
        (cmd::DISPLAY_ON, None),
    ]
}

/// Send one command byte as its own `[0x00, cmd]` write
pub fn send_command<T: Transport + ?Sized>(transport: &mut T, command: u8) -> Result<(), DisplayError> {
    transport.write(&[CONTROL_COMMAND, command])
}

/// Send one data chunk as a `[0x40, data..]` write
pub fn send_data_chunk<T: Transport + ?Sized>(transport: &mut T, chunk: &[u8]) -> Result<(), DisplayError> {
    if chunk.len() > CHUNK_SIZE {
        return Err(DisplayError::InvalidConfiguration(
            format!("data chunk of {} bytes exceeds {}", chunk.len(), CHUNK_SIZE)
        ));
    }
    let mut frame = [0u8; CHUNK_SIZE + 1];
    frame[0] = CONTROL_DATA;
    frame[1..=chunk.len()].copy_from_slice(chunk);
    transport.write(&frame[..=chunk.len()])
}

/// Bring the controller from reset to a lit, normal-polarity display.
///
/// Runs once before the scheduler is armed. The first failing write aborts
/// the script; there is no retry.
pub fn initialize<T: Transport + ?Sized>(transport: &mut T, contrast: u8) -> Result<(), DisplayError> {
    for (index, (command, param)) in init_sequence(contrast).into_iter().enumerate() {
        for byte in std::iter::once(command).chain(param) {
            send_command(transport, byte).map_err(|e| {
                error!("init step {} (0x{:02X}) failed: {}", index, command, e);
                DisplayError::InitializationFailed(Box::new(e))
            })?;
        }
    }
    info!("SH1106 initialized (contrast {})", contrast);
    Ok(())
}

/// Put the panel to sleep, used on detach
pub fn power_off<T: Transport + ?Sized>(transport: &mut T) -> Result<(), DisplayError> {
    send_command(transport, cmd::DISPLAY_OFF)
}

/// Apply a contrast value: SET_CONTRAST then the value, two command writes
pub fn send_contrast<T: Transport + ?Sized>(transport: &mut T, value: u8) -> Result<(), DisplayError> {
    send_command(transport, cmd::SET_CONTRAST)?;
    send_command(transport, value)
}

/// Stream the whole bitmap, page 0 first.
///
/// Per page: page select, column low, column high, then the page's bytes
/// in 16 byte chunks. Returns the number of bus writes issued. The bitmap
/// is only read, so an aborted flush leaves nothing to repair; the next
/// cycle simply sends everything again.
pub fn flush<T: Transport + ?Sized>(
    transport: &mut T,
    bitmap: &DeviceBitmap,
    column_offset: u8,
) -> Result<usize, DisplayError> {
    if bitmap.width() % CHUNK_SIZE != 0 {
        return Err(DisplayError::InvalidConfiguration(
            format!("bitmap width {} is not a multiple of {}", bitmap.width(), CHUNK_SIZE)
        ));
    }

    if bitmap.pages() > MAX_PAGES {
        return Err(DisplayError::InvalidConfiguration(
            format!("bitmap has {} pages, controller addresses {}", bitmap.pages(), MAX_PAGES)
        ));
    }

    let mut writes = 0usize;
    for page in 0..bitmap.pages() {
        let select = [
            cmd::SET_PAGE_ADDR + page as u8,
            cmd::SET_LOW_COLUMN | (column_offset & 0x0F),
            cmd::SET_HIGH_COLUMN | (column_offset >> 4),
        ];
        for command in select {
            send_command(transport, command).map_err(|e| abort(page, writes, e))?;
            writes += 1;
        }

        for chunk in bitmap.page(page).chunks(CHUNK_SIZE) {
            send_data_chunk(transport, chunk).map_err(|e| abort(page, writes, e))?;
            writes += 1;
        }
    }
    debug!("flushed {} pages in {} writes", bitmap.pages(), writes);
    Ok(writes)
}

fn abort(page: usize, writes: usize, err: DisplayError) -> DisplayError {
    warn!("flush aborted on page {} after {} writes: {}", page, writes, err);
    err
}
