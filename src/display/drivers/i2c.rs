/*
 *  display/drivers/i2c.rs
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 *
 *  Linux i2c-dev transport for the SH1106
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

use embedded_hal::i2c::{Error as _, I2c};
use linux_embedded_hal::I2cdev;
use log::info;

use crate::display::error::DisplayError;
use crate::display::traits::Transport;

/// Default 7-bit address of SH1106 modules (0x3D with SA0 pulled high)
pub const DEFAULT_ADDRESS: u8 = 0x3C;

/// One controller on a `/dev/i2c-N` adapter
pub struct I2cTransport<B = I2cdev> {
    bus: B,
    address: u8,
}

impl I2cTransport<I2cdev> {
    /// Open an I2C adapter
    ///
    /// # Arguments
    ///
    /// * `i2c_bus_path` - Path to I2C device (e.g., "/dev/i2c-1")
    /// * `address` - I2C address (typically 0x3C or 0x3D)
    pub fn open(i2c_bus_path: &str, address: u8) -> Result<Self, DisplayError> {
        info!("Opening SH1106 on {} at address 0x{:02X}", i2c_bus_path, address);

        let bus = I2cdev::new(i2c_bus_path)
            .map_err(|e| DisplayError::I2cError(format!("Failed to open {}: {}", i2c_bus_path, e)))?;

        Ok(Self::new(bus, address))
    }
}

impl<B> I2cTransport<B> {
    /// Wrap any embedded-hal bus
    pub fn new(bus: B, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl<B> Transport for I2cTransport<B>
where
    B: I2c + Send,
{
    fn write(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
        self.bus
            .write(self.address, bytes)
            .map_err(|e| DisplayError::I2cError(format!("{:?}", e.kind())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};

    /// Bus double that records (address, bytes) and can NAK
    #[derive(Default)]
    struct FakeBus {
        frames: Vec<(u8, Vec<u8>)>,
        nak: bool,
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
            if self.nak {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for op in operations.iter() {
                if let Operation::Write(bytes) = op {
                    self.frames.push((address, bytes.to_vec()));
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_write_goes_to_configured_address() {
        let mut transport = I2cTransport::new(FakeBus::default(), DEFAULT_ADDRESS);
        transport.write(&[0x00, 0xAF]).unwrap();
        assert_eq!(transport.bus.frames, vec![(0x3C, vec![0x00, 0xAF])]);
    }

    #[test]
    fn test_nak_becomes_i2c_error() {
        let mut transport = I2cTransport::new(FakeBus { nak: true, ..Default::default() }, 0x3D);
        let err = transport.write(&[0x00, 0xAE]).unwrap_err();
        assert!(matches!(err, DisplayError::I2cError(_)));
        assert!(err.is_transient());
    }
}
