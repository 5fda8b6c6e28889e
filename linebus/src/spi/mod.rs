//! SPI messages and transfers.
//!
//! A transfer is expressed as a sequence of [`Message`]s (command byte,
//! address, payload, ...) which a [`SpiTransfer`] turns into physical bus
//! exchanges. [`DefaultSpiTransfer`] sends a lone message straight to the
//! bus and packs longer sequences into as few exchanges as chip-select
//! boundaries allow, see [`composite`].

pub mod composite;
mod mock;
mod native;
mod transfer;

use crate::error::Result;
use crate::hw_trait::spi::check_window;

pub use composite::{CompositeMessage, MAX_COMPOSITE_LENGTH};
pub use mock::MockSpi;
pub use native::{NativeSpi, SpiConfig};
pub use transfer::{
    CompositeMessageTransfer, DefaultSpiTransfer, SingleMessageTransfer, SpiTransfer,
};

/// One segment of an SPI transfer.
///
/// `length` bytes are clocked out of `write` starting at `write_offset`
/// while the same number are clocked into `read` at `read_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub write: Vec<u8>,
    pub write_offset: usize,
    pub read: Vec<u8>,
    pub read_offset: usize,
    pub length: usize,
    /// Delay after this segment, in microseconds.
    pub delay_us: u16,
    /// Deselect the device after this segment.
    pub cs_change: bool,
}

impl Message {
    pub fn new(
        write: Vec<u8>,
        write_offset: usize,
        read: Vec<u8>,
        read_offset: usize,
        length: usize,
    ) -> Self {
        Self {
            write,
            write_offset,
            read,
            read_offset,
            length,
            delay_us: 0,
            cs_change: false,
        }
    }

    /// Write-only segment; whatever is clocked in lands in a scratch buffer.
    pub fn write(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec(), 0, vec![0; bytes.len()], 0, bytes.len())
    }

    /// Read-only segment of `length` bytes, clocking out zeroes.
    pub fn read(length: usize) -> Self {
        Self::new(vec![0; length], 0, vec![0; length], 0, length)
    }

    pub fn with_cs_change(mut self, cs_change: bool) -> Self {
        self.cs_change = cs_change;
        self
    }

    pub fn with_delay_us(mut self, delay_us: u16) -> Self {
        self.delay_us = delay_us;
        self
    }

    /// The bytes this segment clocks out.
    pub fn write_slice(&self) -> &[u8] {
        &self.write[self.write_offset..self.write_offset + self.length]
    }

    /// The bytes this segment clocked in.
    pub fn read_slice(&self) -> &[u8] {
        &self.read[self.read_offset..self.read_offset + self.length]
    }

    /// Check both buffer windows hold `length` bytes.
    pub fn validate(&self) -> Result<()> {
        check_window("spi write buffer", self.write.len(), self.write_offset, self.length)?;
        check_window("spi read buffer", self.read.len(), self.read_offset, self.length)
    }
}
