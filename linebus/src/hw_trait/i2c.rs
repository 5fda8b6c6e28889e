//! I2C hardware abstraction trait.

use crate::error::Result;
use crate::layout::i2c::I2cMessage;

/// I2C bus abstraction
pub trait I2c: Send {
    /// Run `messages` as one transaction: a start condition per message and
    /// a single stop after the last. Read messages have their buffers filled.
    fn transfer(&mut self, messages: &mut [I2cMessage]) -> Result<()>;

    /// Write data to an I2C device.
    fn write(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        self.transfer(&mut [I2cMessage::write(addr, data)])
    }

    /// Read data from an I2C device.
    fn read(&mut self, addr: u16, buffer: &mut [u8]) -> Result<()> {
        let mut messages = [I2cMessage::read(addr, buffer.len())];
        self.transfer(&mut messages)?;
        buffer.copy_from_slice(&messages[0].buf);
        Ok(())
    }

    /// Write data then read from an I2C device (repeated start).
    fn write_read(&mut self, addr: u16, write: &[u8], read: &mut [u8]) -> Result<()> {
        let mut messages = [I2cMessage::write(addr, write), I2cMessage::read(addr, read.len())];
        self.transfer(&mut messages)?;
        read.copy_from_slice(&messages[1].buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Register-file device: a write sets the register pointer, reads
    /// stream from it.
    #[derive(Default)]
    struct Registers {
        regs: HashMap<u16, Vec<u8>>,
        pointer: usize,
        transactions: usize,
    }

    impl I2c for Registers {
        fn transfer(&mut self, messages: &mut [I2cMessage]) -> Result<()> {
            self.transactions += 1;
            for message in messages.iter_mut() {
                let regs = self.regs.entry(message.addr).or_insert_with(|| vec![0; 16]);
                if message.is_read() {
                    let end = self.pointer + message.buf.len();
                    message.buf.copy_from_slice(&regs[self.pointer..end]);
                } else if let Some((&reg, data)) = message.buf.split_first() {
                    self.pointer = reg as usize;
                    regs[self.pointer..self.pointer + data.len()].copy_from_slice(data);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_write_read_is_one_transaction() {
        let mut bus = Registers::default();
        bus.write(0x48, &[0x02, 0xAA, 0xBB]).unwrap();

        let mut out = [0u8; 2];
        bus.write_read(0x48, &[0x02], &mut out).unwrap();
        assert_eq!(out, [0xAA, 0xBB]);
        assert_eq!(bus.transactions, 2);

        let mut out = [0u8; 1];
        bus.read(0x48, &mut out).unwrap();
        assert_eq!(out, [0xAA]);
    }
}
