//! I2C RDWR records (`linux/i2c-dev.h`, `linux/i2c.h`).
//!
//! An RDWR transaction is an array of `struct i2c_msg` referenced by a
//! `struct i2c_rdwr_ioctl_data`. Message payloads are not inlined: each
//! `i2c_msg` carries the address and length of a buffer owned by the caller,
//! which the kernel reads from (writes) or fills in (reads).

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};

use super::{get_ptr, put_ptr, Layout, PTR_SIZE};
use crate::error::{Error, Result};

/// Kernel limit on messages per RDWR transaction (`I2C_RDWR_IOCTL_MAX_MSGS`).
pub const MAX_MESSAGES: usize = 42;

bitflags! {
    /// `i2c_msg.flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct I2cFlags: u16 {
        /// Read from the device into the buffer.
        const RD = 0x0001;
        const TEN = 0x0010;
        const NOSTART = 0x4000;
    }
}

/// One message of a transaction, owning its payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cMessage {
    pub addr: u16,
    pub flags: I2cFlags,
    pub buf: Vec<u8>,
}

impl I2cMessage {
    /// Write `data` to the device at `addr`.
    pub fn write(addr: u16, data: &[u8]) -> Self {
        Self {
            addr,
            flags: I2cFlags::empty(),
            buf: data.to_vec(),
        }
    }

    /// Read `len` bytes from the device at `addr`.
    pub fn read(addr: u16, len: usize) -> Self {
        Self {
            addr,
            flags: I2cFlags::RD,
            buf: vec![0; len],
        }
    }

    pub fn is_read(&self) -> bool {
        self.flags.contains(I2cFlags::RD)
    }
}

/// `struct i2c_msg`: the wire form of an [`I2cMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cMsg {
    pub addr: u16,
    pub flags: I2cFlags,
    pub len: u16,
    /// Address of the payload buffer.
    pub buf: u64,
}

impl I2cMsg {
    /// Describe `message`, pointing at its buffer.
    ///
    /// The returned record is only meaningful while `message.buf` is neither
    /// moved nor resized.
    pub fn describe(message: &mut I2cMessage) -> Result<Self> {
        let len = u16::try_from(message.buf.len()).map_err(|_| Error::CapacityExceeded {
            what: "i2c message length",
            capacity: u16::MAX as usize,
            requested: message.buf.len(),
        })?;
        Ok(Self {
            addr: message.addr,
            flags: message.flags,
            len,
            buf: message.buf.as_mut_ptr() as u64,
        })
    }
}

impl Layout for I2cMsg {
    // addr, flags, len, padding to pointer alignment, buf
    const SIZE: usize = 8 + PTR_SIZE;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        dst.put_u16_ne(self.addr);
        dst.put_u16_ne(self.flags.bits());
        dst.put_u16_ne(self.len);
        dst.put_bytes(0, 2);
        put_ptr(dst, self.buf);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let addr = src.get_u16_ne();
        let flags = I2cFlags::from_bits_retain(src.get_u16_ne());
        let len = src.get_u16_ne();
        src.advance(2);
        let buf = get_ptr(src);
        Ok(Self {
            addr,
            flags,
            len,
            buf,
        })
    }
}

/// `struct i2c_rdwr_ioctl_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cRdwrData {
    /// Address of the `i2c_msg` array.
    pub msgs: u64,
    pub nmsgs: u32,
}

impl Layout for I2cRdwrData {
    // msgs pointer, nmsgs padded to pointer width
    const SIZE: usize = 2 * PTR_SIZE;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        put_ptr(dst, self.msgs);
        dst.put_u32_ne(self.nmsgs);
        dst.put_bytes(0, PTR_SIZE - 4);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let msgs = get_ptr(src);
        let nmsgs = src.get_u32_ne();
        src.advance(PTR_SIZE - 4);
        Ok(Self { msgs, nmsgs })
    }
}

/// An encoded RDWR transaction ready for `I2C_RDWR`.
///
/// Borrows the messages mutably so their buffers stay put until the
/// transaction is dropped; the kernel writes read results straight into them.
pub struct RdwrTransaction<'a> {
    messages: &'a mut [I2cMessage],
    /// Encoded `i2c_msg` array referenced by `header`.
    body: BytesMut,
    header: BytesMut,
}

impl<'a> RdwrTransaction<'a> {
    pub fn encode(messages: &'a mut [I2cMessage]) -> Result<Self> {
        Error::check_capacity("i2c transaction messages", MAX_MESSAGES, messages.len())?;

        let mut body = BytesMut::with_capacity(messages.len() * I2cMsg::SIZE);
        for message in messages.iter_mut() {
            I2cMsg::describe(message)?.encode(&mut body)?;
        }

        let header = I2cRdwrData {
            msgs: body.as_ptr() as u64,
            nmsgs: messages.len() as u32,
        }
        .to_bytes()?;

        Ok(Self {
            messages,
            body,
            header,
        })
    }

    /// The `i2c_rdwr_ioctl_data` bytes passed to the ioctl.
    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.header
    }

    /// Decode the header and message array back into records.
    pub fn decode(&self) -> Result<(I2cRdwrData, Vec<I2cMsg>)> {
        let header = I2cRdwrData::from_bytes(&self.header)?;
        let msgs = self
            .body
            .chunks_exact(I2cMsg::SIZE)
            .map(I2cMsg::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        Ok((header, msgs))
    }

    pub fn messages(&self) -> &[I2cMessage] {
        &*self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_match_kernel() {
        assert_eq!(I2cMsg::SIZE, 8 + std::mem::size_of::<*const u8>());
        assert_eq!(I2cRdwrData::SIZE, 2 * std::mem::size_of::<*const u8>());
    }

    #[test]
    fn test_message_encoding() {
        let msg = I2cMsg {
            addr: 0x48,
            flags: I2cFlags::RD,
            len: 2,
            buf: 0x1000,
        };
        let encoded = msg.to_bytes().unwrap();
        assert_eq!(&encoded[0..2], &0x48u16.to_ne_bytes());
        assert_eq!(&encoded[2..4], &1u16.to_ne_bytes());
        assert_eq!(&encoded[4..6], &2u16.to_ne_bytes());
        assert_eq!(&encoded[6..8], &[0, 0]);
        assert_eq!(I2cMsg::from_bytes(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_transaction_points_at_message_buffers() {
        let mut messages = vec![I2cMessage::write(0x50, &[0x00, 0x10]), I2cMessage::read(0x50, 4)];
        let expected_ptrs: Vec<u64> = messages.iter().map(|m| m.buf.as_ptr() as u64).collect();

        let tx = RdwrTransaction::encode(&mut messages).unwrap();
        let (header, msgs) = tx.decode().unwrap();

        assert_eq!(header.nmsgs, 2);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].flags, I2cFlags::empty());
        assert_eq!(msgs[0].len, 2);
        assert_eq!(msgs[0].buf, expected_ptrs[0]);
        assert_eq!(msgs[1].flags, I2cFlags::RD);
        assert_eq!(msgs[1].len, 4);
        assert_eq!(msgs[1].buf, expected_ptrs[1]);
        assert!(tx.messages()[1].is_read());
    }

    #[test]
    fn test_empty_transaction() {
        let mut messages: Vec<I2cMessage> = Vec::new();
        let tx = RdwrTransaction::encode(&mut messages).unwrap();
        let (header, msgs) = tx.decode().unwrap();
        assert_eq!(header.nmsgs, 0);
        assert!(msgs.is_empty());
    }

    #[test]
    fn test_too_many_messages() {
        let mut messages = vec![I2cMessage::write(0x20, &[0]); MAX_MESSAGES + 1];
        assert!(matches!(
            RdwrTransaction::encode(&mut messages),
            Err(Error::CapacityExceeded {
                capacity: MAX_MESSAGES,
                ..
            })
        ));
    }
}
