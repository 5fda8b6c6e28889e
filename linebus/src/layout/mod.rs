//! Binary layouts of the kernel structures we exchange through ioctl.
//!
//! Every record here has a fixed size and fixed field offsets matching the
//! kernel UAPI headers (`linux/gpio.h`, `linux/i2c-dev.h`,
//! `linux/spi/spidev.h`, `poll.h`). Fields are encoded in native byte order
//! since the kernel reads them straight out of our memory.
//!
//! Variable-length content (line offsets, config attributes, I2C messages)
//! occupies a fixed-capacity array region followed or preceded by an explicit
//! count. Asking a record to hold more entries than its region is a caller
//! error reported as [`Error::CapacityExceeded`].

pub mod gpio;
pub mod i2c;
pub mod ioctl;
pub mod poll;
pub mod spi;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Width of a pointer field on the running target.
pub const PTR_SIZE: usize = std::mem::size_of::<usize>();

/// A record with a fixed kernel layout.
pub trait Layout: Sized {
    /// Exact encoded size in bytes.
    const SIZE: usize;

    /// Append exactly `SIZE` bytes to `dst`.
    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()>;

    /// Read exactly `SIZE` bytes from `src`.
    ///
    /// Callers guarantee `src` holds at least `SIZE` bytes;
    /// [`Layout::from_bytes`] checks this before decoding.
    fn decode<B: Buf>(src: &mut B) -> Result<Self>;

    /// Encode into a fresh buffer of exactly `SIZE` bytes.
    fn to_bytes(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.encode(&mut buf)?;
        debug_assert_eq!(buf.len(), Self::SIZE);
        Ok(buf)
    }

    /// Decode from the first `SIZE` bytes of `bytes`.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::InvalidParameter(format!(
                "need {} bytes to decode, have {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut src = &bytes[..Self::SIZE];
        Self::decode(&mut src)
    }
}

/// Write `text` into a NUL-padded field of `width` bytes.
///
/// The terminating NUL must fit, so at most `width - 1` bytes of text.
pub(crate) fn put_c_string<B: BufMut>(
    dst: &mut B,
    what: &'static str,
    text: &str,
    width: usize,
) -> Result<()> {
    let bytes = text.as_bytes();
    Error::check_capacity(what, width - 1, bytes.len())?;
    dst.put_slice(bytes);
    dst.put_bytes(0, width - bytes.len());
    Ok(())
}

/// Read a NUL-padded field of `width` bytes.
pub(crate) fn get_c_string<B: Buf>(src: &mut B, width: usize) -> String {
    let mut raw = vec![0u8; width];
    src.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Write a pointer-sized address.
pub(crate) fn put_ptr<B: BufMut>(dst: &mut B, addr: u64) {
    dst.put_uint_ne(addr, PTR_SIZE);
}

/// Read a pointer-sized address.
pub(crate) fn get_ptr<B: Buf>(src: &mut B) -> u64 {
    src.get_uint_ne(PTR_SIZE)
}
