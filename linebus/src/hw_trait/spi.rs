//! SPI hardware abstraction trait.

use crate::error::{Error, Result};

/// A full-duplex SPI bus.
///
/// Implementations are internally synchronized so one device can serve
/// several transfer strategies.
pub trait Spi: Send + Sync {
    /// Clock out `write[write_offset..][..length]` while clocking in
    /// `read[read_offset..][..length]`. Returns the bytes transferred.
    fn transfer(
        &self,
        write: &[u8],
        write_offset: usize,
        read: &mut [u8],
        read_offset: usize,
        length: usize,
    ) -> Result<usize>;

    /// Write `data`, discarding what comes back.
    fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let mut sink = vec![0u8; data.len()];
        self.transfer(data, 0, &mut sink, 0, data.len())?;
        Ok(())
    }

    /// Fill `buffer`, clocking out zeroes.
    fn read_bytes(&self, buffer: &mut [u8]) -> Result<usize> {
        let zeroes = vec![0u8; buffer.len()];
        let length = buffer.len();
        self.transfer(&zeroes, 0, buffer, 0, length)
    }
}

/// Check that `offset..offset + length` lies inside a buffer of `len`.
pub fn check_window(what: &'static str, len: usize, offset: usize, length: usize) -> Result<()> {
    let end = offset.checked_add(length).ok_or_else(|| {
        Error::InvalidParameter(format!("{what} window overflows: {offset} + {length}"))
    })?;
    Error::check_capacity(what, len, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_window() {
        assert!(check_window("write buffer", 8, 2, 6).is_ok());
        assert!(check_window("write buffer", 8, 0, 0).is_ok());
        assert!(matches!(
            check_window("write buffer", 8, 3, 6),
            Err(Error::CapacityExceeded {
                capacity: 8,
                requested: 9,
                ..
            })
        ));
        assert!(check_window("read buffer", 8, usize::MAX, 2).is_err());
    }
}
