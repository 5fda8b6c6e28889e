//! `struct spi_ioc_transfer` (`linux/spi/spidev.h`).

use bytes::{Buf, BufMut};

use super::Layout;
use crate::error::Result;

/// One segment of a `SPI_IOC_MESSAGE(n)` request.
///
/// Buffer addresses are always 64-bit in this structure, whatever the
/// pointer width. A zero `tx_buf` shifts out zeroes; a zero `rx_buf`
/// discards what comes in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpiIocTransfer {
    pub tx_buf: u64,
    pub rx_buf: u64,
    pub len: u32,
    /// Bitrate override; 0 keeps the device setting.
    pub speed_hz: u32,
    /// Delay after the last bit before the optional chip-select change.
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    /// Deselect the device before the next segment.
    pub cs_change: u8,
    pub tx_nbits: u8,
    pub rx_nbits: u8,
    pub word_delay_usecs: u8,
}

impl SpiIocTransfer {
    /// Full-duplex segment over `len` bytes of `tx` and `rx`.
    ///
    /// The record holds raw addresses; both buffers must outlive the ioctl.
    pub fn duplex(tx: &[u8], rx: &mut [u8], len: usize) -> Self {
        Self {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: len as u32,
            ..Default::default()
        }
    }
}

impl Layout for SpiIocTransfer {
    const SIZE: usize = 32;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        dst.put_u64_ne(self.tx_buf);
        dst.put_u64_ne(self.rx_buf);
        dst.put_u32_ne(self.len);
        dst.put_u32_ne(self.speed_hz);
        dst.put_u16_ne(self.delay_usecs);
        dst.put_u8(self.bits_per_word);
        dst.put_u8(self.cs_change);
        dst.put_u8(self.tx_nbits);
        dst.put_u8(self.rx_nbits);
        dst.put_u8(self.word_delay_usecs);
        dst.put_u8(0);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let transfer = Self {
            tx_buf: src.get_u64_ne(),
            rx_buf: src.get_u64_ne(),
            len: src.get_u32_ne(),
            speed_hz: src.get_u32_ne(),
            delay_usecs: src.get_u16_ne(),
            bits_per_word: src.get_u8(),
            cs_change: src.get_u8(),
            tx_nbits: src.get_u8(),
            rx_nbits: src.get_u8(),
            word_delay_usecs: src.get_u8(),
        };
        src.advance(1);
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets() {
        let transfer = SpiIocTransfer {
            tx_buf: 0x1111,
            rx_buf: 0x2222,
            len: 9,
            speed_hz: 1_000_000,
            delay_usecs: 10,
            bits_per_word: 8,
            cs_change: 1,
            tx_nbits: 0,
            rx_nbits: 0,
            word_delay_usecs: 2,
        };
        let encoded = transfer.to_bytes().unwrap();
        assert_eq!(encoded.len(), 32);
        assert_eq!(&encoded[16..20], &9u32.to_ne_bytes());
        assert_eq!(&encoded[24..26], &10u16.to_ne_bytes());
        assert_eq!(encoded[26], 8);
        assert_eq!(encoded[27], 1);
        assert_eq!(encoded[30], 2);
        assert_eq!(SpiIocTransfer::from_bytes(&encoded).unwrap(), transfer);
    }
}
