//! spidev bus (`/dev/spidevB.C`).

use std::path::PathBuf;
use std::sync::Arc;

use bytes::BytesMut;

use super::{Message, SpiTransfer};
use crate::error::{Error, Result};
use crate::hw_trait::spi::{check_window, Spi};
use crate::layout::ioctl::{
    spi_ioc_message, SPI_IOC_WR_BITS_PER_WORD, SPI_IOC_WR_LSB_FIRST, SPI_IOC_WR_MAX_SPEED_HZ,
    SPI_IOC_WR_MODE,
};
use crate::layout::{spi::SpiIocTransfer, Layout};
use crate::native::{FileDescriptor, FileOperations, IoctlOperations, LinuxOps};
use crate::tracing::prelude::*;

/// Most segments one `SPI_IOC_MESSAGE(n)` request can describe.
pub const MAX_MESSAGES: usize = 511;

/// Bus, chip select and clocking of one SPI device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiConfig {
    pub bus: u32,
    pub chip_select: u32,
    /// Clock rate in Hz.
    pub baud_rate: u32,
    /// SPI mode 0-3 (CPOL/CPHA).
    pub mode: u8,
    pub bits_per_word: u8,
    pub lsb_first: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            chip_select: 0,
            baud_rate: 500_000,
            mode: 0,
            bits_per_word: 8,
            lsb_first: false,
        }
    }
}

impl SpiConfig {
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/spidev{}.{}", self.bus, self.chip_select))
    }
}

/// An open spidev device.
pub struct NativeSpi {
    config: SpiConfig,
    fd: FileDescriptor,
    ioctl: Arc<dyn IoctlOperations>,
}

impl NativeSpi {
    pub fn open(config: SpiConfig) -> Result<Self> {
        Self::open_with(config, LinuxOps::new()?)
    }

    /// Open through `ops` and apply mode, word size, clock and bit order.
    pub fn open_with<O>(config: SpiConfig, ops: Arc<O>) -> Result<Self>
    where
        O: FileOperations + IoctlOperations + 'static,
    {
        if config.mode > 3 {
            return Err(Error::InvalidParameter(format!(
                "spi mode {} out of range",
                config.mode
            )));
        }

        let path = config.device_path();
        let fd = Arc::clone(&ops).open(&path, libc::O_RDWR)?;
        let spi = Self {
            config,
            fd,
            ioctl: ops,
        };
        spi.configure()?;
        info!(
            path = %path.display(),
            mode = spi.config.mode,
            baud_rate = spi.config.baud_rate,
            "Opened SPI device"
        );
        Ok(spi)
    }

    fn configure(&self) -> Result<()> {
        let fd = self.fd.fd();
        self.ioctl
            .ioctl_bytes(fd, SPI_IOC_WR_MODE, &mut [self.config.mode])?;
        self.ioctl
            .ioctl_bytes(fd, SPI_IOC_WR_BITS_PER_WORD, &mut [self.config.bits_per_word])?;
        self.ioctl.ioctl_bytes(
            fd,
            SPI_IOC_WR_MAX_SPEED_HZ,
            &mut self.config.baud_rate.to_ne_bytes(),
        )?;
        self.ioctl.ioctl_bytes(
            fd,
            SPI_IOC_WR_LSB_FIRST,
            &mut [u8::from(self.config.lsb_first)],
        )?;
        Ok(())
    }

    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    pub fn close(&self) -> Result<()> {
        self.fd.close()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.fd.is_closed() {
            return Err(Error::Closed("spi device"));
        }
        Ok(())
    }

    fn segment(&self, tx: &[u8], rx: &mut [u8], len: usize) -> SpiIocTransfer {
        SpiIocTransfer {
            speed_hz: self.config.baud_rate,
            bits_per_word: self.config.bits_per_word,
            ..SpiIocTransfer::duplex(tx, rx, len)
        }
    }

    /// Submit all `messages` as one kernel request, keeping each message's
    /// delay and chip-select change.
    pub fn transfer_messages(&self, messages: &mut [Message]) -> Result<usize> {
        self.ensure_open()?;
        if messages.is_empty() {
            return Ok(0);
        }
        Error::check_capacity("spi message segments", MAX_MESSAGES, messages.len())?;

        let mut records = BytesMut::with_capacity(messages.len() * SpiIocTransfer::SIZE);
        for message in messages.iter_mut() {
            message.validate()?;
            let Message {
                write,
                write_offset,
                read,
                read_offset,
                length,
                delay_us,
                cs_change,
            } = message;
            let segment = SpiIocTransfer {
                delay_usecs: *delay_us,
                cs_change: u8::from(*cs_change),
                ..self.segment(&write[*write_offset..], &mut read[*read_offset..], *length)
            };
            segment.encode(&mut records)?;
        }

        trace!(segments = messages.len(), "SPI message");
        let n = self
            .ioctl
            .ioctl_bytes(self.fd.fd(), spi_ioc_message(messages.len()), &mut records)?;
        Ok(n.max(0) as usize)
    }
}

impl Spi for NativeSpi {
    fn transfer(
        &self,
        write: &[u8],
        write_offset: usize,
        read: &mut [u8],
        read_offset: usize,
        length: usize,
    ) -> Result<usize> {
        self.ensure_open()?;
        check_window("spi write buffer", write.len(), write_offset, length)?;
        check_window("spi read buffer", read.len(), read_offset, length)?;

        let mut record = self
            .segment(&write[write_offset..], &mut read[read_offset..], length)
            .to_bytes()?;
        let n = self
            .ioctl
            .ioctl_bytes(self.fd.fd(), spi_ioc_message(1), &mut record)?;
        Ok(n.max(0) as usize)
    }
}

impl SpiTransfer for NativeSpi {
    fn transfer(&self, messages: &mut [Message]) -> Result<usize> {
        self.transfer_messages(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::fake::FakeOps;
    use std::path::Path;

    /// Wire MOSI to MISO: every segment reads back what it wrote.
    fn loopback(ops: &Arc<FakeOps>) {
        ops.on_ioctl(|_, request, arg| {
            let count = arg.len() / SpiIocTransfer::SIZE;
            if count == 0 || request != spi_ioc_message(count) {
                return Ok(0);
            }
            let mut total = 0;
            for chunk in arg.chunks_exact(SpiIocTransfer::SIZE) {
                let segment = SpiIocTransfer::from_bytes(chunk)?;
                // SAFETY: the records point at live message buffers of at
                // least `len` bytes for the duration of the ioctl
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        segment.tx_buf as *const u8,
                        segment.rx_buf as *mut u8,
                        segment.len as usize,
                    );
                }
                total += segment.len as i32;
            }
            Ok(total)
        });
    }

    #[test]
    fn test_open_configures_device() {
        let ops = FakeOps::new();
        let config = SpiConfig {
            bus: 1,
            chip_select: 2,
            baud_rate: 1_000_000,
            mode: 3,
            lsb_first: true,
            ..Default::default()
        };
        let spi = NativeSpi::open_with(config, ops.clone()).unwrap();

        assert_eq!(ops.opened(), vec![Path::new("/dev/spidev1.2").to_path_buf()]);
        let calls = ops.ioctls();
        let requests: Vec<u64> = calls.iter().map(|c| c.request).collect();
        assert_eq!(
            requests,
            vec![
                SPI_IOC_WR_MODE,
                SPI_IOC_WR_BITS_PER_WORD,
                SPI_IOC_WR_MAX_SPEED_HZ,
                SPI_IOC_WR_LSB_FIRST
            ]
        );
        assert_eq!(calls[0].arg, vec![3]);
        assert_eq!(calls[1].arg, vec![8]);
        assert_eq!(calls[2].arg, 1_000_000u32.to_ne_bytes().to_vec());
        assert_eq!(calls[3].arg, vec![1]);

        spi.close().unwrap();
        assert_eq!(ops.closed().len(), 1);
    }

    #[test]
    fn test_invalid_mode() {
        let ops = FakeOps::new();
        let config = SpiConfig {
            mode: 4,
            ..Default::default()
        };
        assert!(NativeSpi::open_with(config, ops.clone()).is_err());
        assert!(ops.opened().is_empty());
    }

    #[test]
    fn test_single_transfer_is_full_duplex() {
        let ops = FakeOps::new();
        loopback(&ops);
        let spi = NativeSpi::open_with(SpiConfig::default(), ops.clone()).unwrap();

        let mut read = [0u8; 6];
        let n = Spi::transfer(&spi, &[9, 1, 2, 3], 1, &mut read, 2, 3).unwrap();
        assert_eq!(n, 3);
        assert_eq!(read, [0, 0, 1, 2, 3, 0]);

        let last = ops.ioctls().pop().unwrap();
        assert_eq!(last.request, spi_ioc_message(1));
        let segment = SpiIocTransfer::from_bytes(&last.arg).unwrap();
        assert_eq!(segment.len, 3);
        assert_eq!(segment.speed_hz, 500_000);
        assert_eq!(segment.bits_per_word, 8);
    }

    #[test]
    fn test_messages_go_out_as_one_request() {
        let ops = FakeOps::new();
        loopback(&ops);
        let spi = NativeSpi::open_with(SpiConfig::default(), ops.clone()).unwrap();

        let mut messages = [
            Message::write(&[0x03, 0x00]).with_cs_change(true),
            Message::new(vec![7, 7, 7], 0, vec![0; 3], 0, 3).with_delay_us(20),
        ];
        assert_eq!(spi.transfer_messages(&mut messages).unwrap(), 5);
        assert_eq!(messages[1].read, vec![7, 7, 7]);

        let last = ops.ioctls().pop().unwrap();
        assert_eq!(last.request, spi_ioc_message(2));
        let first = SpiIocTransfer::from_bytes(&last.arg[..SpiIocTransfer::SIZE]).unwrap();
        let second = SpiIocTransfer::from_bytes(&last.arg[SpiIocTransfer::SIZE..]).unwrap();
        assert_eq!(first.cs_change, 1);
        assert_eq!(second.cs_change, 0);
        assert_eq!(second.delay_usecs, 20);

        assert_eq!(spi.transfer_messages(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_closed_device_rejects_transfers() {
        let ops = FakeOps::new();
        let spi = NativeSpi::open_with(SpiConfig::default(), ops.clone()).unwrap();
        spi.close().unwrap();

        let mut read = [0u8; 1];
        assert!(matches!(
            Spi::transfer(&spi, &[1], 0, &mut read, 0, 1),
            Err(Error::Closed(_))
        ));
    }
}
