//! ioctl request numbers.
//!
//! Request codes pack direction, type, number and argument size the way the
//! `_IOC` family of macros in `asm-generic/ioctl.h` does.

use super::{
    gpio::{ChipInfo, LineInfo, LineRequest, LineValues},
    spi::SpiIocTransfer,
    Layout,
};

const IOC_NRBITS: u64 = 8;
const IOC_TYPEBITS: u64 = 8;
const IOC_SIZEBITS: u64 = 14;

const IOC_NRSHIFT: u64 = 0;
const IOC_TYPESHIFT: u64 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u64 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u64 = IOC_SIZESHIFT + IOC_SIZEBITS;

pub const IOC_NONE: u64 = 0;
pub const IOC_WRITE: u64 = 1;
pub const IOC_READ: u64 = 2;

pub const fn ioc(dir: u64, ty: u64, nr: u64, size: u64) -> u64 {
    (dir << IOC_DIRSHIFT) | (ty << IOC_TYPESHIFT) | (nr << IOC_NRSHIFT) | (size << IOC_SIZESHIFT)
}

pub const fn ior(ty: u64, nr: u64, size: usize) -> u64 {
    ioc(IOC_READ, ty, nr, size as u64)
}

pub const fn iow(ty: u64, nr: u64, size: usize) -> u64 {
    ioc(IOC_WRITE, ty, nr, size as u64)
}

pub const fn iowr(ty: u64, nr: u64, size: usize) -> u64 {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size as u64)
}

// linux/gpio.h
const GPIO_MAGIC: u64 = 0xB4;

pub const GPIO_GET_CHIPINFO_IOCTL: u64 = ior(GPIO_MAGIC, 0x01, ChipInfo::SIZE);
pub const GPIO_V2_GET_LINEINFO_IOCTL: u64 = iowr(GPIO_MAGIC, 0x05, LineInfo::SIZE);
pub const GPIO_V2_GET_LINE_IOCTL: u64 = iowr(GPIO_MAGIC, 0x07, LineRequest::SIZE);
pub const GPIO_V2_LINE_GET_VALUES_IOCTL: u64 = iowr(GPIO_MAGIC, 0x0E, LineValues::SIZE);
pub const GPIO_V2_LINE_SET_VALUES_IOCTL: u64 = iowr(GPIO_MAGIC, 0x0F, LineValues::SIZE);

// linux/i2c-dev.h
pub const I2C_FUNCS: u64 = 0x0705;
pub const I2C_RDWR: u64 = 0x0707;

/// `I2C_FUNC_I2C` bit of the `I2C_FUNCS` result: plain I2C transfers.
pub const I2C_FUNC_I2C: u64 = 0x0000_0001;

// linux/spi/spidev.h
const SPI_IOC_MAGIC: u64 = b'k' as u64;

pub const SPI_IOC_RD_MODE: u64 = ior(SPI_IOC_MAGIC, 1, 1);
pub const SPI_IOC_WR_MODE: u64 = iow(SPI_IOC_MAGIC, 1, 1);
pub const SPI_IOC_RD_LSB_FIRST: u64 = ior(SPI_IOC_MAGIC, 2, 1);
pub const SPI_IOC_WR_LSB_FIRST: u64 = iow(SPI_IOC_MAGIC, 2, 1);
pub const SPI_IOC_RD_BITS_PER_WORD: u64 = ior(SPI_IOC_MAGIC, 3, 1);
pub const SPI_IOC_WR_BITS_PER_WORD: u64 = iow(SPI_IOC_MAGIC, 3, 1);
pub const SPI_IOC_RD_MAX_SPEED_HZ: u64 = ior(SPI_IOC_MAGIC, 4, 4);
pub const SPI_IOC_WR_MAX_SPEED_HZ: u64 = iow(SPI_IOC_MAGIC, 4, 4);

/// Size argument of `SPI_IOC_MESSAGE(n)`; zero when it would not fit the
/// size field.
const fn spi_msgsize(n: usize) -> usize {
    let size = n * SpiIocTransfer::SIZE;
    if size < (1 << IOC_SIZEBITS) {
        size
    } else {
        0
    }
}

/// `SPI_IOC_MESSAGE(n)`: submit `n` transfers as one message.
pub const fn spi_ioc_message(n: usize) -> u64 {
    iow(SPI_IOC_MAGIC, 0, spi_msgsize(n))
}
