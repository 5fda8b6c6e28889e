//! Hardware abstraction layer traits.
//!
//! This module defines the capability traits (GPIO, I2C, SPI) that drivers
//! are written against, so they work the same on the native kernel devices
//! in this crate and on in-memory mocks.

pub mod gpio;
pub mod i2c;
pub mod spi;

// Re-export traits
pub use gpio::{GpioPort, PinValue};
pub use i2c::I2c;
pub use spi::Spi;
