//! Digital I/O bus access for Linux boards.
//!
//! `linebus` talks to the kernel's GPIO v2, I2C and spidev character devices
//! directly through ioctl calls. Around that native layer it provides the
//! pieces needed to turn raw line events into application notifications: a
//! background event poller, interchangeable debounce strategies and a
//! listener fan-out. SPI transfers can be batched so a sequence of logical
//! messages goes out as few physical transfers as possible.
//!
//! Layering, leaf to root:
//!
//! - [`layout`]: fixed-layout records mirroring the kernel structures.
//! - [`native`]: the call gateway and the file/ioctl/poll seams.
//! - [`event`]: event poller and debounce strategies.
//! - [`emitter`]: listener fan-out.
//! - [`gpio`], [`i2c`], [`spi`]: the devices built on top.

pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod gpio;
pub mod hw_trait;
pub mod i2c;
pub mod layout;
pub mod native;
pub mod spi;
pub mod tracing;

pub use error::{Error, Result};
