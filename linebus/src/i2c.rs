//! I2C bus through `/dev/i2c-N`.
//!
//! Transfers use `I2C_RDWR`, so a sequence of messages is one transaction
//! with a repeated start between messages and a single stop at the end.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hw_trait::I2c;
use crate::layout::i2c::{I2cFlags, I2cMessage, RdwrTransaction};
use crate::layout::ioctl::{I2C_FUNCS, I2C_FUNC_I2C, I2C_RDWR};
use crate::native::{FileDescriptor, FileOperations, IoctlOperations, LinuxOps};
use crate::tracing::prelude::*;

/// Highest 7-bit address.
const MAX_7BIT_ADDR: u16 = 0x7F;

/// An open I2C adapter.
pub struct NativeI2c {
    path: PathBuf,
    fd: FileDescriptor,
    ioctl: Arc<dyn IoctlOperations>,
}

impl NativeI2c {
    pub fn device_path(bus: u32) -> PathBuf {
        PathBuf::from(format!("/dev/i2c-{bus}"))
    }

    pub fn open(bus: u32) -> Result<Self> {
        Self::open_with(bus, LinuxOps::new()?)
    }

    /// Open bus `bus` through `ops`, checking it supports plain I2C
    /// transfers.
    pub fn open_with<O>(bus: u32, ops: Arc<O>) -> Result<Self>
    where
        O: FileOperations + IoctlOperations + 'static,
    {
        let path = Self::device_path(bus);
        let fd = Arc::clone(&ops).open(&path, libc::O_RDWR)?;

        let mut funcs = [0u8; std::mem::size_of::<libc::c_ulong>()];
        ops.ioctl_bytes(fd.fd(), I2C_FUNCS, &mut funcs)?;
        let funcs = libc::c_ulong::from_ne_bytes(funcs) as u64;
        if funcs & I2C_FUNC_I2C == 0 {
            return Err(Error::InvalidParameter(format!(
                "{} does not support I2C_RDWR transfers (funcs {funcs:#x})",
                path.display()
            )));
        }

        info!(path = %path.display(), funcs = %format!("{funcs:#x}"), "Opened I2C bus");
        Ok(Self {
            path,
            fd,
            ioctl: ops,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn close(&self) -> Result<()> {
        self.fd.close()
    }

    /// Run `messages` as one RDWR transaction; read messages get their
    /// buffers filled in place.
    pub fn transfer(&self, messages: &mut [I2cMessage]) -> Result<()> {
        if self.fd.is_closed() {
            return Err(Error::Closed("i2c bus"));
        }
        if messages.is_empty() {
            return Ok(());
        }
        for message in messages.iter() {
            if !message.flags.contains(I2cFlags::TEN) && message.addr > MAX_7BIT_ADDR {
                return Err(Error::InvalidParameter(format!(
                    "address {:#x} is not a 7-bit address",
                    message.addr
                )));
            }
        }

        trace!(messages = messages.len(), "I2C transaction");
        let mut transaction = RdwrTransaction::encode(messages)?;
        self.ioctl
            .ioctl_bytes(self.fd.fd(), I2C_RDWR, transaction.header_mut())?;
        Ok(())
    }
}

impl I2c for NativeI2c {
    fn transfer(&mut self, messages: &mut [I2cMessage]) -> Result<()> {
        NativeI2c::transfer(self, messages)
    }
}
