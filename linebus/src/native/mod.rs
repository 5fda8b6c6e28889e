//! Native layer: the call gateway and the operation seams built on it.
//!
//! Devices never call libc directly. They hold the narrow
//! [`FileOperations`], [`IoctlOperations`] and [`PollingOperations`] traits,
//! implemented for real by [`LinuxOps`] and by in-memory fakes in tests.

pub mod caller;
mod ops;

#[cfg(test)]
pub(crate) mod fake;

pub use caller::{CapturedStateCaller, NativeArg, NativeCaller, PlainCaller};
pub use ops::{
    ioctl_record, FileDescriptor, FileOperations, IoctlOperations, LinuxOps, PollingOperations,
};

/// Raw file descriptor number.
pub type RawFd = std::os::fd::RawFd;
