use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::caller::{CapturedStateCaller, NativeArg, NativeCaller};
use super::RawFd;
use crate::error::{Error, Result};
use crate::layout::{poll::Poll, Layout};
use crate::tracing::prelude::*;

/// File-level syscalls.
pub trait FileOperations: Send + Sync {
    /// Open `path` with `O_*` flags. The descriptor closes on drop.
    fn open(self: Arc<Self>, path: &Path, flags: i32) -> Result<FileDescriptor>;

    fn read(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, fd: RawFd, buf: &[u8]) -> Result<usize>;

    fn close(&self, fd: RawFd) -> Result<()>;
}

/// ioctl requests.
pub trait IoctlOperations: Send + Sync {
    /// Request taking a pointer to `arg`, which the kernel may update.
    fn ioctl_bytes(&self, fd: RawFd, request: u64, arg: &mut [u8]) -> Result<i32>;
}

/// Encode `record`, submit it and decode what the kernel left behind.
pub fn ioctl_record<T: Layout>(
    ops: &dyn IoctlOperations,
    fd: RawFd,
    request: u64,
    record: &T,
) -> Result<T> {
    let mut bytes = record.to_bytes()?;
    ops.ioctl_bytes(fd, request, &mut bytes)?;
    T::from_bytes(&bytes)
}

/// Readiness waits.
pub trait PollingOperations: Send + Sync {
    /// Wait up to `timeout` on `poll.fd`, filling in `poll.revents`.
    ///
    /// Returns the number of ready descriptors, 0 on timeout.
    fn poll(&self, poll: &mut Poll, timeout: Duration) -> Result<i32>;
}

/// An open descriptor, closed exactly once on `close` or drop.
pub struct FileDescriptor {
    fd: RawFd,
    ops: Arc<dyn FileOperations>,
    closed: AtomicBool,
}

impl FileDescriptor {
    pub fn new(fd: RawFd, ops: Arc<dyn FileOperations>) -> Self {
        Self {
            fd,
            ops,
            closed: AtomicBool::new(false),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(fd = self.fd, "Closing descriptor");
        self.ops.close(self.fd)
    }
}

impl std::fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("fd", &self.fd)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(fd = self.fd, error = %e, "Failed to close descriptor");
        }
    }
}

/// Real syscalls through the captured-state gateway.
#[derive(Debug)]
pub struct LinuxOps {
    open: CapturedStateCaller,
    close: CapturedStateCaller,
    read: CapturedStateCaller,
    write: CapturedStateCaller,
    ioctl: CapturedStateCaller,
    poll: CapturedStateCaller,
}

impl LinuxOps {
    pub fn new() -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            open: CapturedStateCaller::new("open")?,
            close: CapturedStateCaller::new("close")?,
            read: CapturedStateCaller::new("read")?,
            write: CapturedStateCaller::new("write")?,
            ioctl: CapturedStateCaller::new("ioctl")?,
            poll: CapturedStateCaller::new("poll")?,
        }))
    }
}

impl FileOperations for LinuxOps {
    fn open(self: Arc<Self>, path: &Path, flags: i32) -> Result<FileDescriptor> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            Error::InvalidParameter(format!("path contains NUL: {}", path.display()))
        })?;
        let fd = self
            .open
            .invoke(&mut [NativeArg::Str(&c_path), NativeArg::Int(flags)])? as RawFd;
        debug!(path = %path.display(), fd, "Opened device");
        Ok(FileDescriptor::new(fd, self))
    }

    fn read(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize> {
        let n = self
            .read
            .invoke(&mut [NativeArg::Int(fd), NativeArg::Buf(buf)])?;
        Ok(n as usize)
    }

    fn write(&self, fd: RawFd, buf: &[u8]) -> Result<usize> {
        let n = self
            .write
            .invoke(&mut [NativeArg::Int(fd), NativeArg::Bytes(buf)])?;
        Ok(n as usize)
    }

    fn close(&self, fd: RawFd) -> Result<()> {
        self.close.invoke(&mut [NativeArg::Int(fd)])?;
        Ok(())
    }
}

impl IoctlOperations for LinuxOps {
    fn ioctl_bytes(&self, fd: RawFd, request: u64, arg: &mut [u8]) -> Result<i32> {
        trace!(fd, request = %format!("{:#010x}", request), len = arg.len(), "ioctl");
        let result = self.ioctl.invoke(&mut [
            NativeArg::Int(fd),
            NativeArg::ULong(request),
            NativeArg::Buf(arg),
        ])?;
        Ok(result as i32)
    }
}

impl PollingOperations for LinuxOps {
    fn poll(&self, poll: &mut Poll, timeout: Duration) -> Result<i32> {
        let mut record = poll.to_bytes()?;
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        let ready = self
            .poll
            .invoke(&mut [NativeArg::Buf(&mut record), NativeArg::Int(timeout_ms)])?;
        *poll = Poll::from_bytes(&record)?;
        Ok(ready as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::fake::FakeOps;

    #[test]
    fn test_descriptor_closes_once() {
        let ops = FakeOps::new();
        let fd = FileDescriptor::new(9, ops.clone());
        fd.close().unwrap();
        fd.close().unwrap();
        drop(fd);
        assert_eq!(ops.closed(), vec![9]);
    }

    #[test]
    fn test_descriptor_closes_on_drop() {
        let ops = FakeOps::new();
        drop(FileDescriptor::new(4, ops.clone()));
        assert_eq!(ops.closed(), vec![4]);
    }

    #[test]
    fn test_linux_open_missing_device() {
        let ops = LinuxOps::new().unwrap();
        let err = ops
            .open(Path::new("/dev/linebus-missing"), libc::O_RDWR)
            .unwrap_err();
        assert_eq!(err.errno(), Some(libc::ENOENT));
    }

    #[test]
    fn test_linux_pipe_round_trip() {
        let ops = LinuxOps::new().unwrap();
        let mut fds = [0; 2];
        // SAFETY: fds has room for both ends
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let reader = FileDescriptor::new(fds[0], ops.clone());
        let writer = FileDescriptor::new(fds[1], ops.clone());

        assert_eq!(ops.write(writer.fd(), b"edge").unwrap(), 4);

        let mut poll = Poll::new(reader.fd());
        assert_eq!(ops.poll(&mut poll, Duration::from_millis(100)).unwrap(), 1);
        assert!(poll.readable());

        let mut buf = [0u8; 8];
        assert_eq!(ops.read(reader.fd(), &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"edge");
    }

    #[test]
    fn test_ioctl_on_pipe_fails_with_errno() {
        let ops = LinuxOps::new().unwrap();
        let mut fds = [0; 2];
        // SAFETY: fds has room for both ends
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let _reader = FileDescriptor::new(fds[0], ops.clone());
        let _writer = FileDescriptor::new(fds[1], ops.clone());

        let mut values = [0u8; 16];
        let err = ops
            .ioctl_bytes(
                fds[0],
                crate::layout::ioctl::GPIO_V2_LINE_GET_VALUES_IOCTL,
                &mut values,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NativeCall { name: "ioctl", errno: Some(_), .. }));
    }
}
