//! In-memory stand-in for the kernel, for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{FileDescriptor, FileOperations, IoctlOperations, PollingOperations, RawFd};
use crate::error::{Error, Result};
use crate::layout::poll::{Poll, PollFlags};

type IoctlHandler = Box<dyn FnMut(RawFd, u64, &mut [u8]) -> Result<i32> + Send>;

/// One recorded ioctl: descriptor, request and the argument as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoctlCall {
    pub fd: RawFd,
    pub request: u64,
    pub arg: Vec<u8>,
}

#[derive(Default)]
struct State {
    reads: VecDeque<Vec<u8>>,
    poll_failure: Option<i32>,
    opened: Vec<PathBuf>,
    closed: Vec<RawFd>,
    writes: Vec<(RawFd, Vec<u8>)>,
    ioctls: Vec<IoctlCall>,
    handler: Option<IoctlHandler>,
}

pub struct FakeOps {
    state: Mutex<State>,
    next_fd: AtomicI32,
}

impl FakeOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            next_fd: AtomicI32::new(100),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Queue bytes returned by the next read; polls report POLLIN while
    /// reads are queued.
    pub fn push_read(&self, bytes: Vec<u8>) {
        self.state().reads.push_back(bytes);
    }

    pub fn pending_reads(&self) -> usize {
        self.state().reads.len()
    }

    /// Make the next poll fail with `errno`.
    pub fn fail_next_poll(&self, errno: i32) {
        self.state().poll_failure = Some(errno);
    }

    pub fn on_ioctl(&self, handler: impl FnMut(RawFd, u64, &mut [u8]) -> Result<i32> + Send + 'static) {
        self.state().handler = Some(Box::new(handler));
    }

    pub fn ioctls(&self) -> Vec<IoctlCall> {
        self.state().ioctls.clone()
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.state().opened.clone()
    }

    pub fn closed(&self) -> Vec<RawFd> {
        self.state().closed.clone()
    }

    pub fn writes(&self) -> Vec<(RawFd, Vec<u8>)> {
        self.state().writes.clone()
    }
}

fn failure(name: &'static str, errno: i32) -> Error {
    Error::NativeCall {
        name,
        errno: Some(errno),
        message: format!("fake errno {}", errno),
    }
}

impl FileOperations for FakeOps {
    fn open(self: Arc<Self>, path: &Path, _flags: i32) -> Result<FileDescriptor> {
        self.state().opened.push(path.to_path_buf());
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        Ok(FileDescriptor::new(fd, self))
    }

    fn read(&self, _fd: RawFd, buf: &mut [u8]) -> Result<usize> {
        let bytes = self
            .state()
            .reads
            .pop_front()
            .ok_or_else(|| failure("read", libc::EAGAIN))?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn write(&self, fd: RawFd, buf: &[u8]) -> Result<usize> {
        self.state().writes.push((fd, buf.to_vec()));
        Ok(buf.len())
    }

    fn close(&self, fd: RawFd) -> Result<()> {
        self.state().closed.push(fd);
        Ok(())
    }
}

impl IoctlOperations for FakeOps {
    fn ioctl_bytes(&self, fd: RawFd, request: u64, arg: &mut [u8]) -> Result<i32> {
        let mut state = self.state();
        state.ioctls.push(IoctlCall {
            fd,
            request,
            arg: arg.to_vec(),
        });
        match state.handler.as_mut() {
            Some(handler) => handler(fd, request, arg),
            None => Ok(0),
        }
    }
}

impl PollingOperations for FakeOps {
    fn poll(&self, poll: &mut Poll, timeout: Duration) -> Result<i32> {
        let ready = {
            let mut state = self.state();
            if let Some(errno) = state.poll_failure.take() {
                return Err(failure("poll", errno));
            }
            !state.reads.is_empty()
        };
        if ready {
            poll.revents = PollFlags::POLLIN;
            Ok(1)
        } else {
            std::thread::sleep(timeout.min(Duration::from_millis(2)));
            poll.revents = PollFlags::empty();
            Ok(0)
        }
    }
}
