//! Background poller for line request descriptors.
//!
//! ## Lifecycle
//!
//! A poller is `Stopped` until [`EventPoller::start`] spawns a dedicated
//! thread for one run. The run loops: wait for readability (bounded by the
//! configured timeout), read up to [`EVENT_BATCH_SIZE`] records, decode them
//! and hand non-empty batches to the callback.
//!
//! Stopping is cooperative. [`EventPoller::stop`] or [`PollerHandle::stop`]
//! cancels the run's token, which the loop checks before every wait, so an
//! in-flight wait or read always completes first.
//!
//! Any failure while waiting, reading or decoding ends the run. It is logged
//! here and not reported anywhere else; the poller simply reads as stopped
//! afterwards and must be started again to resume delivery.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{decode_batch, PollEventsCallback};
use crate::error::{Error, Result};
use crate::layout::{
    gpio::LineEvent,
    poll::{Poll, PollFlags},
    Layout,
};
use crate::native::{FileDescriptor, FileOperations, PollingOperations, RawFd};
use crate::tracing::prelude::*;

/// Records read per wake-up.
pub const EVENT_BATCH_SIZE: usize = 16;

/// State of one run.
#[derive(Debug)]
struct Run {
    shutdown: CancellationToken,
    running: AtomicBool,
}

/// Stop capability for one poller run, handed to callbacks.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    fd: RawFd,
    run: Arc<Run>,
}

impl PollerHandle {
    fn new(fd: RawFd) -> Self {
        Self {
            fd,
            run: Arc::new(Run {
                shutdown: CancellationToken::new(),
                running: AtomicBool::new(true),
            }),
        }
    }

    /// Handle not backed by a poller thread, for driving callbacks directly.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new(-1)
    }

    /// Ask the run to stop after its current wait/read cycle.
    pub fn stop(&self) {
        self.run.shutdown.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.run.shutdown.is_cancelled()
    }

    /// True until the run's loop has exited.
    pub fn is_running(&self) -> bool {
        self.run.running.load(Ordering::Acquire)
    }

    /// Descriptor being watched.
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

struct ActiveRun {
    handle: PollerHandle,
    thread: Option<JoinHandle<()>>,
}

/// Watches one line request descriptor for edge events.
pub struct EventPoller {
    fd: Arc<FileDescriptor>,
    callback: Arc<dyn PollEventsCallback>,
    timeout: Duration,
    polling: Arc<dyn PollingOperations>,
    files: Arc<dyn FileOperations>,
    active: Mutex<Option<ActiveRun>>,
    /// Threads of stopped runs not joined yet.
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl EventPoller {
    pub fn new(
        fd: Arc<FileDescriptor>,
        callback: Arc<dyn PollEventsCallback>,
        timeout: Duration,
        polling: Arc<dyn PollingOperations>,
        files: Arc<dyn FileOperations>,
    ) -> Self {
        Self {
            fd,
            callback,
            timeout,
            polling,
            files,
            active: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Start a run unless one is already going.
    ///
    /// A run that was asked to stop but has not exited yet does not count:
    /// a fresh run starts and the old one winds down after its current
    /// wait. [`EventPoller::join`] waits for both.
    pub fn start(&self) -> Result<PollerHandle> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = active.as_mut() {
            if run.handle.is_running() && !run.handle.is_stop_requested() {
                return Ok(run.handle.clone());
            }
            if let Some(thread) = run.thread.take() {
                let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
                retired.retain(|t| !t.is_finished());
                retired.push(thread);
            }
        }

        let handle = PollerHandle::new(self.fd.fd());
        let worker = Worker {
            fd: Arc::clone(&self.fd),
            callback: Arc::clone(&self.callback),
            timeout: self.timeout,
            polling: Arc::clone(&self.polling),
            files: Arc::clone(&self.files),
            handle: handle.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("gpio-event-poller-{}", self.fd.fd()))
            .spawn(move || worker.run())?;

        *active = Some(ActiveRun {
            handle: handle.clone(),
            thread: Some(thread),
        });
        Ok(handle)
    }

    /// Request the current run to stop. Does not wait for it.
    pub fn stop(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = active.as_ref() {
            run.handle.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.as_ref().is_some_and(|run| run.handle.is_running())
    }

    /// Wait for the run threads to exit.
    ///
    /// Call after `stop`, or when the run is expected to fail on its own.
    /// A callback calling this on its own run's thread does not wait for
    /// itself; that run exits once the callback returns.
    pub fn join(&self) {
        let mut threads: Vec<_> = self
            .retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            threads.extend(active.as_mut().and_then(|run| run.thread.take()));
        }
        for thread in threads {
            join_thread(self.fd.fd(), thread);
        }
    }
}

fn join_thread(fd: RawFd, thread: JoinHandle<()>) {
    if thread.thread().id() == std::thread::current().id() {
        debug!(fd, "Join requested from the poller thread, not waiting");
        return;
    }
    if thread.join().is_err() {
        error!(fd, "Event poller thread panicked");
    }
}

impl Drop for EventPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything one run needs, moved onto its thread.
struct Worker {
    fd: Arc<FileDescriptor>,
    callback: Arc<dyn PollEventsCallback>,
    timeout: Duration,
    polling: Arc<dyn PollingOperations>,
    files: Arc<dyn FileOperations>,
    handle: PollerHandle,
}

impl Worker {
    fn run(self) {
        let fd = self.fd.fd();
        info!(fd, timeout = ?self.timeout, "Starting event poller");

        match self.poll_until_stopped() {
            Ok(()) => debug!(fd, "Event poller stopped"),
            Err(e) => error!(fd, error = %e, "Event poller failed, events no longer delivered"),
        }
        self.handle.run.running.store(false, Ordering::Release);
    }

    fn poll_until_stopped(&self) -> Result<()> {
        let fd = self.fd.fd();
        let mut poll = Poll::new(fd);
        let mut buf = vec![0u8; EVENT_BATCH_SIZE * LineEvent::SIZE];

        while !self.handle.is_stop_requested() {
            self.polling.poll(&mut poll, self.timeout)?;
            // Pending events belong to whichever run replaced this one
            if self.handle.is_stop_requested() {
                break;
            }

            if !poll.readable() {
                if poll.revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("poll reported {:?}", poll.revents),
                    )));
                }
                continue;
            }

            let n = self.files.read(fd, &mut buf)?;
            let events = decode_batch(&buf[..n])?;
            if events.is_empty() {
                continue;
            }

            trace!(fd, count = events.len(), "Delivering events");
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                self.callback.on_events(&self.handle, events)
            }));
            if delivered.is_err() {
                error!(fd, "Event callback panicked, stopping poller");
                break;
            }
        }
        Ok(())
    }
}
