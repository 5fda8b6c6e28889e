//! Native call gateway.
//!
//! Every kernel interaction goes through a caller bound to one libc entry
//! point. The entry point is resolved by name once, when the caller is
//! built; each `invoke` then checks the argument shape and makes the call.
//!
//! Two flavours exist:
//!
//! - [`PlainCaller`] returns the raw result. Only an argument mismatch is an
//!   error.
//! - [`CapturedStateCaller`] also captures `errno` into a scratch record
//!   right after the call. A negative result is turned into
//!   [`Error::NativeCall`] carrying the errno and its `strerror` text.
//!
//! Neither retries; callers decide what to do with `EINTR` and friends.

use std::ffi::CStr;
use std::str::FromStr;

use libc::{c_int, c_void};
use strum::{EnumString, IntoStaticStr};

use crate::error::{Error, Result};
use crate::layout::{poll::Poll, Layout};
use crate::tracing::prelude::*;

/// An argument handed to a native entry point.
#[derive(Debug)]
pub enum NativeArg<'a> {
    Int(c_int),
    ULong(u64),
    Str(&'a CStr),
    /// Read-only memory region, passed as a pointer.
    Bytes(&'a [u8]),
    /// Writable memory region, passed as a pointer.
    Buf(&'a mut [u8]),
}

/// libc entry points reachable through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
enum EntryPoint {
    Open,
    Close,
    Read,
    Write,
    Ioctl,
    Poll,
    Strerror,
}

impl EntryPoint {
    fn resolve(name: &str) -> Result<Self> {
        Self::from_str(name).map_err(|_| Error::NativeCall {
            name: "resolve",
            errno: None,
            message: format!("no native entry point named {:?}", name),
        })
    }

    fn name(self) -> &'static str {
        self.into()
    }
}

/// Scratch record filled in right after a call.
#[derive(Debug, Default, Clone, Copy)]
struct CapturedState {
    errno: c_int,
}

impl CapturedState {
    fn capture(&mut self) {
        self.errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or_default();
    }
}

/// Invoke `entry` with `args`.
///
/// When `state` is given, errno is captured before anything else can
/// clobber it. `Err` means the arguments did not fit the entry point.
fn dispatch(
    entry: EntryPoint,
    args: &mut [NativeArg<'_>],
    state: Option<&mut CapturedState>,
) -> std::result::Result<i64, String> {
    // SAFETY: every arm passes pointers and lengths taken from live Rust
    // slices or CStrs borrowed for the duration of the call.
    let result = unsafe {
        match (entry, &mut *args) {
            (EntryPoint::Open, [NativeArg::Str(path), NativeArg::Int(flags)]) => {
                libc::open(path.as_ptr(), *flags) as i64
            }
            (EntryPoint::Close, [NativeArg::Int(fd)]) => libc::close(*fd) as i64,
            (EntryPoint::Read, [NativeArg::Int(fd), NativeArg::Buf(buf)]) => {
                libc::read(*fd, buf.as_mut_ptr() as *mut c_void, buf.len()) as i64
            }
            (EntryPoint::Write, [NativeArg::Int(fd), NativeArg::Bytes(buf)]) => {
                libc::write(*fd, buf.as_ptr() as *const c_void, buf.len()) as i64
            }
            (
                EntryPoint::Ioctl,
                [NativeArg::Int(fd), NativeArg::ULong(request), NativeArg::Buf(buf)],
            ) => libc::ioctl(*fd, *request as libc::Ioctl, buf.as_mut_ptr()) as i64,
            (EntryPoint::Poll, [NativeArg::Buf(fds), NativeArg::Int(timeout)]) => {
                return poll_records(fds, *timeout, state);
            }
            (EntryPoint::Strerror, [NativeArg::Int(errno), NativeArg::Buf(buf)]) => {
                libc::strerror_r(*errno, buf.as_mut_ptr() as *mut libc::c_char, buf.len()) as i64
            }
            (entry, args) => {
                return Err(format!(
                    "argument mismatch for {}: {:?}",
                    entry.name(),
                    args
                ))
            }
        }
    };
    if let Some(state) = state {
        state.capture();
    }
    Ok(result)
}

/// `poll(2)` over encoded [`Poll`] records, writing `revents` back.
///
/// The records go through a properly aligned `pollfd` array since the byte
/// region carries no alignment guarantee.
fn poll_records(
    records: &mut [u8],
    timeout: c_int,
    state: Option<&mut CapturedState>,
) -> std::result::Result<i64, String> {
    if records.len() % Poll::SIZE != 0 {
        return Err(format!(
            "poll records must be a multiple of {} bytes, got {}",
            Poll::SIZE,
            records.len()
        ));
    }
    let mut fds = records
        .chunks_exact(Poll::SIZE)
        .map(|chunk| {
            Poll::from_bytes(chunk).map(|p| libc::pollfd {
                fd: p.fd,
                events: p.events.bits(),
                revents: 0,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map_err(|e| e.to_string())?;

    // SAFETY: `fds` is a live, correctly sized pollfd array.
    let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
    if let Some(state) = state {
        state.capture();
    }

    for (chunk, fd) in records.chunks_exact_mut(Poll::SIZE).zip(&fds) {
        // revents lives in the last two bytes of each record
        chunk[6..8].copy_from_slice(&fd.revents.to_ne_bytes());
    }
    Ok(result as i64)
}

/// A caller bound to one native entry point.
pub trait NativeCaller: Send + Sync {
    fn name(&self) -> &'static str;

    fn invoke(&self, args: &mut [NativeArg<'_>]) -> Result<i64>;
}

/// Returns raw results; negative values are passed through untouched.
#[derive(Debug, Clone, Copy)]
pub struct PlainCaller {
    entry: EntryPoint,
}

impl PlainCaller {
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            entry: EntryPoint::resolve(name)?,
        })
    }
}

impl NativeCaller for PlainCaller {
    fn name(&self) -> &'static str {
        self.entry.name()
    }

    fn invoke(&self, args: &mut [NativeArg<'_>]) -> Result<i64> {
        dispatch(self.entry, args, None).map_err(|cause| Error::NativeCall {
            name: self.name(),
            errno: None,
            message: cause,
        })
    }
}

/// Turns negative results into errors carrying errno and its description.
#[derive(Debug, Clone, Copy)]
pub struct CapturedStateCaller {
    entry: EntryPoint,
    strerror: PlainCaller,
}

impl CapturedStateCaller {
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            entry: EntryPoint::resolve(name)?,
            strerror: PlainCaller {
                entry: EntryPoint::Strerror,
            },
        })
    }

    /// Human-readable text for `errno`.
    fn describe(&self, errno: c_int) -> String {
        let mut buf = [0u8; 256];
        let described = self
            .strerror
            .invoke(&mut [NativeArg::Int(errno), NativeArg::Buf(&mut buf)]);
        match described {
            Ok(0) => CStr::from_bytes_until_nul(&buf)
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|_| format!("errno {}", errno)),
            _ => format!("errno {}", errno),
        }
    }
}

impl NativeCaller for CapturedStateCaller {
    fn name(&self) -> &'static str {
        self.entry.name()
    }

    fn invoke(&self, args: &mut [NativeArg<'_>]) -> Result<i64> {
        let mut state = CapturedState::default();
        let result =
            dispatch(self.entry, args, Some(&mut state)).map_err(|cause| Error::NativeCall {
                name: self.name(),
                errno: None,
                message: cause,
            })?;

        if result < 0 {
            let message = self.describe(state.errno);
            trace!(call = self.name(), result, errno = state.errno, "Native call failed");
            return Err(Error::NativeCall {
                name: self.name(),
                errno: Some(state.errno),
                message,
            });
        }
        Ok(result)
    }
}
