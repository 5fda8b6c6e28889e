//! Error types for bus and line operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A kernel or libc entry point failed.
    #[error("native call {name} failed: {message}{}", errno_suffix(.errno))]
    NativeCall {
        name: &'static str,
        errno: Option<i32>,
        message: String,
    },

    /// A bounded record or transfer was asked to hold more than it can.
    #[error("{what} exceeds capacity: {requested} > {capacity}")]
    CapacityExceeded {
        what: &'static str,
        capacity: usize,
        requested: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation attempted after the owner was closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check `requested` against `capacity`, failing with `CapacityExceeded`.
    pub(crate) fn check_capacity(
        what: &'static str,
        capacity: usize,
        requested: usize,
    ) -> Result<()> {
        if requested > capacity {
            return Err(Error::CapacityExceeded {
                what,
                capacity,
                requested,
            });
        }
        Ok(())
    }

    /// OS error code carried by this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::NativeCall { errno, .. } => *errno,
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

fn errno_suffix(errno: &Option<i32>) -> String {
    errno.map(|e| format!(" (errno {e})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;
