//! `struct pollfd`

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use super::Layout;
use crate::error::Result;

bitflags! {
    /// Poll event bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PollFlags: i16 {
        const POLLIN = libc::POLLIN;
        const POLLPRI = libc::POLLPRI;
        const POLLOUT = libc::POLLOUT;
        const POLLERR = libc::POLLERR;
        const POLLHUP = libc::POLLHUP;
        const POLLNVAL = libc::POLLNVAL;
    }
}

/// One watched descriptor: the flags asked for and the flags seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub fd: i32,
    pub events: PollFlags,
    pub revents: PollFlags,
}

impl Poll {
    /// Watch `fd` for readability and errors.
    pub fn new(fd: i32) -> Self {
        Self::with_events(fd, PollFlags::POLLIN | PollFlags::POLLERR)
    }

    pub fn with_events(fd: i32, events: PollFlags) -> Self {
        Self {
            fd,
            events,
            revents: PollFlags::empty(),
        }
    }

    /// True when the last wait reported data ready to read.
    pub fn readable(&self) -> bool {
        self.revents.contains(PollFlags::POLLIN)
    }
}

impl Layout for Poll {
    const SIZE: usize = 8;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        dst.put_i32_ne(self.fd);
        dst.put_i16_ne(self.events.bits());
        dst.put_i16_ne(self.revents.bits());
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        Ok(Self {
            fd: src.get_i32_ne(),
            events: PollFlags::from_bits_retain(src.get_i16_ne()),
            revents: PollFlags::from_bits_retain(src.get_i16_ne()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_events() {
        let poll = Poll::new(5);
        assert_eq!(poll.events.bits(), 0x1 | 0x8);
        assert!(!poll.readable());
    }

    #[test]
    fn test_layout_matches_pollfd() {
        assert_eq!(Poll::SIZE, std::mem::size_of::<libc::pollfd>());

        let poll = Poll {
            fd: 7,
            events: PollFlags::POLLIN,
            revents: PollFlags::POLLIN | PollFlags::POLLHUP,
        };
        let encoded = poll.to_bytes().unwrap();
        assert_eq!(&encoded[0..4], &7i32.to_ne_bytes());
        assert_eq!(&encoded[4..6], &libc::POLLIN.to_ne_bytes());

        let decoded = Poll::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, poll);
        assert!(decoded.readable());
    }
}
