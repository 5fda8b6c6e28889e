//! Packing several messages into one physical exchange.
//!
//! A [`CompositeMessage`] copies each message's write window into a shared
//! write buffer at an advancing offset and remembers where it went. One bus
//! exchange then covers the whole batch; [`CompositeMessage::unpack`]
//! scatters the shared read buffer back into each message's own read window.

use super::Message;
use crate::error::{Error, Result};
use crate::hw_trait::Spi;

/// Largest batch sent as one exchange.
pub const MAX_COMPOSITE_LENGTH: usize = 4096;

/// Where one original message sits inside the packed buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    /// Index of the message in the caller's sequence.
    index: usize,
    offset: usize,
    length: usize,
}

/// Messages packed into shared buffers, ready for one exchange.
pub struct CompositeMessage {
    write: Box<[u8]>,
    read: Box<[u8]>,
    slots: Vec<Slot>,
    length: usize,
    delay_us: u16,
}

impl Default for CompositeMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeMessage {
    pub fn new() -> Self {
        Self {
            write: vec![0; MAX_COMPOSITE_LENGTH].into_boxed_slice(),
            read: vec![0; MAX_COMPOSITE_LENGTH].into_boxed_slice(),
            slots: Vec::new(),
            length: 0,
            delay_us: 0,
        }
    }

    /// Pack `messages` in order, ignoring chip-select boundaries.
    pub fn pack(messages: &[Message]) -> Result<Self> {
        let mut composite = Self::new();
        for (index, message) in messages.iter().enumerate() {
            composite.push(index, message)?;
        }
        Ok(composite)
    }

    /// Append `message`, known to the caller as `index`.
    pub fn push(&mut self, index: usize, message: &Message) -> Result<()> {
        message.validate()?;
        Error::check_capacity(
            "composite spi message",
            MAX_COMPOSITE_LENGTH,
            self.length + message.length,
        )?;

        let offset = self.length;
        self.write[offset..offset + message.length].copy_from_slice(message.write_slice());
        self.slots.push(Slot {
            index,
            offset,
            length: message.length,
        });
        self.length += message.length;
        self.delay_us = self.delay_us.max(message.delay_us);
        Ok(())
    }

    pub fn message_count(&self) -> usize {
        self.slots.len()
    }

    /// Total packed length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Longest delay requested by any packed message.
    pub fn delay_us(&self) -> u16 {
        self.delay_us
    }

    pub fn write_slice(&self) -> &[u8] {
        &self.write[..self.length]
    }

    pub fn read_slice(&self) -> &[u8] {
        &self.read[..self.length]
    }

    /// Packed view of the message at `index`: its window in the shared
    /// write buffer.
    pub fn packed_write(&self, index: usize) -> Option<&[u8]> {
        self.slots
            .iter()
            .find(|slot| slot.index == index)
            .map(|slot| &self.write[slot.offset..slot.offset + slot.length])
    }

    /// Run the packed buffers through `spi` as one exchange.
    pub fn exchange<S: Spi + ?Sized>(&mut self, spi: &S) -> Result<usize> {
        let length = self.length;
        spi.transfer(&self.write, 0, &mut self.read, 0, length)
    }

    /// Copy each message's part of the read buffer into its own read window.
    pub fn unpack(&self, messages: &mut [Message]) -> Result<()> {
        for slot in &self.slots {
            let message = messages.get_mut(slot.index).ok_or_else(|| {
                Error::InvalidParameter(format!("no message at index {}", slot.index))
            })?;
            let start = message.read_offset;
            message.read[start..start + slot.length]
                .copy_from_slice(&self.read[slot.offset..slot.offset + slot.length]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_lays_out_messages_back_to_back() {
        let messages = vec![
            Message::write(&[1, 2, 3]),
            Message::read(2).with_delay_us(5),
            Message::new(vec![9, 8, 7, 6], 1, vec![0; 2], 0, 2),
        ];
        let composite = CompositeMessage::pack(&messages).unwrap();

        assert_eq!(composite.message_count(), 3);
        assert_eq!(composite.length(), 7);
        assert_eq!(composite.delay_us(), 5);
        assert_eq!(composite.write_slice(), &[1, 2, 3, 0, 0, 8, 7]);
        assert_eq!(composite.packed_write(2), Some(&[8u8, 7][..]));
        assert_eq!(composite.packed_write(3), None);
    }

    #[test]
    fn test_unpack_honours_read_offset() {
        let mut messages = vec![
            Message::write(&[1, 2]),
            Message::new(vec![0; 3], 0, vec![0xEE; 5], 2, 3),
        ];
        let mut composite = CompositeMessage::pack(&messages).unwrap();
        composite.read[..5].copy_from_slice(&[10, 11, 12, 13, 14]);

        composite.unpack(&mut messages).unwrap();
        assert_eq!(messages[0].read, vec![10, 11]);
        assert_eq!(messages[1].read, vec![0xEE, 0xEE, 12, 13, 14]);
    }

    #[test]
    fn test_capacity() {
        let mut composite = CompositeMessage::new();
        composite
            .push(0, &Message::read(MAX_COMPOSITE_LENGTH - 1))
            .unwrap();
        composite.push(1, &Message::read(1)).unwrap();

        let err = composite.push(2, &Message::read(1)).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExceeded {
                capacity: MAX_COMPOSITE_LENGTH,
                requested: 4097,
                ..
            }
        ));
        assert_eq!(composite.message_count(), 2);
    }
}
