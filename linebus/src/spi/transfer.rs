//! Strategies turning message sequences into bus exchanges.

use std::sync::Arc;

use super::{CompositeMessage, Message};
use crate::error::Result;
use crate::hw_trait::Spi;
use crate::tracing::prelude::*;

/// Runs a sequence of messages, returning the bytes transferred.
pub trait SpiTransfer: Send + Sync {
    fn transfer(&self, messages: &mut [Message]) -> Result<usize>;
}

/// One bus exchange per message.
pub struct SingleMessageTransfer<S: ?Sized = dyn Spi> {
    spi: Arc<S>,
}

impl<S: Spi + ?Sized> SingleMessageTransfer<S> {
    pub fn new(spi: Arc<S>) -> Self {
        Self { spi }
    }
}

impl<S: Spi + ?Sized> SpiTransfer for SingleMessageTransfer<S> {
    fn transfer(&self, messages: &mut [Message]) -> Result<usize> {
        let mut total = 0;
        for message in messages.iter_mut() {
            message.validate()?;
            let (write_offset, read_offset, length) =
                (message.write_offset, message.read_offset, message.length);
            total += self.spi.transfer(
                &message.write,
                write_offset,
                &mut message.read,
                read_offset,
                length,
            )?;
        }
        Ok(total)
    }
}

/// Packs messages into composite exchanges, split at chip-select changes.
pub struct CompositeMessageTransfer<S: ?Sized = dyn Spi> {
    spi: Arc<S>,
}

impl<S: Spi + ?Sized> CompositeMessageTransfer<S> {
    pub fn new(spi: Arc<S>) -> Self {
        Self { spi }
    }

    fn flush(&self, batch: &mut CompositeMessage, messages: &mut [Message]) -> Result<()> {
        trace!(
            messages = batch.message_count(),
            length = batch.length(),
            "Flushing composite spi message"
        );
        batch.exchange(&*self.spi)?;
        batch.unpack(messages)
    }
}

impl<S: Spi + ?Sized> SpiTransfer for CompositeMessageTransfer<S> {
    fn transfer(&self, messages: &mut [Message]) -> Result<usize> {
        let mut total = 0;
        let mut batch = CompositeMessage::new();

        for index in 0..messages.len() {
            batch.push(index, &messages[index])?;
            total += messages[index].length;
            if messages[index].cs_change {
                self.flush(&mut batch, messages)?;
                batch = CompositeMessage::new();
            }
        }
        if batch.message_count() > 0 {
            self.flush(&mut batch, messages)?;
        }
        Ok(total)
    }
}

/// Picks the direct path for a lone message and packing otherwise.
pub struct DefaultSpiTransfer<A = SingleMessageTransfer, B = CompositeMessageTransfer> {
    single: A,
    multi: B,
}

impl DefaultSpiTransfer {
    pub fn new(spi: Arc<dyn Spi>) -> Self {
        Self {
            single: SingleMessageTransfer::new(Arc::clone(&spi)),
            multi: CompositeMessageTransfer::new(spi),
        }
    }
}

impl<A: SpiTransfer, B: SpiTransfer> DefaultSpiTransfer<A, B> {
    pub fn with_transfers(single: A, multi: B) -> Self {
        Self { single, multi }
    }
}

impl<A: SpiTransfer, B: SpiTransfer> SpiTransfer for DefaultSpiTransfer<A, B> {
    fn transfer(&self, messages: &mut [Message]) -> Result<usize> {
        if messages.len() == 1 {
            self.single.transfer(messages)
        } else {
            self.multi.transfer(messages)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::MockSpi;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts physical exchanges on the way to a real device.
    struct CountingSpi {
        inner: Arc<MockSpi>,
        count: AtomicUsize,
    }

    impl Spi for CountingSpi {
        fn transfer(
            &self,
            write: &[u8],
            write_offset: usize,
            read: &mut [u8],
            read_offset: usize,
            length: usize,
        ) -> Result<usize> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.inner
                .transfer(write, write_offset, read, read_offset, length)
        }
    }

    #[derive(Default)]
    struct InvocationCheck {
        invoked: AtomicBool,
    }

    impl SpiTransfer for Arc<InvocationCheck> {
        fn transfer(&self, _messages: &mut [Message]) -> Result<usize> {
            self.invoked.store(true, Ordering::SeqCst);
            Ok(0)
        }
    }

    fn preloaded() -> (Arc<MockSpi>, Arc<CountingSpi>) {
        let mock = Arc::new(MockSpi::new());
        mock.write_bytes(&[0, 0, 0, 7, 8, 9, 0, 0, 0]).unwrap();
        mock.swap_buffers();
        let counting = Arc::new(CountingSpi {
            inner: Arc::clone(&mock),
            count: AtomicUsize::new(0),
        });
        (mock, counting)
    }

    #[test]
    fn test_single_message_round_trip() {
        let spi = Arc::new(MockSpi::new());
        let transfer = DefaultSpiTransfer::new(spi.clone());

        transfer.transfer(&mut [Message::write(&[1, 2, 3])]).unwrap();
        spi.swap_buffers();

        let mut messages = [Message::read(3)];
        transfer.transfer(&mut messages).unwrap();
        assert_eq!(messages[0].read, vec![1, 2, 3]);
    }

    #[test]
    fn test_write_then_read() {
        let spi = Arc::new(MockSpi::new());
        spi.write_bytes(&[0, 0, 0, 4, 5, 6]).unwrap();
        spi.swap_buffers();

        let transfer = DefaultSpiTransfer::new(spi);
        let mut messages = [Message::write(&[1, 2, 3]), Message::read(3)];
        assert_eq!(transfer.transfer(&mut messages).unwrap(), 6);
        assert_eq!(messages[1].read, vec![4, 5, 6]);
    }

    #[test]
    fn test_no_messages() {
        let (_, counting) = preloaded();
        let transfer = DefaultSpiTransfer::new(counting.clone());
        assert_eq!(transfer.transfer(&mut []).unwrap(), 0);
        assert_eq!(counting.count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_by_message_count() {
        for (count, single, multi) in [(1, true, false), (2, false, true), (0, false, true)] {
            let single_check = Arc::new(InvocationCheck::default());
            let multi_check = Arc::new(InvocationCheck::default());
            let transfer =
                DefaultSpiTransfer::with_transfers(single_check.clone(), multi_check.clone());

            let mut messages = vec![Message::write(&[]); count];
            transfer.transfer(&mut messages).unwrap();

            assert_eq!(single_check.invoked.load(Ordering::SeqCst), single, "{count} messages");
            assert_eq!(multi_check.invoked.load(Ordering::SeqCst), multi, "{count} messages");
        }
    }

    #[test]
    fn test_composite_packs_into_one_exchange() {
        let (mock, counting) = preloaded();
        let transfer = CompositeMessageTransfer::new(counting.clone());
        let mut messages = [
            Message::write(&[1, 2, 3]),
            Message::read(3),
            Message::write(&[4, 5, 6]),
        ];

        assert_eq!(transfer.transfer(&mut messages).unwrap(), 9);
        assert_eq!(messages[1].read, vec![7, 8, 9]);
        assert_eq!(counting.count.load(Ordering::SeqCst), 1);
        assert_eq!(&mock.out_buffer()[..9], &[1, 2, 3, 0, 0, 0, 4, 5, 6]);
    }

    #[test]
    fn test_composite_splits_at_chip_select_change() {
        let (mock, counting) = preloaded();
        let transfer = CompositeMessageTransfer::new(counting.clone());
        let mut messages = [
            Message::write(&[1, 2, 3]),
            Message::read(3).with_cs_change(true),
            Message::write(&[4, 5, 6]),
        ];

        assert_eq!(transfer.transfer(&mut messages).unwrap(), 9);
        assert_eq!(messages[1].read, vec![7, 8, 9]);
        assert_eq!(counting.count.load(Ordering::SeqCst), 2);
        assert_eq!(&mock.out_buffer()[..9], &[1, 2, 3, 0, 0, 0, 4, 5, 6]);
    }

    #[test]
    fn test_composite_rejects_oversized_batch() {
        let (_, counting) = preloaded();
        let transfer = CompositeMessageTransfer::new(counting.clone());
        let mut messages = [Message::read(4000), Message::read(100)];
        assert!(transfer.transfer(&mut messages).is_err());
        assert_eq!(counting.count.load(Ordering::SeqCst), 0);
    }
}
