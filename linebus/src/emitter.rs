//! Listener fan-out for GPIO change events.
//!
//! [`GpioEventEmitterDelegate`] is the last callback in a port's event chain
//! (poller, then debounce, then this). Each decoded event becomes a
//! [`GpioChangeEvent`] and is handed to every registered listener.
//!
//! Dispatch iterates a snapshot of the listener list taken per event, so
//! listeners may add or remove listeners from inside `on_event` without
//! deadlocking and without affecting the dispatch in progress. A listener
//! that fails or panics is logged and skipped.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::event::{PollEvent, PollEventType, PollEventsCallback, PollerHandle};
use crate::tracing::prelude::*;

/// A change on a GPIO port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioChangeEvent {
    /// Label of the emitting port.
    pub source: Arc<str>,
    pub event_type: PollEventType,
    /// Kernel timestamp of the edge, zero when not known.
    pub timestamp_ns: u64,
}

impl GpioChangeEvent {
    pub fn new(source: Arc<str>, event_type: PollEventType) -> Self {
        Self {
            source,
            event_type,
            timestamp_ns: 0,
        }
    }
}

impl fmt::Display for GpioChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @{}ns", self.source, self.event_type, self.timestamp_ns)
    }
}

/// Receives change events from an emitter.
pub trait GpioEventListener: Send + Sync {
    fn on_event(&self, event: &GpioChangeEvent) -> anyhow::Result<()>;
}

impl<F> GpioEventListener for F
where
    F: Fn(&GpioChangeEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &GpioChangeEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Holds listeners and forwards events to them.
pub struct GpioEventEmitterDelegate {
    source: Arc<str>,
    listeners: RwLock<Vec<Arc<dyn GpioEventListener>>>,
    closed: AtomicBool,
}

impl GpioEventEmitterDelegate {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            listeners: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// Register `listener`. Registering the same listener twice is a no-op.
    pub fn add_listener(&self, listener: Arc<dyn GpioEventListener>) -> Result<()> {
        self.ensure_open()?;
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
        Ok(())
    }

    /// Unregister `listener`. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn GpioEventListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forward `event` to every listener registered right now.
    pub fn on_event(&self, event: &GpioChangeEvent) -> Result<()> {
        self.ensure_open()?;

        let snapshot = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if snapshot.is_empty() {
            return Ok(());
        }

        debug!(event = %event, listeners = snapshot.len(), "Forwarding event");
        for listener in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(event = %event, error = %e, "Listener failed"),
                Err(_) => error!(event = %event, "Listener panicked"),
            }
        }
        Ok(())
    }

    /// Drop all listeners and refuse further registrations and events.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!(source = %self.source, "Event emitter closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("event emitter"));
        }
        Ok(())
    }
}

impl PollEventsCallback for GpioEventEmitterDelegate {
    fn on_events(&self, _poller: &PollerHandle, events: Vec<PollEvent>) {
        for event in events {
            let change = GpioChangeEvent {
                source: Arc::clone(&self.source),
                event_type: event.event_type,
                timestamp_ns: event.timestamp_ns,
            };
            if let Err(e) = self.on_event(&change) {
                trace!(error = %e, "Dropping event");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn counting() -> (Arc<dyn GpioEventListener>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let listener = move |_: &GpioChangeEvent| -> anyhow::Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        (Arc::new(listener), count)
    }

    fn rising(source: &GpioEventEmitterDelegate) -> GpioChangeEvent {
        GpioChangeEvent::new(Arc::clone(source.source()), PollEventType::Rising)
    }

    #[test]
    fn test_forwards_to_listeners() {
        let emitter = GpioEventEmitterDelegate::new("gpiochip0[4]");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        emitter
            .add_listener(Arc::new(move |e: &GpioChangeEvent| -> anyhow::Result<()> {
                sink.lock().unwrap().push(e.event_type);
                Ok(())
            }))
            .unwrap();

        emitter.on_event(&rising(&emitter)).unwrap();
        assert_eq!(*received.lock().unwrap(), vec![PollEventType::Rising]);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let emitter = GpioEventEmitterDelegate::new("port");
        emitter
            .add_listener(Arc::new(|_: &GpioChangeEvent| -> anyhow::Result<()> {
                anyhow::bail!("boom")
            }))
            .unwrap();
        emitter
            .add_listener(Arc::new(|_: &GpioChangeEvent| -> anyhow::Result<()> {
                panic!("listener bug")
            }))
            .unwrap();
        let (listener, count) = counting();
        emitter.add_listener(listener).unwrap();

        for _ in 0..3 {
            emitter.on_event(&rising(&emitter)).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_add_and_remove() {
        let emitter = GpioEventEmitterDelegate::new("port");
        let (l1, _) = counting();
        let (l2, _) = counting();

        assert_eq!(emitter.listener_count(), 0);
        emitter.add_listener(Arc::clone(&l1)).unwrap();
        emitter.add_listener(Arc::clone(&l1)).unwrap();
        assert_eq!(emitter.listener_count(), 1);
        emitter.add_listener(Arc::clone(&l2)).unwrap();
        assert_eq!(emitter.listener_count(), 2);

        assert!(emitter.remove_listener(&l1));
        assert!(!emitter.remove_listener(&l1));
        assert_eq!(emitter.listener_count(), 1);
        assert!(emitter.remove_listener(&l2));
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_removal_during_dispatch_uses_snapshot() {
        let emitter = Arc::new(GpioEventEmitterDelegate::new("port"));
        let (second, count) = counting();

        let weak = Arc::downgrade(&emitter);
        let victim = Arc::clone(&second);
        emitter
            .add_listener(Arc::new(move |_: &GpioChangeEvent| -> anyhow::Result<()> {
                if let Some(emitter) = weak.upgrade() {
                    emitter.remove_listener(&victim);
                }
                Ok(())
            }))
            .unwrap();
        emitter.add_listener(second).unwrap();

        emitter.on_event(&rising(&emitter)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        emitter.on_event(&rising(&emitter)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batch_becomes_change_events() {
        let emitter = GpioEventEmitterDelegate::new("port");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        emitter
            .add_listener(Arc::new(move |e: &GpioChangeEvent| -> anyhow::Result<()> {
                sink.lock().unwrap().push((e.event_type, e.timestamp_ns));
                Ok(())
            }))
            .unwrap();

        emitter.on_events(
            &PollerHandle::detached(),
            vec![
                PollEvent::new(PollEventType::Rising, 10),
                PollEvent::new(PollEventType::Falling, 20),
            ],
        );
        assert_eq!(
            *received.lock().unwrap(),
            vec![(PollEventType::Rising, 10), (PollEventType::Falling, 20)]
        );
    }

    #[test]
    fn test_close_rejects_further_use() {
        let emitter = GpioEventEmitterDelegate::new("port");
        let (listener, count) = counting();
        emitter.add_listener(Arc::clone(&listener)).unwrap();
        emitter.close();

        assert!(matches!(
            emitter.on_event(&rising(&emitter)),
            Err(Error::Closed(_))
        ));
        assert!(emitter.add_listener(listener).is_err());
        assert_eq!(emitter.listener_count(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
