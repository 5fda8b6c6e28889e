//! Line event acquisition.
//!
//! An [`EventPoller`] waits on a line request descriptor, decodes the
//! kernel's [`LineEvent`] records into [`PollEvent`]s and hands each batch to
//! a [`PollEventsCallback`]. The callbacks in [`debounce`] decorate another
//! callback to suppress or delay noisy transitions.

pub mod debounce;
mod poller;

use strum::{Display, FromRepr};

use crate::error::Result;
use crate::layout::{gpio::LineEvent, Layout};

pub use poller::{EventPoller, PollerHandle, EVENT_BATCH_SIZE};

/// Edge reported by a poll event.
#[derive(FromRepr, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PollEventType {
    None = 0,
    Rising = 1,
    Falling = 2,
    Any = 3,
}

impl PollEventType {
    /// Map a kernel event id; unknown ids become `None`.
    pub fn from_id(id: u32) -> Self {
        Self::from_repr(id).unwrap_or(PollEventType::None)
    }
}

/// A decoded line event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub event_type: PollEventType,
    /// Monotonic kernel timestamp.
    pub timestamp_ns: u64,
}

impl PollEvent {
    pub fn new(event_type: PollEventType, timestamp_ns: u64) -> Self {
        Self {
            event_type,
            timestamp_ns,
        }
    }
}

impl From<&LineEvent> for PollEvent {
    fn from(event: &LineEvent) -> Self {
        Self::new(PollEventType::from_id(event.id), event.timestamp_ns)
    }
}

/// Receives decoded event batches.
///
/// Runs on the poller thread. `poller` lets the callback stop the run that
/// delivered the batch.
pub trait PollEventsCallback: Send + Sync {
    fn on_events(&self, poller: &PollerHandle, events: Vec<PollEvent>);
}

impl<F> PollEventsCallback for F
where
    F: Fn(&PollerHandle, Vec<PollEvent>) + Send + Sync,
{
    fn on_events(&self, poller: &PollerHandle, events: Vec<PollEvent>) {
        self(poller, events)
    }
}

/// Decode the records read in one batch.
///
/// Decoding stops at the first record with a zero timestamp; anything after
/// it is stale buffer content. A trailing partial record is ignored.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<PollEvent>> {
    let mut events = Vec::new();
    for chunk in bytes.chunks_exact(LineEvent::SIZE) {
        let event = LineEvent::from_bytes(chunk)?;
        if event.timestamp_ns == 0 {
            break;
        }
        events.push(PollEvent::from(&event));
    }
    Ok(events)
}
