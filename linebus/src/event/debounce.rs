//! Debounce strategies.
//!
//! Each strategy is a [`PollEventsCallback`] decorating a delegate callback:
//!
//! - [`HardwareDebounce`] forwards everything; the kernel already debounces
//!   through the line's `DEBOUNCE_PERIOD_US` attribute.
//! - [`ThrottledDebounce`] (leading edge) forwards an event immediately and
//!   then ignores further events for one debounce window.
//! - [`TimedDebounce`] (trailing edge) holds the latest batch back until the
//!   line has been quiet for a full window. Each accepted batch cancels the
//!   pending delivery and schedules a new one, so a burst collapses into a
//!   single notification. Two release rules exist, see [`ReleaseRule`].
//!
//! Timed strategies own a single-worker Tokio runtime used purely as a
//! timer. At most one delivery task is pending per strategy; `close` aborts
//! it and shuts the runtime down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use strum::{Display, EnumString};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use super::{PollEvent, PollEventsCallback, PollerHandle};
use crate::error::Result;
use crate::tracing::prelude::*;

/// Which debounce strategy a port uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DebounceStrategy {
    /// Throttle: first event wins, the rest of the window is ignored.
    #[default]
    SoftwareLeadingEdge,
    /// Deliver the last event once the window passes without new events.
    SoftwareTrailingEdge,
    /// Like `SoftwareTrailingEdge` with the release threshold in
    /// microseconds.
    SoftwareStability,
    /// Debounce in the kernel; events pass through untouched.
    Hardware,
}

impl DebounceStrategy {
    /// Wrap `delegate` in this strategy with a `debounce` window.
    pub fn wrap(
        self,
        debounce: Duration,
        delegate: Arc<dyn PollEventsCallback>,
    ) -> Result<DebounceCallback> {
        debug!(strategy = %self, debounce = ?debounce, "Creating debounce callback");
        Ok(match self {
            DebounceStrategy::Hardware => DebounceCallback::Hardware(HardwareDebounce::new(delegate)),
            DebounceStrategy::SoftwareLeadingEdge => {
                DebounceCallback::Throttled(ThrottledDebounce::new(delegate, debounce))
            }
            DebounceStrategy::SoftwareTrailingEdge => DebounceCallback::Timed(TimedDebounce::new(
                delegate,
                debounce,
                ReleaseRule::TrailingEdge,
            )?),
            DebounceStrategy::SoftwareStability => DebounceCallback::Timed(TimedDebounce::new(
                delegate,
                debounce,
                ReleaseRule::Stability,
            )?),
        })
    }

    /// True when the kernel should be asked to debounce.
    pub fn is_hardware(self) -> bool {
        self == DebounceStrategy::Hardware
    }
}

/// Stateful predicate accepting events spaced more than `interval_ns`
/// apart.
///
/// The first event seen is always accepted. An interval of zero accepts
/// everything.
#[derive(Debug, Clone)]
pub struct DebounceFilter {
    last: Option<u64>,
    interval_ns: u64,
}

impl DebounceFilter {
    pub fn new(interval_ns: u64) -> Self {
        Self {
            last: None,
            interval_ns,
        }
    }

    pub fn accept(&mut self, event: &PollEvent) -> bool {
        let accepted = match self.last {
            None => true,
            Some(_) if self.interval_ns == 0 => true,
            Some(last) => event.timestamp_ns.saturating_sub(last) > self.interval_ns,
        };
        if accepted {
            self.last = Some(event.timestamp_ns);
        }
        accepted
    }

    /// Keep the accepted events, in order.
    pub fn filter(&mut self, events: Vec<PollEvent>) -> Vec<PollEvent> {
        events.into_iter().filter(|e| self.accept(e)).collect()
    }
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Passes batches through untouched.
pub struct HardwareDebounce {
    delegate: Arc<dyn PollEventsCallback>,
}

impl HardwareDebounce {
    pub fn new(delegate: Arc<dyn PollEventsCallback>) -> Self {
        Self { delegate }
    }
}

impl PollEventsCallback for HardwareDebounce {
    fn on_events(&self, poller: &PollerHandle, events: Vec<PollEvent>) {
        self.delegate.on_events(poller, events);
    }
}

/// Leading-edge rate limiter: at most one accepted event per window.
pub struct ThrottledDebounce {
    delegate: Arc<dyn PollEventsCallback>,
    filter: Mutex<DebounceFilter>,
    closed: AtomicBool,
}

impl ThrottledDebounce {
    pub fn new(delegate: Arc<dyn PollEventsCallback>, debounce: Duration) -> Self {
        Self {
            delegate,
            filter: Mutex::new(DebounceFilter::new(as_nanos(debounce))),
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl PollEventsCallback for ThrottledDebounce {
    fn on_events(&self, poller: &PollerHandle, events: Vec<PollEvent>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let accepted = self
            .filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .filter(events);
        if !accepted.is_empty() {
            self.delegate.on_events(poller, accepted);
        }
    }
}

/// When a pending trailing-edge delivery is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseRule {
    /// The last event's raw timestamp is compared with the window length
    /// in microseconds.
    TrailingEdge,
    /// The last event's timestamp, in microseconds, is compared with the
    /// window length in microseconds.
    Stability,
}

impl ReleaseRule {
    fn releases(self, last: &PollEvent, debounce: Duration) -> bool {
        let debounce_us = u64::try_from(debounce.as_micros()).unwrap_or(u64::MAX);
        match self {
            ReleaseRule::TrailingEdge => last.timestamp_ns >= debounce_us,
            ReleaseRule::Stability => last.timestamp_ns / 1000 >= debounce_us,
        }
    }
}

/// Glitch spacing for timed strategies, as a fraction of the window.
///
/// Transitions closer than window/1000 are dropped; anything slower re-arms
/// the delivery timer.
const GLITCH_DIVISOR: u64 = 1000;

struct TimedState {
    filter: DebounceFilter,
    last: Option<PollEvent>,
    pending: Option<JoinHandle<()>>,
    /// Bumped on every reschedule so a superseded task that already woke up
    /// does nothing.
    generation: u64,
}

/// Trailing-edge debounce on a dedicated timer runtime.
pub struct TimedDebounce {
    delegate: Arc<dyn PollEventsCallback>,
    debounce: Duration,
    rule: ReleaseRule,
    state: Arc<Mutex<TimedState>>,
    runtime: Mutex<Option<Runtime>>,
}

impl TimedDebounce {
    pub fn new(
        delegate: Arc<dyn PollEventsCallback>,
        debounce: Duration,
        rule: ReleaseRule,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gpio-debounce")
            .enable_time()
            .build()?;

        Ok(Self {
            delegate,
            debounce,
            rule,
            state: Arc::new(Mutex::new(TimedState {
                filter: DebounceFilter::new(as_nanos(debounce) / GLITCH_DIVISOR),
                last: None,
                pending: None,
                generation: 0,
            })),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Cancel any pending delivery and stop the timer.
    ///
    /// Batches arriving afterwards are dropped.
    pub fn close(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            drop(state);
            runtime.shutdown_background();
            debug!(rule = ?self.rule, "Debounce timer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl PollEventsCallback for TimedDebounce {
    fn on_events(&self, poller: &PollerHandle, events: Vec<PollEvent>) {
        let runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(runtime) = runtime.as_ref() else {
            trace!("Debounce timer closed, dropping events");
            return;
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let accepted = state.filter.filter(events);
        if accepted.is_empty() {
            return;
        }

        state.last = accepted.last().copied();
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let delegate = Arc::clone(&self.delegate);
        let poller = poller.clone();
        let debounce = self.debounce;
        let rule = self.rule;

        state.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;

            let release = {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if state.generation != generation {
                    return;
                }
                state.pending = None;
                state
                    .last
                    .as_ref()
                    .is_some_and(|last| rule.releases(last, debounce))
            };
            if release {
                delegate.on_events(&poller, accepted);
            }
        }));
    }
}

impl Drop for TimedDebounce {
    fn drop(&mut self) {
        self.close();
    }
}

/// A debounce strategy instance, chosen at construction.
pub enum DebounceCallback {
    Hardware(HardwareDebounce),
    Throttled(ThrottledDebounce),
    Timed(TimedDebounce),
}

impl DebounceCallback {
    pub fn close(&self) {
        match self {
            DebounceCallback::Hardware(_) => {}
            DebounceCallback::Throttled(cb) => cb.close(),
            DebounceCallback::Timed(cb) => cb.close(),
        }
    }
}

impl PollEventsCallback for DebounceCallback {
    fn on_events(&self, poller: &PollerHandle, events: Vec<PollEvent>) {
        match self {
            DebounceCallback::Hardware(cb) => cb.on_events(poller, events),
            DebounceCallback::Throttled(cb) => cb.on_events(poller, events),
            DebounceCallback::Timed(cb) => cb.on_events(poller, events),
        }
    }
}
