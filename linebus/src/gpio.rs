//! GPIO through the kernel's v2 character device (`/dev/gpiochipN`).
//!
//! A [`GpioChip`] hands out [`NativePort`]s: groups of lines requested
//! together with one mode. Input ports asking for edge events get an event
//! pipeline wired up front:
//!
//! ```text
//! line request fd -> EventPoller -> debounce strategy -> emitter -> listeners
//! ```
//!
//! The poller only runs while at least one listener is registered.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use strum::{Display, EnumString};

use crate::config::EventConfig;
use crate::emitter::{GpioEventEmitterDelegate, GpioEventListener};
use crate::error::{Error, Result};
use crate::event::debounce::DebounceCallback;
use crate::event::{EventPoller, PollEventsCallback};
use crate::hw_trait::GpioPort;
use crate::layout::gpio::{
    ChipInfo, LineAttribute, LineConfig, LineConfigAttribute, LineFlags, LineInfo, LineRequest,
    LineValues, LINES_MAX,
};
use crate::layout::ioctl::{
    GPIO_GET_CHIPINFO_IOCTL, GPIO_V2_GET_LINEINFO_IOCTL, GPIO_V2_GET_LINE_IOCTL,
    GPIO_V2_LINE_GET_VALUES_IOCTL, GPIO_V2_LINE_SET_VALUES_IOCTL,
};
use crate::native::{
    ioctl_record, FileDescriptor, FileOperations, IoctlOperations, LinuxOps, PollingOperations,
};
use crate::tracing::prelude::*;

/// Electrical mode of a port's lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PortMode {
    #[default]
    Input,
    #[strum(serialize = "INPUT_PULLUP")]
    InputPullUp,
    #[strum(serialize = "INPUT_PULLDOWN")]
    InputPullDown,
    Output,
    #[strum(serialize = "OUTPUT_OPENDRAIN")]
    OutputOpenDrain,
    #[strum(serialize = "OUTPUT_OPENSOURCE")]
    OutputOpenSource,
}

impl PortMode {
    pub fn is_input(self) -> bool {
        matches!(
            self,
            PortMode::Input | PortMode::InputPullUp | PortMode::InputPullDown
        )
    }

    pub fn line_flags(self) -> LineFlags {
        match self {
            PortMode::Input => LineFlags::INPUT,
            PortMode::InputPullUp => LineFlags::INPUT | LineFlags::BIAS_PULL_UP,
            PortMode::InputPullDown => LineFlags::INPUT | LineFlags::BIAS_PULL_DOWN,
            PortMode::Output => LineFlags::OUTPUT,
            PortMode::OutputOpenDrain => LineFlags::OUTPUT | LineFlags::OPEN_DRAIN,
            PortMode::OutputOpenSource => LineFlags::OUTPUT | LineFlags::OPEN_SOURCE,
        }
    }
}

/// Which edges an input port reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum EventMode {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl EventMode {
    pub fn line_flags(self) -> LineFlags {
        match self {
            EventMode::None => LineFlags::empty(),
            EventMode::Rising => LineFlags::EDGE_RISING,
            EventMode::Falling => LineFlags::EDGE_FALLING,
            EventMode::Both => LineFlags::EDGE_RISING | LineFlags::EDGE_FALLING,
        }
    }
}

/// Lines and settings of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Line offsets on the chip. Bit `i` of port values is `offsets[i]`.
    pub offsets: Vec<u32>,
    pub mode: PortMode,
    pub event_mode: EventMode,
    /// Debounce window in microseconds; 0 disables debouncing.
    pub debounce_us: u32,
    /// Written right after the lines are requested.
    pub default_value: Option<u64>,
    /// Consumer label and event source name. Derived from mode and offsets
    /// when not set.
    pub id: Option<String>,
}

impl PortConfig {
    pub fn new(offsets: impl Into<Vec<u32>>) -> Self {
        Self {
            offsets: offsets.into(),
            mode: PortMode::default(),
            event_mode: EventMode::default(),
            debounce_us: 0,
            default_value: None,
            id: None,
        }
    }

    pub fn with_mode(mut self, mode: PortMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_event_mode(mut self, event_mode: EventMode) -> Self {
        self.event_mode = event_mode;
        self
    }

    pub fn with_debounce_us(mut self, debounce_us: u32) -> Self {
        self.debounce_us = debounce_us;
        self
    }

    pub fn with_default_value(mut self, value: u64) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("GPIO-{}-{:?}", self.mode, self.offsets))
    }

    /// Bitmap selecting every line of the port.
    pub fn line_mask(&self) -> u64 {
        match self.offsets.len() {
            n if n >= LINES_MAX => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    fn reports_events(&self) -> bool {
        self.mode.is_input() && self.event_mode != EventMode::None
    }
}

/// An open GPIO chip.
pub struct GpioChip {
    path: PathBuf,
    fd: FileDescriptor,
    info: ChipInfo,
    events: EventConfig,
    files: Arc<dyn FileOperations>,
    ioctl: Arc<dyn IoctlOperations>,
    polling: Arc<dyn PollingOperations>,
}

impl GpioChip {
    /// Open `path` with real syscalls and environment configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, LinuxOps::new()?, EventConfig::from_env())
    }

    pub fn open_with<O>(path: impl AsRef<Path>, ops: Arc<O>, events: EventConfig) -> Result<Self>
    where
        O: FileOperations + IoctlOperations + PollingOperations + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let fd = Arc::clone(&ops).open(&path, libc::O_RDWR | libc::O_CLOEXEC)?;
        let info = ioctl_record(&*ops, fd.fd(), GPIO_GET_CHIPINFO_IOCTL, &ChipInfo::default())?;
        info!(
            path = %path.display(),
            name = %info.name,
            label = %info.label,
            lines = info.lines,
            "Opened GPIO chip"
        );

        Ok(Self {
            path,
            fd,
            info,
            events,
            files: ops.clone(),
            ioctl: ops.clone(),
            polling: ops,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &ChipInfo {
        &self.info
    }

    pub fn line_info(&self, offset: u32) -> Result<LineInfo> {
        ioctl_record(
            &*self.ioctl,
            self.fd.fd(),
            GPIO_V2_GET_LINEINFO_IOCTL,
            &LineInfo::for_offset(offset),
        )
    }

    /// The kernel request `config` translates to.
    pub fn line_request(&self, config: &PortConfig) -> Result<LineRequest> {
        if config.offsets.is_empty() {
            return Err(Error::InvalidParameter("port has no lines".into()));
        }
        if let Some(offset) = config.offsets.iter().find(|&&o| o >= self.info.lines) {
            return Err(Error::InvalidParameter(format!(
                "line {offset} out of range, {} has {} lines",
                self.info.name, self.info.lines
            )));
        }
        if config.event_mode != EventMode::None && !config.mode.is_input() {
            return Err(Error::InvalidParameter(format!(
                "edge events need an input port, not {}",
                config.mode
            )));
        }

        let edges = config.event_mode.line_flags();
        let mut attrs = Vec::new();
        if self.events.debounce_strategy.is_hardware()
            && config.reports_events()
            && config.debounce_us > 0
        {
            debug!(port = %config.id(), debounce_us = config.debounce_us, "Using hardware debounce");
            attrs.push(LineConfigAttribute {
                attr: LineAttribute::DebouncePeriodUs(config.debounce_us),
                mask: config.line_mask(),
            });
        }

        Ok(LineRequest {
            offsets: config.offsets.clone(),
            consumer: config.id(),
            config: LineConfig {
                flags: config.mode.line_flags() | edges,
                attrs,
            },
            event_buffer_size: 0,
            fd: 0,
        })
    }

    /// Request the lines of `config` and wrap them in a port.
    ///
    /// Fails if any line is already held by another consumer.
    pub fn request_port(&self, config: PortConfig) -> Result<NativePort> {
        let request = self.line_request(&config)?;
        for &offset in &config.offsets {
            if self.line_info(offset)?.is_used() {
                return Err(Error::InvalidParameter(format!(
                    "line {offset} is already in use"
                )));
            }
        }

        let granted = ioctl_record(&*self.ioctl, self.fd.fd(), GPIO_V2_GET_LINE_IOCTL, &request)?;
        if granted.fd < 0 {
            return Err(Error::NativeCall {
                name: "ioctl",
                errno: None,
                message: format!("line request returned fd {}", granted.fd),
            });
        }
        debug!(
            port = %request.consumer,
            offsets = ?request.offsets,
            flags = ?request.config.flags,
            fd = granted.fd,
            "Requested lines"
        );

        let fd = Arc::new(FileDescriptor::new(granted.fd, Arc::clone(&self.files)));
        let port = NativePort::new(config, fd, self)?;
        if let Some(value) = port.config.default_value {
            port.write(value)?;
        }
        Ok(port)
    }
}

/// Event delivery of an input port.
struct PortEvents {
    poller: EventPoller,
    debounce: Arc<DebounceCallback>,
    /// Serializes listener changes against poller start/stop.
    lifecycle: Mutex<()>,
}

/// Lines requested from a [`GpioChip`].
pub struct NativePort {
    config: PortConfig,
    fd: Arc<FileDescriptor>,
    ioctl: Arc<dyn IoctlOperations>,
    emitter: Arc<GpioEventEmitterDelegate>,
    events: Option<PortEvents>,
    closed: AtomicBool,
}

impl NativePort {
    fn new(config: PortConfig, fd: Arc<FileDescriptor>, chip: &GpioChip) -> Result<Self> {
        let emitter = Arc::new(GpioEventEmitterDelegate::new(config.id()));

        let events = if config.reports_events() {
            let strategy = chip.events.debounce_strategy;
            let window = Duration::from_micros(u64::from(config.debounce_us));
            let delegate: Arc<dyn PollEventsCallback> = emitter.clone();
            let debounce = Arc::new(strategy.wrap(window, delegate)?);
            let poller = EventPoller::new(
                Arc::clone(&fd),
                debounce.clone(),
                chip.events.poll_timeout,
                Arc::clone(&chip.polling),
                Arc::clone(&chip.files),
            );
            Some(PortEvents {
                poller,
                debounce,
                lifecycle: Mutex::new(()),
            })
        } else {
            None
        };

        Ok(Self {
            config,
            fd,
            ioctl: Arc::clone(&chip.ioctl),
            emitter,
            events,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn listener_count(&self) -> usize {
        self.emitter.listener_count()
    }

    /// True while the event poller runs.
    pub fn is_polling(&self) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.poller.is_running())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("gpio port"));
        }
        Ok(())
    }

    fn events(&self) -> Result<&PortEvents> {
        self.events.as_ref().ok_or_else(|| {
            Error::InvalidParameter(format!("port {} does not report events", self.config.id()))
        })
    }

    /// Stop events, release the lines. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(events) = &self.events {
            events.poller.stop();
            events.poller.join();
            events.debounce.close();
        }
        self.emitter.close();
        debug!(port = %self.config.id(), fd = self.fd.fd(), "Closing GPIO port");
        self.fd.close()
    }
}

impl GpioPort for NativePort {
    fn read(&self) -> Result<u64> {
        self.ensure_open()?;
        let mask = self.config.line_mask();
        let values = ioctl_record(
            &*self.ioctl,
            self.fd.fd(),
            GPIO_V2_LINE_GET_VALUES_IOCTL,
            &LineValues { bits: 0, mask },
        )?;
        Ok(values.bits & mask)
    }

    fn write(&self, value: u64) -> Result<()> {
        self.ensure_open()?;
        let mask = self.config.line_mask();
        ioctl_record(
            &*self.ioctl,
            self.fd.fd(),
            GPIO_V2_LINE_SET_VALUES_IOCTL,
            &LineValues {
                bits: value & mask,
                mask,
            },
        )?;
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn GpioEventListener>) -> Result<()> {
        self.ensure_open()?;
        let events = self.events()?;
        let _guard = events.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.emitter.add_listener(listener)?;
        // Restarts a run that is still winding down after a stop
        events.poller.start()?;
        Ok(())
    }

    fn remove_listener(&self, listener: &Arc<dyn GpioEventListener>) -> Result<()> {
        let events = self.events()?;
        let _guard = events.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.emitter.remove_listener(listener);
        if self.emitter.listener_count() == 0 {
            debug!(port = %self.config.id(), "Last listener removed, stopping poller");
            events.poller.stop();
        }
        Ok(())
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(port = %self.config.id(), error = %e, "Failed to close GPIO port");
        }
    }
}
