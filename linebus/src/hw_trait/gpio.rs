//! GPIO hardware abstraction trait.

use std::sync::Arc;

use crate::emitter::GpioEventListener;
use crate::error::{Error, Result};
use crate::layout::gpio::LINES_MAX;

/// Level of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinValue {
    Low,
    High,
}

impl From<bool> for PinValue {
    fn from(value: bool) -> Self {
        if value { PinValue::High } else { PinValue::Low }
    }
}

impl From<PinValue> for bool {
    fn from(value: PinValue) -> Self {
        matches!(value, PinValue::High)
    }
}

/// A group of lines read and written together.
///
/// Values are bitmaps: bit `i` is the line at index `i` of the port's
/// offsets, not the line's offset on the chip.
pub trait GpioPort: Send + Sync {
    /// Read the current value of every line.
    fn read(&self) -> Result<u64>;

    /// Drive every line (port must be an output).
    fn write(&self, value: u64) -> Result<()>;

    /// Register for change events. The first listener starts event delivery.
    fn add_listener(&self, listener: Arc<dyn GpioEventListener>) -> Result<()>;

    /// Unregister a listener. Removing the last one stops event delivery.
    fn remove_listener(&self, listener: &Arc<dyn GpioEventListener>) -> Result<()>;

    /// Read one line of the port.
    fn read_line(&self, index: usize) -> Result<PinValue> {
        if index >= LINES_MAX {
            return Err(Error::InvalidParameter(format!(
                "line index {index} out of range"
            )));
        }
        Ok(PinValue::from((self.read()? >> index) & 1 == 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPort(u64);

    impl GpioPort for FixedPort {
        fn read(&self) -> Result<u64> {
            Ok(self.0)
        }

        fn write(&self, _value: u64) -> Result<()> {
            Ok(())
        }

        fn add_listener(&self, _listener: Arc<dyn GpioEventListener>) -> Result<()> {
            Ok(())
        }

        fn remove_listener(&self, _listener: &Arc<dyn GpioEventListener>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_line() {
        let port = FixedPort(0b101);
        assert_eq!(port.read_line(0).unwrap(), PinValue::High);
        assert_eq!(port.read_line(1).unwrap(), PinValue::Low);
        assert_eq!(port.read_line(2).unwrap(), PinValue::High);
        assert!(port.read_line(64).is_err());
    }

    #[test]
    fn test_pin_value_bool() {
        assert_eq!(PinValue::from(true), PinValue::High);
        assert!(!bool::from(PinValue::Low));
    }
}
