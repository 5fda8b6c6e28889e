//! GPIO v2 character-device records (`linux/gpio.h`).

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use strum::FromRepr;

use super::{get_c_string, put_c_string, Layout};
use crate::error::{Error, Result};

/// Maximum number of lines in one request (`GPIO_V2_LINES_MAX`).
pub const LINES_MAX: usize = 64;

/// Width of name and label fields (`GPIO_MAX_NAME_SIZE`).
pub const MAX_NAME_SIZE: usize = 32;

/// Maximum number of attributes in a line config (`GPIO_V2_LINE_NUM_ATTRS_MAX`).
pub const NUM_ATTRS_MAX: usize = 10;

bitflags! {
    /// `enum gpio_v2_line_flag`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LineFlags: u64 {
        const USED = 1 << 0;
        const ACTIVE_LOW = 1 << 1;
        const INPUT = 1 << 2;
        const OUTPUT = 1 << 3;
        const EDGE_RISING = 1 << 4;
        const EDGE_FALLING = 1 << 5;
        const OPEN_DRAIN = 1 << 6;
        const OPEN_SOURCE = 1 << 7;
        const BIAS_PULL_UP = 1 << 8;
        const BIAS_PULL_DOWN = 1 << 9;
        const BIAS_DISABLED = 1 << 10;
        const EVENT_CLOCK_REALTIME = 1 << 11;
        const EVENT_CLOCK_HTE = 1 << 12;
    }
}

/// Tag of a `gpio_v2_line_attribute`.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum AttributeId {
    Flags = 1,
    OutputValues = 2,
    DebouncePeriodUs = 3,
}

/// `struct gpio_v2_line_attribute`: a tagged union.
///
/// Layout: `id: u32`, `padding: u32`, then a 64-bit union holding the
/// flags, the output values bitmap or a `u32` debounce period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAttribute {
    Flags(LineFlags),
    /// Output values bitmap, one bit per requested line.
    Values(u64),
    DebouncePeriodUs(u32),
}

impl Layout for LineAttribute {
    const SIZE: usize = 16;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        match *self {
            LineAttribute::Flags(flags) => {
                dst.put_u32_ne(AttributeId::Flags as u32);
                dst.put_u32_ne(0);
                dst.put_u64_ne(flags.bits());
            }
            LineAttribute::Values(values) => {
                dst.put_u32_ne(AttributeId::OutputValues as u32);
                dst.put_u32_ne(0);
                dst.put_u64_ne(values);
            }
            LineAttribute::DebouncePeriodUs(period) => {
                dst.put_u32_ne(AttributeId::DebouncePeriodUs as u32);
                dst.put_u32_ne(0);
                dst.put_u32_ne(period);
                dst.put_u32_ne(0);
            }
        }
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let id = src.get_u32_ne();
        src.advance(4);
        match AttributeId::from_repr(id) {
            Some(AttributeId::Flags) => Ok(LineAttribute::Flags(LineFlags::from_bits_retain(
                src.get_u64_ne(),
            ))),
            Some(AttributeId::OutputValues) => Ok(LineAttribute::Values(src.get_u64_ne())),
            Some(AttributeId::DebouncePeriodUs) => {
                let period = src.get_u32_ne();
                src.advance(4);
                Ok(LineAttribute::DebouncePeriodUs(period))
            }
            None => Err(Error::InvalidParameter(format!(
                "unknown line attribute id {}",
                id
            ))),
        }
    }
}

/// `struct gpio_v2_line_config_attribute`: an attribute and the lines it
/// applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfigAttribute {
    pub attr: LineAttribute,
    /// Bitmap of indices into the request's offsets.
    pub mask: u64,
}

impl Layout for LineConfigAttribute {
    const SIZE: usize = LineAttribute::SIZE + 8;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        self.attr.encode(dst)?;
        dst.put_u64_ne(self.mask);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let attr = LineAttribute::decode(src)?;
        let mask = src.get_u64_ne();
        Ok(Self { attr, mask })
    }
}

/// `struct gpio_v2_line_config`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineConfig {
    /// Flags applied to every line not overridden by an attribute.
    pub flags: LineFlags,
    pub attrs: Vec<LineConfigAttribute>,
}

impl Layout for LineConfig {
    // flags, num_attrs, padding[5], attrs[10]
    const SIZE: usize = 8 + 4 + 5 * 4 + NUM_ATTRS_MAX * LineConfigAttribute::SIZE;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        Error::check_capacity("line config attributes", NUM_ATTRS_MAX, self.attrs.len())?;

        dst.put_u64_ne(self.flags.bits());
        dst.put_u32_ne(self.attrs.len() as u32);
        dst.put_bytes(0, 5 * 4);
        for attr in &self.attrs {
            attr.encode(dst)?;
        }
        dst.put_bytes(
            0,
            (NUM_ATTRS_MAX - self.attrs.len()) * LineConfigAttribute::SIZE,
        );
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let flags = LineFlags::from_bits_retain(src.get_u64_ne());
        let num_attrs = src.get_u32_ne() as usize;
        Error::check_capacity("line config attributes", NUM_ATTRS_MAX, num_attrs)?;
        src.advance(5 * 4);

        let mut attrs = Vec::with_capacity(num_attrs);
        for _ in 0..num_attrs {
            attrs.push(LineConfigAttribute::decode(src)?);
        }
        src.advance((NUM_ATTRS_MAX - num_attrs) * LineConfigAttribute::SIZE);
        Ok(Self { flags, attrs })
    }
}

/// `struct gpio_v2_line_request`
///
/// Built from a port configuration and submitted once with
/// `GPIO_V2_GET_LINE_IOCTL`; the kernel fills in `fd`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineRequest {
    /// Line offsets on the chip, in port bit order.
    pub offsets: Vec<u32>,
    pub consumer: String,
    pub config: LineConfig,
    /// Kernel event buffer size; 0 lets the kernel choose.
    pub event_buffer_size: u32,
    pub fd: i32,
}

impl Layout for LineRequest {
    // offsets[64], consumer[32], config, num_lines, event_buffer_size,
    // padding[5], fd
    const SIZE: usize = LINES_MAX * 4 + MAX_NAME_SIZE + LineConfig::SIZE + 4 + 4 + 5 * 4 + 4;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        Error::check_capacity("line request offsets", LINES_MAX, self.offsets.len())?;

        for offset in &self.offsets {
            dst.put_u32_ne(*offset);
        }
        dst.put_bytes(0, (LINES_MAX - self.offsets.len()) * 4);
        put_c_string(dst, "consumer label", &self.consumer, MAX_NAME_SIZE)?;
        self.config.encode(dst)?;
        dst.put_u32_ne(self.offsets.len() as u32);
        dst.put_u32_ne(self.event_buffer_size);
        dst.put_bytes(0, 5 * 4);
        dst.put_i32_ne(self.fd);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let mut all_offsets = [0u32; LINES_MAX];
        for offset in all_offsets.iter_mut() {
            *offset = src.get_u32_ne();
        }
        let consumer = get_c_string(src, MAX_NAME_SIZE);
        let config = LineConfig::decode(src)?;
        let num_lines = src.get_u32_ne() as usize;
        Error::check_capacity("line request offsets", LINES_MAX, num_lines)?;
        let event_buffer_size = src.get_u32_ne();
        src.advance(5 * 4);
        let fd = src.get_i32_ne();

        Ok(Self {
            offsets: all_offsets[..num_lines].to_vec(),
            consumer,
            config,
            event_buffer_size,
            fd,
        })
    }
}

/// `struct gpio_v2_line_values`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineValues {
    /// One bit per requested line, in request order.
    pub bits: u64,
    /// Which bits of `bits` are meaningful.
    pub mask: u64,
}

impl LineValues {
    /// Every requested line selected.
    pub const fn all(bits: u64) -> Self {
        Self {
            bits,
            mask: u64::MAX,
        }
    }
}

impl Layout for LineValues {
    const SIZE: usize = 16;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        dst.put_u64_ne(self.bits);
        dst.put_u64_ne(self.mask);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        Ok(Self {
            bits: src.get_u64_ne(),
            mask: src.get_u64_ne(),
        })
    }
}

/// `enum gpio_v2_line_event_id`
pub const EVENT_RISING_EDGE: u32 = 1;
pub const EVENT_FALLING_EDGE: u32 = 2;

/// `struct gpio_v2_line_event`: one edge record read from a line request fd.
///
/// A zero timestamp marks the end of the valid records in a read batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineEvent {
    pub timestamp_ns: u64,
    pub id: u32,
    pub offset: u32,
    pub seqno: u32,
    pub line_seqno: u32,
}

impl Layout for LineEvent {
    // timestamp_ns, id, offset, seqno, line_seqno, padding[6]
    const SIZE: usize = 8 + 4 * 4 + 6 * 4;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        dst.put_u64_ne(self.timestamp_ns);
        dst.put_u32_ne(self.id);
        dst.put_u32_ne(self.offset);
        dst.put_u32_ne(self.seqno);
        dst.put_u32_ne(self.line_seqno);
        dst.put_bytes(0, 6 * 4);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let event = Self {
            timestamp_ns: src.get_u64_ne(),
            id: src.get_u32_ne(),
            offset: src.get_u32_ne(),
            seqno: src.get_u32_ne(),
            line_seqno: src.get_u32_ne(),
        };
        src.advance(6 * 4);
        Ok(event)
    }
}

/// `struct gpiochip_info`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipInfo {
    pub name: String,
    pub label: String,
    pub lines: u32,
}

impl Layout for ChipInfo {
    const SIZE: usize = MAX_NAME_SIZE * 2 + 4;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        put_c_string(dst, "chip name", &self.name, MAX_NAME_SIZE)?;
        put_c_string(dst, "chip label", &self.label, MAX_NAME_SIZE)?;
        dst.put_u32_ne(self.lines);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        Ok(Self {
            name: get_c_string(src, MAX_NAME_SIZE),
            label: get_c_string(src, MAX_NAME_SIZE),
            lines: src.get_u32_ne(),
        })
    }
}

/// `struct gpio_v2_line_info`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineInfo {
    pub name: String,
    pub consumer: String,
    pub offset: u32,
    pub flags: LineFlags,
    pub attrs: Vec<LineAttribute>,
}

impl LineInfo {
    /// Query record for `GPIO_V2_GET_LINEINFO_IOCTL`; only the offset is read
    /// by the kernel.
    pub fn for_offset(offset: u32) -> Self {
        Self {
            offset,
            ..Default::default()
        }
    }

    pub fn is_used(&self) -> bool {
        self.flags.contains(LineFlags::USED)
    }
}

impl Layout for LineInfo {
    // name[32], consumer[32], offset, num_attrs, flags, attrs[10], padding[4]
    const SIZE: usize = MAX_NAME_SIZE * 2 + 4 + 4 + 8 + NUM_ATTRS_MAX * LineAttribute::SIZE + 4 * 4;

    fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        Error::check_capacity("line info attributes", NUM_ATTRS_MAX, self.attrs.len())?;

        put_c_string(dst, "line name", &self.name, MAX_NAME_SIZE)?;
        put_c_string(dst, "line consumer", &self.consumer, MAX_NAME_SIZE)?;
        dst.put_u32_ne(self.offset);
        dst.put_u32_ne(self.attrs.len() as u32);
        dst.put_u64_ne(self.flags.bits());
        for attr in &self.attrs {
            attr.encode(dst)?;
        }
        dst.put_bytes(0, (NUM_ATTRS_MAX - self.attrs.len()) * LineAttribute::SIZE);
        dst.put_bytes(0, 4 * 4);
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let name = get_c_string(src, MAX_NAME_SIZE);
        let consumer = get_c_string(src, MAX_NAME_SIZE);
        let offset = src.get_u32_ne();
        let num_attrs = src.get_u32_ne() as usize;
        Error::check_capacity("line info attributes", NUM_ATTRS_MAX, num_attrs)?;
        let flags = LineFlags::from_bits_retain(src.get_u64_ne());

        let mut attrs = Vec::with_capacity(num_attrs);
        for _ in 0..num_attrs {
            attrs.push(LineAttribute::decode(src)?);
        }
        src.advance((NUM_ATTRS_MAX - num_attrs) * LineAttribute::SIZE + 4 * 4);

        Ok(Self {
            name,
            consumer,
            offset,
            flags,
            attrs,
        })
    }
}
