//! In-memory SPI device.
//!
//! Bytes clocked out land in an output buffer; bytes clocked in come from an
//! input buffer. Both have a cursor that advances with each exchange.
//! [`MockSpi::swap_buffers`] moves what was written into the input side so
//! it can be read back.

use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::hw_trait::spi::{check_window, Spi};

const DEFAULT_CAPACITY: usize = 256;

struct Buffers {
    input: Vec<u8>,
    input_pos: usize,
    output: Vec<u8>,
    output_pos: usize,
}

pub struct MockSpi {
    buffers: Mutex<Buffers>,
}

impl Default for MockSpi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpi {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Buffers {
                input: vec![0; capacity],
                input_pos: 0,
                output: vec![0; capacity],
                output_pos: 0,
            }),
        }
    }

    fn buffers(&self) -> std::sync::MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make everything written so far readable from the start.
    ///
    /// No-op when nothing was written since the last swap.
    pub fn swap_buffers(&self) {
        let mut buffers = self.buffers();
        if buffers.output_pos > 0 {
            buffers.input = buffers.output.clone();
            buffers.input_pos = 0;
            buffers.output_pos = 0;
        }
    }

    /// Copy of the whole output buffer.
    pub fn out_buffer(&self) -> Vec<u8> {
        self.buffers().output.clone()
    }

    /// Rewind both cursors.
    pub fn reset(&self) {
        let mut buffers = self.buffers();
        buffers.input_pos = 0;
        buffers.output_pos = 0;
    }
}

impl Spi for MockSpi {
    fn transfer(
        &self,
        write: &[u8],
        write_offset: usize,
        read: &mut [u8],
        read_offset: usize,
        length: usize,
    ) -> Result<usize> {
        check_window("spi write buffer", write.len(), write_offset, length)?;
        check_window("spi read buffer", read.len(), read_offset, length)?;

        let mut buffers = self.buffers();
        let Buffers {
            input,
            input_pos,
            output,
            output_pos,
        } = &mut *buffers;
        Error::check_capacity("mock spi input", input.len() - *input_pos, length)?;
        Error::check_capacity("mock spi output", output.len() - *output_pos, length)?;

        output[*output_pos..*output_pos + length]
            .copy_from_slice(&write[write_offset..write_offset + length]);
        read[read_offset..read_offset + length]
            .copy_from_slice(&input[*input_pos..*input_pos + length]);
        *output_pos += length;
        *input_pos += length;
        Ok(length)
    }
}
