//! Operand cursors over raw and pre-decoded instruction streams.
//!
//! Kernels never see the stream format directly. They pull operands through
//! [`OperandCursor`], which both the raw byte stream ([`ByteCursor`]) and the
//! optimizer's pre-decoded words ([`WordCursor`]) implement, so one kernel
//! body serves both execution paths.
//!
//! Reads past the end of a stream panic. Execution only runs on streams that
//! passed [`validate`](super::validate::validate), so this is unreachable for
//! validated input.

use crate::bytecode::opcode::Opcode;
use crate::error::{Error, Result};

/// Sequential operand source consumed by kernels.
pub trait OperandCursor {
    /// Next u8 operand.
    fn read_u8(&mut self) -> u8;

    /// Next u16 operand.
    fn read_u16(&mut self) -> u16;
}

/// Cursor over a raw little-endian byte stream.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    /// Cursor positioned at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Current byte offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.position)
    }

    /// Whether the cursor is at the end of the stream.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Move the cursor back to an earlier position.
    ///
    /// Only the optimizer does this, to retry a pattern it failed to fuse.
    pub fn rewind_to(&mut self, position: usize) {
        debug_assert!(position <= self.position, "cursor only rewinds");
        self.position = position;
    }

    /// Decode the next opcode.
    ///
    /// # Errors
    ///
    /// [`Error::Truncated`] at end of stream, [`Error::UnknownOpcode`] for
    /// bytes that name no instruction.
    pub fn read_opcode(&mut self) -> Result<Opcode> {
        let offset = self.position;
        let byte = self.try_read_u8()?;
        Opcode::from_u8(byte).ok_or(Error::UnknownOpcode {
            opcode: byte,
            offset,
        })
    }

    /// Next u8, or [`Error::Truncated`].
    pub fn try_read_u8(&mut self) -> Result<u8> {
        let byte = *self.bytes.get(self.position).ok_or(Error::Truncated {
            offset: self.position,
        })?;
        self.position += 1;
        Ok(byte)
    }

    /// Next little-endian u16, or [`Error::Truncated`].
    pub fn try_read_u16(&mut self) -> Result<u16> {
        match self.bytes.get(self.position..self.position + 2) {
            Some(&[lo, hi]) => {
                self.position += 2;
                Ok(u16::from_le_bytes([lo, hi]))
            }
            _ => Err(Error::Truncated {
                offset: self.position,
            }),
        }
    }
}

impl OperandCursor for ByteCursor<'_> {
    #[inline]
    fn read_u8(&mut self) -> u8 {
        let byte = self.bytes[self.position];
        self.position += 1;
        byte
    }

    #[inline]
    fn read_u16(&mut self) -> u16 {
        let value = u16::from_le_bytes([self.bytes[self.position], self.bytes[self.position + 1]]);
        self.position += 2;
        value
    }
}

/// Cursor over the pre-decoded operand words of an optimized instruction.
///
/// Every operand, including u8 ones, occupies one word.
#[derive(Debug, Clone)]
pub struct WordCursor<'a> {
    words: &'a [u16],
    position: usize,
}

impl<'a> WordCursor<'a> {
    /// Cursor positioned at the first word.
    pub fn new(words: &'a [u16]) -> Self {
        Self { words, position: 0 }
    }

    /// Words consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl OperandCursor for WordCursor<'_> {
    #[inline]
    fn read_u8(&mut self) -> u8 {
        self.read_u16() as u8
    }

    #[inline]
    fn read_u16(&mut self) -> u16 {
        let word = self.words[self.position];
        self.position += 1;
        word
    }
}

/// Skip `count` u16 operands.
pub(crate) fn skip_u16(cursor: &mut dyn OperandCursor, count: usize) {
    for _ in 0..count {
        cursor.read_u16();
    }
}
