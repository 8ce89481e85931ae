//! Instruction stream: opcodes, operand decoding, validation and text form.
//!
//! # Architecture
//!
//! ```text
//! ProgramBuilder / assemble ──► raw bytes ──► validate ──► ByteCursor ──► kernels
//!                                    │
//!                                    └──► Optimizer ──► WordCursor ──► kernels
//! ```
//!
//! The raw stream is owned by the caller and never modified. See
//! [`opcode`] for the operand layout.

pub mod asm;
pub mod builder;
pub mod decoder;
pub mod opcode;
pub mod validate;

pub use asm::{assemble, disassemble};
pub use builder::{Operand, Program, ProgramBuilder};
pub use decoder::{ByteCursor, OperandCursor, WordCursor};
pub use opcode::{OPCODE_COUNT, Opcode, OpcodeCategory, OpcodeInfo, OperandField};
pub use validate::{DataSetShape, StreamSummary, ValidationLimits, validate};

/// Bit set on an external operand word that names a register.
pub const EXTERNAL_REGISTER_BIT: u16 = 0x8000;

/// External operand word for an output the caller does not want.
pub const EXTERNAL_UNUSED_OPERAND: u16 = 0xFFFF;

/// Read-only view of an invocation's constant table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantTable<'a> {
    bytes: &'a [u8],
}

impl<'a> ConstantTable<'a> {
    /// Wrap little-endian constant bytes.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the table holds no constants.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The 32 bits at byte `offset`.
    ///
    /// # Panics
    ///
    /// If `offset + 4` exceeds the table. Validated bytecode never does this.
    #[inline]
    pub fn read_bits(&self, offset: u16) -> u32 {
        let offset = offset as usize;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_le_bytes(word)
    }
}
