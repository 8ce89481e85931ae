//! Host functions callable from bytecode.
//!
//! `external_func_call` names a bound [`ExternalFunction`] by index and is
//! followed by exactly [`ExternalFunction::register_count`] operand words:
//!
//! ```text
//! word & 0x8000 != 0  ──► register (word & 0x7FFF)
//! word == 0xFFFF      ──► unused output
//! otherwise           ──► constant byte offset (inputs only)
//! ```
//!
//! The function decodes its operands in order through [`ExternalCall`]. Any
//! words it leaves unread are skipped once it returns, so a function that
//! ignores some operands cannot desynchronize the stream.

use std::any::Any;
use std::fmt;

use crate::bytecode::decoder::skip_u16;
use crate::bytecode::{EXTERNAL_REGISTER_BIT, EXTERNAL_UNUSED_OPERAND, OperandCursor};
use crate::executor::ChunkContext;

/// A host function bound to an invocation.
pub trait ExternalFunction: Send + Sync {
    /// Name used in logs and disassembly.
    fn name(&self) -> &str;

    /// Operand words the call site carries.
    fn register_count(&self) -> usize;

    /// Run over the current chunk.
    fn execute(&self, call: &mut ExternalCall<'_, '_>);
}

impl fmt::Debug for dyn ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("name", &self.name())
            .field("register_count", &self.register_count())
            .finish()
    }
}

/// [`ExternalFunction`] backed by a closure.
pub struct FnExternal<F> {
    name: String,
    register_count: usize,
    body: F,
}

impl<F> FnExternal<F>
where
    F: Fn(&mut ExternalCall<'_, '_>) + Send + Sync,
{
    /// Wrap `body` as a function consuming `register_count` operand words.
    pub fn new(name: impl Into<String>, register_count: usize, body: F) -> Self {
        Self {
            name: name.into(),
            register_count,
            body,
        }
    }
}

impl<F> ExternalFunction for FnExternal<F>
where
    F: Fn(&mut ExternalCall<'_, '_>) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn register_count(&self) -> usize {
        self.register_count
    }

    fn execute(&self, call: &mut ExternalCall<'_, '_>) {
        (self.body)(call)
    }
}

/// A decoded input operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalInput {
    /// Per-lane values from a temporary register.
    Register(u16),
    /// One value for every lane.
    Constant(u32),
    /// No operand bound; reads as zero.
    Unused,
}

/// A decoded output operand; `None` when the caller discards the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalOutput(pub Option<u16>);

/// Operand and register access for one external call.
pub struct ExternalCall<'c, 'a> {
    ctx: &'c mut ChunkContext<'a>,
    cursor: &'c mut dyn OperandCursor,
    remaining: usize,
}

impl<'c, 'a> ExternalCall<'c, 'a> {
    pub(crate) fn new(
        ctx: &'c mut ChunkContext<'a>,
        cursor: &'c mut dyn OperandCursor,
        operand_count: usize,
    ) -> Self {
        Self {
            ctx,
            cursor,
            remaining: operand_count,
        }
    }

    /// Instances in the current chunk.
    pub fn num_instances(&self) -> usize {
        self.ctx.num_instances
    }

    /// Global index of the chunk's first instance.
    pub fn start_instance(&self) -> usize {
        self.ctx.start_instance
    }

    /// Operand words not yet decoded.
    pub fn remaining_operands(&self) -> usize {
        self.remaining
    }

    fn next_word(&mut self) -> Option<u16> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.cursor.read_u16())
    }

    /// Decode the next operand as an input.
    ///
    /// Past the last operand this yields [`ExternalInput::Unused`].
    pub fn next_input(&mut self) -> ExternalInput {
        match self.next_word() {
            None | Some(EXTERNAL_UNUSED_OPERAND) => ExternalInput::Unused,
            Some(word) if word & EXTERNAL_REGISTER_BIT != 0 => {
                ExternalInput::Register(word & !EXTERNAL_REGISTER_BIT)
            }
            Some(offset) => ExternalInput::Constant(self.ctx.constants.read_bits(offset)),
        }
    }

    /// Decode the next operand as an output.
    pub fn next_output(&mut self) -> ExternalOutput {
        match self.next_word() {
            Some(word) if word != EXTERNAL_UNUSED_OPERAND && word & EXTERNAL_REGISTER_BIT != 0 => {
                ExternalOutput(Some(word & !EXTERNAL_REGISTER_BIT))
            }
            _ => ExternalOutput(None),
        }
    }

    /// Raw bits of `input` at `lane`.
    pub fn read_bits(&self, input: ExternalInput, lane: usize) -> u32 {
        match input {
            ExternalInput::Register(register) => self.ctx.registers.lane(register, lane),
            ExternalInput::Constant(bits) => bits,
            ExternalInput::Unused => 0,
        }
    }

    /// `input` at `lane` as a float.
    pub fn read_f32(&self, input: ExternalInput, lane: usize) -> f32 {
        f32::from_bits(self.read_bits(input, lane))
    }

    /// `input` at `lane` as an integer.
    pub fn read_i32(&self, input: ExternalInput, lane: usize) -> i32 {
        self.read_bits(input, lane) as i32
    }

    /// Store raw bits to `output` at `lane`; discarded outputs ignore the write.
    pub fn write_bits(&mut self, output: ExternalOutput, lane: usize, bits: u32) {
        if let ExternalOutput(Some(register)) = output {
            self.ctx.registers.set_lane(register, lane, bits);
        }
    }

    /// Store a float to `output` at `lane`.
    pub fn write_f32(&mut self, output: ExternalOutput, lane: usize, value: f32) {
        self.write_bits(output, lane, value.to_bits());
    }

    /// Store an integer to `output` at `lane`.
    pub fn write_i32(&mut self, output: ExternalOutput, lane: usize, value: i32) {
        self.write_bits(output, lane, value as u32);
    }

    /// Caller-bound user data `index`, if present and of type `T`.
    pub fn user_data<T: Any>(&self, index: usize) -> Option<&T> {
        self.ctx.user_data.get(index)?.downcast_ref::<T>()
    }

    /// Next value of the batch's random stream in `[0, 1)`.
    pub fn random_fraction(&mut self) -> f32 {
        self.ctx.rng.fraction()
    }

    pub(crate) fn skip_remaining(&mut self) {
        skip_u16(&mut *self.cursor, std::mem::take(&mut self.remaining));
    }
}
