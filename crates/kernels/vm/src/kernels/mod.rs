//! Kernel library and dispatch tables.
//!
//! # Architecture
//!
//! A kernel is a zero-sized type implementing [`UnaryKernel`],
//! [`BinaryKernel`] or [`TrinaryKernel`] over [`BlockValue`] lanes. Drivers
//! ([`exec_unary`], [`exec_binary`], [`exec_trinary`]) decode operands, walk
//! the chunk's lane blocks and store results. Each driver is monomorphized
//! once per combination of operand sources, so an n-ary kernel yields 2^n
//! [`ExecFn`]s:
//!
//! ```text
//! mask 0b01 ──► exec_binary::<Add<F32x4>, ConstantSource, RegisterSource>
//! mask 0b10 ──► exec_binary::<Add<F32x4>, RegisterSource, ConstantSource>
//! ```
//!
//! [`handler_for`] maps `(opcode, mask, safe_math)` to the matching function.
//! The raw interpreter and the optimizer both go through it, so the two paths
//! run identical kernel bodies.

pub mod common;
pub mod convert;
pub mod float;
pub mod int;
pub mod noise;
pub mod special;

use std::sync::OnceLock;

use crate::bytecode::opcode::{OP0_CONST, OP1_CONST, OP2_CONST, OPCODE_COUNT, Opcode};
use crate::bytecode::{ConstantTable, OperandCursor};
use crate::executor::ChunkContext;
use crate::lanes::{BlockValue, F32x4, I32x4, LaneBlock};
use crate::registers::RegisterFile;
use crate::rng::RandomStream;

/// A resolved instruction body.
///
/// Reads its operands (everything after the source mask) from the cursor and
/// runs over the whole chunk.
pub type ExecFn = fn(&mut ChunkContext<'_>, &mut dyn OperandCursor);

// ============================================================================
// Operand Sources
// ============================================================================

/// Where a kernel input comes from.
pub trait Source: Copy {
    /// Whether this source reads the constant table.
    const IS_CONSTANT: bool;

    /// Consume the operand from the stream.
    fn decode(cursor: &mut dyn OperandCursor, constants: &ConstantTable<'_>) -> Self;

    /// Lane block `block` of the operand.
    fn fetch(self, registers: &RegisterFile, block: usize) -> LaneBlock;
}

/// Operand read from a temporary register.
#[derive(Debug, Clone, Copy)]
pub struct RegisterSource(pub u16);

impl Source for RegisterSource {
    const IS_CONSTANT: bool = false;

    #[inline]
    fn decode(cursor: &mut dyn OperandCursor, _constants: &ConstantTable<'_>) -> Self {
        RegisterSource(cursor.read_u16())
    }

    #[inline]
    fn fetch(self, registers: &RegisterFile, block: usize) -> LaneBlock {
        registers.block(self.0, block)
    }
}

/// Constant broadcast to every lane.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSource(pub LaneBlock);

impl Source for ConstantSource {
    const IS_CONSTANT: bool = true;

    #[inline]
    fn decode(cursor: &mut dyn OperandCursor, constants: &ConstantTable<'_>) -> Self {
        ConstantSource(LaneBlock::splat(constants.read_bits(cursor.read_u16())))
    }

    #[inline]
    fn fetch(self, _registers: &RegisterFile, _block: usize) -> LaneBlock {
        self.0
    }
}

// ============================================================================
// Kernel Traits
// ============================================================================

/// One input, one output.
pub trait UnaryKernel {
    /// Input lanes.
    type A: BlockValue;
    /// Output lanes.
    type Out: BlockValue;

    /// Compute one lane block.
    fn apply(rng: &mut RandomStream, a: Self::A) -> Self::Out;
}

/// Two inputs, one output.
pub trait BinaryKernel {
    /// First input lanes.
    type A: BlockValue;
    /// Second input lanes.
    type B: BlockValue;
    /// Output lanes.
    type Out: BlockValue;

    /// Compute one lane block.
    fn apply(rng: &mut RandomStream, a: Self::A, b: Self::B) -> Self::Out;
}

/// Three inputs, one output.
pub trait TrinaryKernel {
    /// First input lanes.
    type A: BlockValue;
    /// Second input lanes.
    type B: BlockValue;
    /// Third input lanes.
    type C: BlockValue;
    /// Output lanes.
    type Out: BlockValue;

    /// Compute one lane block.
    fn apply(rng: &mut RandomStream, a: Self::A, b: Self::B, c: Self::C) -> Self::Out;
}

// ============================================================================
// Drivers
// ============================================================================

/// Run a unary kernel over the chunk.
pub fn exec_unary<K: UnaryKernel, S0: Source>(
    ctx: &mut ChunkContext<'_>,
    cursor: &mut dyn OperandCursor,
) {
    let a = S0::decode(cursor, &ctx.constants);
    let dst = cursor.read_u16();
    for block in 0..ctx.num_blocks() {
        let out = K::apply(&mut ctx.rng, K::A::from_block(a.fetch(&ctx.registers, block)));
        ctx.registers.store(dst, block, out.into_block());
    }
}

/// Run a binary kernel over the chunk.
pub fn exec_binary<K: BinaryKernel, S0: Source, S1: Source>(
    ctx: &mut ChunkContext<'_>,
    cursor: &mut dyn OperandCursor,
) {
    let a = S0::decode(cursor, &ctx.constants);
    let b = S1::decode(cursor, &ctx.constants);
    let dst = cursor.read_u16();
    for block in 0..ctx.num_blocks() {
        let out = K::apply(
            &mut ctx.rng,
            K::A::from_block(a.fetch(&ctx.registers, block)),
            K::B::from_block(b.fetch(&ctx.registers, block)),
        );
        ctx.registers.store(dst, block, out.into_block());
    }
}

/// Run a trinary kernel over the chunk.
pub fn exec_trinary<K: TrinaryKernel, S0: Source, S1: Source, S2: Source>(
    ctx: &mut ChunkContext<'_>,
    cursor: &mut dyn OperandCursor,
) {
    let a = S0::decode(cursor, &ctx.constants);
    let b = S1::decode(cursor, &ctx.constants);
    let c = S2::decode(cursor, &ctx.constants);
    let dst = cursor.read_u16();
    for block in 0..ctx.num_blocks() {
        let out = K::apply(
            &mut ctx.rng,
            K::A::from_block(a.fetch(&ctx.registers, block)),
            K::B::from_block(b.fetch(&ctx.registers, block)),
            K::C::from_block(c.fetch(&ctx.registers, block)),
        );
        ctx.registers.store(dst, block, out.into_block());
    }
}

type R = RegisterSource;
type C = ConstantSource;

/// Unary variant for a source mask.
pub fn unary<K: UnaryKernel>(mask: u8) -> ExecFn {
    if mask & OP0_CONST != 0 {
        exec_unary::<K, C>
    } else {
        exec_unary::<K, R>
    }
}

/// Binary variant for a source mask.
pub fn binary<K: BinaryKernel>(mask: u8) -> ExecFn {
    match mask & (OP0_CONST | OP1_CONST) {
        0b00 => exec_binary::<K, R, R>,
        0b01 => exec_binary::<K, C, R>,
        0b10 => exec_binary::<K, R, C>,
        _ => exec_binary::<K, C, C>,
    }
}

/// Trinary variant for a source mask.
pub fn trinary<K: TrinaryKernel>(mask: u8) -> ExecFn {
    match mask & (OP0_CONST | OP1_CONST | OP2_CONST) {
        0b000 => exec_trinary::<K, R, R, R>,
        0b001 => exec_trinary::<K, C, R, R>,
        0b010 => exec_trinary::<K, R, C, R>,
        0b011 => exec_trinary::<K, C, C, R>,
        0b100 => exec_trinary::<K, R, R, C>,
        0b101 => exec_trinary::<K, C, R, C>,
        0b110 => exec_trinary::<K, R, C, C>,
        _ => exec_trinary::<K, C, C, C>,
    }
}

// ============================================================================
// Dispatch Tables
// ============================================================================

/// Source-mask combinations per opcode.
const MASK_VARIANTS: usize = 8;

type HandlerRow = [Option<ExecFn>; MASK_VARIANTS];

/// Kernel for `opcode` with the given source mask.
///
/// `safe_math` picks the zero-guarded div/rcp/rsq/sqrt/log/pow. Returns
/// `None` only for `done`, which the dispatch loops handle themselves.
#[inline]
pub fn handler_for(opcode: Opcode, mask: u8, safe_math: bool) -> Option<ExecFn> {
    static SAFE: OnceLock<Vec<HandlerRow>> = OnceLock::new();
    static FAST: OnceLock<Vec<HandlerRow>> = OnceLock::new();

    let table = if safe_math {
        SAFE.get_or_init(|| build_table(true))
    } else {
        FAST.get_or_init(|| build_table(false))
    };
    table[opcode as usize][(mask as usize) % MASK_VARIANTS]
}

fn build_table(safe_math: bool) -> Vec<HandlerRow> {
    let table: Vec<HandlerRow> = Opcode::all()
        .map(|opcode| std::array::from_fn(|mask| resolve(opcode, mask as u8, safe_math)))
        .collect();
    debug_assert_eq!(table.len(), OPCODE_COUNT);
    table
}

fn resolve(opcode: Opcode, mask: u8, safe_math: bool) -> Option<ExecFn> {
    use common::*;
    use convert::*;
    use float::*;
    use int::*;
    use noise::*;

    type F = F32x4;
    type I = I32x4;

    let handler = match opcode {
        Opcode::Add => binary::<Add<F>>(mask),
        Opcode::Sub => binary::<Sub<F>>(mask),
        Opcode::Mul => binary::<Mul<F>>(mask),
        Opcode::Div if safe_math => binary::<SafeDiv>(mask),
        Opcode::Div => binary::<Div>(mask),
        Opcode::Mad => trinary::<Mad>(mask),
        Opcode::Lerp => trinary::<Lerp>(mask),
        Opcode::Rcp if safe_math => unary::<SafeRcp>(mask),
        Opcode::Rcp => unary::<Rcp>(mask),
        Opcode::Rsq if safe_math => unary::<SafeRsq>(mask),
        Opcode::Rsq => unary::<Rsq>(mask),
        Opcode::Sqrt if safe_math => unary::<SafeSqrt>(mask),
        Opcode::Sqrt => unary::<Sqrt>(mask),
        Opcode::Neg => unary::<Neg>(mask),
        Opcode::Abs => unary::<Abs>(mask),
        Opcode::Exp => unary::<Exp>(mask),
        Opcode::Exp2 => unary::<Exp2>(mask),
        Opcode::Log if safe_math => unary::<SafeLog>(mask),
        Opcode::Log => unary::<Log>(mask),
        Opcode::Log2 => unary::<Log2>(mask),
        Opcode::Sin => unary::<Sin>(mask),
        Opcode::Cos => unary::<Cos>(mask),
        Opcode::Tan => unary::<Tan>(mask),
        Opcode::Asin => unary::<Asin>(mask),
        Opcode::Acos => unary::<Acos>(mask),
        Opcode::Atan => unary::<Atan>(mask),
        Opcode::Atan2 => binary::<Atan2>(mask),
        Opcode::Ceil => unary::<Ceil>(mask),
        Opcode::Floor => unary::<Floor>(mask),
        Opcode::Round => unary::<Round>(mask),
        Opcode::Fmod => binary::<Fmod>(mask),
        Opcode::Frac => unary::<Frac>(mask),
        Opcode::Trunc => unary::<Trunc>(mask),
        Opcode::Clamp => trinary::<Clamp<F>>(mask),
        Opcode::Min => binary::<Min<F>>(mask),
        Opcode::Max => binary::<Max<F>>(mask),
        Opcode::Pow if safe_math => binary::<SafePow>(mask),
        Opcode::Pow => binary::<Pow>(mask),
        Opcode::Sign => unary::<Sign>(mask),
        Opcode::Step => unary::<Step>(mask),
        Opcode::Random => unary::<Random>(mask),
        Opcode::Noise => unary::<Noise1D>(mask),
        Opcode::Noise2D => binary::<Noise2D>(mask),
        Opcode::Noise3D => trinary::<Noise3D>(mask),
        Opcode::CmpLt => binary::<Compare<F, Less>>(mask),
        Opcode::CmpLe => binary::<Compare<F, LessEq>>(mask),
        Opcode::CmpGt => binary::<Compare<F, Greater>>(mask),
        Opcode::CmpGe => binary::<Compare<F, GreaterEq>>(mask),
        Opcode::CmpEq => binary::<Compare<F, Equal>>(mask),
        Opcode::CmpNeq => binary::<Compare<F, NotEqual>>(mask),
        Opcode::Select => trinary::<Select>(mask),
        Opcode::AddI => binary::<Add<I>>(mask),
        Opcode::SubI => binary::<Sub<I>>(mask),
        Opcode::MulI => binary::<Mul<I>>(mask),
        Opcode::DivI => binary::<DivI>(mask),
        Opcode::ClampI => trinary::<Clamp<I>>(mask),
        Opcode::MinI => binary::<Min<I>>(mask),
        Opcode::MaxI => binary::<Max<I>>(mask),
        Opcode::AbsI => unary::<AbsI>(mask),
        Opcode::NegI => unary::<NegI>(mask),
        Opcode::SignI => unary::<SignI>(mask),
        Opcode::RandomI => unary::<RandomI>(mask),
        Opcode::CmpLtI => binary::<Compare<I, Less>>(mask),
        Opcode::CmpLeI => binary::<Compare<I, LessEq>>(mask),
        Opcode::CmpGtI => binary::<Compare<I, Greater>>(mask),
        Opcode::CmpGeI => binary::<Compare<I, GreaterEq>>(mask),
        Opcode::CmpEqI => binary::<Compare<I, Equal>>(mask),
        Opcode::CmpNeqI => binary::<Compare<I, NotEqual>>(mask),
        Opcode::BitAnd | Opcode::LogicAnd => binary::<BitAnd>(mask),
        Opcode::BitOr | Opcode::LogicOr => binary::<BitOr>(mask),
        Opcode::BitXor | Opcode::LogicXor => binary::<BitXor>(mask),
        Opcode::BitNot | Opcode::LogicNot => unary::<BitNot>(mask),
        Opcode::BitLShift => binary::<ShiftLeft>(mask),
        Opcode::BitRShift => binary::<ShiftRight>(mask),
        Opcode::F2I => unary::<F2I>(mask),
        Opcode::I2F => unary::<I2F>(mask),
        Opcode::F2B => unary::<F2B>(mask),
        Opcode::B2F => unary::<B2F>(mask),
        Opcode::I2B => unary::<I2B>(mask),
        Opcode::B2I => unary::<B2I>(mask),
        Opcode::OutputData32 => special::output(mask),
        Opcode::InputData32 => special::exec_input,
        Opcode::InputDataNoAdvance32 => special::exec_input_no_advance,
        Opcode::AcquireIndex => special::acquire_index(mask),
        Opcode::ExternalFuncCall => special::exec_external_call,
        Opcode::ExecIndex => special::exec_index,
        Opcode::EnterStatScope => special::exec_enter_stat_scope,
        Opcode::ExitStatScope => special::exec_exit_stat_scope,
        Opcode::UpdateId => special::exec_update_id,
        Opcode::AcquireId => special::exec_acquire_id,
        Opcode::Done => return None,
    };
    Some(handler)
}
