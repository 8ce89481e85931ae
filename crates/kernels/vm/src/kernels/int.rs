//! Integer and bitwise kernels.
//!
//! Integer arithmetic wraps. Division by zero yields 0 and shift amounts are
//! taken modulo 32, so no integer kernel can trap. Bitwise kernels work on
//! raw lanes and double as the boolean `logic_*` kernels, since masks are
//! all-ones or all-zeros.

use crate::kernels::{BinaryKernel, UnaryKernel};
use crate::lanes::{F32x4, I32x4, LaneBlock, VectorLane};
use crate::rng::RandomStream;

macro_rules! int_unary {
    ($($(#[$doc:meta])* $name:ident => |$x:ident| $body:expr;)*) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl UnaryKernel for $name {
                type A = I32x4;
                type Out = I32x4;

                #[inline]
                fn apply(_rng: &mut RandomStream, a: I32x4) -> I32x4 {
                    a.map(|$x| $body)
                }
            }
        )*
    };
}

macro_rules! raw_binary {
    ($($(#[$doc:meta])* $name:ident => |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl BinaryKernel for $name {
                type A = LaneBlock;
                type B = LaneBlock;
                type Out = LaneBlock;

                #[inline]
                fn apply(_rng: &mut RandomStream, a: LaneBlock, b: LaneBlock) -> LaneBlock {
                    LaneBlock(std::array::from_fn(|lane| {
                        let ($a, $b) = (a.0[lane], b.0[lane]);
                        $body
                    }))
                }
            }
        )*
    };
}

int_unary! {
    /// `|x|`, wrapping at `i32::MIN`
    AbsI => |x| x.wrapping_abs();
    /// `-x`, wrapping at `i32::MIN`
    NegI => |x| x.wrapping_neg();
    /// `1` for `x >= 0`, else `-1`
    SignI => |x| if x >= 0 { 1 } else { -1 };
}

raw_binary! {
    /// `a & b`
    BitAnd => |a, b| a & b;
    /// `a | b`
    BitOr => |a, b| a | b;
    /// `a ^ b`
    BitXor => |a, b| a ^ b;
    /// `a << (b mod 32)`
    ShiftLeft => |a, b| a.wrapping_shl(b);
    /// `a >> (b mod 32)`, arithmetic
    ShiftRight => |a, b| (a as i32).wrapping_shr(b) as u32;
}

/// `a / b`, zero when `b == 0`
pub struct DivI;

impl BinaryKernel for DivI {
    type A = I32x4;
    type B = I32x4;
    type Out = I32x4;

    #[inline]
    fn apply(_rng: &mut RandomStream, a: I32x4, b: I32x4) -> I32x4 {
        a.zip(b, |a, b| if b != 0 { a.wrapping_div(b) } else { 0 })
    }
}

/// `!x`
pub struct BitNot;

impl UnaryKernel for BitNot {
    type A = LaneBlock;
    type Out = LaneBlock;

    #[inline]
    fn apply(_rng: &mut RandomStream, a: LaneBlock) -> LaneBlock {
        LaneBlock(a.0.map(|bits| !bits))
    }
}

/// `trunc(fraction * src)`, one draw per lane, padding lanes included.
pub struct RandomI;

impl UnaryKernel for RandomI {
    type A = I32x4;
    type Out = I32x4;

    #[inline]
    fn apply(rng: &mut RandomStream, a: I32x4) -> I32x4 {
        let scaled = F32x4(a.0.map(|bound| rng.fraction() * bound as f32));
        I32x4(scaled.0.map(|value| value as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;
    use crate::kernels::tests::{as_i32, i32_lanes, run_kernel};

    fn binary(opcode: Opcode, a: [i32; 4], b: [i32; 4]) -> [i32; 4] {
        as_i32(run_kernel(
            opcode,
            0,
            true,
            &[i32_lanes(a), i32_lanes(b)],
            &[],
            &[0, 1, 2],
        ))
    }

    fn unary(opcode: Opcode, x: [i32; 4]) -> [i32; 4] {
        as_i32(run_kernel(opcode, 0, true, &[i32_lanes(x)], &[], &[0, 1]))
    }

    #[test]
    fn integer_division_by_zero_is_zero() {
        assert_eq!(
            binary(Opcode::DivI, [7, -7, 9, i32::MIN], [2, 0, 0, -1]),
            [3, 0, 0, i32::MIN]
        );
    }

    #[test]
    fn shifts_mask_their_amount() {
        assert_eq!(
            binary(Opcode::BitLShift, [1, 1, 3, -1], [4, 33, 0, 31]),
            [16, 2, 3, i32::MIN]
        );
        assert_eq!(
            binary(Opcode::BitRShift, [16, -16, 5, 8], [2, 2, 32, 35]),
            [4, -4, 5, 1]
        );
    }

    #[test]
    fn bit_and_logic_ops_share_kernels() {
        let a = [0b1100, -1, 0, -1];
        let b = [0b1010, 0, 0, -1];
        assert_eq!(binary(Opcode::BitAnd, a, b), [0b1000, 0, 0, -1]);
        assert_eq!(binary(Opcode::LogicOr, a, b), [0b1110, -1, 0, -1]);
        assert_eq!(binary(Opcode::BitXor, a, b), [0b0110, -1, 0, 0]);
        assert_eq!(unary(Opcode::LogicNot, [0, -1, 1, 5]), [-1, 0, -2, -6]);
    }

    #[test]
    fn unary_integer_ops() {
        assert_eq!(unary(Opcode::AbsI, [-3, 3, 0, i32::MIN]), [3, 3, 0, i32::MIN]);
        assert_eq!(unary(Opcode::NegI, [-3, 3, 0, i32::MIN]), [3, -3, 0, i32::MIN]);
        assert_eq!(unary(Opcode::SignI, [-3, 3, 0, i32::MIN]), [-1, 1, 1, -1]);
    }

    #[test]
    fn random_integers_stay_below_the_bound() {
        for _ in 0..64 {
            let out = unary(Opcode::RandomI, [10, 1, 0, 1000]);
            assert!((0..10).contains(&out[0]));
            assert_eq!(out[1], 0);
            assert_eq!(out[2], 0);
            assert!((0..1000).contains(&out[3]));
        }
    }
}
