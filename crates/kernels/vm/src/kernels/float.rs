//! Float kernels.
//!
//! Guarded operations come in pairs. The `Safe*` variant returns 0 wherever
//! its guard fails, NaN included; the plain variant computes the raw IEEE
//! result.
//!
//! | Kernel | Guard |
//! |---|---|
//! | [`SafeDiv`] | `|b| > SMALL_NUMBER` |
//! | [`SafeRcp`] | `|x| > SMALL_NUMBER` |
//! | [`SafeRsq`] | `x > SMALL_NUMBER` |
//! | [`SafeSqrt`] | `x > SMALL_NUMBER` |
//! | [`SafeLog`] | `x > 0` |
//! | [`SafePow`] | `base > SMALL_NUMBER` |

use crate::kernels::{BinaryKernel, TrinaryKernel, UnaryKernel};
use crate::lanes::{F32x4, VectorLane};
use crate::rng::RandomStream;

/// Magnitude below which guarded kernels return zero.
pub const SMALL_NUMBER: f32 = 1.0e-8;

/// Largest f32 below two; makes `round` send exact halves toward zero.
pub const ALMOST_TWO: f32 = 1.999_999_9;

macro_rules! float_unary {
    ($($(#[$doc:meta])* $name:ident => |$x:ident| $body:expr;)*) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl UnaryKernel for $name {
                type A = F32x4;
                type Out = F32x4;

                #[inline]
                fn apply(_rng: &mut RandomStream, a: F32x4) -> F32x4 {
                    a.map(|$x| $body)
                }
            }
        )*
    };
}

macro_rules! float_binary {
    ($($(#[$doc:meta])* $name:ident => |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl BinaryKernel for $name {
                type A = F32x4;
                type B = F32x4;
                type Out = F32x4;

                #[inline]
                fn apply(_rng: &mut RandomStream, a: F32x4, b: F32x4) -> F32x4 {
                    a.zip(b, |$a, $b| $body)
                }
            }
        )*
    };
}

float_unary! {
    /// `1 / x`
    Rcp => |x| 1.0 / x;
    /// `1 / x`, zero unless `|x| > SMALL_NUMBER`
    SafeRcp => |x| if x.abs() > SMALL_NUMBER { 1.0 / x } else { 0.0 };
    /// `1 / sqrt(x)`
    Rsq => |x| 1.0 / x.sqrt();
    /// `1 / sqrt(x)`, zero unless `x > SMALL_NUMBER`
    SafeRsq => |x| if x > SMALL_NUMBER { 1.0 / x.sqrt() } else { 0.0 };
    /// `sqrt(x)`
    Sqrt => |x| x.sqrt();
    /// `sqrt(x)`, zero unless `x > SMALL_NUMBER`
    SafeSqrt => |x| if x > SMALL_NUMBER { x.sqrt() } else { 0.0 };
    /// `-x`
    Neg => |x| -x;
    /// `|x|`
    Abs => |x| x.abs();
    /// `e^x`
    Exp => |x| x.exp();
    /// `2^x`
    Exp2 => |x| x.exp2();
    /// `ln(x)`
    Log => |x| x.ln();
    /// `ln(x)`, zero unless `x > 0`
    SafeLog => |x| if x > 0.0 { x.ln() } else { 0.0 };
    /// `log2(x)`
    Log2 => |x| x.log2();
    /// `sin(x)`
    Sin => |x| x.sin();
    /// `cos(x)`
    Cos => |x| x.cos();
    /// `tan(x)`
    Tan => |x| x.tan();
    /// `asin(x)`
    Asin => |x| x.asin();
    /// `acos(x)`
    Acos => |x| x.acos();
    /// `atan(x)`
    Atan => |x| x.atan();
    /// `ceil(x)`
    Ceil => |x| x.ceil();
    /// `floor(x)`
    Floor => |x| x.floor();
    /// `trunc(x) + trunc((x - trunc(x)) * ALMOST_TWO)`
    Round => |x| {
        let whole = x.trunc();
        whole + ((x - whole) * ALMOST_TWO).trunc()
    };
    /// `x - trunc(x)`
    Frac => |x| x - x.trunc();
    /// `trunc(x)`
    Trunc => |x| x.trunc();
    /// `1` for `x >= 0`, else `-1`
    Sign => |x| if x >= 0.0 { 1.0 } else { -1.0 };
    /// `1` for `x >= 0`, else `0`
    Step => |x| if x >= 0.0 { 1.0 } else { 0.0 };
}

float_binary! {
    /// `a / b`
    Div => |a, b| a / b;
    /// `a / b`, zero unless `|b| > SMALL_NUMBER`
    SafeDiv => |a, b| if b.abs() > SMALL_NUMBER { a / b } else { 0.0 };
    /// `atan2(a, b)`
    Atan2 => |a, b| a.atan2(b);
    /// Remainder of `a / b`, sign of `a`
    Fmod => |a, b| a % b;
    /// `a^b`
    Pow => |a, b| a.powf(b);
    /// `a^b`, zero unless `a > SMALL_NUMBER`
    SafePow => |a, b| if a > SMALL_NUMBER { a.powf(b) } else { 0.0 };
}

/// `a * b + c`
pub struct Mad;

impl TrinaryKernel for Mad {
    type A = F32x4;
    type B = F32x4;
    type C = F32x4;
    type Out = F32x4;

    #[inline]
    fn apply(_rng: &mut RandomStream, a: F32x4, b: F32x4, c: F32x4) -> F32x4 {
        a.mul(b).add(c)
    }
}

/// `a * (1 - t) + b * t`
pub struct Lerp;

impl TrinaryKernel for Lerp {
    type A = F32x4;
    type B = F32x4;
    type C = F32x4;
    type Out = F32x4;

    #[inline]
    fn apply(_rng: &mut RandomStream, a: F32x4, b: F32x4, t: F32x4) -> F32x4 {
        a.mul(F32x4::splat(1.0).sub(t)).add(b.mul(t))
    }
}

/// Uniform `[0, src)`, one draw per lane.
///
/// Padding lanes of a chunk's last block draw too, so how far the stream
/// advances depends on the chunk size.
pub struct Random;

impl UnaryKernel for Random {
    type A = F32x4;
    type Out = F32x4;

    #[inline]
    fn apply(rng: &mut RandomStream, a: F32x4) -> F32x4 {
        a.map(|scale| rng.fraction() * scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;
    use crate::kernels::tests::{as_f32, f32_lanes, run_kernel};

    fn unary(opcode: Opcode, safe: bool, x: [f32; 4]) -> [f32; 4] {
        as_f32(run_kernel(opcode, 0, safe, &[f32_lanes(x)], &[], &[0, 1]))
    }

    fn binary(opcode: Opcode, safe: bool, a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
        as_f32(run_kernel(
            opcode,
            0,
            safe,
            &[f32_lanes(a), f32_lanes(b)],
            &[],
            &[0, 1, 2],
        ))
    }

    #[test]
    fn safe_division_returns_zero_for_tiny_divisors() {
        let out = binary(
            Opcode::Div,
            true,
            [1.0, 1.0, 1.0, 1.0],
            [0.0, 2.0, 0.0, 4.0],
        );
        assert_eq!(out, [0.0, 0.5, 0.0, 0.25]);

        let out = binary(Opcode::Div, true, [1.0; 4], [1.0e-9, -1.0e-9, f32::NAN, -2.0]);
        assert_eq!(out, [0.0, 0.0, 0.0, -0.5]);

        let fast = binary(Opcode::Div, false, [1.0; 4], [0.0, 2.0, 0.0, 4.0]);
        assert!(fast[0].is_infinite());
    }

    #[test]
    fn safe_unary_guards() {
        assert_eq!(
            unary(Opcode::Rcp, true, [0.0, 4.0, -2.0, f32::NAN]),
            [0.0, 0.25, -0.5, 0.0]
        );
        assert_eq!(
            unary(Opcode::Rsq, true, [4.0, 0.0, -1.0, 1.0e-9]),
            [0.5, 0.0, 0.0, 0.0]
        );
        assert_eq!(
            unary(Opcode::Sqrt, true, [9.0, -9.0, 0.0, f32::NAN]),
            [3.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(
            unary(Opcode::Log, true, [1.0, 0.0, -1.0, f32::NAN]),
            [0.0, 0.0, 0.0, 0.0]
        );
        assert!(unary(Opcode::Log, false, [0.0; 4])[0].is_infinite());
    }

    #[test]
    fn safe_pow_guards_the_base() {
        let out = binary(Opcode::Pow, true, [2.0, 0.0, -2.0, 3.0], [3.0, 2.0, 2.0, 2.0]);
        assert_eq!(out, [8.0, 0.0, 0.0, 9.0]);
    }

    #[test]
    fn rounding_family() {
        assert_eq!(
            unary(Opcode::Round, true, [2.5, 2.6, -2.6, -0.4]),
            [2.0, 3.0, -3.0, 0.0]
        );
        assert_eq!(
            unary(Opcode::Frac, true, [1.25, -1.25, 3.0, 0.5]),
            [0.25, -0.25, 0.0, 0.5]
        );
        assert_eq!(
            binary(Opcode::Fmod, true, [5.5, -5.5, 4.0, 1.0], [2.0, 2.0, 2.0, 3.0]),
            [1.5, -1.5, 0.0, 1.0]
        );
    }

    #[test]
    fn sign_and_step_treat_zero_as_positive() {
        assert_eq!(
            unary(Opcode::Sign, true, [3.0, 0.0, -0.5, -7.0]),
            [1.0, 1.0, -1.0, -1.0]
        );
        assert_eq!(
            unary(Opcode::Step, true, [3.0, 0.0, -0.5, -7.0]),
            [1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn lerp_and_mad() {
        let out = run_kernel(
            Opcode::Lerp,
            0,
            true,
            &[
                f32_lanes([0.0; 4]),
                f32_lanes([10.0; 4]),
                f32_lanes([0.0, 0.25, 0.5, 1.0]),
            ],
            &[],
            &[0, 1, 2, 3],
        );
        assert_eq!(as_f32(out), [0.0, 2.5, 5.0, 10.0]);

        let out = run_kernel(
            Opcode::Mad,
            0,
            true,
            &[
                f32_lanes([1.0, 2.0, 3.0, 4.0]),
                f32_lanes([2.0; 4]),
                f32_lanes([1.0; 4]),
            ],
            &[],
            &[0, 1, 2, 3],
        );
        assert_eq!(as_f32(out), [3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn random_draws_a_whole_block_for_a_partial_chunk() {
        use crate::bytecode::{ConstantTable, WordCursor};
        use crate::executor::ChunkContext;
        use crate::kernels::handler_for;
        use crate::lanes::{LANE_WIDTH, LaneBlock};

        let mut ctx = ChunkContext::for_test(2, 1, ConstantTable::default());
        ctx.registers.store(0, 0, LaneBlock(f32_lanes([1.0; 4])));
        let handler = handler_for(Opcode::Random, 0, true).unwrap();
        handler(&mut ctx, &mut WordCursor::new(&[0, 1]));

        let mut expected = RandomStream::default();
        for _ in 0..LANE_WIDTH {
            expected.fraction();
        }
        assert_eq!(ctx.rng, expected);
    }

    #[test]
    fn random_scales_a_unit_fraction() {
        let out = unary(Opcode::Random, true, [10.0, 1.0, 0.0, -4.0]);
        assert!((0.0..10.0).contains(&out[0]));
        assert!((0.0..1.0).contains(&out[1]));
        assert_eq!(out[2], 0.0);
        assert!(out[3] <= 0.0 && out[3] > -4.0);
    }
}
