//! Conversions between float, integer and mask lanes, plus `select`.

use crate::kernels::{TrinaryKernel, UnaryKernel};
use crate::lanes::{F32x4, I32x4, LaneBlock, LaneMask, VectorLane};
use crate::rng::RandomStream;

macro_rules! conversion {
    ($($(#[$doc:meta])* $name:ident: $from:ty => $to:ty, |$x:ident| $body:expr;)*) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl UnaryKernel for $name {
                type A = $from;
                type Out = $to;

                #[inline]
                fn apply(_rng: &mut RandomStream, $x: $from) -> $to {
                    $body
                }
            }
        )*
    };
}

conversion! {
    /// Float to int, truncating toward zero (saturating, NaN to 0).
    F2I: F32x4 => I32x4, |x| I32x4(x.0.map(|value| value as i32));
    /// Int to float.
    I2F: I32x4 => F32x4, |x| F32x4(x.0.map(|value| value as f32));
    /// Mask of `x > 0`.
    F2B: F32x4 => LaneMask, |x| x.cmp_gt(F32x4::splat(0.0));
    /// `1.0` where the mask is set, else `0.0`.
    B2F: LaneMask => F32x4, |x| F32x4::select(x, F32x4::splat(1.0), F32x4::splat(0.0));
    /// Mask of `x > 0`.
    I2B: I32x4 => LaneMask, |x| x.cmp_gt(I32x4::splat(0));
    /// `1` where the mask is set, else `0`.
    B2I: LaneMask => I32x4, |x| I32x4::select(x, I32x4::splat(1), I32x4::splat(0));
}

/// Bitwise blend: `mask ? a : b`.
pub struct Select;

impl TrinaryKernel for Select {
    type A = LaneMask;
    type B = LaneBlock;
    type C = LaneBlock;
    type Out = LaneBlock;

    #[inline]
    fn apply(_rng: &mut RandomStream, mask: LaneMask, a: LaneBlock, b: LaneBlock) -> LaneBlock {
        LaneBlock(std::array::from_fn(|lane| {
            (mask.0[lane] & a.0[lane]) | (!mask.0[lane] & b.0[lane])
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::Opcode;
    use crate::kernels::tests::{as_f32, as_i32, f32_lanes, i32_lanes, run_kernel};

    fn unary(opcode: Opcode, x: [u32; 4]) -> [u32; 4] {
        run_kernel(opcode, 0, true, &[x], &[], &[0, 1])
    }

    const TRUE: u32 = u32::MAX;

    #[test]
    fn float_int_conversions_truncate() {
        assert_eq!(
            as_i32(unary(Opcode::F2I, f32_lanes([1.9, -1.9, f32::NAN, 3e10]))),
            [1, -1, 0, i32::MAX]
        );
        assert_eq!(
            as_f32(unary(Opcode::I2F, i32_lanes([1, -2, 0, 7]))),
            [1.0, -2.0, 0.0, 7.0]
        );
    }

    #[test]
    fn bool_conversions_use_strictly_positive() {
        assert_eq!(
            unary(Opcode::F2B, f32_lanes([0.5, 0.0, -0.5, f32::NAN])),
            [TRUE, 0, 0, 0]
        );
        assert_eq!(unary(Opcode::I2B, i32_lanes([2, 0, -2, 1])), [TRUE, 0, 0, TRUE]);
        assert_eq!(
            as_f32(unary(Opcode::B2F, [TRUE, 0, TRUE, 0])),
            [1.0, 0.0, 1.0, 0.0]
        );
        assert_eq!(as_i32(unary(Opcode::B2I, [0, TRUE, 0, TRUE])), [0, 1, 0, 1]);
    }

    #[test]
    fn select_blends_whole_lanes_for_full_masks() {
        let out = run_kernel(
            Opcode::Select,
            0,
            true,
            &[
                [TRUE, 0, TRUE, 0],
                f32_lanes([1.0, 2.0, 3.0, 4.0]),
                f32_lanes([-1.0, -2.0, -3.0, -4.0]),
            ],
            &[],
            &[0, 1, 2, 3],
        );
        assert_eq!(as_f32(out), [1.0, -2.0, 3.0, -4.0]);
    }
}
