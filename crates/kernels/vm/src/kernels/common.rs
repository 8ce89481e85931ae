//! Kernels shared by the float and integer opcode families.
//!
//! Each is generic over [`VectorLane`] and instantiated once with
//! [`F32x4`](crate::lanes::F32x4) and once with [`I32x4`](crate::lanes::I32x4).

use std::marker::PhantomData;

use crate::kernels::{BinaryKernel, TrinaryKernel};
use crate::lanes::{LaneMask, VectorLane};
use crate::rng::RandomStream;

macro_rules! lane_binary {
    ($($(#[$doc:meta])* $name:ident => $method:ident;)*) => {
        $(
            $(#[$doc])*
            pub struct $name<V>(PhantomData<V>);

            impl<V: VectorLane> BinaryKernel for $name<V> {
                type A = V;
                type B = V;
                type Out = V;

                #[inline]
                fn apply(_rng: &mut RandomStream, a: V, b: V) -> V {
                    a.$method(b)
                }
            }
        )*
    };
}

lane_binary! {
    /// `a + b`
    Add => add;
    /// `a - b`
    Sub => sub;
    /// `a * b`
    Mul => mul;
    /// `min(a, b)`
    Min => min;
    /// `max(a, b)`
    Max => max;
}

/// `min(max(a, lo), hi)`
pub struct Clamp<V>(PhantomData<V>);

impl<V: VectorLane> TrinaryKernel for Clamp<V> {
    type A = V;
    type B = V;
    type C = V;
    type Out = V;

    #[inline]
    fn apply(_rng: &mut RandomStream, a: V, lo: V, hi: V) -> V {
        a.max(lo).min(hi)
    }
}

/// Comparison producing a lane mask.
pub trait Predicate {
    /// Compare two lane values.
    fn test<V: VectorLane>(a: V, b: V) -> LaneMask;
}

macro_rules! predicates {
    ($($name:ident => $method:ident;)*) => {
        $(
            #[doc = concat!("`", stringify!($method), "`")]
            pub struct $name;

            impl Predicate for $name {
                #[inline]
                fn test<V: VectorLane>(a: V, b: V) -> LaneMask {
                    a.$method(b)
                }
            }
        )*
    };
}

predicates! {
    Less => cmp_lt;
    LessEq => cmp_le;
    Greater => cmp_gt;
    GreaterEq => cmp_ge;
    Equal => cmp_eq;
    NotEqual => cmp_neq;
}

/// Lane-wise comparison.
pub struct Compare<V, P>(PhantomData<(V, P)>);

impl<V: VectorLane, P: Predicate> BinaryKernel for Compare<V, P> {
    type A = V;
    type B = V;
    type Out = LaneMask;

    #[inline]
    fn apply(_rng: &mut RandomStream, a: V, b: V) -> LaneMask {
        P::test(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;
    use crate::kernels::tests::{as_f32, as_i32, f32_lanes, i32_lanes, run_kernel};

    #[test]
    fn clamp_bounds_both_sides() {
        let out = run_kernel(
            Opcode::Clamp,
            0,
            true,
            &[
                f32_lanes([-5.0, 0.5, 2.0, 9.0]),
                f32_lanes([0.0; 4]),
                f32_lanes([1.0; 4]),
            ],
            &[],
            &[0, 1, 2, 3],
        );
        assert_eq!(as_f32(out), [0.0, 0.5, 1.0, 1.0]);

        let out = run_kernel(
            Opcode::ClampI,
            0,
            true,
            &[i32_lanes([-5, 3, 7, 12]), i32_lanes([0; 4]), i32_lanes([10; 4])],
            &[],
            &[0, 1, 2, 3],
        );
        assert_eq!(as_i32(out), [0, 3, 7, 10]);
    }

    #[test]
    fn comparisons_produce_full_masks() {
        let out = run_kernel(
            Opcode::CmpLe,
            0,
            true,
            &[f32_lanes([1.0, 2.0, 3.0, f32::NAN]), f32_lanes([2.0; 4])],
            &[],
            &[0, 1, 2],
        );
        assert_eq!(out, [u32::MAX, u32::MAX, 0, 0]);

        let out = run_kernel(
            Opcode::CmpNeqI,
            0,
            true,
            &[i32_lanes([1, 2, 3, 4]), i32_lanes([1, 0, 3, 0])],
            &[],
            &[0, 1, 2],
        );
        assert_eq!(out, [0, u32::MAX, 0, u32::MAX]);
    }

    #[test]
    fn integer_family_wraps() {
        let out = run_kernel(
            Opcode::MulI,
            0,
            true,
            &[i32_lanes([i32::MAX, 3, -4, 0]), i32_lanes([2, 3, 5, 9])],
            &[],
            &[0, 1, 2],
        );
        assert_eq!(as_i32(out), [-2, 9, -20, 0]);
    }
}
