//! Improved Perlin gradient noise.
//!
//! `noise`, `noise2D` and `noise3D` all evaluate the same 3D lattice, with
//! the missing coordinates held at zero. Output lies roughly in [-1, 1] and
//! is exactly zero at integer lattice points.

use crate::kernels::{BinaryKernel, TrinaryKernel, UnaryKernel};
use crate::lanes::{F32x4, LANE_WIDTH, VectorLane};
use crate::rng::RandomStream;

const PERMUTATION: [u8; 256] = [
    151, 160, 137, 91, 90, 15, 131, 13, 201, 95, 96, 53, 194, 233, 7, 225, 140, 36, 103, 30, 69,
    142, 8, 99, 37, 240, 21, 10, 23, 190, 6, 148, 247, 120, 234, 75, 0, 26, 197, 62, 94, 252, 219,
    203, 117, 35, 11, 32, 57, 177, 33, 88, 237, 149, 56, 87, 174, 20, 125, 136, 171, 168, 68, 175,
    74, 165, 71, 134, 139, 48, 27, 166, 77, 146, 158, 231, 83, 111, 229, 122, 60, 211, 133, 230,
    220, 105, 92, 41, 55, 46, 245, 40, 244, 102, 143, 54, 65, 25, 63, 161, 1, 216, 80, 73, 209, 76,
    132, 187, 208, 89, 18, 169, 200, 196, 135, 130, 116, 188, 159, 86, 164, 100, 109, 198, 173,
    186, 3, 64, 52, 217, 226, 250, 124, 123, 5, 202, 38, 147, 118, 126, 255, 82, 85, 212, 207, 206,
    59, 227, 47, 16, 58, 17, 182, 189, 28, 42, 223, 183, 170, 213, 119, 248, 152, 2, 44, 154, 163,
    70, 221, 153, 101, 155, 167, 43, 172, 9, 129, 22, 39, 253, 19, 98, 108, 110, 79, 113, 224, 232,
    178, 185, 112, 104, 218, 246, 97, 228, 251, 34, 242, 193, 238, 210, 144, 12, 191, 179, 162,
    241, 81, 51, 145, 235, 249, 14, 239, 107, 49, 192, 214, 31, 181, 199, 106, 157, 184, 84, 204,
    176, 115, 121, 50, 45, 127, 4, 150, 254, 138, 236, 205, 93, 222, 114, 67, 29, 24, 72, 243, 141,
    128, 195, 78, 66, 215, 61, 156, 180,
];

/// The permutation repeated twice, so lattice hashes never need wrapping.
static P: [u8; 512] = {
    let mut table = [0u8; 512];
    let mut i = 0;
    while i < 512 {
        table[i] = PERMUTATION[i % 256];
        i += 1;
    }
    table
};

#[inline]
fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + t * (b - a)
}

#[inline]
fn grad(hash: u8, x: f32, y: f32, z: f32) -> f32 {
    let hash = hash & 15;
    let u = if hash < 8 { x } else { y };
    let v = if hash < 4 {
        y
    } else if hash == 12 || hash == 14 {
        x
    } else {
        z
    };
    (if hash & 1 == 0 { u } else { -u }) + (if hash & 2 == 0 { v } else { -v })
}

/// Scalar improved Perlin noise at `(x, y, z)`.
pub fn perlin3(x: f32, y: f32, z: f32) -> f32 {
    let (xf, yf, zf) = (x.floor(), y.floor(), z.floor());
    let xi = (xf as i32 & 255) as usize;
    let yi = (yf as i32 & 255) as usize;
    let zi = (zf as i32 & 255) as usize;
    let (x, y, z) = (x - xf, y - yf, z - zf);
    let (x1, y1, z1) = (x - 1.0, y - 1.0, z - 1.0);

    let a = P[xi] as usize + yi;
    let aa = P[a] as usize + zi;
    let ab = P[a + 1] as usize + zi;
    let b = P[xi + 1] as usize + yi;
    let ba = P[b] as usize + zi;
    let bb = P[b + 1] as usize + zi;

    let (u, v, w) = (fade(x), fade(y), fade(z));

    lerp(
        w,
        lerp(
            v,
            lerp(u, grad(P[aa], x, y, z), grad(P[ba], x1, y, z)),
            lerp(u, grad(P[ab], x, y1, z), grad(P[bb], x1, y1, z)),
        ),
        lerp(
            v,
            lerp(u, grad(P[aa + 1], x, y, z1), grad(P[ba + 1], x1, y, z1)),
            lerp(u, grad(P[ab + 1], x, y1, z1), grad(P[bb + 1], x1, y1, z1)),
        ),
    )
}

/// `perlin3(x, 0, 0)`
pub struct Noise1D;

impl UnaryKernel for Noise1D {
    type A = F32x4;
    type Out = F32x4;

    #[inline]
    fn apply(_rng: &mut RandomStream, x: F32x4) -> F32x4 {
        x.map(|x| perlin3(x, 0.0, 0.0))
    }
}

/// `perlin3(x, y, 0)`
pub struct Noise2D;

impl BinaryKernel for Noise2D {
    type A = F32x4;
    type B = F32x4;
    type Out = F32x4;

    #[inline]
    fn apply(_rng: &mut RandomStream, x: F32x4, y: F32x4) -> F32x4 {
        x.zip(y, |x, y| perlin3(x, y, 0.0))
    }
}

/// `perlin3(x, y, z)`
pub struct Noise3D;

impl TrinaryKernel for Noise3D {
    type A = F32x4;
    type B = F32x4;
    type C = F32x4;
    type Out = F32x4;

    #[inline]
    fn apply(_rng: &mut RandomStream, x: F32x4, y: F32x4, z: F32x4) -> F32x4 {
        F32x4(std::array::from_fn::<_, LANE_WIDTH, _>(|lane| {
            perlin3(x.0[lane], y.0[lane], z.0[lane])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;
    use crate::kernels::tests::{as_f32, f32_lanes, run_kernel};

    #[test]
    fn noise_vanishes_on_lattice_points() {
        for &(x, y, z) in &[(0.0, 0.0, 0.0), (1.0, 2.0, 3.0), (-4.0, 7.0, -1.0)] {
            assert_eq!(perlin3(x, y, z), 0.0);
        }
    }

    #[test]
    fn noise_is_bounded_and_continuous() {
        let mut previous = perlin3(0.0, 0.5, 0.25);
        for step in 1..2000 {
            let x = step as f32 * 0.01;
            let value = perlin3(x, 0.5, 0.25);
            assert!(value.abs() <= 1.5, "{value} at {x}");
            assert!((value - previous).abs() < 0.1, "jump at {x}");
            previous = value;
        }
    }

    #[test]
    fn lower_dimensions_hold_missing_axes_at_zero() {
        let xs = [0.3, 1.7, -2.2, 5.5];
        let one_d = as_f32(run_kernel(Opcode::Noise, 0, true, &[f32_lanes(xs)], &[], &[0, 1]));
        let two_d = as_f32(run_kernel(
            Opcode::Noise2D,
            0,
            true,
            &[f32_lanes(xs), f32_lanes([0.0; 4])],
            &[],
            &[0, 1, 2],
        ));
        for lane in 0..4 {
            assert_eq!(one_d[lane], perlin3(xs[lane], 0.0, 0.0));
            assert_eq!(two_d[lane], one_d[lane]);
        }
    }
}
