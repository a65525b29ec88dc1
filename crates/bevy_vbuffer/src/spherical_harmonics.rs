//! L2 spherical harmonics for the ambient term of volumetric lighting.
//!
//! Fog is lit by the sky as well as by punctual lights. The ambient light
//! arriving at a voxel is described by an L2 spherical harmonic probe; the
//! light scattered toward the camera is that probe convolved with the phase
//! function. Since the phase function of each medium is rotationally
//! symmetric about the view direction, the convolution is a per-band scale by
//! the zonal harmonic coefficients of the phase function.
//!
//! Coefficients are ordered by `l * (l + 1) + m`:
//!
//! | index | l | m  | basis function   |
//! |-------|---|----|------------------|
//! | 0     | 0 | 0  | 1                |
//! | 1     | 1 | -1 | y                |
//! | 2     | 1 | 0  | z                |
//! | 3     | 1 | 1  | x                |
//! | 4     | 2 | -2 | xy               |
//! | 5     | 2 | -1 | yz               |
//! | 6     | 2 | 0  | 3z² − 1          |
//! | 7     | 2 | 1  | xz               |
//! | 8     | 2 | 2  | x² − y²          |
//!
//! The basis functions are scaled by the normalization constants below. A
//! probe in *polynomial form* has those constants already folded into its
//! coefficients, so that evaluating it only takes the polynomials.

use std::f32::consts::PI;

use bevy_math::{Vec3, Vec4};
use bevy_reflect::{std_traits::ReflectDefault, Reflect};

/// The number of coefficients per color channel of an L2 probe.
pub const SH_L2_COEFFICIENT_COUNT: usize = 9;

/// The number of `Vec4`s that [`SphericalHarmonicsL2::pack`] produces.
pub const PACKED_SH_L2_VEC4_COUNT: usize = 7;

const SH_C0: f32 = 0.282_095; // 1 / (2 sqrt(π))
const SH_C1: f32 = 0.488_603; // sqrt(3) / (2 sqrt(π))
const SH_C2: f32 = 1.092_548; // sqrt(15) / (2 sqrt(π))
const SH_C3: f32 = 0.315_392; // sqrt(5) / (4 sqrt(π))
const SH_C4: f32 = 0.546_274; // sqrt(15) / (4 sqrt(π))

const SH_NORMALIZATION: [f32; SH_L2_COEFFICIENT_COUNT] = [
    SH_C0, SH_C1, SH_C1, SH_C1, SH_C2, SH_C2, SH_C3, SH_C2, SH_C4,
];

/// An L2 spherical harmonic expansion of an RGB signal on the sphere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Reflect)]
#[reflect(Default)]
pub struct SphericalHarmonicsL2 {
    /// One RGB coefficient per basis function, ordered as in the module
    /// documentation.
    pub coefficients: [Vec3; SH_L2_COEFFICIENT_COUNT],
}

/// The first three zonal harmonic coefficients of a rotationally symmetric
/// function.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ZonalHarmonicsL2 {
    /// One coefficient per band.
    pub coefficients: [f32; 3],
}

fn polynomials(direction: Vec3) -> [f32; SH_L2_COEFFICIENT_COUNT] {
    let Vec3 { x, y, z } = direction;
    [
        1.0,
        y,
        z,
        x,
        x * y,
        y * z,
        3.0 * z * z - 1.0,
        x * z,
        x * x - y * y,
    ]
}

impl ZonalHarmonicsL2 {
    /// Returns the zonal harmonics of the Cornette-Shanks phase function with
    /// the given anisotropy.
    ///
    /// These are fitted, not exact, and are accurate for `g` in `[-1, 1]`.
    pub fn cornette_shanks(anisotropy: f32) -> Self {
        let g = anisotropy;
        let g2 = g * g;
        ZonalHarmonicsL2 {
            coefficients: [
                0.282_095,
                0.293_162 * g * (4.0 + g2) / (2.0 + g2),
                (0.126_157 + 1.441_79 * g2 + 0.324_403 * g2 * g2) / (2.0 + g2),
            ],
        }
    }
}

impl SphericalHarmonicsL2 {
    /// A probe that evaluates to `color` in every direction, in polynomial
    /// form.
    pub fn uniform(color: Vec3) -> Self {
        let mut coefficients = [Vec3::ZERO; SH_L2_COEFFICIENT_COUNT];
        coefficients[0] = color;
        SphericalHarmonicsL2 { coefficients }
    }

    /// Evaluates a probe in the canonical basis.
    pub fn evaluate(&self, direction: Vec3) -> Vec3 {
        polynomials(direction)
            .iter()
            .zip(SH_NORMALIZATION)
            .zip(&self.coefficients)
            .map(|((p, k), c)| *c * (p * k))
            .sum()
    }

    /// Evaluates a probe in polynomial form.
    pub fn evaluate_polynomial(&self, direction: Vec3) -> Vec3 {
        polynomials(direction)
            .iter()
            .zip(&self.coefficients)
            .map(|(p, c)| *c * *p)
            .sum()
    }

    /// Converts a probe from polynomial form into the canonical basis.
    pub fn undo_cosine_rescaling(mut self) -> Self {
        for (coefficient, k) in self.coefficients.iter_mut().zip(SH_NORMALIZATION) {
            *coefficient /= k;
        }
        self
    }

    /// Convolves a probe in the canonical basis with a rotationally symmetric
    /// kernel, by the Funk-Hecke theorem.
    pub fn convolve(mut self, kernel: &ZonalHarmonicsL2) -> Self {
        for l in 0..3 {
            let scale = (4.0 * PI / (2 * l + 1) as f32).sqrt() * kernel.coefficients[l];
            for m in -(l as i32)..=(l as i32) {
                let index = (l as i32 * (l as i32 + 1) + m) as usize;
                self.coefficients[index] *= scale;
            }
        }
        self
    }

    /// Converts a probe from the canonical basis into polynomial form.
    pub fn premultiply_coefficients(mut self) -> Self {
        for (coefficient, k) in self.coefficients.iter_mut().zip(SH_NORMALIZATION) {
            *coefficient *= k;
        }
        self
    }

    /// Packs a probe in polynomial form into the layout the shaders read.
    ///
    /// Entries 0 to 2 hold the constant and linear terms of the red, green,
    /// and blue channels, with the constant part of the `3z² − 1` term folded
    /// into `w`. Entries 3 to 5 hold the remaining quadratic terms of each
    /// channel, and entry 6 holds the `x² − y²` term of all three channels.
    pub fn pack(&self) -> [Vec4; PACKED_SH_L2_VEC4_COUNT] {
        let sh = &self.coefficients;
        let mut packed = [Vec4::ZERO; PACKED_SH_L2_VEC4_COUNT];
        for channel in 0..3 {
            packed[channel] = Vec4::new(
                sh[3][channel],
                sh[1][channel],
                sh[2][channel],
                sh[0][channel] - sh[6][channel],
            );
            packed[channel + 3] = Vec4::new(
                sh[4][channel],
                sh[5][channel],
                sh[6][channel] * 3.0,
                sh[7][channel],
            );
        }
        packed[6] = sh[8].extend(1.0);
        packed
    }
}

/// Evaluates packed coefficients the way the lighting shader does.
pub fn evaluate_packed(packed: &[Vec4; PACKED_SH_L2_VEC4_COUNT], direction: Vec3) -> Vec3 {
    let n = direction.extend(1.0);
    let quadratic = Vec4::new(
        direction.x * direction.y,
        direction.y * direction.z,
        direction.z * direction.z,
        direction.z * direction.x,
    );
    let x2_minus_y2 = direction.x * direction.x - direction.y * direction.y;
    Vec3::new(
        packed[0].dot(n) + packed[3].dot(quadratic),
        packed[1].dot(n) + packed[4].dot(quadratic),
        packed[2].dot(n) + packed[5].dot(quadratic),
    ) + packed[6].truncate() * x2_minus_y2
}

/// Turns an ambient probe in polynomial form into the packed coefficients of
/// the light it scatters through a medium with the given anisotropy.
pub fn preconvolve_ambient_probe(
    probe: &SphericalHarmonicsL2,
    anisotropy: f32,
) -> [Vec4; PACKED_SH_L2_VEC4_COUNT] {
    probe
        .undo_cosine_rescaling()
        .convolve(&ZonalHarmonicsL2::cornette_shanks(anisotropy))
        .premultiply_coefficients()
        .pack()
}
