//! Physical parameters of a participating medium and their GPU form.

use bevy_math::Vec3;
use bevy_reflect::{std_traits::ReflectDefault, Reflect};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::units;

/// The smallest mean free path, in world units, that a medium may have.
pub const MIN_MEAN_FREE_PATH: f32 = 1.0;

/// The user-facing description of a homogeneous participating medium.
///
/// These values are what artists author. They're converted into
/// [`DensityVolumeData`] before being handed to the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
#[reflect(Default)]
pub struct DensityVolumeParameters {
    /// The single-scattering albedo, the fraction of light that is scattered
    /// (rather than absorbed) at each interaction.
    ///
    /// Each channel lies in `[0, 1]`.
    pub albedo: Vec3,

    /// The average distance, in world units, that light travels through the
    /// medium before interacting with it.
    ///
    /// Must be at least [`MIN_MEAN_FREE_PATH`]. Larger values produce thinner
    /// fog.
    pub mean_free_path: f32,

    /// The anisotropy of the phase function, in `[-1, 1]`.
    ///
    /// Negative values scatter light backward, toward the light source;
    /// positive values scatter it forward. Zero is isotropic.
    pub anisotropy: f32,
}

/// The GPU form of [`DensityVolumeParameters`].
///
/// This matches the `DensityVolumeData` struct in the voxelization shader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DensityVolumeData {
    /// The per-channel scattering coefficient.
    pub scattering: Vec3,
    /// The extinction coefficient, the reciprocal of the mean free path.
    pub extinction: f32,
}

const_assert_eq!(std::mem::size_of::<DensityVolumeData>(), 16);

impl DensityVolumeParameters {
    /// Creates a new set of parameters, clamped to their valid ranges.
    pub fn new(albedo: Vec3, mean_free_path: f32, anisotropy: f32) -> Self {
        let mut parameters = Self {
            albedo,
            mean_free_path,
            anisotropy,
        };
        parameters.constrain();
        parameters
    }

    /// Clamps every field to its valid range.
    ///
    /// Returns true if anything changed.
    pub fn constrain(&mut self) -> bool {
        let constrained = Self {
            albedo: self.albedo.clamp(Vec3::ZERO, Vec3::ONE),
            mean_free_path: self.mean_free_path.max(MIN_MEAN_FREE_PATH),
            anisotropy: self.anisotropy.clamp(-1.0, 1.0),
        };
        let changed = constrained != *self;
        *self = constrained;
        changed
    }

    /// Returns the extinction coefficient of this medium.
    #[inline]
    pub fn extinction(&self) -> f32 {
        units::extinction_from_mean_free_path(self.mean_free_path)
    }

    /// Converts these parameters into the scattering and extinction
    /// coefficients the shaders consume.
    pub fn to_data(&self) -> DensityVolumeData {
        let extinction = self.extinction();
        DensityVolumeData {
            scattering: units::scattering_from_extinction_and_albedo(extinction, self.albedo),
            extinction,
        }
    }
}

impl Default for DensityVolumeParameters {
    fn default() -> Self {
        Self {
            albedo: Vec3::ONE,
            mean_free_path: 10.0,
            anisotropy: 0.0,
        }
    }
}

impl From<DensityVolumeParameters> for DensityVolumeData {
    fn from(parameters: DensityVolumeParameters) -> Self {
        parameters.to_data()
    }
}
