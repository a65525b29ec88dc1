//! Quality presets for the V-buffer.

use std::{fmt, str::FromStr};

use bevy_reflect::{std_traits::ReflectDefault, Reflect};
use thiserror::Error;

/// Controls the resolution of the V-buffer, and whether volumetric lighting
/// runs at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
#[reflect(Default)]
pub enum VolumetricLightingPreset {
    /// Volumetric lighting is disabled. Every entry point becomes a no-op.
    Off,
    /// 8×8 pixel tiles with 64 depth slices.
    #[default]
    Normal,
    /// 4×4 pixel tiles with 128 depth slices.
    Ultra,
}

/// An error returned when parsing a [`VolumetricLightingPreset`] from a
/// string fails.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown volumetric lighting preset `{0}` (expected `off`, `normal`, or `ultra`)")]
pub struct ParsePresetError(pub String);

impl VolumetricLightingPreset {
    /// Returns true if this preset enables volumetric lighting.
    #[inline]
    pub fn is_enabled(self) -> bool {
        self != VolumetricLightingPreset::Off
    }

    /// The width and height, in pixels, of the screen-space tile that each
    /// voxel column covers.
    #[inline]
    pub fn tile_size(self) -> u32 {
        match self {
            VolumetricLightingPreset::Off => 0,
            VolumetricLightingPreset::Normal => 8,
            VolumetricLightingPreset::Ultra => 4,
        }
    }

    /// The number of depth slices in the V-buffer.
    #[inline]
    pub fn slice_count(self) -> u32 {
        match self {
            VolumetricLightingPreset::Off => 0,
            VolumetricLightingPreset::Normal => 64,
            VolumetricLightingPreset::Ultra => 128,
        }
    }
}

impl FromStr for VolumetricLightingPreset {
    type Err = ParsePresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(VolumetricLightingPreset::Off),
            "normal" => Ok(VolumetricLightingPreset::Normal),
            "ultra" => Ok(VolumetricLightingPreset::Ultra),
            _ => Err(ParsePresetError(s.to_owned())),
        }
    }
}

impl fmt::Display for VolumetricLightingPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VolumetricLightingPreset::Off => "off",
            VolumetricLightingPreset::Normal => "normal",
            VolumetricLightingPreset::Ultra => "ultra",
        })
    }
}
