#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![forbid(unsafe_code)]

//! The CPU side of volumetric lighting: sizing of the V-buffer, its
//! logarithmic depth distribution, temporal bookkeeping, and the culling and
//! packing of density volumes.
//!
//! The V-buffer is a 3D grid of voxels (froxels) aligned with a view frustum.
//! Density volumes are voxelized into it, and light is then integrated along
//! the view rays through it. Nothing in this crate touches the GPU; see
//! `bevy_volumetric_lighting` for the render-world plugin built on top of it.

pub mod bounds;
pub mod density_volume;
pub mod history;
pub mod jitter;
pub mod phase;
pub mod preset;
pub mod spherical_harmonics;
pub mod units;
pub mod vbuffer;
pub mod view;
pub mod visible_volumes;

pub use bounds::{Frustum, OrientedBoundingBox};
pub use density_volume::{DensityVolumeData, DensityVolumeParameters, MIN_MEAN_FREE_PATH};
pub use history::{HistorySlots, VBufferHistory};
pub use jitter::{jitter_offset, JitterSequence, JITTER_SEQUENCE_LENGTH};
pub use preset::{ParsePresetError, VolumetricLightingPreset};
pub use spherical_harmonics::{SphericalHarmonicsL2, ZonalHarmonicsL2};
pub use vbuffer::{
    compute_resolution_and_scale, VBufferParameters, VBufferResolution, VBUFFER_WORKGROUP_SIZE,
};
pub use visible_volumes::{collect_visible_volumes, VisibleVolumeList, MAX_VISIBLE_VOLUMES};
