#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![forbid(unsafe_code)]

//! Volumetric fog and lighting for Bevy, computed in a froxel grid (the
//! V-buffer) aligned with each camera's frustum.
//!
//! Add [`VolumetricLightingPlugin`] to an app with Bevy's render plugins, put
//! [`VolumetricFog`] on a 3D camera, and spawn [`DensityVolumeBundle`]s:
//!
//! ```no_run
//! # use bevy::prelude::*;
//! use bevy_volumetrics::prelude::*;
//!
//! fn setup(mut commands: Commands) {
//!     commands.spawn((Camera3dBundle::default(), VolumetricFog::default()));
//!     commands.spawn(DensityVolumeBundle {
//!         density_volume: DensityVolume {
//!             parameters: DensityVolumeParameters::new(Vec3::splat(0.9), 4.0, 0.3),
//!         },
//!         transform: Transform::from_scale(Vec3::splat(10.0)),
//!         ..default()
//!     });
//! }
//!
//! App::new()
//!     .add_plugins((DefaultPlugins, VolumetricLightingPlugin))
//!     .add_systems(Startup, setup)
//!     .run();
//! ```
//!
//! [`vbuffer`] holds the CPU-side math with no GPU dependency: grid sizing,
//! the logarithmic depth distribution, jitter, culling, and the ambient probe
//! convolution.

pub use bevy_vbuffer as vbuffer;
pub use bevy_volumetric_lighting::*;

pub mod prelude {
    //! `use bevy_volumetrics::prelude::*;` to import the common types.

    #[doc(hidden)]
    pub use crate::{
        vbuffer::{DensityVolumeParameters, VolumetricLightingPreset},
        AmbientIrradiance, DensityVolume, DensityVolumeBundle, LightCullingMode,
        VolumetricCameraKind, VolumetricFog, VolumetricLightingController,
        VolumetricLightingPlugin, VolumetricLightingSettings,
    };
}
