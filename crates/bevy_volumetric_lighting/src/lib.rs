#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![forbid(unsafe_code)]

//! Volumetric fog and lighting computed in a frustum-aligned voxel grid, the
//! V-buffer.
//!
//! Every frame, for each camera with [`VolumetricFog`], the [`DensityVolume`]s
//! that overlap its V-buffer are culled and uploaded, the V-buffer is filled
//! with their scattering and extinction coefficients (voxelization), and the
//! light scattered toward the camera is accumulated along each voxel column
//! (lighting integration). Results are reprojected over time for stability.
//!
//! The integrated lighting is published per view as [`ViewVolumetricLighting`]
//! for later shading passes to sample.

use bevy_app::{App, Plugin, PostUpdate};
use bevy_asset::load_internal_asset;
use bevy_color::{Color, ColorToComponents as _, LinearRgba};
use bevy_core_pipeline::core_3d::graph::{Core3d, Node3d};
use bevy_ecs::{
    bundle::Bundle,
    component::Component,
    query::Changed,
    reflect::{ReflectComponent, ReflectResource},
    schedule::{
        common_conditions::not, IntoSystemConfigs as _, IntoSystemSetConfigs as _, SystemSet,
    },
    change_detection::DetectChangesMut as _,
    system::{Query, Res, Resource},
};
use bevy_math::Vec3;
use bevy_reflect::{std_traits::ReflectDefault, Reflect};
use bevy_render::{
    extract_component::{ExtractComponent, ExtractComponentPlugin},
    extract_resource::{ExtractResource, ExtractResourcePlugin},
    render_graph::{RenderGraphApp, RenderLabel, ViewNodeRunner},
    render_resource::Shader,
    ExtractSchedule, Render, RenderApp, RenderSet,
};
use bevy_transform::components::{GlobalTransform, Transform};
use bevy_vbuffer::{
    density_volume::DensityVolumeParameters, preset::VolumetricLightingPreset,
    spherical_harmonics::SphericalHarmonicsL2,
};

pub mod buffers;
pub mod collect;
pub mod node;
pub mod pipelines;

pub use bevy_vbuffer;
pub use buffers::ViewVolumetricLighting;
pub use collect::ViewVisibleVolumes;

use buffers::{
    prepare_vbuffer_textures, prepare_volumetric_lighting_views,
    release_volumetric_lighting_resources, RenderVolumetricLightingViews, VBufferTextures,
    VolumetricLightingFallbackTexture,
};
use collect::{
    collect_view_visible_volumes, extract_density_volumes, upload_visible_volumes,
    ExtractedDensityVolumes,
};
use node::{
    prepare_volumetric_lighting_bind_groups, prepare_volumetric_lighting_uniforms,
    VolumetricLightingNode, VolumetricLightingUniformBuffer,
};
use pipelines::{
    VolumetricLightingBindGroupLayouts, VolumetricLightingPipelineIds,
    LIGHTING_INTEGRATION_SHADER_HANDLE, VBUFFER_TYPES_SHADER_HANDLE, VOXELIZATION_SHADER_HANDLE,
};

/// The label of the render graph node that voxelizes density volumes and
/// integrates lighting.
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub enum NodeVolumetricLighting {
    /// Runs between the prepasses and the main opaque pass of each 3D camera.
    VolumetricLighting,
}

/// Adds V-buffer volumetric lighting to the app.
pub struct VolumetricLightingPlugin;

/// The render world systems of this plugin, gated on
/// [`volumetric_lighting_enabled`].
#[derive(SystemSet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VolumetricLightingSystems {
    /// Per-view V-buffer layout, history, shared textures, and culling.
    Prepare,
    /// Buffer uploads and uniforms.
    PrepareResources,
    /// Bind groups.
    PrepareBindGroups,
}

/// How lights are culled against the V-buffer.
///
/// Each mode selects a different variant of both V-buffer kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
#[reflect(Default)]
pub enum LightCullingMode {
    /// Every voxel tests every light.
    BruteForce,
    /// Voxels only test the lights in their cluster.
    #[default]
    Clustered,
}

/// Global volumetric lighting configuration.
#[derive(Clone, Copy, Debug, Resource, Reflect, ExtractResource)]
#[reflect(Resource, Default)]
pub struct VolumetricLightingSettings {
    /// The V-buffer quality. [`VolumetricLightingPreset::Off`] disables the
    /// whole plugin and releases its GPU resources.
    pub preset: VolumetricLightingPreset,
    /// Selects the kernel variants.
    pub light_culling: LightCullingMode,
    /// Whether the lighting of previous frames is reprojected and blended in.
    ///
    /// Turn this off for offline captures, where every frame should be
    /// computed from scratch.
    pub temporal_reprojection: bool,
    /// Whether density volumes are uploaded relative to the camera position
    /// instead of in world space.
    pub camera_relative_rendering: bool,
}

/// The sky light that illuminates fog, as an L2 spherical harmonic probe in
/// polynomial form (see [`bevy_vbuffer::spherical_harmonics`]).
#[derive(Clone, Copy, Debug, Resource, Reflect, ExtractResource)]
#[reflect(Resource, Default)]
pub struct AmbientIrradiance {
    /// The probe, in linear RGB.
    pub probe: SphericalHarmonicsL2,
}

/// A box of participating medium.
///
/// The box is the unit cube centered on the entity's origin, scaled, rotated,
/// and translated by its [`GlobalTransform`].
#[derive(Clone, Copy, Debug, Default, Component, Reflect)]
#[reflect(Component, Default)]
pub struct DensityVolume {
    /// The optical properties of the medium inside the box.
    pub parameters: DensityVolumeParameters,
}

/// A bundle that adds a [`DensityVolume`] to the scene.
#[derive(Bundle, Clone, Copy, Debug, Default)]
pub struct DensityVolumeBundle {
    /// The medium.
    pub density_volume: DensityVolume,
    /// The position, orientation, and size of the box.
    pub transform: Transform,
    /// Computed from [`Self::transform`].
    pub global_transform: GlobalTransform,
}

/// Enables volumetric lighting on a 3D camera, and describes the fog that
/// fills the whole view.
///
/// The global fog is voxelized into every voxel of the V-buffer, even when no
/// [`DensityVolume`] is visible.
#[derive(Clone, Copy, Debug, Component, Reflect, ExtractComponent)]
#[reflect(Component, Default)]
pub struct VolumetricFog {
    /// Whether the camera renders volumetric lighting. When false, the view
    /// gets a black fallback lighting buffer.
    pub enabled: bool,
    /// The single-scattering albedo of the global fog.
    pub albedo: Color,
    /// The mean free path of the global fog, in world units.
    pub mean_free_path: f32,
    /// The phase function anisotropy of the global fog, in `[-1, 1]`.
    pub anisotropy: f32,
}

/// Controls the extent and slice distribution of a camera's V-buffer.
///
/// Cameras without one use the default.
#[derive(Clone, Copy, Debug, Component, Reflect, ExtractComponent)]
#[reflect(Component, Default)]
pub struct VolumetricLightingController {
    /// The distance from the camera, in world units, at which the V-buffer
    /// ends.
    pub depth_extent: f32,
    /// How evenly slices are distributed in depth, in `[0, 1]`. Lower values
    /// concentrate slices near the camera.
    pub slice_distribution_uniformity: f32,
}

/// What a camera is used for.
///
/// Only [`VolumetricCameraKind::Game`] and [`VolumetricCameraKind::SceneView`]
/// cameras keep a lighting history, and only game cameras reproject it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Component, Reflect, ExtractComponent,
)]
#[reflect(Component, Default)]
pub enum VolumetricCameraKind {
    /// A camera that renders the game.
    #[default]
    Game,
    /// An editor camera.
    SceneView,
    /// A thumbnail or material preview camera.
    Preview,
    /// A camera rendering a reflection probe or planar reflection.
    Reflection,
}

/// The smallest V-buffer depth extent.
pub const MIN_DEPTH_EXTENT: f32 = 0.1;

impl Plugin for VolumetricLightingPlugin {
    fn build(&self, app: &mut App) {
        load_internal_asset!(
            app,
            VBUFFER_TYPES_SHADER_HANDLE,
            "vbuffer_types.wgsl",
            Shader::from_wgsl
        );
        load_internal_asset!(
            app,
            VOXELIZATION_SHADER_HANDLE,
            "voxelization.wgsl",
            Shader::from_wgsl
        );
        load_internal_asset!(
            app,
            LIGHTING_INTEGRATION_SHADER_HANDLE,
            "lighting_integration.wgsl",
            Shader::from_wgsl
        );

        app.register_type::<VolumetricLightingSettings>()
            .register_type::<AmbientIrradiance>()
            .register_type::<DensityVolume>()
            .register_type::<VolumetricFog>()
            .register_type::<VolumetricLightingController>()
            .register_type::<VolumetricCameraKind>()
            .init_resource::<VolumetricLightingSettings>()
            .init_resource::<AmbientIrradiance>()
            .add_plugins((
                ExtractResourcePlugin::<VolumetricLightingSettings>::default(),
                ExtractResourcePlugin::<AmbientIrradiance>::default(),
                ExtractComponentPlugin::<VolumetricFog>::default(),
                ExtractComponentPlugin::<VolumetricLightingController>::default(),
                ExtractComponentPlugin::<VolumetricCameraKind>::default(),
            ))
            .add_systems(PostUpdate, constrain_volumetric_components);

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<ExtractedDensityVolumes>()
            .init_resource::<RenderVolumetricLightingViews>()
            .init_resource::<VBufferTextures>()
            .init_resource::<VolumetricLightingUniformBuffer>()
            .configure_sets(
                Render,
                (
                    VolumetricLightingSystems::Prepare
                        .in_set(RenderSet::Prepare)
                        .run_if(volumetric_lighting_enabled),
                    VolumetricLightingSystems::PrepareResources
                        .in_set(RenderSet::PrepareResources)
                        .run_if(volumetric_lighting_enabled),
                    VolumetricLightingSystems::PrepareBindGroups
                        .in_set(RenderSet::PrepareBindGroups)
                        .run_if(volumetric_lighting_enabled),
                ),
            )
            .add_systems(ExtractSchedule, extract_density_volumes)
            .add_systems(
                Render,
                (
                    (
                        prepare_volumetric_lighting_views,
                        (collect_view_visible_volumes, prepare_vbuffer_textures),
                    )
                        .chain()
                        .in_set(VolumetricLightingSystems::Prepare),
                    (upload_visible_volumes, prepare_volumetric_lighting_uniforms)
                        .in_set(VolumetricLightingSystems::PrepareResources),
                    prepare_volumetric_lighting_bind_groups
                        .in_set(VolumetricLightingSystems::PrepareBindGroups),
                    release_volumetric_lighting_resources
                        .in_set(RenderSet::Prepare)
                        .run_if(not(volumetric_lighting_enabled)),
                ),
            )
            .add_render_graph_node::<ViewNodeRunner<VolumetricLightingNode>>(
                Core3d,
                NodeVolumetricLighting::VolumetricLighting,
            )
            .add_render_graph_edges(
                Core3d,
                (
                    Node3d::EndPrepasses,
                    NodeVolumetricLighting::VolumetricLighting,
                    Node3d::StartMainPass,
                ),
            );
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<VolumetricLightingFallbackTexture>()
            .init_resource::<VolumetricLightingBindGroupLayouts>()
            .init_resource::<VolumetricLightingPipelineIds>();
    }
}

/// A run condition that's true when volumetric lighting is enabled.
///
/// Every render world system of this plugin, except the one that releases its
/// resources, runs only when this holds.
pub fn volumetric_lighting_enabled(settings: Option<Res<VolumetricLightingSettings>>) -> bool {
    settings.is_some_and(|settings| settings.preset.is_enabled())
}

/// Clamps the parameters of changed density volumes, fog, and controllers to
/// their valid ranges.
pub fn constrain_volumetric_components(
    mut density_volumes: Query<&mut DensityVolume, Changed<DensityVolume>>,
    mut fogs: Query<&mut VolumetricFog, Changed<VolumetricFog>>,
    mut controllers: Query<
        &mut VolumetricLightingController,
        Changed<VolumetricLightingController>,
    >,
) {
    for mut density_volume in &mut density_volumes {
        if density_volume
            .bypass_change_detection()
            .parameters
            .constrain()
        {
            density_volume.set_changed();
        }
    }

    for mut fog in &mut fogs {
        if fog.bypass_change_detection().constrain() {
            fog.set_changed();
        }
    }

    for mut controller in &mut controllers {
        if controller.bypass_change_detection().constrain() {
            controller.set_changed();
        }
    }
}

impl VolumetricCameraKind {
    /// Whether the camera keeps a double-buffered lighting history.
    pub fn keeps_history(self) -> bool {
        matches!(self, Self::Game | Self::SceneView)
    }

    /// Whether the camera blends its history into the current frame.
    pub fn reprojects(self) -> bool {
        self == Self::Game
    }
}

impl VolumetricFog {
    /// Clamps every field to its valid range.
    ///
    /// Returns true if anything changed.
    pub fn constrain(&mut self) -> bool {
        let mut parameters = self.parameters();
        if !parameters.constrain() {
            return false;
        }

        if parameters.albedo != linear_rgb(self.albedo) {
            self.albedo = LinearRgba::from_vec3(parameters.albedo).into();
        }
        self.mean_free_path = parameters.mean_free_path;
        self.anisotropy = parameters.anisotropy;
        true
    }

    /// The optical properties of the global fog.
    pub fn parameters(&self) -> DensityVolumeParameters {
        DensityVolumeParameters {
            albedo: linear_rgb(self.albedo),
            mean_free_path: self.mean_free_path,
            anisotropy: self.anisotropy,
        }
    }
}

impl VolumetricLightingController {
    /// Clamps every field to its valid range.
    ///
    /// Returns true if anything changed.
    pub fn constrain(&mut self) -> bool {
        let depth_extent = self.depth_extent.max(MIN_DEPTH_EXTENT);
        let slice_distribution_uniformity = self.slice_distribution_uniformity.clamp(0.0, 1.0);
        let changed = depth_extent != self.depth_extent
            || slice_distribution_uniformity != self.slice_distribution_uniformity;
        self.depth_extent = depth_extent;
        self.slice_distribution_uniformity = slice_distribution_uniformity;
        changed
    }
}

impl AmbientIrradiance {
    /// Ambient light of the same color from every direction.
    pub fn uniform(color: Color, intensity: f32) -> Self {
        Self {
            probe: SphericalHarmonicsL2::uniform(linear_rgb(color) * intensity),
        }
    }
}

impl Default for VolumetricLightingSettings {
    fn default() -> Self {
        Self {
            preset: VolumetricLightingPreset::Normal,
            light_culling: LightCullingMode::Clustered,
            temporal_reprojection: true,
            camera_relative_rendering: false,
        }
    }
}

impl Default for AmbientIrradiance {
    fn default() -> Self {
        // Matches `AmbientLight` defaults.
        Self::uniform(Color::WHITE, 0.1)
    }
}

impl Default for VolumetricFog {
    fn default() -> Self {
        Self {
            enabled: true,
            albedo: Color::WHITE,
            mean_free_path: 100.0,
            anisotropy: 0.0,
        }
    }
}

impl Default for VolumetricLightingController {
    fn default() -> Self {
        Self {
            depth_extent: 64.0,
            slice_distribution_uniformity: 0.75,
        }
    }
}

impl From<VolumetricFog> for DensityVolumeParameters {
    fn from(fog: VolumetricFog) -> Self {
        fog.parameters()
    }
}

fn linear_rgb(color: Color) -> Vec3 {
    LinearRgba::from(color).to_vec3()
}

#[cfg(test)]
mod tests {
    use bevy_ecs::{schedule::Schedule, system::RunSystemOnce as _, world::World};

    use super::*;

    #[test]
    fn constrains_changed_components() {
        let mut world = World::new();
        let volume = world
            .spawn(DensityVolume {
                parameters: DensityVolumeParameters {
                    albedo: Vec3::new(2.0, 0.5, -1.0),
                    mean_free_path: 0.0,
                    anisotropy: 4.0,
                },
            })
            .id();
        let fog = world
            .spawn(VolumetricFog {
                mean_free_path: -3.0,
                anisotropy: -2.0,
                ..VolumetricFog::default()
            })
            .id();
        let controller = world
            .spawn(VolumetricLightingController {
                depth_extent: 0.0,
                slice_distribution_uniformity: 1.5,
            })
            .id();

        let mut schedule = Schedule::default();
        schedule.add_systems(constrain_volumetric_components);
        schedule.run(&mut world);

        let parameters = world.get::<DensityVolume>(volume).unwrap().parameters;
        assert_eq!(parameters.albedo, Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(parameters.mean_free_path, 1.0);
        assert_eq!(parameters.anisotropy, 1.0);

        let fog = world.get::<VolumetricFog>(fog).unwrap();
        assert_eq!(fog.mean_free_path, 1.0);
        assert_eq!(fog.anisotropy, -1.0);
        assert_eq!(linear_rgb(fog.albedo), Vec3::ONE);

        let controller = world.get::<VolumetricLightingController>(controller).unwrap();
        assert_eq!(controller.depth_extent, MIN_DEPTH_EXTENT);
        assert_eq!(controller.slice_distribution_uniformity, 1.0);
    }

    #[test]
    fn valid_components_stay_untouched() {
        let mut fog = VolumetricFog::default();
        assert!(!fog.constrain());
        let mut controller = VolumetricLightingController::default();
        assert!(!controller.constrain());

        let mut fog = VolumetricFog {
            albedo: Color::linear_rgb(1.5, 0.25, 0.25),
            ..VolumetricFog::default()
        };
        assert!(fog.constrain());
        assert_eq!(linear_rgb(fog.albedo), Vec3::new(1.0, 0.25, 0.25));
    }

    #[test]
    fn disabled_by_the_off_preset() {
        let mut world = World::new();
        assert!(!world.run_system_once(volumetric_lighting_enabled));

        world.insert_resource(VolumetricLightingSettings::default());
        assert!(world.run_system_once(volumetric_lighting_enabled));

        world.insert_resource(VolumetricLightingSettings {
            preset: VolumetricLightingPreset::Off,
            ..VolumetricLightingSettings::default()
        });
        assert!(!world.run_system_once(volumetric_lighting_enabled));
    }

    #[test]
    fn only_game_and_editor_cameras_keep_history() {
        assert!(VolumetricCameraKind::Game.keeps_history());
        assert!(VolumetricCameraKind::SceneView.keeps_history());
        assert!(!VolumetricCameraKind::Preview.keeps_history());
        assert!(!VolumetricCameraKind::Reflection.keeps_history());

        assert!(VolumetricCameraKind::Game.reprojects());
        assert!(!VolumetricCameraKind::SceneView.reprojects());
        assert!(!VolumetricCameraKind::Preview.reprojects());
        assert!(!VolumetricCameraKind::Reflection.reprojects());
    }

    #[test]
    fn uniform_ambient_irradiance() {
        let ambient = AmbientIrradiance::uniform(Color::linear_rgb(1.0, 0.5, 0.25), 2.0);
        let radiance = ambient.probe.evaluate_polynomial(Vec3::Y);
        assert!(radiance.abs_diff_eq(Vec3::new(2.0, 1.0, 0.5), 1e-6));
    }
}
