//! Per-view V-buffer state and the textures the V-buffer passes write.
//!
//! Each view with [`VolumetricFog`] gets an entry in
//! [`RenderVolumetricLightingViews`] the first frame it's seen. The entry
//! lives until the view disappears, disables its fog, or the whole feature is
//! turned off.

use bevy_core::FrameCount;
use bevy_derive::{Deref, DerefMut};
use bevy_ecs::{
    component::Component,
    entity::{Entity, EntityHashMap},
    query::With,
    system::{Commands, Query, Res, ResMut, Resource},
    world::{FromWorld, World},
};
use bevy_math::{Mat4, UVec3, Vec3, Vec4};
use bevy_render::{
    render_resource::{
        BufferUsages, Extent3d, RawBufferVec, TextureDataOrder, TextureDescriptor,
        TextureDimension, TextureUsages, TextureView,
    },
    renderer::{RenderDevice, RenderQueue},
    texture::CachedTexture,
    view::ExtractedView,
};
use bevy_utils::{prelude::default, tracing::debug, warn_once};
use bevy_vbuffer::{
    bounds::{Frustum, OrientedBoundingBox},
    density_volume::{DensityVolumeData, DensityVolumeParameters},
    history::{HistorySlots, VBufferHistory, VBUFFER_HISTORY_LENGTH},
    jitter::jitter_offset,
    vbuffer::{compute_resolution_and_scale, VBufferParameters, VBufferResolution},
    view::{is_perspective, near_plane_distance, vbuffer_frustum, voxel_to_world_ray_matrix},
    visible_volumes::VisibleVolumeList,
};
use smallvec::SmallVec;

use crate::{
    pipelines::{VolumetricLightingPipelineKey, VBUFFER_TEXTURE_FORMAT},
    VolumetricCameraKind, VolumetricFog, VolumetricLightingController,
    VolumetricLightingSettings,
};

/// The V-buffer layout and camera geometry of a view for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct ViewVBuffer {
    /// The grid size.
    pub resolution: VBufferResolution,
    /// The layout constants shared with the shaders.
    pub parameters: VBufferParameters,
    /// View depth of the near plane, where the first slice starts.
    pub near: f32,
    /// View depth where the last slice ends.
    pub depth_extent: f32,
    /// The view projection matrix.
    pub clip_from_world: Mat4,
    /// See [`voxel_to_world_ray_matrix`].
    pub voxel_to_world_ray: Mat4,
    /// The camera position.
    pub world_position: Vec3,
    /// Subtracted from world positions before they're uploaded. The camera
    /// position with camera-relative rendering, zero otherwise.
    pub volume_origin: Vec3,
    /// The region covered by the V-buffer, relative to `volume_origin`.
    pub frustum: Frustum,
    /// The global fog of the view.
    pub fog: DensityVolumeParameters,
}

// Indexed by `HistorySlots`.
struct LightingHistoryTextures {
    extent: UVec3,
    textures: [CachedTexture; VBUFFER_HISTORY_LENGTH],
}

/// Everything the V-buffer passes keep for a single view across frames.
pub struct VolumetricLightingViewResources {
    vbuffer: ViewVBuffer,
    history: VBufferHistory,
    previous_clip_from_world: Mat4,
    history_textures: Option<LightingHistoryTextures>,
    follows_previous_frame: bool,
    history_valid: bool,
    key: VolumetricLightingPipelineKey,
    slots: HistorySlots,
    jitter: Vec4,
    pub(crate) visible_volumes: VisibleVolumeList,
    pub(crate) volume_bounds: RawBufferVec<OrientedBoundingBox>,
    pub(crate) volume_data: RawBufferVec<DensityVolumeData>,
}

/// The V-buffer state of every view that renders volumetric lighting.
#[derive(Resource, Default, Deref, DerefMut)]
pub struct RenderVolumetricLightingViews(EntityHashMap<VolumetricLightingViewResources>);

/// The density and lighting V-buffers.
///
/// One pair of textures is shared by all views and sized to fit the largest
/// of their grids. Views are rendered one after another, so each view's passes
/// have the textures to themselves.
#[derive(Resource, Default)]
pub struct VBufferTextures {
    allocation: Option<VBufferTextureAllocation>,
}

struct VBufferTextureAllocation {
    extent: UVec3,
    density: CachedTexture,
    lighting: CachedTexture,
}

/// A black 1×1×1 lighting buffer, for views that don't render volumetric
/// lighting.
#[derive(Resource)]
pub struct VolumetricLightingFallbackTexture(CachedTexture);

/// The integrated volumetric lighting of a view, for later passes to sample.
#[derive(Component, Clone)]
pub struct ViewVolumetricLighting {
    /// A 3D texture holding in-scattered light in RGB and transmittance in
    /// alpha, accumulated from the camera to the back of each voxel.
    pub lighting: TextureView,
    /// The layout of [`Self::lighting`].
    ///
    /// All zero for the fallback texture.
    pub parameters: VBufferParameters,
}

impl VolumetricLightingViewResources {
    pub(crate) fn new(vbuffer: ViewVBuffer) -> Self {
        Self {
            vbuffer,
            history: VBufferHistory::new(vbuffer.parameters),
            previous_clip_from_world: vbuffer.clip_from_world,
            history_textures: None,
            follows_previous_frame: false,
            history_valid: false,
            key: VolumetricLightingPipelineKey::empty(),
            slots: HistorySlots::for_frame(0),
            jitter: Vec4::ZERO,
            visible_volumes: VisibleVolumeList::new(),
            volume_bounds: RawBufferVec::new(BufferUsages::STORAGE),
            volume_data: RawBufferVec::new(BufferUsages::STORAGE),
        }
    }

    /// Moves this frame's state into the history and records the new frame.
    pub(crate) fn begin_frame(&mut self, frame_index: u32, vbuffer: ViewVBuffer) {
        // A new view has no history, so the previous frame is the current one.
        self.previous_clip_from_world = if self.history.last_frame().is_some() {
            self.vbuffer.clip_from_world
        } else {
            vbuffer.clip_from_world
        };
        self.follows_previous_frame =
            self.history.last_frame() == Some(frame_index.wrapping_sub(1));
        self.history.update(frame_index, vbuffer.parameters);
        self.vbuffer = vbuffer;
        self.slots = HistorySlots::for_frame(frame_index);
    }

    /// Makes sure the view has a lighting history of the right size if it
    /// wants one, and drops it otherwise.
    ///
    /// Returns true if the history texture written last frame can be read this
    /// frame.
    fn prepare_history_textures(
        &mut self,
        render_device: &RenderDevice,
        view_entity: Entity,
        wants_history: bool,
    ) -> bool {
        if !wants_history {
            self.history_textures = None;
            return false;
        }

        let extent = self.vbuffer.resolution.extent();
        if let Some(ref history_textures) = self.history_textures {
            if history_textures.extent == extent {
                return true;
            }
        }

        debug!(
            "Allocating {}×{}×{} volumetric lighting history for view {:?}",
            extent.x, extent.y, extent.z, view_entity
        );
        self.history_textures = Some(LightingHistoryTextures {
            extent,
            textures: [
                create_vbuffer_texture(render_device, "volumetric lighting history 0", extent),
                create_vbuffer_texture(render_device, "volumetric lighting history 1", extent),
            ],
        });
        false
    }

    /// Picks the pipeline variants and the jitter for this frame.
    ///
    /// `history_kept` is the result of [`Self::prepare_history_textures`].
    pub(crate) fn configure_frame(
        &mut self,
        settings: &VolumetricLightingSettings,
        camera_kind: VolumetricCameraKind,
        frame_index: u32,
        history_kept: bool,
    ) {
        debug_assert_eq!(self.history.last_frame(), Some(frame_index));

        let reprojection = settings.temporal_reprojection
            && camera_kind.reprojects()
            && self.history_textures.is_some();

        // The history written last frame is only meaningful if last frame
        // reprojected into the same textures.
        self.history_valid = reprojection
            && history_kept
            && self.follows_previous_frame
            && self.key.contains(VolumetricLightingPipelineKey::REPROJECTION);

        self.key = VolumetricLightingPipelineKey::new(settings.light_culling, reprojection);

        // Without reprojection there's nothing to accumulate jittered samples
        // into, so always sample voxel centers.
        self.jitter = if reprojection {
            jitter_offset(frame_index)
        } else {
            jitter_offset(0).with_w(frame_index as f32)
        };
    }

    /// This frame's V-buffer layout and camera geometry.
    pub fn vbuffer(&self) -> &ViewVBuffer {
        &self.vbuffer
    }

    /// The layouts of this frame's and last frame's V-buffers.
    pub fn history(&self) -> &VBufferHistory {
        &self.history
    }

    /// Last frame's view projection matrix, for reprojection.
    pub fn previous_clip_from_world(&self) -> Mat4 {
        self.previous_clip_from_world
    }

    /// The pipeline variants to dispatch this frame.
    pub fn key(&self) -> VolumetricLightingPipelineKey {
        self.key
    }

    /// `(x, y, z, frame_index)`, the sub-voxel offset at which this frame
    /// samples the V-buffer.
    pub fn jitter(&self) -> Vec4 {
        self.jitter
    }

    /// Whether the lighting history written last frame may be blended in.
    pub fn history_valid(&self) -> bool {
        self.history_valid
    }

    /// The number of density volumes uploaded for this frame.
    pub fn visible_volume_count(&self) -> u32 {
        self.visible_volumes.len() as u32
    }

    /// Returns the history texture to read and the one to write this frame,
    /// if the view keeps a history.
    pub fn history_texture_views(&self) -> Option<(&TextureView, &TextureView)> {
        let history_textures = self.history_textures.as_ref()?;
        Some((
            &history_textures.textures[self.slots.previous].default_view,
            &history_textures.textures[self.slots.current].default_view,
        ))
    }
}

impl VBufferTextures {
    /// Makes sure the textures are exactly `extent` voxels large.
    pub fn prepare(&mut self, render_device: &RenderDevice, extent: UVec3) {
        if self
            .allocation
            .as_ref()
            .is_some_and(|allocation| allocation.extent == extent)
        {
            return;
        }

        debug!(
            "Allocating {}×{}×{} volumetric lighting V-buffers",
            extent.x, extent.y, extent.z
        );
        self.allocation = Some(VBufferTextureAllocation {
            extent,
            density: create_vbuffer_texture(render_device, "density V-buffer", extent),
            lighting: create_vbuffer_texture(render_device, "lighting V-buffer", extent),
        });
    }

    /// Frees the textures.
    pub fn release(&mut self) {
        if self.allocation.take().is_some() {
            debug!("Releasing volumetric lighting V-buffers");
        }
    }

    /// The size of the textures, if they exist.
    pub fn extent(&self) -> Option<UVec3> {
        self.allocation.as_ref().map(|allocation| allocation.extent)
    }

    /// The voxelized scattering and extinction coefficients.
    pub fn density(&self) -> Option<&TextureView> {
        self.allocation
            .as_ref()
            .map(|allocation| &allocation.density.default_view)
    }

    /// The integrated lighting.
    pub fn lighting(&self) -> Option<&TextureView> {
        self.allocation
            .as_ref()
            .map(|allocation| &allocation.lighting.default_view)
    }
}

impl FromWorld for VolumetricLightingFallbackTexture {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        let render_queue = world.resource::<RenderQueue>();

        // Zero in-scattering, and zero for half-float transmittance as well:
        // sampling code treats the fallback as "no lighting".
        let texels = [0u16; 4];
        let texture = render_device.create_texture_with_data(
            render_queue,
            &TextureDescriptor {
                label: Some("volumetric lighting fallback texture"),
                size: Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D3,
                format: VBUFFER_TEXTURE_FORMAT,
                usage: TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            TextureDataOrder::default(),
            bytemuck::cast_slice(&texels),
        );
        let default_view = texture.create_view(&default());

        Self(CachedTexture {
            texture,
            default_view,
        })
    }
}

impl ViewVolumetricLighting {
    fn fallback(fallback_texture: &VolumetricLightingFallbackTexture) -> Self {
        Self {
            lighting: fallback_texture.0.default_view.clone(),
            parameters: VBufferParameters::default(),
        }
    }
}

fn create_vbuffer_texture(
    render_device: &RenderDevice,
    label: &'static str,
    extent: UVec3,
) -> CachedTexture {
    let texture = render_device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width: extent.x,
            height: extent.y,
            depth_or_array_layers: extent.z,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D3,
        format: VBUFFER_TEXTURE_FORMAT,
        usage: TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let default_view = texture.create_view(&default());
    CachedTexture {
        texture,
        default_view,
    }
}

/// Returns the smallest extent that contains all of `extents`, or `None` if
/// there are none.
pub fn max_extent(extents: impl IntoIterator<Item = UVec3>) -> Option<UVec3> {
    extents.into_iter().reduce(UVec3::max)
}

/// Computes the V-buffer of a view for this frame.
///
/// Returns `None` if the view can't have one.
fn compute_view_vbuffer(
    view_entity: Entity,
    view: &ExtractedView,
    fog: &VolumetricFog,
    controller: &VolumetricLightingController,
    settings: &VolumetricLightingSettings,
) -> Option<ViewVBuffer> {
    // Voxel columns are rays through the camera position.
    if !is_perspective(&view.clip_from_view) {
        warn_once!(
            "View {:?} has volumetric fog, but volumetric lighting only supports perspective \
            projections",
            view_entity
        );
        return None;
    }

    let near = near_plane_distance(&view.clip_from_view);
    if !near.is_finite() || near <= 0.0 || near >= controller.depth_extent {
        warn_once!(
            "View {:?} has volumetric fog, but its projection has a near plane at {} and can't \
            contain a V-buffer ending at {}",
            view_entity,
            near,
            controller.depth_extent
        );
        return None;
    }

    let resolution =
        compute_resolution_and_scale(settings.preset, view.viewport.z, view.viewport.w);
    if resolution.is_empty() {
        return None;
    }

    let parameters = VBufferParameters::from_resolution(
        &resolution,
        near,
        controller.depth_extent,
        controller.slice_distribution_uniformity,
    );

    let world_from_view = view.world_from_view.affine();
    let world_position = view.world_from_view.translation();
    let clip_from_world = view.clip_from_world.unwrap_or_else(|| {
        view.clip_from_view * view.world_from_view.compute_matrix().inverse()
    });

    Some(ViewVBuffer {
        resolution,
        parameters,
        near,
        depth_extent: controller.depth_extent,
        clip_from_world,
        voxel_to_world_ray: voxel_to_world_ray_matrix(
            &view.clip_from_view,
            &world_from_view,
            parameters.resolution,
        ),
        world_position,
        volume_origin: if settings.camera_relative_rendering {
            world_position
        } else {
            Vec3::ZERO
        },
        frustum: vbuffer_frustum(
            &view.clip_from_view,
            &world_from_view,
            controller.depth_extent,
            settings.camera_relative_rendering,
        ),
        fog: fog.parameters(),
    })
}

/// A system that computes the V-buffer of every view with volumetric fog and
/// advances its history.
///
/// Views that don't render volumetric lighting this frame get the fallback
/// lighting buffer, and any state they had is released.
pub fn prepare_volumetric_lighting_views(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    frame_count: Res<FrameCount>,
    settings: Res<VolumetricLightingSettings>,
    fallback_texture: Res<VolumetricLightingFallbackTexture>,
    mut render_views: ResMut<RenderVolumetricLightingViews>,
    views: Query<(
        Entity,
        &ExtractedView,
        &VolumetricFog,
        Option<&VolumetricLightingController>,
        Option<&VolumetricCameraKind>,
    )>,
) {
    let frame_index = frame_count.0;
    let mut active_views: SmallVec<[Entity; 4]> = SmallVec::new();

    for (view_entity, view, fog, controller, camera_kind) in &views {
        let controller = controller.copied().unwrap_or_default();
        let vbuffer = fog
            .enabled
            .then(|| compute_view_vbuffer(view_entity, view, fog, &controller, &settings))
            .flatten();
        let Some(vbuffer) = vbuffer else {
            commands
                .entity(view_entity)
                .insert(ViewVolumetricLighting::fallback(&fallback_texture));
            continue;
        };

        let camera_kind = camera_kind.copied().unwrap_or_default();
        let resources = render_views.entry(view_entity).or_insert_with(|| {
            debug!("Starting volumetric lighting for view {:?}", view_entity);
            VolumetricLightingViewResources::new(vbuffer)
        });
        resources.begin_frame(frame_index, vbuffer);

        let history_kept = resources.prepare_history_textures(
            &render_device,
            view_entity,
            camera_kind.keeps_history(),
        );
        resources.configure_frame(&settings, camera_kind, frame_index, history_kept);

        active_views.push(view_entity);
    }

    render_views.retain(|view_entity, _| {
        let active = active_views.contains(view_entity);
        if !active {
            debug!("Releasing volumetric lighting for view {:?}", view_entity);
        }
        active
    });
}

/// A system that sizes the shared V-buffers to fit every active view and
/// publishes the lighting buffer to them.
pub fn prepare_vbuffer_textures(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut vbuffer_textures: ResMut<VBufferTextures>,
    render_views: Res<RenderVolumetricLightingViews>,
) {
    let Some(extent) = max_extent(
        render_views
            .values()
            .map(|resources| resources.vbuffer.resolution.extent()),
    ) else {
        return;
    };

    vbuffer_textures.prepare(&render_device, extent);
    let Some(lighting) = vbuffer_textures.lighting() else {
        return;
    };

    for (view_entity, resources) in render_views.iter() {
        commands.entity(*view_entity).insert(ViewVolumetricLighting {
            lighting: lighting.clone(),
            parameters: resources.vbuffer.parameters,
        });
    }
}

/// A system that frees all V-buffer state while volumetric lighting is off.
pub fn release_volumetric_lighting_resources(
    mut commands: Commands,
    fallback_texture: Option<Res<VolumetricLightingFallbackTexture>>,
    mut render_views: ResMut<RenderVolumetricLightingViews>,
    mut vbuffer_textures: ResMut<VBufferTextures>,
    views: Query<Entity, With<VolumetricFog>>,
) {
    if !render_views.is_empty() {
        debug!(
            "Volumetric lighting disabled; releasing {} views",
            render_views.len()
        );
        render_views.clear();
    }
    vbuffer_textures.release();

    let Some(fallback_texture) = fallback_texture else {
        return;
    };
    for view_entity in &views {
        commands
            .entity(view_entity)
            .insert(ViewVolumetricLighting::fallback(&fallback_texture));
    }
}
