//! The render graph node that voxelizes density volumes and integrates
//! lighting, and the per-view uniforms and bind groups it binds.

use bevy_derive::{Deref, DerefMut};
use bevy_ecs::{
    component::Component,
    entity::Entity,
    query::QueryItem,
    system::{lifetimeless::Read, Commands, Res, ResMut, Resource},
    world::World,
};
use bevy_math::{Mat4, Vec2, Vec3, Vec4};
use bevy_render::{
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroup, BindGroupEntries, ComputePassDescriptor, DynamicUniformBuffer, PipelineCache,
        ShaderType,
    },
    renderer::{RenderContext, RenderDevice, RenderQueue},
};
use bevy_vbuffer::{
    phase::cornette_shanks_phase_partial_constant,
    spherical_harmonics::{preconvolve_ambient_probe, PACKED_SH_L2_VEC4_COUNT},
};

use crate::{
    buffers::{RenderVolumetricLightingViews, VBufferTextures, VolumetricLightingViewResources},
    pipelines::{
        VolumetricLightingBindGroupLayouts, VolumetricLightingPipelineIds,
        VolumetricLightingPipelineKey,
    },
    AmbientIrradiance,
};

/// Renders volumetric lighting for a view.
#[derive(Default)]
pub struct VolumetricLightingNode;

/// The constants both V-buffer kernels read.
///
/// Must match `VolumetricLightingUniform` in the shaders.
#[derive(Clone, ShaderType)]
pub struct VolumetricLightingUniform {
    voxel_to_world_ray: Mat4,
    clip_from_world: Mat4,
    previous_clip_from_world: Mat4,
    world_position: Vec3,
    visible_volume_count: u32,
    volume_origin: Vec3,
    history_valid: u32,
    resolution: Vec4,
    depth_encoding_params: Vec4,
    depth_decoding_params: Vec4,
    previous_resolution: Vec4,
    previous_depth_encoding_params: Vec4,
    previous_depth_decoding_params: Vec4,
    slice_count: Vec2,
    previous_slice_count: Vec2,
    jitter: Vec4,
    fog_scattering: Vec3,
    fog_extinction: f32,
    fog_anisotropy: f32,
    phase_normalization: f32,
    near: f32,
    depth_extent: f32,
    ambient_probe: [Vec4; PACKED_SH_L2_VEC4_COUNT],
}

/// The uniforms of every view, written once per frame.
#[derive(Resource, Default, Deref, DerefMut)]
pub struct VolumetricLightingUniformBuffer(pub DynamicUniformBuffer<VolumetricLightingUniform>);

/// The offset of a view's [`VolumetricLightingUniform`] within
/// [`VolumetricLightingUniformBuffer`].
#[derive(Component, Deref, DerefMut)]
pub struct ViewVolumetricLightingUniformOffset(u32);

/// The bind groups of the two V-buffer passes for a view.
#[derive(Component)]
pub struct VolumetricLightingBindGroups {
    voxelization: BindGroup,
    lighting: BindGroup,
}

impl VolumetricLightingUniform {
    /// Gathers the constants of a view for this frame.
    pub fn new(resources: &VolumetricLightingViewResources, ambient: &AmbientIrradiance) -> Self {
        let vbuffer = resources.vbuffer();
        let current = resources.history().current();
        let previous = resources.history().previous();
        let fog = vbuffer.fog.to_data();
        let anisotropy = vbuffer.fog.anisotropy;

        Self {
            voxel_to_world_ray: vbuffer.voxel_to_world_ray,
            clip_from_world: vbuffer.clip_from_world,
            previous_clip_from_world: resources.previous_clip_from_world(),
            world_position: vbuffer.world_position,
            visible_volume_count: resources.visible_volume_count(),
            volume_origin: vbuffer.volume_origin,
            history_valid: resources.history_valid() as u32,
            resolution: current.resolution,
            depth_encoding_params: current.depth_encoding_params,
            depth_decoding_params: current.depth_decoding_params,
            previous_resolution: previous.resolution,
            previous_depth_encoding_params: previous.depth_encoding_params,
            previous_depth_decoding_params: previous.depth_decoding_params,
            slice_count: current.slice_count,
            previous_slice_count: previous.slice_count,
            jitter: resources.jitter(),
            fog_scattering: fog.scattering,
            fog_extinction: fog.extinction,
            fog_anisotropy: anisotropy,
            phase_normalization: cornette_shanks_phase_partial_constant(anisotropy),
            near: vbuffer.near,
            depth_extent: vbuffer.depth_extent,
            ambient_probe: preconvolve_ambient_probe(&ambient.probe, anisotropy),
        }
    }
}

/// A system that writes the uniforms of every view with a V-buffer.
pub fn prepare_volumetric_lighting_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    ambient: Res<AmbientIrradiance>,
    mut uniform_buffer: ResMut<VolumetricLightingUniformBuffer>,
    render_views: Res<RenderVolumetricLightingViews>,
) {
    let Some(mut writer) =
        uniform_buffer.get_writer(render_views.len(), &render_device, &render_queue)
    else {
        return;
    };

    for (view_entity, resources) in render_views.iter() {
        let offset = writer.write(&VolumetricLightingUniform::new(resources, &ambient));
        commands
            .entity(*view_entity)
            .insert(ViewVolumetricLightingUniformOffset(offset));
    }
}

/// A system that creates the bind groups of every view with a V-buffer.
pub fn prepare_volumetric_lighting_bind_groups(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    layouts: Res<VolumetricLightingBindGroupLayouts>,
    uniform_buffer: Res<VolumetricLightingUniformBuffer>,
    vbuffer_textures: Res<VBufferTextures>,
    render_views: Res<RenderVolumetricLightingViews>,
) {
    if render_views.is_empty() {
        return;
    }
    let Some(uniform_binding) = uniform_buffer.binding() else {
        return;
    };

    let (Some(density), Some(lighting)) = (vbuffer_textures.density(), vbuffer_textures.lighting())
    else {
        panic!("V-buffer textures should have been allocated for every view with a V-buffer");
    };

    for (view_entity, resources) in render_views.iter() {
        let (Some(volume_bounds), Some(volume_data)) = (
            resources.volume_bounds.buffer(),
            resources.volume_data.buffer(),
        ) else {
            panic!("Visible volume buffers should have been uploaded for view {view_entity:?}");
        };

        let voxelization = render_device.create_bind_group(
            "volumetric lighting voxelization bind group",
            &layouts.voxelization,
            &BindGroupEntries::sequential((
                uniform_binding.clone(),
                density,
                volume_bounds.as_entire_binding(),
                volume_data.as_entire_binding(),
            )),
        );

        let lighting = if resources
            .key()
            .contains(VolumetricLightingPipelineKey::REPROJECTION)
        {
            let (previous_history, current_history) = resources
                .history_texture_views()
                .expect("Reprojecting views should have a lighting history");
            render_device.create_bind_group(
                "volumetric lighting integration bind group (reprojection)",
                &layouts.lighting_reprojection,
                &BindGroupEntries::sequential((
                    uniform_binding.clone(),
                    density,
                    lighting,
                    &layouts.vbuffer_sampler,
                    previous_history,
                    current_history,
                )),
            )
        } else {
            render_device.create_bind_group(
                "volumetric lighting integration bind group",
                &layouts.lighting,
                &BindGroupEntries::sequential((
                    uniform_binding.clone(),
                    density,
                    lighting,
                    &layouts.vbuffer_sampler,
                )),
            )
        };

        commands
            .entity(*view_entity)
            .insert(VolumetricLightingBindGroups {
                voxelization,
                lighting,
            });
    }
}

impl ViewNode for VolumetricLightingNode {
    type ViewQuery = (
        Entity,
        Read<VolumetricLightingBindGroups>,
        Read<ViewVolumetricLightingUniformOffset>,
    );

    fn run<'w>(
        &self,
        _: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (view_entity, bind_groups, uniform_offset): QueryItem<'w, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let (Some(pipeline_cache), Some(pipeline_ids), Some(render_views)) = (
            world.get_resource::<PipelineCache>(),
            world.get_resource::<VolumetricLightingPipelineIds>(),
            world.get_resource::<RenderVolumetricLightingViews>(),
        ) else {
            return Ok(());
        };
        let Some(resources) = render_views.get(&view_entity) else {
            return Ok(());
        };
        let Some(pipelines) = pipeline_ids.get(pipeline_cache, resources.key()) else {
            return Ok(());
        };

        let workgroups = resources.vbuffer().resolution.workgroup_count();

        let mut compute_pass =
            render_context
                .command_encoder()
                .begin_compute_pass(&ComputePassDescriptor {
                    label: Some("volumetric lighting"),
                    timestamp_writes: None,
                });

        // Voxelization runs even when no volume is visible, since the global
        // fog still has to be written.
        compute_pass.set_pipeline(pipelines.voxelization);
        compute_pass.set_bind_group(0, &bind_groups.voxelization, &[**uniform_offset]);
        compute_pass.dispatch_workgroups(workgroups.x, workgroups.y, workgroups.z);

        compute_pass.set_pipeline(pipelines.lighting);
        compute_pass.set_bind_group(0, &bind_groups.lighting, &[**uniform_offset]);
        compute_pass.dispatch_workgroups(workgroups.x, workgroups.y, workgroups.z);

        Ok(())
    }
}
