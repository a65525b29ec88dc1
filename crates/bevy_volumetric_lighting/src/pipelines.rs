//! The compute pipelines of the voxelization and lighting integration passes.
//!
//! All variants are queued up front, so picking one per view is a table
//! lookup.

use bevy_asset::Handle;
use bevy_ecs::{
    system::Resource,
    world::{FromWorld, World},
};
use bevy_render::{
    render_resource::{
        binding_types::{sampler, storage_buffer_read_only_sized, texture_3d, uniform_buffer},
        BindGroupLayout, BindGroupLayoutEntryBuilder, BindingType, CachedComputePipelineId,
        ComputePipeline, ComputePipelineDescriptor, DynamicBindGroupLayoutEntries, FilterMode,
        IntoBindGroupLayoutEntryBuilder as _, PipelineCache, Sampler, SamplerBindingType,
        SamplerDescriptor, Shader, ShaderDefVal, ShaderStages, StorageTextureAccess,
        TextureFormat, TextureSampleType, TextureViewDimension,
    },
    renderer::RenderDevice,
};
use bevy_utils::prelude::default;
use bitflags::bitflags;
use smallvec::SmallVec;

use crate::{node::VolumetricLightingUniform, LightCullingMode};

/// Structs and helpers shared by both V-buffer shaders.
pub const VBUFFER_TYPES_SHADER_HANDLE: Handle<Shader> =
    Handle::weak_from_u128(176351296880531268145327610489523016454);
/// The voxelization kernel.
pub const VOXELIZATION_SHADER_HANDLE: Handle<Shader> =
    Handle::weak_from_u128(90412753110857340913648227402115672371);
/// The lighting integration kernel, with and without reprojection.
pub const LIGHTING_INTEGRATION_SHADER_HANDLE: Handle<Shader> =
    Handle::weak_from_u128(256140237218311470396519806436780581092);

/// The format of the density and lighting V-buffers and of the lighting
/// history.
pub const VBUFFER_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

bitflags! {
    /// Specifies variants of the V-buffer kernels.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct VolumetricLightingPipelineKey: u8 {
        /// Lights are looked up in the clustered light lists.
        ///
        /// This `#define`s `CLUSTERED_LIGHT_CULLING` in both shaders.
        const CLUSTERED_LIGHT_CULLING = 1;

        /// The lighting integration pass blends in the reprojected lighting of
        /// the previous frame. Only meaningful for the lighting pipelines.
        ///
        /// This `#define`s `REPROJECTION` in the lighting integration shader.
        const REPROJECTION = 2;
    }
}

const VOXELIZATION_VARIANT_COUNT: usize = 2;
const LIGHTING_VARIANT_COUNT: usize = 4;

/// The bind group layouts shared by all pipeline variants.
#[derive(Resource)]
pub struct VolumetricLightingBindGroupLayouts {
    /// Uniforms, the density V-buffer, and the visible volumes.
    pub voxelization: BindGroupLayout,
    /// Uniforms, the density and lighting V-buffers, and the sampler.
    pub lighting: BindGroupLayout,
    /// [`Self::lighting`] plus the read and write lighting history.
    pub lighting_reprojection: BindGroupLayout,
    /// Trilinearly samples the V-buffers.
    pub vbuffer_sampler: Sampler,
}

/// The IDs of every variant of both V-buffer pipelines, indexed by the bits
/// of their [`VolumetricLightingPipelineKey`].
#[derive(Resource)]
pub struct VolumetricLightingPipelineIds {
    voxelization: [CachedComputePipelineId; VOXELIZATION_VARIANT_COUNT],
    lighting: [CachedComputePipelineId; LIGHTING_VARIANT_COUNT],
}

/// The pipelines a view dispatches, once they've finished compiling.
pub struct VolumetricLightingPipelines<'w> {
    /// Fills the density V-buffer.
    pub voxelization: &'w ComputePipeline,
    /// Fills the lighting V-buffer.
    pub lighting: &'w ComputePipeline,
}

impl VolumetricLightingPipelineKey {
    /// Builds the key for a view.
    pub fn new(light_culling: LightCullingMode, reprojection: bool) -> Self {
        let mut key = Self::empty();
        key.set(
            Self::CLUSTERED_LIGHT_CULLING,
            light_culling == LightCullingMode::Clustered,
        );
        key.set(Self::REPROJECTION, reprojection);
        key
    }

    fn voxelization_index(self) -> usize {
        (self & Self::CLUSTERED_LIGHT_CULLING).bits() as usize
    }

    fn lighting_index(self) -> usize {
        self.bits() as usize
    }

    fn shader_defs(self) -> Vec<ShaderDefVal> {
        let mut shader_defs: SmallVec<[ShaderDefVal; 2]> = SmallVec::new();
        if self.contains(Self::CLUSTERED_LIGHT_CULLING) {
            shader_defs.push("CLUSTERED_LIGHT_CULLING".into());
        }
        if self.contains(Self::REPROJECTION) {
            shader_defs.push("REPROJECTION".into());
        }
        shader_defs.into_vec()
    }

    fn label(self, pass: &str) -> String {
        format!(
            "volumetric lighting {} pipeline ({}{})",
            pass,
            if self.contains(Self::CLUSTERED_LIGHT_CULLING) {
                "clustered"
            } else {
                "brute force"
            },
            if self.contains(Self::REPROJECTION) {
                ", reprojection"
            } else {
                ""
            }
        )
    }
}

/// `binding_types` only has 2D storage textures.
fn texture_storage_3d(
    format: TextureFormat,
    access: StorageTextureAccess,
) -> BindGroupLayoutEntryBuilder {
    BindingType::StorageTexture {
        access,
        format,
        view_dimension: TextureViewDimension::D3,
    }
    .into_bind_group_layout_entry_builder()
}

fn voxelization_bind_group_layout_entries() -> DynamicBindGroupLayoutEntries {
    DynamicBindGroupLayoutEntries::sequential(
        ShaderStages::COMPUTE,
        (
            // `settings`
            uniform_buffer::<VolumetricLightingUniform>(/*has_dynamic_offset=*/ true),
            // `density_vbuffer`
            texture_storage_3d(VBUFFER_TEXTURE_FORMAT, StorageTextureAccess::WriteOnly),
            // `volume_bounds`
            storage_buffer_read_only_sized(false, None),
            // `volume_data`
            storage_buffer_read_only_sized(false, None),
        ),
    )
}

fn lighting_bind_group_layout_entries() -> DynamicBindGroupLayoutEntries {
    DynamicBindGroupLayoutEntries::sequential(
        ShaderStages::COMPUTE,
        (
            // `settings`
            uniform_buffer::<VolumetricLightingUniform>(/*has_dynamic_offset=*/ true),
            // `density_vbuffer`
            texture_3d(TextureSampleType::Float { filterable: true }),
            // `lighting_vbuffer`
            texture_storage_3d(VBUFFER_TEXTURE_FORMAT, StorageTextureAccess::WriteOnly),
            // `vbuffer_sampler`
            sampler(SamplerBindingType::Filtering),
        ),
    )
}

/// The reprojecting variant additionally reads last frame's history and
/// writes this frame's.
fn lighting_reprojection_bind_group_layout_entries() -> DynamicBindGroupLayoutEntries {
    lighting_bind_group_layout_entries().extend_sequential((
        // `previous_lighting_history`
        texture_3d(TextureSampleType::Float { filterable: true }),
        // `lighting_history`
        texture_storage_3d(VBUFFER_TEXTURE_FORMAT, StorageTextureAccess::WriteOnly),
    ))
}

impl FromWorld for VolumetricLightingBindGroupLayouts {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();

        Self {
            voxelization: render_device.create_bind_group_layout(
                "volumetric lighting voxelization bind group layout",
                &voxelization_bind_group_layout_entries(),
            ),
            lighting: render_device.create_bind_group_layout(
                "volumetric lighting integration bind group layout",
                &lighting_bind_group_layout_entries(),
            ),
            lighting_reprojection: render_device.create_bind_group_layout(
                "volumetric lighting integration bind group layout (reprojection)",
                &lighting_reprojection_bind_group_layout_entries(),
            ),
            vbuffer_sampler: render_device.create_sampler(&SamplerDescriptor {
                label: Some("volumetric lighting V-buffer sampler"),
                mag_filter: FilterMode::Linear,
                min_filter: FilterMode::Linear,
                ..default()
            }),
        }
    }
}

impl FromWorld for VolumetricLightingPipelineIds {
    fn from_world(world: &mut World) -> Self {
        let layouts = world.resource::<VolumetricLightingBindGroupLayouts>();
        let voxelization_layout = layouts.voxelization.clone();
        let lighting_layout = layouts.lighting.clone();
        let lighting_reprojection_layout = layouts.lighting_reprojection.clone();
        let pipeline_cache = world.resource_mut::<PipelineCache>();

        let voxelization = std::array::from_fn(|index| {
            let key = VolumetricLightingPipelineKey::from_bits_truncate(index as u8);
            pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                label: Some(key.label("voxelization").into()),
                layout: vec![voxelization_layout.clone()],
                push_constant_ranges: vec![],
                shader: VOXELIZATION_SHADER_HANDLE,
                shader_defs: key.shader_defs(),
                entry_point: "voxelize".into(),
            })
        });

        let lighting = std::array::from_fn(|index| {
            let key = VolumetricLightingPipelineKey::from_bits_truncate(index as u8);
            let layout = if key.contains(VolumetricLightingPipelineKey::REPROJECTION) {
                lighting_reprojection_layout.clone()
            } else {
                lighting_layout.clone()
            };
            pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                label: Some(key.label("lighting integration").into()),
                layout: vec![layout],
                push_constant_ranges: vec![],
                shader: LIGHTING_INTEGRATION_SHADER_HANDLE,
                shader_defs: key.shader_defs(),
                entry_point: "integrate_lighting".into(),
            })
        });

        Self {
            voxelization,
            lighting,
        }
    }
}

impl VolumetricLightingPipelineIds {
    /// The ID of the voxelization pipeline for the given key.
    pub fn voxelization(&self, key: VolumetricLightingPipelineKey) -> CachedComputePipelineId {
        self.voxelization[key.voxelization_index()]
    }

    /// The ID of the lighting integration pipeline for the given key.
    pub fn lighting(&self, key: VolumetricLightingPipelineKey) -> CachedComputePipelineId {
        self.lighting[key.lighting_index()]
    }

    /// Returns both pipelines for the given key, or `None` if either is still
    /// compiling.
    pub fn get<'w>(
        &self,
        pipeline_cache: &'w PipelineCache,
        key: VolumetricLightingPipelineKey,
    ) -> Option<VolumetricLightingPipelines<'w>> {
        Some(VolumetricLightingPipelines {
            voxelization: pipeline_cache.get_compute_pipeline(self.voxelization(key))?,
            lighting: pipeline_cache.get_compute_pipeline(self.lighting(key))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use bevy_render::render_resource::BindGroupLayoutEntry;

    use super::*;

    #[test]
    fn keys_index_distinct_variants() {
        let mut lighting_indices = vec![];
        let mut voxelization_indices = vec![];
        for light_culling in [LightCullingMode::BruteForce, LightCullingMode::Clustered] {
            for reprojection in [false, true] {
                let key = VolumetricLightingPipelineKey::new(light_culling, reprojection);
                assert!(key.lighting_index() < LIGHTING_VARIANT_COUNT);
                assert!(key.voxelization_index() < VOXELIZATION_VARIANT_COUNT);
                lighting_indices.push(key.lighting_index());
                voxelization_indices.push(key.voxelization_index());
            }
        }
        lighting_indices.sort_unstable();
        lighting_indices.dedup();
        assert_eq!(lighting_indices, vec![0, 1, 2, 3]);

        // Reprojection doesn't change the voxelization kernel.
        voxelization_indices.sort_unstable();
        voxelization_indices.dedup();
        assert_eq!(voxelization_indices, vec![0, 1]);
    }

    #[test]
    fn shader_defs_follow_the_key() {
        let key = VolumetricLightingPipelineKey::new(LightCullingMode::Clustered, true);
        assert_eq!(key.shader_defs().len(), 2);
        let key = VolumetricLightingPipelineKey::new(LightCullingMode::BruteForce, false);
        assert!(key.shader_defs().is_empty());
        assert_eq!(
            key.label("voxelization"),
            "volumetric lighting voxelization pipeline (brute force)"
        );
    }

    #[test]
    fn vbuffers_bind_as_3d_storage_textures() {
        let storage_3d = |entry: &BindGroupLayoutEntry| {
            matches!(
                entry.ty,
                BindingType::StorageTexture {
                    access: StorageTextureAccess::WriteOnly,
                    format: VBUFFER_TEXTURE_FORMAT,
                    view_dimension: TextureViewDimension::D3,
                }
            )
        };

        let voxelization = voxelization_bind_group_layout_entries();
        assert_eq!(voxelization.len(), 4);
        assert!(storage_3d(&voxelization[1]));

        let lighting = lighting_reprojection_bind_group_layout_entries();
        assert_eq!(lighting.len(), 6);
        assert!(storage_3d(&lighting[2]));
        assert!(storage_3d(&lighting[5]));
        assert_eq!(
            lighting.iter().map(|entry| entry.binding).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );
    }
}
