//! Getting density volumes from the scene to the voxelization shader.

use bevy_derive::{Deref, DerefMut};
use bevy_ecs::{
    component::Component,
    system::{Commands, Query, Res, ResMut, Resource},
};
use bevy_math::Affine3A;
use bevy_render::{
    renderer::{RenderDevice, RenderQueue},
    view::InheritedVisibility,
    Extract,
};
use bevy_transform::components::GlobalTransform;
use bevy_vbuffer::{
    density_volume::DensityVolumeParameters,
    visible_volumes::{collect_visible_volumes, VisibleVolumeList, MAX_VISIBLE_VOLUMES},
};

use crate::{buffers::RenderVolumetricLightingViews, DensityVolume, VolumetricLightingSettings};

/// Every visible density volume in the scene, in the order they were
/// extracted.
#[derive(Resource, Default, Deref, DerefMut)]
pub struct ExtractedDensityVolumes(pub Vec<(Affine3A, DensityVolumeParameters)>);

/// The density volumes that overlap the V-buffer of a view this frame.
///
/// Positions are relative to the view's volume origin, which is the camera
/// position with camera-relative rendering.
#[derive(Component, Clone, Debug, Default, Deref)]
pub struct ViewVisibleVolumes(pub VisibleVolumeList);

/// A system that copies density volumes into the render world.
///
/// Nothing is extracted while volumetric lighting is off.
pub fn extract_density_volumes(
    mut extracted_density_volumes: ResMut<ExtractedDensityVolumes>,
    settings: Extract<Option<Res<VolumetricLightingSettings>>>,
    density_volumes: Extract<
        Query<(
            &DensityVolume,
            &GlobalTransform,
            Option<&InheritedVisibility>,
        )>,
    >,
) {
    extracted_density_volumes.clear();

    if !settings
        .as_deref()
        .is_some_and(|settings| settings.preset.is_enabled())
    {
        return;
    }

    extracted_density_volumes.extend(
        density_volumes
            .iter()
            .filter(|(_, _, visibility)| visibility.map_or(true, |visibility| visibility.get()))
            .map(|(density_volume, transform, _)| {
                (transform.affine(), density_volume.parameters)
            }),
    );
}

/// A system that culls the extracted density volumes against the V-buffer of
/// each view.
pub fn collect_view_visible_volumes(
    mut commands: Commands,
    extracted_density_volumes: Res<ExtractedDensityVolumes>,
    mut render_views: ResMut<RenderVolumetricLightingViews>,
) {
    for (view_entity, resources) in render_views.iter_mut() {
        let vbuffer = *resources.vbuffer();
        // Volumes past the cap are dropped silently.
        collect_visible_volumes(
            extracted_density_volumes.iter().copied(),
            &vbuffer.frustum,
            vbuffer.volume_origin,
            &mut resources.visible_volumes,
        );

        commands
            .entity(*view_entity)
            .insert(ViewVisibleVolumes(resources.visible_volumes.clone()));
    }
}

/// A system that writes the visible volumes of each view to its storage
/// buffers.
///
/// The buffers always have room for [`MAX_VISIBLE_VOLUMES`] volumes, so they
/// exist even when nothing is visible.
pub fn upload_visible_volumes(
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    mut render_views: ResMut<RenderVolumetricLightingViews>,
) {
    for resources in render_views.values_mut() {
        resources.volume_bounds.clear();
        resources.volume_data.clear();
        for (bounds, data) in resources
            .visible_volumes
            .bounds()
            .iter()
            .zip(resources.visible_volumes.data())
        {
            resources.volume_bounds.push(*bounds);
            resources.volume_data.push(*data);
        }

        resources
            .volume_bounds
            .reserve(MAX_VISIBLE_VOLUMES, &render_device);
        resources
            .volume_data
            .reserve(MAX_VISIBLE_VOLUMES, &render_device);
        resources
            .volume_bounds
            .write_buffer(&render_device, &render_queue);
        resources
            .volume_data
            .write_buffer(&render_device, &render_queue);
    }
}

#[cfg(test)]
mod tests {
    use bevy_ecs::{system::RunSystemOnce as _, world::World};
    use bevy_math::Vec3;
    use bevy_render::MainWorld;
    use bevy_vbuffer::preset::VolumetricLightingPreset;

    use super::*;
    use crate::buffers::{tests::test_vbuffer, VolumetricLightingViewResources};

    fn extract_with_preset(preset: VolumetricLightingPreset) -> Vec<Vec3> {
        let mut main_world = MainWorld::default();
        main_world.insert_resource(VolumetricLightingSettings {
            preset,
            ..VolumetricLightingSettings::default()
        });
        main_world.spawn((
            DensityVolume::default(),
            GlobalTransform::from_translation(Vec3::X),
        ));
        main_world.spawn((
            DensityVolume::default(),
            GlobalTransform::from_translation(Vec3::Y),
            InheritedVisibility::HIDDEN,
        ));
        main_world.spawn((
            DensityVolume::default(),
            GlobalTransform::from_translation(Vec3::Z),
            InheritedVisibility::VISIBLE,
        ));

        let mut render_world = World::new();
        render_world.insert_resource(main_world);
        // Left over from a previous frame.
        render_world.insert_resource(ExtractedDensityVolumes(vec![volume_at(Vec3::NEG_X)]));

        render_world.run_system_once(extract_density_volumes);

        render_world
            .resource::<ExtractedDensityVolumes>()
            .iter()
            .map(|(transform, _)| Vec3::from(transform.translation))
            .collect()
    }

    fn volume_at(position: Vec3) -> (Affine3A, DensityVolumeParameters) {
        (
            Affine3A::from_translation(position),
            DensityVolumeParameters::default(),
        )
    }

    #[test]
    fn each_view_gets_its_visible_volumes() {
        let mut world = World::new();
        let view = world.spawn_empty().id();

        let vbuffer = test_vbuffer(240, 135, 0.0);
        let mut resources = VolumetricLightingViewResources::new(vbuffer);
        resources.begin_frame(0, vbuffer);
        let mut render_views = RenderVolumetricLightingViews::default();
        render_views.insert(view, resources);
        world.insert_resource(render_views);

        world.insert_resource(ExtractedDensityVolumes(vec![
            volume_at(Vec3::new(0.0, 0.0, -10.0)),
            // Behind the camera.
            volume_at(Vec3::new(0.0, 0.0, 10.0)),
            // Past the end of the V-buffer.
            volume_at(Vec3::new(0.0, 0.0, -100.0)),
            volume_at(Vec3::new(1.0, 0.0, -20.0)),
        ]));

        world.run_system_once(collect_view_visible_volumes);

        let visible = world.get::<ViewVisibleVolumes>(view).unwrap();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible.bounds()[0].center, Vec3::new(0.0, 0.0, -10.0));
        assert_eq!(visible.bounds()[1].center, Vec3::new(1.0, 0.0, -20.0));

        let resources = world.resource::<RenderVolumetricLightingViews>();
        assert_eq!(resources.get(&view).unwrap().visible_volume_count(), 2);
    }

    #[test]
    fn no_volumes_yields_an_empty_list() {
        let mut world = World::new();
        let view = world.spawn_empty().id();

        let vbuffer = test_vbuffer(240, 135, 0.0);
        let mut render_views = RenderVolumetricLightingViews::default();
        render_views.insert(view, VolumetricLightingViewResources::new(vbuffer));
        world.insert_resource(render_views);
        world.init_resource::<ExtractedDensityVolumes>();

        world.run_system_once(collect_view_visible_volumes);

        assert!(world.get::<ViewVisibleVolumes>(view).unwrap().is_empty());
    }

    #[test]
    fn extracts_only_visible_volumes() {
        let extracted = extract_with_preset(VolumetricLightingPreset::Normal);
        assert_eq!(extracted.len(), 2);
        assert!(extracted.contains(&Vec3::X));
        assert!(extracted.contains(&Vec3::Z));
    }

    #[test]
    fn nothing_is_extracted_while_off() {
        assert!(extract_with_preset(VolumetricLightingPreset::Off).is_empty());
    }
}
