//! Demonstrates volumetric fog with a few density volumes.
//!
//! Set `VOLUMETRIC_LIGHTING_PRESET` to `off`, `normal`, or `ultra` to pick the
//! starting quality. Press Space to cycle through the presets, and R to toggle
//! temporal reprojection.

use std::{env, f32::consts::FRAC_PI_4};

use bevy::prelude::*;
use bevy_volumetrics::prelude::*;

const PRESET_VARIABLE: &str = "VOLUMETRIC_LIGHTING_PRESET";

fn main() {
    App::new()
        .insert_resource(AmbientIrradiance::uniform(
            Color::srgb(0.6, 0.7, 1.0),
            0.4,
        ))
        .add_plugins((DefaultPlugins, VolumetricLightingPlugin))
        .add_systems(Startup, (read_preset_from_environment, setup))
        .add_systems(Update, (orbit_camera, change_settings))
        .run();
}

fn read_preset_from_environment(mut settings: ResMut<VolumetricLightingSettings>) {
    let Ok(value) = env::var(PRESET_VARIABLE) else {
        return;
    };
    match value.parse::<VolumetricLightingPreset>() {
        Ok(preset) => settings.preset = preset,
        Err(error) => warn!("{error}; keeping the {} preset", settings.preset),
    }
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Camera3dBundle {
            transform: Transform::from_xyz(-12.0, 4.0, 12.0).looking_at(Vec3::ZERO, Vec3::Y),
            ..default()
        },
        VolumetricFog {
            albedo: Color::srgb(0.9, 0.9, 1.0),
            mean_free_path: 200.0,
            ..default()
        },
        VolumetricLightingController {
            depth_extent: 48.0,
            ..default()
        },
        VolumetricCameraKind::Game,
    ));

    commands.spawn(PbrBundle {
        mesh: meshes.add(Plane3d::default().mesh().size(60.0, 60.0)),
        material: materials.add(Color::srgb(0.3, 0.35, 0.3)),
        ..default()
    });

    commands.spawn(DirectionalLightBundle {
        transform: Transform::from_rotation(Quat::from_euler(
            EulerRot::YXZ,
            FRAC_PI_4,
            -FRAC_PI_4,
            0.0,
        )),
        ..default()
    });

    // A low bank of thick fog, a tall column of forward-scattering haze, and a
    // tilted slab of dark smoke.
    let volumes = [
        (
            Transform::from_xyz(0.0, 1.0, 0.0).with_scale(Vec3::new(30.0, 2.0, 30.0)),
            DensityVolumeParameters::new(Vec3::splat(0.95), 4.0, 0.0),
        ),
        (
            Transform::from_xyz(4.0, 6.0, -3.0).with_scale(Vec3::new(3.0, 12.0, 3.0)),
            DensityVolumeParameters::new(Vec3::new(1.0, 0.9, 0.7), 8.0, 0.6),
        ),
        (
            Transform::from_xyz(-5.0, 3.0, 2.0)
                .with_rotation(Quat::from_rotation_z(0.4))
                .with_scale(Vec3::new(6.0, 1.0, 4.0)),
            DensityVolumeParameters::new(Vec3::splat(0.2), 2.0, -0.2),
        ),
    ];

    for (transform, parameters) in volumes {
        commands.spawn(DensityVolumeBundle {
            density_volume: DensityVolume { parameters },
            transform,
            ..default()
        });
    }
}

fn orbit_camera(time: Res<Time>, mut cameras: Query<&mut Transform, With<VolumetricFog>>) {
    for mut transform in &mut cameras {
        transform.rotate_around(
            Vec3::ZERO,
            Quat::from_rotation_y(time.delta_seconds() * 0.1),
        );
    }
}

fn change_settings(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut settings: ResMut<VolumetricLightingSettings>,
) {
    if keyboard.just_pressed(KeyCode::Space) {
        settings.preset = match settings.preset {
            VolumetricLightingPreset::Off => VolumetricLightingPreset::Normal,
            VolumetricLightingPreset::Normal => VolumetricLightingPreset::Ultra,
            VolumetricLightingPreset::Ultra => VolumetricLightingPreset::Off,
        };
        info!("Volumetric lighting preset: {}", settings.preset);
    }

    if keyboard.just_pressed(KeyCode::KeyR) {
        settings.temporal_reprojection = !settings.temporal_reprojection;
        info!(
            "Temporal reprojection: {}",
            if settings.temporal_reprojection {
                "on"
            } else {
                "off"
            }
        );
    }
}
