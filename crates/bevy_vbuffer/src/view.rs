//! Per-view geometry derived from the camera projection.

use bevy_math::{Affine3A, Mat3, Mat4, Vec3, Vec4};

use crate::bounds::Frustum;

/// Returns true if the projection is perspective rather than orthographic.
#[inline]
pub fn is_perspective(clip_from_view: &Mat4) -> bool {
    clip_from_view.w_axis.w != 1.0
}

/// Returns the matrix that maps a voxel column to the world-space direction
/// of the ray through it.
///
/// Multiplying `(x, y, 1, 0)`, where `x` and `y` are in units of voxels with
/// the origin at the top left of the grid, yields the direction toward the
/// point at view depth 1 behind that position. Only the rotation of
/// `world_from_view` is applied, so the result is the same whether or not
/// rendering is camera-relative.
///
/// `resolution` is `(width, height, 1 / width, 1 / height)`, as in
/// [`crate::vbuffer::VBufferParameters::resolution`].
pub fn voxel_to_world_ray_matrix(
    clip_from_view: &Mat4,
    world_from_view: &Affine3A,
    resolution: Vec4,
) -> Mat4 {
    let x_scale = clip_from_view.x_axis.x;
    let y_scale = clip_from_view.y_axis.y;
    let x_offset = clip_from_view.z_axis.x;
    let y_offset = clip_from_view.z_axis.y;

    // At view depth 1, NDC x maps to view x = (ndc + x_offset) / x_scale, and
    // likewise for y. NDC y points up while voxel rows point down.
    let view_from_voxel = Mat4::from_cols(
        Vec4::new(2.0 * resolution.z / x_scale, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -2.0 * resolution.w / y_scale, 0.0, 0.0),
        Vec4::new((x_offset - 1.0) / x_scale, (1.0 + y_offset) / y_scale, -1.0, 0.0),
        Vec4::W,
    );

    let rotation = Mat3::from(world_from_view.matrix3);
    Mat4::from_mat3(rotation) * view_from_voxel
}

/// Returns the distance from the camera to the near plane of a reverse-Z
/// projection, where the near plane is at NDC depth 1.
pub fn near_plane_distance(clip_from_view: &Mat4) -> f32 {
    let near = clip_from_view.inverse() * Vec4::new(0.0, 0.0, 1.0, 1.0);
    -near.z / near.w
}

/// Returns the corners of the view frustum from the near plane out to view
/// depth `far`, in view space.
///
/// The corners are ordered as [`Frustum::corners`] expects.
pub fn view_frustum_corners(clip_from_view: &Mat4, far: f32) -> [Vec3; 8] {
    let view_from_clip = clip_from_view.inverse();
    let near_corner = |x: f32, y: f32| view_from_clip.project_point3(Vec3::new(x, y, 1.0));
    let near = [
        near_corner(-1.0, -1.0),
        near_corner(1.0, -1.0),
        near_corner(1.0, 1.0),
        near_corner(-1.0, 1.0),
    ];

    let far_corner = |corner: Vec3| {
        if is_perspective(clip_from_view) {
            // Rays through the corners start at the eye.
            corner * (far / -corner.z)
        } else {
            Vec3::new(corner.x, corner.y, -far)
        }
    };

    [
        near[0],
        near[1],
        near[2],
        near[3],
        far_corner(near[0]),
        far_corner(near[1]),
        far_corner(near[2]),
        far_corner(near[3]),
    ]
}

/// Returns the frustum that the V-buffer of a view covers.
///
/// Only the rotation of `world_from_view` is applied when `camera_relative`
/// is true; otherwise the frustum is placed in world space.
pub fn vbuffer_frustum(
    clip_from_view: &Mat4,
    world_from_view: &Affine3A,
    far: f32,
    camera_relative: bool,
) -> Frustum {
    let corners = view_frustum_corners(clip_from_view, far).map(|corner| {
        if camera_relative {
            world_from_view.transform_vector3(corner)
        } else {
            world_from_view.transform_point3(corner)
        }
    });
    Frustum::from_corners(corners)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use bevy_math::Quat;

    use super::*;

    fn perspective() -> Mat4 {
        Mat4::perspective_infinite_reverse_rh(FRAC_PI_2, 16.0 / 9.0, 0.1)
    }

    #[test]
    fn near_plane_of_a_reverse_z_projection() {
        assert!((near_plane_distance(&perspective()) - 0.1).abs() < 1e-6);
        let finite = Mat4::perspective_rh(1.0, 1.0, 0.5, 100.0);
        // Bevy's projections are reverse-Z; a conventional one has its near
        // plane at NDC depth 0 instead, so this lands on the far plane.
        assert!((near_plane_distance(&finite) - 100.0).abs() < 0.05);
    }

    #[test]
    fn center_ray_looks_forward() {
        let (width, height) = (240.0, 135.0);
        let resolution = Vec4::new(width, height, 1.0 / width, 1.0 / height);
        let world_from_view = Affine3A::from_rotation_translation(
            Quat::from_rotation_y(0.5),
            Vec3::new(10.0, 2.0, -3.0),
        );
        let matrix = voxel_to_world_ray_matrix(&perspective(), &world_from_view, resolution);

        let center = (matrix * Vec4::new(width * 0.5, height * 0.5, 1.0, 0.0)).truncate();
        let forward = world_from_view.transform_vector3(Vec3::NEG_Z);
        assert!(center.abs_diff_eq(forward, 1e-5));
    }

    #[test]
    fn corner_rays_hit_the_frustum_corners() {
        let (width, height) = (64.0, 36.0);
        let resolution = Vec4::new(width, height, 1.0 / width, 1.0 / height);
        let clip_from_view = perspective();
        let matrix = voxel_to_world_ray_matrix(&clip_from_view, &Affine3A::IDENTITY, resolution);

        let corners = view_frustum_corners(&clip_from_view, 1.0);
        // Top left of the grid is the top left (index 7) far corner.
        let top_left = (matrix * Vec4::new(0.0, 0.0, 1.0, 0.0)).truncate();
        assert!(top_left.abs_diff_eq(corners[7], 1e-5));
        let bottom_right = (matrix * Vec4::new(width, height, 1.0, 0.0)).truncate();
        assert!(bottom_right.abs_diff_eq(corners[5], 1e-5));
    }

    #[test]
    fn far_corners_extend_the_near_corners() {
        let corners = view_frustum_corners(&perspective(), 50.0);
        for i in 0..4 {
            assert!((corners[i].z + 0.1).abs() < 1e-6);
            assert!((corners[i + 4].z + 50.0).abs() < 1e-3);
            assert!(corners[i + 4].normalize().abs_diff_eq(corners[i].normalize(), 1e-5));
        }
        // 90° vertical field of view.
        assert!((corners[6].y - 50.0).abs() < 1e-3);
        assert!((corners[6].x - 50.0 * 16.0 / 9.0).abs() < 1e-2);
    }

    #[test]
    fn orthographic_far_corners() {
        let clip_from_view = Mat4::orthographic_rh(-2.0, 2.0, -1.0, 1.0, 100.0, 0.5);
        assert!(!is_perspective(&clip_from_view));
        let corners = view_frustum_corners(&clip_from_view, 20.0);
        assert!(corners[2].abs_diff_eq(Vec3::new(2.0, 1.0, -0.5), 1e-4));
        assert!(corners[6].abs_diff_eq(Vec3::new(2.0, 1.0, -20.0), 1e-4));
    }

    #[test]
    fn camera_relative_frustum_is_centered_on_the_eye() {
        let world_from_view = Affine3A::from_translation(Vec3::new(500.0, 0.0, 0.0));
        let relative = vbuffer_frustum(&perspective(), &world_from_view, 10.0, true);
        let absolute = vbuffer_frustum(&perspective(), &world_from_view, 10.0, false);
        assert!(relative.contains_point(Vec3::new(0.0, 0.0, -5.0)));
        assert!(absolute.contains_point(Vec3::new(500.0, 0.0, -5.0)));
        assert!(!absolute.contains_point(Vec3::new(0.0, 0.0, -5.0)));
    }
}
