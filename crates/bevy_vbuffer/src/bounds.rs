//! Oriented bounding boxes and the frustum test used to cull density volumes.

use bevy_math::{Affine3A, Vec3, Vec4};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// A box with an arbitrary orientation.
///
/// The third axis isn't stored; it's the cross product of [`Self::right`] and
/// [`Self::up`]. This is also the layout the voxelization shader reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct OrientedBoundingBox {
    /// The unit-length local X axis.
    pub right: Vec3,
    /// Half the size of the box along [`Self::right`].
    pub extent_x: f32,
    /// The unit-length local Y axis.
    pub up: Vec3,
    /// Half the size of the box along [`Self::up`].
    pub extent_y: f32,
    /// The center of the box.
    pub center: Vec3,
    /// Half the size of the box along the third axis.
    pub extent_z: f32,
}

const_assert_eq!(std::mem::size_of::<OrientedBoundingBox>(), 48);

/// A convex volume bounded by six planes, along with its corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    /// The near, far, left, right, bottom, and top planes.
    ///
    /// Each plane is `(normal, d)` with a unit-length normal pointing inward,
    /// so that a point `p` is inside when `normal · p + d >= 0`.
    pub planes: [Vec4; 6],
    /// The four near corners followed by the four far corners, each set in
    /// the order bottom-left, bottom-right, top-right, top-left.
    pub corners: [Vec3; 8],
}

impl OrientedBoundingBox {
    /// Returns the box that a unit cube centered at the origin occupies after
    /// being transformed.
    ///
    /// The transform must not contain shear.
    pub fn from_transform(world_from_local: &Affine3A) -> Self {
        let axes = world_from_local.matrix3;
        OrientedBoundingBox {
            right: Vec3::from(axes.x_axis).normalize_or_zero(),
            extent_x: 0.5 * axes.x_axis.length(),
            up: Vec3::from(axes.y_axis).normalize_or_zero(),
            extent_y: 0.5 * axes.y_axis.length(),
            center: world_from_local.translation.into(),
            extent_z: 0.5 * axes.z_axis.length(),
        }
    }

    /// The unit-length local Z axis.
    #[inline]
    pub fn z_axis(&self) -> Vec3 {
        self.right.cross(self.up)
    }

    /// Returns half the size of the box along each local axis.
    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        Vec3::new(self.extent_x, self.extent_y, self.extent_z)
    }

    /// Returns this box moved by `offset`.
    #[inline]
    pub fn translated(mut self, offset: Vec3) -> Self {
        self.center += offset;
        self
    }

    /// Returns the eight corners of the box.
    pub fn corners(&self) -> [Vec3; 8] {
        let x = self.right * self.extent_x;
        let y = self.up * self.extent_y;
        let z = self.z_axis() * self.extent_z;
        let c = self.center;
        [
            c - x - y - z,
            c + x - y - z,
            c + x + y - z,
            c - x + y - z,
            c - x - y + z,
            c + x - y + z,
            c + x + y + z,
            c - x + y + z,
        ]
    }

    /// Returns true if `point` lies within the box.
    pub fn contains(&self, point: Vec3) -> bool {
        let offset = point - self.center;
        offset.dot(self.right).abs() <= self.extent_x
            && offset.dot(self.up).abs() <= self.extent_y
            && offset.dot(self.z_axis()).abs() <= self.extent_z
    }
}

fn plane_through(a: Vec3, b: Vec3, c: Vec3, inside: Vec3) -> Vec4 {
    let normal = (b - a).cross(c - a).normalize_or_zero();
    let plane = normal.extend(-normal.dot(a));
    if plane.truncate().dot(inside) + plane.w < 0.0 {
        -plane
    } else {
        plane
    }
}

impl Frustum {
    /// Builds a frustum from its eight corners, ordered as in
    /// [`Frustum::corners`].
    pub fn from_corners(corners: [Vec3; 8]) -> Self {
        let inside = corners.iter().copied().sum::<Vec3>() / 8.0;
        let [n0, n1, n2, n3, f0, f1, f2, f3] = corners;
        Frustum {
            planes: [
                plane_through(n0, n1, n2, inside),
                plane_through(f0, f1, f2, inside),
                plane_through(n0, n3, f0, inside),
                plane_through(n1, n2, f1, inside),
                plane_through(n0, n1, f0, inside),
                plane_through(n3, n2, f3, inside),
            ],
            corners,
        }
    }

    /// Returns this frustum moved by `offset`.
    pub fn translated(&self, offset: Vec3) -> Self {
        let corners = self.corners.map(|corner| corner + offset);
        let planes = self
            .planes
            .map(|plane| plane.truncate().extend(plane.w - plane.truncate().dot(offset)));
        Frustum { planes, corners }
    }

    /// Returns true if `point` is inside every plane.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }

    /// Conservatively tests whether the box overlaps this frustum.
    ///
    /// The box is first tested against the frustum planes. If it survives,
    /// the frustum corners are tested against the planes of the box: the
    /// frustum is convex, so if every corner lies outside the same face of
    /// the box the two can't overlap. Some boxes near the frustum edges are
    /// reported as overlapping when they're not.
    pub fn intersects_obb(&self, obb: &OrientedBoundingBox) -> bool {
        let z_axis = obb.z_axis();

        for plane in &self.planes {
            let normal = plane.truncate();
            let projected_radius = obb.extent_x * normal.dot(obb.right).abs()
                + obb.extent_y * normal.dot(obb.up).abs()
                + obb.extent_z * normal.dot(z_axis).abs();
            let center_distance = normal.dot(obb.center) + plane.w;
            if projected_radius + center_distance < 0.0 {
                return false;
            }
        }

        for (axis, extent) in [
            (obb.right, obb.extent_x),
            (obb.up, obb.extent_y),
            (z_axis, obb.extent_z),
        ] {
            let (mut all_above, mut all_below) = (true, true);
            for corner in &self.corners {
                let projection = axis.dot(*corner - obb.center);
                all_above &= projection > extent;
                all_below &= -projection > extent;
            }
            if all_above || all_below {
                return false;
            }
        }

        true
    }
}
