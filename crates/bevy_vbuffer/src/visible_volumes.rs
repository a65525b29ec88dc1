//! Culling density volumes against a view.

use bevy_math::{Affine3A, Vec3};

use crate::{
    bounds::{Frustum, OrientedBoundingBox},
    density_volume::{DensityVolumeData, DensityVolumeParameters},
};

/// The maximum number of density volumes that a single view can see.
///
/// Volumes past this limit are dropped, in the order the caller supplied
/// them.
pub const MAX_VISIBLE_VOLUMES: usize = 512;

/// The density volumes visible to a single view, in the form the voxelization
/// shader consumes.
///
/// `bounds` and `data` are parallel arrays: entry `i` of both describes the
/// same volume.
#[derive(Clone, Debug, Default)]
pub struct VisibleVolumeList {
    bounds: Vec<OrientedBoundingBox>,
    data: Vec<DensityVolumeData>,
}

impl VisibleVolumeList {
    /// Creates an empty list with room for [`MAX_VISIBLE_VOLUMES`] volumes.
    pub fn new() -> Self {
        VisibleVolumeList {
            bounds: Vec::with_capacity(MAX_VISIBLE_VOLUMES),
            data: Vec::with_capacity(MAX_VISIBLE_VOLUMES),
        }
    }

    /// Empties the list, keeping its allocation.
    pub fn clear(&mut self) {
        self.bounds.clear();
        self.data.clear();
    }

    /// Appends a volume.
    ///
    /// Returns false, without appending anything, if the list is full.
    pub fn push(&mut self, bounds: OrientedBoundingBox, data: DensityVolumeData) -> bool {
        if self.is_full() {
            return false;
        }
        self.bounds.push(bounds);
        self.data.push(data);
        true
    }

    /// The number of visible volumes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Returns true if no volume is visible.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Returns true if no more volumes can be added.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= MAX_VISIBLE_VOLUMES
    }

    /// The bounding boxes of the visible volumes.
    #[inline]
    pub fn bounds(&self) -> &[OrientedBoundingBox] {
        &self.bounds
    }

    /// The optical properties of the visible volumes.
    #[inline]
    pub fn data(&self) -> &[DensityVolumeData] {
        &self.data
    }
}

/// Replaces the contents of `list` with the first [`MAX_VISIBLE_VOLUMES`]
/// volumes that overlap `frustum`.
///
/// `frustum` must be in the same space as the volumes after `origin` has been
/// subtracted from their positions. Pass the camera position as `origin` for
/// camera-relative rendering, and [`Vec3::ZERO`] otherwise. The stored boxes
/// are in that space too.
///
/// Volumes after the list fills up are neither tested nor reported.
pub fn collect_visible_volumes<I>(
    volumes: I,
    frustum: &Frustum,
    origin: Vec3,
    list: &mut VisibleVolumeList,
) where
    I: IntoIterator<Item = (Affine3A, DensityVolumeParameters)>,
{
    list.clear();

    for (world_from_local, parameters) in volumes {
        let bounds = OrientedBoundingBox::from_transform(&world_from_local).translated(-origin);
        if !frustum.intersects_obb(&bounds) {
            continue;
        }
        list.push(bounds, parameters.to_data());
        if list.is_full() {
            break;
        }
    }
}
