//! Sizing of the V-buffer and its logarithmic depth parameterization.
//!
//! The V-buffer is a 3D grid aligned with the view frustum. Its X and Y axes
//! cover screen-space tiles; its Z axis covers view-space depth from the near
//! plane to a configurable depth extent. Slices are not distributed uniformly
//! in depth. Instead, depth `z` maps to the normalized slice coordinate
//!
//! ```text
//! d(z) = log2(c·(z − n) + 1) / log2(c·(f − n) + 1)
//! ```
//!
//! where `n` and `f` are the near plane and depth extent and `c` controls how
//! strongly slices crowd toward the camera. As `c` approaches zero the
//! distribution becomes linear.

use bevy_math::{UVec3, Vec2, Vec4};

use crate::preset::VolumetricLightingPreset;

/// The X and Y size of the workgroups of both V-buffer compute kernels.
///
/// Each invocation covers one voxel column and loops over every depth slice,
/// so the Z size is 1.
pub const VBUFFER_WORKGROUP_SIZE: u32 = 8;

/// The smallest value of the depth distribution curvature `c`.
///
/// `log2(c)` diverges at zero.
pub const MIN_DEPTH_DISTRIBUTION_CURVATURE: f32 = 0.001;

/// The dimensions of the V-buffer for some screen size.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VBufferResolution {
    /// The number of voxel columns along the X axis.
    pub width: u32,
    /// The number of voxel rows along the Y axis.
    pub height: u32,
    /// The number of depth slices.
    pub depth: u32,
    /// The fraction of the grid along each axis that actually overlaps the
    /// viewport.
    ///
    /// The grid dimensions are rounded up, so the last column and row may
    /// extend past the edge of the screen. This is informational only.
    pub scale: Vec2,
}

/// The per-view constants that describe the layout of the V-buffer.
///
/// These are computed once per view per frame and copied into the shader
/// uniforms of both V-buffer passes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VBufferParameters {
    /// `(width, height, 1 / width, 1 / height)`.
    pub resolution: Vec4,
    /// `(depth, 1 / depth)`.
    pub slice_count: Vec2,
    /// Coefficients mapping linear view depth to a normalized slice
    /// coordinate. See [`encode_logarithmic_depth`].
    pub depth_encoding_params: Vec4,
    /// Coefficients mapping a normalized slice coordinate back to linear view
    /// depth. See [`decode_logarithmic_depth`].
    pub depth_decoding_params: Vec4,
}

impl VBufferResolution {
    /// Returns `(width, height, depth)`.
    #[inline]
    pub fn extent(&self) -> UVec3 {
        UVec3::new(self.width, self.height, self.depth)
    }

    /// Returns true if the grid contains no voxels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }

    /// Returns the number of workgroups that the voxelization and lighting
    /// kernels dispatch to cover this grid.
    #[inline]
    pub fn workgroup_count(&self) -> UVec3 {
        UVec3::new(
            self.width.div_ceil(VBUFFER_WORKGROUP_SIZE),
            self.height.div_ceil(VBUFFER_WORKGROUP_SIZE),
            1,
        )
    }
}

/// Computes the V-buffer grid for a screen of the given size.
///
/// With [`VolumetricLightingPreset::Off`] this is the empty grid.
pub fn compute_resolution_and_scale(
    preset: VolumetricLightingPreset,
    screen_width: u32,
    screen_height: u32,
) -> VBufferResolution {
    let tile_size = preset.tile_size();
    if tile_size == 0 {
        return VBufferResolution::default();
    }

    let width = screen_width.div_ceil(tile_size);
    let height = screen_height.div_ceil(tile_size);

    VBufferResolution {
        width,
        height,
        depth: preset.slice_count(),
        scale: Vec2::new(
            coverage(screen_width, width * tile_size),
            coverage(screen_height, height * tile_size),
        ),
    }
}

fn coverage(screen_size: u32, grid_size_in_pixels: u32) -> f32 {
    if grid_size_in_pixels == 0 {
        0.0
    } else {
        screen_size as f32 / grid_size_in_pixels as f32
    }
}

fn recip_or_zero(value: u32) -> f32 {
    if value == 0 {
        0.0
    } else {
        1.0 / value as f32
    }
}

/// Remaps the user-facing slice distribution uniformity in `[0, 1]` to the
/// curvature `c` in `[2, 0]`.
///
/// A uniformity of 1 yields an (almost) linear distribution of slices.
#[inline]
pub fn depth_distribution_curvature(slice_distribution_uniformity: f32) -> f32 {
    2.0 - 2.0 * slice_distribution_uniformity.clamp(0.0, 1.0)
}

/// Computes the coefficients that [`encode_logarithmic_depth`] takes.
///
/// The result is `(log2(c)·b, b, n − 1/c, 0)` with
/// `b = 1 / log2(c·(f − n) + 1)`.
///
/// Depths are offset by `1/c` before the logarithm, so in `f32` a round trip
/// through [`encode_logarithmic_depth`] and [`decode_logarithmic_depth`] is
/// accurate to about `1e-6 · (z + 1/c)`. That's well within `1e-4` relative
/// error for `c >= 0.5` (slice uniformity up to the default 0.75), but nearly
/// uniform slices with a small near plane lose precision close to the camera.
pub fn logarithmic_depth_encoding_params(near: f32, far: f32, curvature: f32) -> Vec4 {
    let c = curvature.max(MIN_DEPTH_DISTRIBUTION_CURVATURE);
    let y = 1.0 / (c * (far - near) + 1.0).log2();
    let x = c.log2() * y;
    let z = near - 1.0 / c;
    Vec4::new(x, y, z, 0.0)
}

/// Computes the coefficients that [`decode_logarithmic_depth`] takes.
///
/// The result is `(1/c, log2(c·(f − n) + 1), n − 1/c, 0)`.
pub fn logarithmic_depth_decoding_params(near: f32, far: f32, curvature: f32) -> Vec4 {
    let c = curvature.max(MIN_DEPTH_DISTRIBUTION_CURVATURE);
    let x = 1.0 / c;
    let y = (c * (far - near) + 1.0).log2();
    let z = near - 1.0 / c;
    Vec4::new(x, y, z, 0.0)
}

/// Maps linear view depth to a normalized slice coordinate.
///
/// The near plane maps to 0 and the far plane to 1. This is the same formula
/// the shaders use.
#[inline]
pub fn encode_logarithmic_depth(linear_depth: f32, encoding_params: Vec4) -> f32 {
    encoding_params.x + encoding_params.y * (linear_depth - encoding_params.z).max(0.0).log2()
}

/// Maps a normalized slice coordinate back to linear view depth.
#[inline]
pub fn decode_logarithmic_depth(slice_coordinate: f32, decoding_params: Vec4) -> f32 {
    decoding_params.x * (slice_coordinate * decoding_params.y).exp2() + decoding_params.z
}

impl VBufferParameters {
    /// Computes the parameters for a grid of the given size that spans view
    /// depths from `near` to `far`.
    pub fn new(
        width: u32,
        height: u32,
        depth: u32,
        near: f32,
        far: f32,
        slice_distribution_uniformity: f32,
    ) -> Self {
        let curvature = depth_distribution_curvature(slice_distribution_uniformity);
        VBufferParameters {
            resolution: Vec4::new(
                width as f32,
                height as f32,
                recip_or_zero(width),
                recip_or_zero(height),
            ),
            slice_count: Vec2::new(depth as f32, recip_or_zero(depth)),
            depth_encoding_params: logarithmic_depth_encoding_params(near, far, curvature),
            depth_decoding_params: logarithmic_depth_decoding_params(near, far, curvature),
        }
    }

    /// Computes the parameters for the given grid.
    pub fn from_resolution(
        resolution: &VBufferResolution,
        near: f32,
        far: f32,
        slice_distribution_uniformity: f32,
    ) -> Self {
        Self::new(
            resolution.width,
            resolution.height,
            resolution.depth,
            near,
            far,
            slice_distribution_uniformity,
        )
    }

    /// Returns `(width, height, depth)`.
    pub fn extent(&self) -> UVec3 {
        UVec3::new(
            self.resolution.x as u32,
            self.resolution.y as u32,
            self.slice_count.x as u32,
        )
    }

    /// Maps linear view depth to a normalized slice coordinate in `[0, 1]`.
    #[inline]
    pub fn encode_depth(&self, linear_depth: f32) -> f32 {
        encode_logarithmic_depth(linear_depth, self.depth_encoding_params)
    }

    /// Maps a normalized slice coordinate back to linear view depth.
    #[inline]
    pub fn decode_depth(&self, slice_coordinate: f32) -> f32 {
        decode_logarithmic_depth(slice_coordinate, self.depth_decoding_params)
    }

    /// Returns the (fractional) slice index at the given linear view depth.
    #[inline]
    pub fn depth_to_slice(&self, linear_depth: f32) -> f32 {
        self.encode_depth(linear_depth) * self.slice_count.x
    }

    /// Returns the linear view depth at the given (fractional) slice index.
    ///
    /// Pass `i + 0.5` for the center of slice `i`.
    #[inline]
    pub fn slice_to_depth(&self, slice: f32) -> f32 {
        self.decode_depth(slice * self.slice_count.y)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    /// Round trips depths spread over `[near, far]` and returns the worst
    /// relative error, and the worst error relative to `z + 1/c`.
    fn round_trip_errors(near: f32, far: f32, uniformity: f32) -> (f32, f32) {
        let parameters = VBufferParameters::new(1, 1, 64, near, far, uniformity);
        let curvature =
            depth_distribution_curvature(uniformity).max(MIN_DEPTH_DISTRIBUTION_CURVATURE);
        let (mut relative, mut scaled) = (0.0f32, 0.0f32);
        for i in 0..=256 {
            let z = near + (far - near) * i as f32 / 256.0;
            let error = (parameters.decode_depth(parameters.encode_depth(z)) - z).abs();
            relative = relative.max(error / z);
            scaled = scaled.max(error / (z + curvature.recip()));
        }
        (relative, scaled)
    }

    #[test]
    fn normal_1080p() {
        let resolution = compute_resolution_and_scale(VolumetricLightingPreset::Normal, 1920, 1080);
        assert_eq!(resolution.extent(), UVec3::new(240, 135, 64));
        assert_eq!(resolution.scale, Vec2::ONE);
        assert_eq!(resolution.workgroup_count(), UVec3::new(30, 17, 1));
    }

    #[test]
    fn ultra_1080p() {
        let resolution = compute_resolution_and_scale(VolumetricLightingPreset::Ultra, 1920, 1080);
        assert_eq!(resolution.extent(), UVec3::new(480, 270, 128));
    }

    #[test]
    fn grid_overshoots_the_screen() {
        let resolution = compute_resolution_and_scale(VolumetricLightingPreset::Normal, 1000, 701);
        assert_eq!(resolution.width, 125);
        assert_eq!(resolution.height, 88);
        assert_eq!(resolution.scale.x, 1.0);
        assert!((resolution.scale.y - 701.0 / 704.0).abs() < 1e-6);
    }

    #[test]
    fn sizing_is_pure() {
        for preset in [
            VolumetricLightingPreset::Off,
            VolumetricLightingPreset::Normal,
            VolumetricLightingPreset::Ultra,
        ] {
            assert_eq!(
                compute_resolution_and_scale(preset, 1283, 719),
                compute_resolution_and_scale(preset, 1283, 719)
            );
        }
    }

    #[test]
    fn off_is_empty() {
        let resolution = compute_resolution_and_scale(VolumetricLightingPreset::Off, 1920, 1080);
        assert!(resolution.is_empty());
        assert_eq!(resolution.scale, Vec2::ZERO);
    }

    #[test]
    fn curvature_from_uniformity() {
        assert_eq!(depth_distribution_curvature(0.0), 2.0);
        assert_eq!(depth_distribution_curvature(0.75), 0.5);
        assert_eq!(depth_distribution_curvature(1.0), 0.0);
        assert_eq!(depth_distribution_curvature(7.0), 0.0);
    }

    #[test]
    fn encoding_spans_unit_interval() {
        let parameters = VBufferParameters::new(240, 135, 64, 0.5, 64.0, 0.75);
        assert!(parameters.encode_depth(0.5).abs() < 1e-6);
        assert!((parameters.encode_depth(64.0) - 1.0).abs() < 1e-5);
        assert!((parameters.slice_to_depth(0.0) - 0.5).abs() < 1e-5);
        assert!((parameters.slice_to_depth(64.0) - 64.0).abs() < 1e-3);
    }

    #[test]
    fn encoding_example() {
        // c = 2 - 2 * 0.75 = 0.5
        let (near, far) = (0.5, 64.0);
        let encoding = logarithmic_depth_encoding_params(near, far, 0.5);
        let decoding = logarithmic_depth_decoding_params(near, far, 0.5);

        let b = 1.0 / (0.5f32 * 63.5 + 1.0).log2();
        assert!((encoding.y - b).abs() < 1e-6);
        assert!((encoding.x + b).abs() < 1e-6);
        assert_eq!(encoding.z, -1.5);
        assert_eq!(decoding.x, 2.0);
        assert!((decoding.y - 1.0 / b).abs() < 1e-5);
        assert_eq!(decoding.z, -1.5);

        for z in [1.0, 64.0] {
            let d = encode_logarithmic_depth(z, encoding);
            let round_tripped = decode_logarithmic_depth(d, decoding);
            assert!((round_tripped - z).abs() <= 1e-4 * z);
        }
        let (relative, _) = round_trip_errors(near, far, 0.75);
        assert!(relative <= 1e-4, "relative error {relative}");
    }

    #[test]
    fn slices_crowd_toward_the_camera() {
        let parameters = VBufferParameters::new(1, 1, 64, 0.1, 100.0, 0.0);
        let first = parameters.slice_to_depth(1.0) - parameters.slice_to_depth(0.0);
        let last = parameters.slice_to_depth(64.0) - parameters.slice_to_depth(63.0);
        assert!(last > first * 10.0);

        // Full uniformity clamps to the minimum curvature, which is nearly
        // linear.
        let parameters = VBufferParameters::new(1, 1, 64, 0.1, 100.0, 1.0);
        let first = parameters.slice_to_depth(1.0) - parameters.slice_to_depth(0.0);
        let last = parameters.slice_to_depth(64.0) - parameters.slice_to_depth(63.0);
        assert!(last / first < 1.2);
    }

    #[test]
    fn depth_to_slice_inverts_slice_to_depth() {
        let parameters = VBufferParameters::new(1, 1, 128, 0.3, 200.0, 0.5);
        for slice in 0..128 {
            let center = slice as f32 + 0.5;
            let depth = parameters.slice_to_depth(center);
            assert!((parameters.depth_to_slice(depth) - center).abs() < 1e-3);
        }
    }

    #[test]
    fn round_trip_random() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let near = rng.gen_range(0.01..2.0);
            let far = near + rng.gen_range(1.0..1000.0);
            let uniformity = rng.gen_range(0.0..=0.75);
            let (relative, _) = round_trip_errors(near, far, uniformity);
            assert!(
                relative <= 1e-4,
                "n={near} f={far} u={uniformity}: relative error {relative}"
            );
        }
    }

    #[test]
    fn nearly_uniform_slices_lose_precision_near_the_camera() {
        // c = 0.001 shifts depths by 1000 before the logarithm, so f32 only
        // resolves about 1e-4 there: z = 0.01 comes back as ~0.01001.
        let (relative, scaled) = round_trip_errors(0.01, 1000.0, 1.0);
        assert!(relative > 1e-4);
        assert!(scaled <= 1e-5, "scaled error {scaled}");

        let mut rng = StdRng::seed_from_u64(0xc0ffee);
        for _ in 0..200 {
            let near = rng.gen_range(0.01..2.0);
            let far = near + rng.gen_range(1.0..1000.0);
            let uniformity = rng.gen_range(0.0..=1.0);
            let (_, scaled) = round_trip_errors(near, far, uniformity);
            assert!(
                scaled <= 1e-5,
                "n={near} f={far} u={uniformity}: scaled error {scaled}"
            );
        }
    }

    #[test]
    fn slice_centers_encode_to_texel_centers() {
        // A voxel center reprojected with a static camera must land on the
        // center of the same texel, not on the boundary with the next one.
        let parameters = VBufferParameters::new(1, 1, 64, 0.5, 64.0, 0.75);
        for slice in 0..64 {
            let center = parameters.slice_to_depth(slice as f32 + 0.5);
            let coordinate = parameters.encode_depth(center) * parameters.slice_count.x;
            assert!((coordinate - (slice as f32 + 0.5)).abs() < 1e-3);

            let back = parameters.slice_to_depth(slice as f32 + 1.0);
            let coordinate = parameters.encode_depth(back) * parameters.slice_count.x;
            assert!((coordinate - (slice as f32 + 1.0)).abs() < 1e-3);
        }
    }
}
