//! The per-frame sub-voxel sample offsets.
//!
//! Each voxel is sampled at a different position every frame; temporal
//! reprojection then accumulates the samples. The XY offsets form a hexagon
//! around the voxel center, rotated by 15° so that no two samples share a
//! row or column. The Z offsets are 7 equidistant values, ordered so that the
//! running mean stays close to the middle of the slice.

use bevy_math::{Vec2, Vec4};

/// The number of frames after which the sample pattern repeats.
pub const JITTER_SEQUENCE_LENGTH: u32 = 7;

/// The spacing of the hexagonal pattern. Neighboring samples are `2 * r`
/// apart, so the outer ring sits at `2 * r` from the center.
const HEXAGON_RADIUS: f32 = 0.170_540_7;

const COS_15: f32 = 0.965_925_8;
const SIN_15: f32 = 0.258_819_04;

const DEPTH_SEQUENCE: [f32; JITTER_SEQUENCE_LENGTH as usize] = [
    7.0 / 14.0,
    3.0 / 14.0,
    11.0 / 14.0,
    5.0 / 14.0,
    9.0 / 14.0,
    1.0 / 14.0,
    13.0 / 14.0,
];

// Unrotated hexagon. Opposite points follow each other so that the running
// mean stays near the center:
//
//  (7)(5)
// (2)(1)(3)
//  (4)(6)
fn hexagon_sample(index: usize) -> Vec2 {
    let r = HEXAGON_RADIUS;
    let d = 2.0 * r;
    let s = r * 3.0f32.sqrt();
    match index {
        1 => Vec2::new(-d, 0.0),
        2 => Vec2::new(d, 0.0),
        3 => Vec2::new(-r, -s),
        4 => Vec2::new(r, s),
        5 => Vec2::new(r, -s),
        6 => Vec2::new(-r, s),
        _ => Vec2::ZERO,
    }
}

/// Returns the sample offset for the given frame.
///
/// `x` and `y` are offsets from the voxel center in units of voxels; `z` is
/// the position within the slice, in `(0, 1)`. `w` is the frame index, which
/// the shaders use to seed per-frame noise.
pub fn jitter_offset(frame_index: u32) -> Vec4 {
    let index = (frame_index % JITTER_SEQUENCE_LENGTH) as usize;
    let xy = hexagon_sample(index);
    let rotated = Vec2::new(xy.x * COS_15 - xy.y * SIN_15, xy.x * SIN_15 + xy.y * COS_15);
    Vec4::new(rotated.x, rotated.y, DEPTH_SEQUENCE[index], frame_index as f32)
}

/// An endless iterator over the sample offsets of consecutive frames.
///
/// Cloning the iterator restarts the sequence from the clone's position.
#[derive(Clone, Debug, Default)]
pub struct JitterSequence {
    frame_index: u32,
}

impl JitterSequence {
    /// Starts the sequence at the given frame.
    pub fn starting_at(frame_index: u32) -> Self {
        JitterSequence { frame_index }
    }
}

impl Iterator for JitterSequence {
    type Item = Vec4;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = jitter_offset(self.frame_index);
        self.frame_index = self.frame_index.wrapping_add(1);
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_offsets_average_to_the_slice_center() {
        let mean: f32 = JitterSequence::default()
            .take(JITTER_SEQUENCE_LENGTH as usize)
            .map(|offset| offset.z)
            .sum::<f32>()
            / JITTER_SEQUENCE_LENGTH as f32;
        assert!((mean - 0.5).abs() < 1e-6);
    }

    #[test]
    fn xy_offsets_are_distinct_and_centered() {
        let offsets: Vec<Vec4> = JitterSequence::default().take(7).collect();
        for (i, a) in offsets.iter().enumerate() {
            assert!(a.x.abs() < 0.5 && a.y.abs() < 0.5);
            for b in &offsets[i + 1..] {
                assert!(a.x != b.x || a.y != b.y);
                // The rotation keeps every row and column distinct.
                assert!((a.x - b.x).abs() > 1e-3);
                assert!((a.y - b.y).abs() > 1e-3);
            }
        }
        let sum = offsets.iter().fold(Vec2::ZERO, |sum, o| sum + o.truncate().truncate());
        assert!(sum.length() < 1e-5);
    }

    #[test]
    fn sequence_repeats_every_seven_frames() {
        for frame in 0..32 {
            let a = jitter_offset(frame);
            let b = jitter_offset(frame + JITTER_SEQUENCE_LENGTH);
            assert_eq!(a.truncate(), b.truncate());
            assert_eq!(b.w, (frame + JITTER_SEQUENCE_LENGTH) as f32);
        }
        assert_eq!(jitter_offset(0).truncate().truncate(), Vec2::ZERO);
        assert_eq!(jitter_offset(0).z, 0.5);
    }

    #[test]
    fn iterator_restarts_from_a_clone() {
        let mut sequence = JitterSequence::starting_at(5);
        let restarted = sequence.clone();
        let first: Vec<Vec4> = sequence.by_ref().take(3).collect();
        let again: Vec<Vec4> = restarted.take(3).collect();
        assert_eq!(first, again);
        assert_eq!(sequence.next(), Some(jitter_offset(8)));
    }
}
