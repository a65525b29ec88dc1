//! Conversions between the optical quantities used by participating media.
//!
//! All of these are pure functions. None of them guard against a zero
//! extinction coefficient: dividing by zero yields infinity, and callers are
//! expected to keep the mean free path finite and at least 1.

use bevy_math::Vec3;

/// Returns the mean free path, the average distance a photon travels before
/// an interaction, for the given extinction coefficient.
#[inline]
pub fn mean_free_path_from_extinction(extinction: f32) -> f32 {
    1.0 / extinction
}

/// Returns the extinction coefficient for the given mean free path.
#[inline]
pub fn extinction_from_mean_free_path(mean_free_path: f32) -> f32 {
    1.0 / mean_free_path
}

/// Returns the per-channel absorption coefficient.
///
/// Extinction is the sum of absorption and out-scattering.
#[inline]
pub fn absorption_from_extinction_and_scattering(extinction: f32, scattering: Vec3) -> Vec3 {
    Vec3::splat(extinction) - scattering
}

/// Returns the per-channel scattering coefficient for a medium with the given
/// extinction coefficient and single-scattering albedo.
#[inline]
pub fn scattering_from_extinction_and_albedo(extinction: f32, albedo: Vec3) -> Vec3 {
    extinction * albedo
}

/// Recovers the single-scattering albedo from the mean free path and the
/// scattering coefficient.
///
/// This is `scattering / extinction`, written as a multiplication since the
/// mean free path is the reciprocal of the extinction.
#[inline]
pub fn albedo_from_mean_free_path_and_scattering(mean_free_path: f32, scattering: Vec3) -> Vec3 {
    mean_free_path * scattering
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extinction_round_trip() {
        for x in [0.001, 0.1, 0.5, 1.0, 3.0, 250.0] {
            let round_tripped = extinction_from_mean_free_path(mean_free_path_from_extinction(x));
            assert!((round_tripped - x).abs() <= x * 1e-6, "{x} -> {round_tripped}");
        }
    }

    #[test]
    fn scattering_and_albedo_are_inverse() {
        let mean_free_path = 10.0;
        let extinction = extinction_from_mean_free_path(mean_free_path);
        let albedo = Vec3::new(0.25, 0.5, 1.0);

        let scattering = scattering_from_extinction_and_albedo(extinction, albedo);
        assert!(scattering.abs_diff_eq(Vec3::new(0.025, 0.05, 0.1), 1e-6));

        let recovered = albedo_from_mean_free_path_and_scattering(mean_free_path, scattering);
        assert!(recovered.abs_diff_eq(albedo, 1e-6));
    }

    #[test]
    fn absorption_is_what_scattering_leaves_over() {
        let absorption = absorption_from_extinction_and_scattering(0.1, Vec3::new(0.05, 0.1, 0.0));
        assert!(absorption.abs_diff_eq(Vec3::new(0.05, 0.0, 0.1), 1e-6));
    }

    #[test]
    fn zero_extinction_is_infinite_not_a_panic() {
        assert!(mean_free_path_from_extinction(0.0).is_infinite());
    }
}
