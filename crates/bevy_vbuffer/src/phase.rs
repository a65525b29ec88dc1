//! The Cornette-Shanks phase function.

use std::f32::consts::PI;

/// The part of the Cornette-Shanks phase function that depends only on the
/// anisotropy `g`:
///
/// ```text
/// (1 / 4π) · 1.5 · (1 − g²) / (2 + g²)
/// ```
///
/// The lighting shader multiplies this by the angular part
/// `(1 + cos²θ) / (1 + g² − 2g·cosθ)^1.5` for each light.
#[inline]
pub fn cornette_shanks_phase_partial_constant(anisotropy: f32) -> f32 {
    let g2 = anisotropy * anisotropy;
    (1.0 / (4.0 * PI)) * 1.5 * (1.0 - g2) / (2.0 + g2)
}

/// Evaluates the full Cornette-Shanks phase function for the cosine of the
/// angle between the incoming and outgoing light directions.
pub fn cornette_shanks_phase(anisotropy: f32, cos_theta: f32) -> f32 {
    let g = anisotropy;
    let denominator = (1.0 + g * g - 2.0 * g * cos_theta).max(1e-6);
    cornette_shanks_phase_partial_constant(g) * (1.0 + cos_theta * cos_theta)
        / (denominator * denominator.sqrt())
}
