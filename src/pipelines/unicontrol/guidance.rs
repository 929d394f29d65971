//! The per-layer control strength schedule.
//!
//! The control branch injects its signal into the UNet at a fixed number of points, from the semantic bottleneck
//! (deepest) out to the final output blocks (shallowest). Uniform scheduling applies the caller's strength at every
//! injection point. "Guess mode" instead decays the strength geometrically toward the shallow end, keeping structure
//! tight near the output while letting the semantic layers roam, which suits sampling without a meaningful prompt.

/// Number of conditioning injection points in the control UNet. An architectural constant of the reference model:
/// twelve encoder-block residuals plus the middle block.
pub const CONTROL_INJECTION_POINTS: usize = 13;

/// Geometric decay base for the guess-mode schedule. A tuned constant; do not change it casually.
pub const GUESS_MODE_DECAY: f32 = 0.825;

/// Computes the per-injection-point strength schedule.
///
/// In uniform mode every entry equals `strength`. In guess mode, entry `i` is `strength * 0.825^(12-i)`: full
/// strength at the deepest injection point (`i = 12`), attenuating toward the shallowest (`i = 0`).
pub fn control_scales(strength: f32, guess_mode: bool) -> [f32; CONTROL_INJECTION_POINTS] {
	let mut scales = [strength; CONTROL_INJECTION_POINTS];
	if guess_mode {
		for (i, scale) in scales.iter_mut().enumerate() {
			*scale = strength * GUESS_MODE_DECAY.powi((CONTROL_INJECTION_POINTS - 1 - i) as i32);
		}
	}
	scales
}

#[cfg(test)]
mod tests {
	use super::{control_scales, CONTROL_INJECTION_POINTS, GUESS_MODE_DECAY};

	#[test]
	fn uniform_schedule() {
		let scales = control_scales(1.3, false);
		assert_eq!(scales.len(), CONTROL_INJECTION_POINTS);
		assert!(scales.iter().all(|&s| s == 1.3));
	}

	#[test]
	fn guess_mode_decays_toward_shallow_layers() {
		let scales = control_scales(1.0, true);
		assert_eq!(scales[12], 1.0);
		assert!((scales[0] - GUESS_MODE_DECAY.powi(12)).abs() < 1e-6);
		assert!((scales[0] - 0.0984).abs() < 1e-3);
		for i in 1..CONTROL_INJECTION_POINTS {
			assert!(scales[i] > scales[i - 1]);
		}
	}

	#[test]
	fn guess_mode_scales_with_strength() {
		let scales = control_scales(2.0, true);
		assert_eq!(scales[12], 2.0);
		assert!(scales.iter().all(|&s| s > 0.0 && s <= 2.0));
	}
}
