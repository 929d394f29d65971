//! Converts a soft HED edge map into a hand-drawn-style sketch via a bounded binarization-threshold search.

use image::{imageops, Rgb, RgbImage};
use rand::Rng;

/// Attempts before the search gives up and accepts the last result. Degraded-but-valid output, never an error.
const MAX_ATTEMPTS: usize = 6;
/// Channel values below this count as "near-black" sketch strokes.
const NEAR_BLACK: u8 = 5;
/// Fraction of `H*W` that must be near-black for a candidate sketch to be accepted.
const ACCEPT_FRACTION: f64 = 0.005;

/// Searches for a binarization threshold in [110, 160) that yields a sketch with enough dark strokes.
///
/// Each attempt thresholds the edge map at a random value, inverts it, smooths it with a 3x3 Gaussian, and rescales
/// contrast. A candidate is accepted once the count of near-black channel values exceeds 0.5% of the pixel count; the
/// loop is capped at 6 attempts, after which the last candidate is returned as-is. Thresholds are drawn from the
/// caller's RNG; the pipeline deliberately feeds an unseeded RNG here, as detector randomness is outside the request's
/// reproducibility contract.
pub(crate) fn sketch_from_edges<R: Rng + ?Sized>(edges: &RgbImage, rng: &mut R) -> RgbImage {
	let (width, height) = edges.dimensions();
	let accept_count = (ACCEPT_FRACTION * f64::from(width) * f64::from(height)) as usize;

	let mut sketch = edges.clone();
	for attempt in 0..MAX_ATTEMPTS {
		let threshold: u8 = rng.gen_range(110..160);

		let mut inverted = RgbImage::new(width, height);
		for (x, y, pixel) in edges.enumerate_pixels() {
			let binarized = pixel.0.map(|v| if v > threshold { 255u8 } else { 0 });
			inverted.put_pixel(x, y, Rgb(binarized.map(|v| 255 - v)));
		}

		// 3x3 Gaussian (OpenCV sigma-from-kernel rule gives 0.8), then contrast rescale: v' = 1.5v + 50
		let smoothed = imageops::blur(&inverted, 0.8);
		let mut candidate = RgbImage::new(width, height);
		for (x, y, pixel) in smoothed.enumerate_pixels() {
			candidate.put_pixel(x, y, Rgb(pixel.0.map(|v| (f32::from(v) * 1.5 + 50.0).clamp(0.0, 255.0) as u8)));
		}

		let near_black = candidate.pixels().flat_map(|p| p.0).filter(|&v| v < NEAR_BLACK).count();
		sketch = candidate;
		if near_black > accept_count || attempt == MAX_ATTEMPTS - 1 {
			break;
		}
	}
	sketch
}

#[cfg(test)]
mod tests {
	use image::{Rgb, RgbImage};
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	use super::sketch_from_edges;

	#[test]
	fn terminates_on_pathological_input() {
		// an edge-free (all-black) map inverts to all-white and can never satisfy the near-black criterion; the
		// search must still return after the attempt cap, with output dimensions preserved
		let edges = RgbImage::from_pixel(32, 16, Rgb([0, 0, 0]));
		let mut rng = StdRng::seed_from_u64(7);
		let sketch = sketch_from_edges(&edges, &mut rng);
		assert_eq!(sketch.dimensions(), (32, 16));
		// every candidate stays bright after contrast rescale
		assert!(sketch.pixels().all(|p| p.0.iter().all(|&v| v > 200)));
	}

	#[test]
	fn strong_edges_produce_dark_strokes() {
		// a solid white band (strong detected edge) binarizes to dark strokes regardless of the threshold drawn;
		// after the contrast rescale a pure-black stroke sits at value 50
		let mut edges = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
		for y in 12..20 {
			for x in 0..32 {
				edges.put_pixel(x, y, Rgb([255, 255, 255]));
			}
		}
		let mut rng = StdRng::seed_from_u64(7);
		let sketch = sketch_from_edges(&edges, &mut rng);
		assert_eq!(sketch.dimensions(), (32, 32));
		assert!(sketch.get_pixel(16, 16).0[0] <= 60);
		assert!(sketch.get_pixel(16, 2).0[0] > 200);
	}
}
