//! The Preprocessor Adapter: input canvas normalization, resizing, per-task detector dispatch, and resampling of the
//! detected map to the generation resolution.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Pixel, Rgb, RgbImage};

use super::{bbox, sketch, AnnotatorParams, AnnotatorSuite, ConditionExtraction, ControlMap};
use crate::tasks::Task;

/// Normalizes an arbitrary input into a 3-channel canvas: luma broadcasts to RGB, and alpha channels are composited
/// over white.
pub(crate) fn to_rgb_canvas(image: &DynamicImage) -> RgbImage {
	match image {
		DynamicImage::ImageRgb8(rgb) => rgb.clone(),
		DynamicImage::ImageRgba8(rgba) => {
			let mut out = RgbImage::new(rgba.width(), rgba.height());
			for (x, y, pixel) in rgba.enumerate_pixels() {
				let [r, g, b, a] = pixel.0;
				let blend = |v: u8| {
					let alpha = f32::from(a) / 255.0;
					(f32::from(v) * alpha + 255.0 * (1.0 - alpha)).round() as u8
				};
				out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
			}
			out
		}
		other => {
			let luma_like = matches!(other, DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_));
			if luma_like {
				let luma = other.to_luma8();
				let mut out = RgbImage::new(luma.width(), luma.height());
				for (x, y, pixel) in luma.enumerate_pixels() {
					out.put_pixel(x, y, pixel.to_rgb());
				}
				out
			} else {
				other.to_rgb8()
			}
		}
	}
}

/// Resizes so the longest side matches `resolution`, preserving aspect ratio, with each side rounded to the nearest
/// multiple of 64 (the UNet's effective stride granularity).
pub(crate) fn resize_to_side(image: &RgbImage, resolution: u32) -> anyhow::Result<RgbImage> {
	let (width, height) = image.dimensions();
	if width == 0 || height == 0 {
		anyhow::bail!("input image has a zero-area dimension ({width}x{height})");
	}
	if resolution == 0 {
		anyhow::bail!("target resolution must be > 0");
	}
	let k = f64::from(resolution) / f64::from(width.max(height));
	let round64 = |side: u32| ((((f64::from(side) * k) / 64.0).round() as u32) * 64).max(64);
	Ok(imageops::resize(image, round64(width), round64(height), FilterType::Lanczos3))
}

/// Resamples a detected map to the generation resolution. Continuous-valued maps interpolate linearly; categorical
/// maps (segmentation, pose, bounding boxes) use nearest-neighbor so no colors outside the label set appear along
/// boundaries.
pub(crate) fn resample(image: &RgbImage, width: u32, height: u32, categorical: bool) -> RgbImage {
	if image.dimensions() == (width, height) {
		return image.clone();
	}
	let filter = if categorical { FilterType::Nearest } else { FilterType::Triangle };
	imageops::resize(image, width, height, filter)
}

/// Normalizes `image` into a control map for `task` at the generation resolution.
///
/// With [`ConditionExtraction::Detect`], the task's collaborator from `suite` produces the structural map, at its
/// task-appropriate resolution, and the result is resampled to the generation resolution. With
/// [`ConditionExtraction::Raw`], detection is bypassed and the resized input is used verbatim (inverted for Canny).
///
/// Fails on a zero-area input, on a task with no registered collaborator, and on an object-detection label outside
/// the palette.
pub fn extract(
	suite: &AnnotatorSuite,
	task: Task,
	image: &DynamicImage,
	image_resolution: u32,
	detect_resolution: u32,
	params: &AnnotatorParams,
	extraction: ConditionExtraction
) -> anyhow::Result<ControlMap> {
	let canvas = to_rgb_canvas(image);
	let resized = resize_to_side(&canvas, image_resolution)?;
	let (width, height) = resized.dimensions();

	let detected = match extraction {
		ConditionExtraction::Raw => {
			let mut map = resized;
			if task.visualize_inverted() {
				for pixel in map.pixels_mut() {
					for chan in &mut pixel.0 {
						*chan = 255 - *chan;
					}
				}
			}
			map
		}
		ConditionExtraction::Detect => match task {
			Task::Bbox => {
				// detection runs on the full-size canvas; the painted mask is resampled with the map
				let detections = suite.object_detector()?.detect(&canvas, params.bbox_confidence, params.bbox_nms_threshold)?;
				bbox::paint_detections(canvas.width(), canvas.height(), &detections)?
			}
			Task::HedSketch => {
				let edges = suite.annotator_for(task)?.annotate(&resize_to_side(&canvas, detect_resolution)?, params)?;
				// threshold search randomness is deliberately independent of the request seed
				sketch::sketch_from_edges(&edges, &mut rand::thread_rng())
			}
			task if task.uses_detect_resolution() => suite.annotator_for(task)?.annotate(&resize_to_side(&canvas, detect_resolution)?, params)?,
			// canny detects at the generation resolution; the remaining tasks transform the resized input directly
			task => suite.annotator_for(task)?.annotate(&resized, params)?
		}
	};

	let map = resample(&detected, width, height, task.is_categorical());
	Ok(ControlMap { map, task })
}
