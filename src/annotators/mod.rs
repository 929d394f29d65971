//! The preprocessing layer that turns an arbitrary input image into a control map for a given task.
//!
//! Heavy detectors (edge, depth, pose, segmentation, object detection) are external collaborators behind the
//! [`Annotator`] and [`ObjectDetector`] traits: the core treats them as pure per-call functions and only requires that
//! their output dimensions derive from the input. Lightweight annotators that need no learned weights (grayscale
//! conversion, Gaussian blur, rectangular region masking/extension) ship with the crate in [`builtin`].
//!
//! [`extract`] is the adapter itself: it resizes the input, dispatches to the right collaborator for the
//! task, post-processes where the task demands it (bounding-box painting, sketch binarization), and resamples the
//! result to the generation resolution with an interpolation mode appropriate to the map's continuity.

use std::collections::HashMap;

use image::RgbImage;
use ndarray::Array4;

pub mod bbox;
pub mod builtin;
pub(crate) mod preprocess;
pub(crate) mod sketch;

pub use self::preprocess::extract;
use crate::tasks::Task;

/// Directional percentage ratios describing a rectangular region of an image.
///
/// For inpainting, `top..bottom` and `left..right` bound the masked rectangle as percentages of the image height and
/// width. For outpainting, each field is the percentage by which the image is extended past that border.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRatios {
	/// Top bound/extension, in percent.
	pub top: f32,
	/// Bottom bound/extension, in percent.
	pub bottom: f32,
	/// Left bound/extension, in percent.
	pub left: f32,
	/// Right bound/extension, in percent.
	pub right: f32
}

impl RegionRatios {
	/// Creates ratios from `(top, bottom, left, right)` percentages.
	pub fn new(top: f32, bottom: f32, left: f32, right: f32) -> Self {
		Self { top, bottom, left, right }
	}
}

/// Per-request detector parameters. Only the fields relevant to the request's task are consulted.
#[derive(Debug, Clone)]
pub struct AnnotatorParams {
	/// Canny low threshold, in [1, 255].
	pub canny_low_threshold: u8,
	/// Canny high threshold, in [1, 255].
	pub canny_high_threshold: u8,
	/// Gaussian kernel size for the deblurring task's blur annotator. Must be odd.
	pub blur_kernel_size: u32,
	/// Minimum confidence for object detections in the bounding-box task.
	pub bbox_confidence: f32,
	/// Non-maximum-suppression threshold for object detections in the bounding-box task.
	pub bbox_nms_threshold: f32,
	/// Border extension ratios for the outpainting task.
	pub extend_ratios: RegionRatios,
	/// Masked-rectangle bounds for the inpainting task.
	pub mask_ratios: RegionRatios
}

impl Default for AnnotatorParams {
	fn default() -> Self {
		Self {
			canny_low_threshold: 40,
			canny_high_threshold: 200,
			blur_kernel_size: 51,
			bbox_confidence: 0.4,
			bbox_nms_threshold: 0.5,
			extend_ratios: RegionRatios::new(25.0, 25.0, 25.0, 25.0),
			mask_ratios: RegionRatios::new(25.0, 75.0, 25.0, 75.0)
		}
	}
}

/// A map-producing detector collaborator. Implementations must return a map whose dimensions derive from the input's;
/// most preserve them exactly, while region transforms like [`builtin::BorderExtender`] grow the canvas.
pub trait Annotator: Send + Sync {
	/// Produces a detection map from `image`. The output is interpreted in [0, 255] per channel.
	fn annotate(&self, image: &RgbImage, params: &AnnotatorParams) -> anyhow::Result<RgbImage>;
}

/// One detected object returned by an [`ObjectDetector`].
#[derive(Debug, Clone)]
pub struct Detection {
	/// `[x1, y1, x2, y2]` corner coordinates, possibly exceeding the image bounds.
	pub bbox: [i64; 4],
	/// Class label; must belong to the bounding-box palette (see [`bbox::class_color`]).
	pub label: String,
	/// Detection confidence in [0, 1].
	pub confidence: f32
}

/// An object-detection collaborator for the bounding-box task.
pub trait ObjectDetector: Send + Sync {
	/// Detects common objects in `image`, filtered by `confidence` and deduplicated at `nms_threshold`.
	fn detect(&self, image: &RgbImage, confidence: f32, nms_threshold: f32) -> anyhow::Result<Vec<Detection>>;
}

/// The set of detector collaborators available to the pipeline, keyed by task.
///
/// [`AnnotatorSuite::new`] pre-registers the built-in weightless annotators (grayscale, blur, inpainting,
/// outpainting); callers provide the learned detectors for the remaining tasks. Requests in direct mode
/// ([`ConditionExtraction::Raw`]) never consult the suite, so an empty suite is valid for image-to-image style use.
#[derive(Default)]
pub struct AnnotatorSuite {
	annotators: HashMap<Task, Box<dyn Annotator>>,
	object_detector: Option<Box<dyn ObjectDetector>>
}

impl AnnotatorSuite {
	/// Creates a suite with the built-in weightless annotators registered.
	pub fn new() -> Self {
		Self::default()
			.with_annotator(Task::Grayscale, Box::new(builtin::GrayscaleConverter))
			.with_annotator(Task::Blur, Box::new(builtin::GaussianBlurrer))
			.with_annotator(Task::Inpainting, Box::new(builtin::RegionMasker))
			.with_annotator(Task::Outpainting, Box::new(builtin::BorderExtender))
	}

	/// Registers (or replaces) the annotator used for `task`.
	pub fn with_annotator(mut self, task: Task, annotator: Box<dyn Annotator>) -> Self {
		self.annotators.insert(task, annotator);
		self
	}

	/// Registers the object detector used for the bounding-box task.
	pub fn with_object_detector(mut self, detector: Box<dyn ObjectDetector>) -> Self {
		self.object_detector = Some(detector);
		self
	}

	pub(crate) fn annotator_for(&self, task: Task) -> anyhow::Result<&dyn Annotator> {
		self.annotators
			.get(&task)
			.map(AsRef::as_ref)
			.ok_or_else(|| anyhow::anyhow!("no annotator registered for task `{task}`"))
	}

	pub(crate) fn object_detector(&self) -> anyhow::Result<&dyn ObjectDetector> {
		self.object_detector
			.as_deref()
			.ok_or_else(|| anyhow::anyhow!("no object detector registered for task `bbox`"))
	}
}

/// Whether to run structural extraction for a request, or to condition on the resized input image directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionExtraction {
	/// Run the task's detector over the input to produce the control map.
	Detect,
	/// Bypass detection and use the resized input verbatim ("direct mode"), for image-to-image style conditioning.
	/// The caller-supplied image is then expected to already be in the task's control domain. For the Canny task the
	/// input is inverted, matching the detector's white-on-black convention.
	Raw
}

/// A normalized 3-channel control map at the generation resolution.
///
/// Owned by the request that produced it; converted to a batched NCHW tensor in [0, 1] for conditioning and to a
/// display image for the result batch.
#[derive(Debug, Clone)]
pub struct ControlMap {
	pub(crate) map: RgbImage,
	pub(crate) task: Task
}

impl ControlMap {
	/// The map's width, equal to the generation width.
	pub fn width(&self) -> u32 {
		self.map.width()
	}

	/// The map's height, equal to the generation height.
	pub fn height(&self) -> u32 {
		self.map.height()
	}

	/// The raw control map image.
	pub fn as_image(&self) -> &RgbImage {
		&self.map
	}

	/// Converts the map to an NCHW float tensor in [0, 1], replicated `num_samples` times along the batch axis.
	pub fn to_batched_tensor(&self, num_samples: usize) -> Array4<f32> {
		let (width, height) = self.map.dimensions();
		Array4::from_shape_fn((num_samples, 3, height as usize, width as usize), |(_, c, y, x)| {
			f32::from(self.map.get_pixel(x as u32, y as u32).0[c]) / 255.0
		})
	}

	/// Renders the map for inclusion in the result batch, applying the task-appropriate inversion (edge maps are
	/// conventionally shown as dark lines on a light background).
	pub fn visualize(&self) -> RgbImage {
		if self.task.visualize_inverted() {
			let mut map = self.map.clone();
			for pixel in map.pixels_mut() {
				for chan in &mut pixel.0 {
					*chan = 255 - *chan;
				}
			}
			map
		} else {
			self.map.clone()
		}
	}
}

#[cfg(test)]
mod tests {
	use image::{Rgb, RgbImage};

	use super::{AnnotatorSuite, ControlMap};
	use crate::tasks::Task;

	#[test]
	fn missing_annotator_is_an_error() {
		let suite = AnnotatorSuite::default();
		assert!(suite.annotator_for(Task::Depth).is_err());
		assert!(suite.object_detector().is_err());
	}

	#[test]
	fn builtins_are_preregistered() {
		let suite = AnnotatorSuite::new();
		for task in [Task::Grayscale, Task::Blur, Task::Inpainting, Task::Outpainting] {
			assert!(suite.annotator_for(task).is_ok());
		}
	}

	#[test]
	fn batched_tensor_shape_and_range() {
		let mut map = RgbImage::new(8, 4);
		map.put_pixel(0, 0, Rgb([255, 0, 128]));
		let control = ControlMap { map, task: Task::Depth };
		let tensor = control.to_batched_tensor(3);
		assert_eq!(tensor.shape(), &[3, 3, 4, 8]);
		assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
		assert_eq!(tensor[[2, 0, 0, 0]], 1.0);
		assert!((tensor[[1, 2, 0, 0]] - 128.0 / 255.0).abs() < 1e-6);
	}

	#[test]
	fn canny_visualization_is_inverted() {
		let mut map = RgbImage::new(2, 2);
		map.put_pixel(0, 0, Rgb([255, 255, 255]));
		let control = ControlMap { map: map.clone(), task: Task::Canny };
		assert_eq!(control.visualize().get_pixel(0, 0), &Rgb([0, 0, 0]));
		let control = ControlMap { map, task: Task::Hed };
		assert_eq!(control.visualize().get_pixel(0, 0), &Rgb([255, 255, 255]));
	}
}
