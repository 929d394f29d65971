//! Task identities for the unified control model.
//!
//! Every control modality the model was trained on is identified by a [`Task`]. A task maps 1:1 to the name of the
//! conditioning branch it activates inside the control UNet and to a fixed natural-language instruction; the
//! instruction is encoded through the text encoder to produce the task-identity embedding that tells the shared
//! network which modality it is seeing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A control modality understood by the unified model.
///
/// The branch-name/instruction mapping is static and exhaustive; unlike the original dictionary-based registry, an
/// unregistered task is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Task {
	/// Canny edge map to image.
	Canny,
	/// HED (holistically-nested edge detection) soft edge map to image.
	Hed,
	/// Hand-drawn-style sketch (derived from HED edges) to image.
	#[serde(rename = "hedsketch")]
	HedSketch,
	/// Monocular depth map to image.
	Depth,
	/// Surface normal map to image.
	Normal,
	/// Human pose skeleton to image.
	Openpose,
	/// Semantic segmentation map to image.
	Seg,
	/// Painted bounding-box map to image.
	Bbox,
	/// Image outpainting: extend an image past its borders.
	Outpainting,
	/// Image inpainting: fill a masked region.
	Inpainting,
	/// Grayscale colorization.
	Grayscale,
	/// Deblurring: blurred image to clean image.
	Blur
}

impl Task {
	/// All tasks the model supports, in registry order.
	pub const ALL: [Task; 12] = [
		Task::Canny,
		Task::Hed,
		Task::HedSketch,
		Task::Depth,
		Task::Normal,
		Task::Openpose,
		Task::Seg,
		Task::Bbox,
		Task::Outpainting,
		Task::Inpainting,
		Task::Grayscale,
		Task::Blur
	];

	/// The name of the conditioning branch this task activates inside the control UNet.
	pub fn branch_name(&self) -> &'static str {
		match self {
			Task::Canny => "control_canny",
			Task::Hed => "control_hed",
			Task::HedSketch => "control_hedsketch",
			Task::Depth => "control_depth",
			Task::Normal => "control_normal",
			Task::Openpose => "control_openpose",
			Task::Seg => "control_seg",
			Task::Bbox => "control_bbox",
			Task::Outpainting => "control_outpainting",
			Task::Inpainting => "control_inpainting",
			Task::Grayscale => "control_grayscale",
			Task::Blur => "control_blur"
		}
	}

	/// The natural-language instruction describing this modality. Encoding this string through the text encoder and
	/// truncating to a single positional slot yields the task-identity embedding.
	pub fn instruction(&self) -> &'static str {
		match self {
			Task::Canny => "canny edge to image",
			Task::Hed => "hed edge to image",
			Task::HedSketch => "sketch to image",
			Task::Depth => "depth map to image",
			Task::Normal => "normal surface map to image",
			Task::Openpose => "human pose skeleton to image",
			Task::Seg => "segmentation map to image",
			Task::Bbox => "bounding box to image",
			Task::Outpainting => "image outpainting",
			Task::Inpainting => "image inpainting",
			Task::Grayscale => "gray image to color image",
			Task::Blur => "deblur image to clean image"
		}
	}

	/// Whether this task's control map is categorical (hard label boundaries). Categorical maps must be resampled with
	/// nearest-neighbor interpolation; blending across label boundaries would produce colors outside the label set.
	pub fn is_categorical(&self) -> bool {
		matches!(self, Task::Seg | Task::Openpose | Task::Bbox)
	}

	/// Whether the control map is inverted for display, for readability (dark lines on a light background).
	pub fn visualize_inverted(&self) -> bool {
		matches!(self, Task::Canny)
	}

	/// Whether the task's detector runs at an independently configurable detection resolution rather than the
	/// generation resolution.
	pub(crate) fn uses_detect_resolution(&self) -> bool {
		matches!(self, Task::Hed | Task::HedSketch | Task::Depth | Task::Normal | Task::Openpose | Task::Seg)
	}
}

impl fmt::Display for Task {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let id = match self {
			Task::Canny => "canny",
			Task::Hed => "hed",
			Task::HedSketch => "hedsketch",
			Task::Depth => "depth",
			Task::Normal => "normal",
			Task::Openpose => "openpose",
			Task::Seg => "seg",
			Task::Bbox => "bbox",
			Task::Outpainting => "outpainting",
			Task::Inpainting => "inpainting",
			Task::Grayscale => "grayscale",
			Task::Blur => "blur"
		};
		f.write_str(id)
	}
}

impl FromStr for Task {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"canny" => Ok(Task::Canny),
			"hed" => Ok(Task::Hed),
			"hedsketch" | "sketch" => Ok(Task::HedSketch),
			"depth" => Ok(Task::Depth),
			"normal" => Ok(Task::Normal),
			"openpose" | "pose" => Ok(Task::Openpose),
			"seg" | "segbase" => Ok(Task::Seg),
			"bbox" => Ok(Task::Bbox),
			"outpainting" => Ok(Task::Outpainting),
			"inpainting" => Ok(Task::Inpainting),
			"grayscale" => Ok(Task::Grayscale),
			"blur" => Ok(Task::Blur),
			other => Err(anyhow::anyhow!("unknown task identifier `{other}`"))
		}
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use super::Task;

	#[test]
	fn registry_is_total_and_stable() {
		for task in Task::ALL {
			assert!(!task.branch_name().is_empty());
			assert!(!task.instruction().is_empty());
			assert!(task.branch_name().starts_with("control_"));
			// referential stability
			assert_eq!(task.branch_name(), task.branch_name());
			assert_eq!(task.instruction(), task.instruction());
		}
	}

	#[test]
	fn parses_original_identifiers() {
		assert_eq!(Task::from_str("hedsketch").unwrap(), Task::HedSketch);
		assert_eq!(Task::from_str("segbase").unwrap(), Task::Seg);
		assert_eq!(Task::from_str("openpose").unwrap(), Task::Openpose);
		assert!(Task::from_str("watercolor").is_err());
	}

	#[test]
	fn display_round_trips() {
		for task in Task::ALL {
			assert_eq!(Task::from_str(&task.to_string()).unwrap(), task);
		}
	}
}
