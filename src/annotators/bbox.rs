//! Bounding-box control maps: each detected object is painted as a solid color-coded rectangle.
//!
//! Boxes are painted in descending-area order so that smaller objects land on top of larger ones and are never fully
//! occluded. The label palette is closed; a detection with an unknown label is a fatal error for the request.

use std::collections::HashMap;

use image::{Rgb, RgbImage};
use lazy_static::lazy_static;

use super::Detection;

lazy_static! {
	static ref PALETTE: HashMap<&'static str, [u8; 3]> = HashMap::from([
		("background", [0, 0, 100]),
		("person", [255, 0, 0]),
		("bicycle", [0, 255, 0]),
		("car", [0, 0, 255]),
		("motorcycle", [255, 255, 0]),
		("airplane", [255, 0, 255]),
		("bus", [0, 255, 255]),
		("train", [128, 128, 0]),
		("truck", [128, 0, 128]),
		("boat", [0, 128, 128]),
		("traffic light", [128, 128, 128]),
		("fire hydrant", [64, 0, 0]),
		("stop sign", [0, 64, 0]),
		("parking meter", [0, 0, 64]),
		("bench", [64, 64, 0]),
		("bird", [64, 0, 64]),
		("cat", [0, 64, 64]),
		("dog", [192, 192, 192]),
		("horse", [32, 32, 32]),
		("sheep", [96, 96, 96]),
		("cow", [160, 160, 160]),
		("elephant", [224, 224, 224]),
		("bear", [32, 0, 0]),
		("zebra", [0, 32, 0]),
		("giraffe", [0, 0, 32]),
		("backpack", [32, 32, 0]),
		("umbrella", [32, 0, 32]),
		("handbag", [0, 32, 32]),
		("tie", [96, 0, 0]),
		("suitcase", [0, 96, 0]),
		("frisbee", [0, 0, 96]),
		("skis", [96, 96, 0]),
		("snowboard", [96, 0, 96]),
		("sports ball", [0, 96, 96]),
		("kite", [160, 0, 0]),
		("baseball bat", [0, 160, 0]),
		("baseball glove", [0, 0, 160]),
		("skateboard", [160, 160, 0]),
		("surfboard", [160, 0, 160]),
		("tennis racket", [0, 160, 160]),
		("bottle", [224, 0, 0]),
		("wine glass", [0, 224, 0]),
		("cup", [0, 0, 224]),
		("fork", [224, 224, 0]),
		("knife", [224, 0, 224]),
		("spoon", [0, 224, 224]),
		("bowl", [64, 64, 64]),
		("banana", [128, 64, 64]),
		("apple", [64, 128, 64]),
		("sandwich", [64, 64, 128]),
		("orange", [128, 128, 64]),
		("broccoli", [128, 64, 128]),
		("carrot", [64, 128, 128]),
		("hot dog", [192, 64, 64]),
		("pizza", [64, 192, 64]),
		("donut", [64, 64, 192]),
		("cake", [192, 192, 64]),
		("chair", [192, 64, 192]),
		("couch", [64, 192, 192]),
		("potted plant", [96, 32, 32]),
		("bed", [32, 96, 32]),
		("dining table", [32, 32, 96]),
		("toilet", [96, 96, 32]),
		("tv", [96, 32, 96]),
		("laptop", [32, 96, 96]),
		("mouse", [160, 32, 32]),
		("remote", [32, 160, 32]),
		("keyboard", [32, 32, 160]),
		("cell phone", [160, 160, 32]),
		("microwave", [160, 32, 160]),
		("oven", [32, 160, 160]),
		("toaster", [224, 32, 32]),
		("sink", [32, 224, 32]),
		("refrigerator", [32, 32, 224]),
		("book", [224, 224, 32]),
		("clock", [224, 32, 224]),
		("vase", [32, 224, 224]),
		("scissors", [64, 96, 96]),
		("teddy bear", [96, 64, 96]),
		("hair drier", [96, 96, 64]),
		("toothbrush", [160, 96, 96])
	]);
}

/// Looks up the fixed RGB color assigned to a detection class.
///
/// The palette is closed; an unknown label is a configuration error (it means the object detector and the model were
/// trained on different label sets) and fails the request.
pub fn class_color(label: &str) -> anyhow::Result<[u8; 3]> {
	PALETTE
		.get(label)
		.copied()
		.ok_or_else(|| anyhow::anyhow!("object label `{label}` is not in the bounding-box palette"))
}

/// Paints `detections` into an initially black mask of `width`×`height`.
///
/// Boxes are clipped to the image bounds and painted in descending-area order, so in overlapping regions the smaller
/// (later-painted) box's color wins.
pub fn paint_detections(width: u32, height: u32, detections: &[Detection]) -> anyhow::Result<RgbImage> {
	let mut mask = RgbImage::new(width, height);

	let mut ordered: Vec<(&Detection, i64)> = detections
		.iter()
		.map(|det| {
			let [x1, y1, x2, y2] = clip_box(det.bbox, width, height);
			(det, (x2 - x1) * (y2 - y1))
		})
		.collect();
	ordered.sort_by(|a, b| b.1.cmp(&a.1));

	for (det, _) in ordered {
		let color = Rgb(class_color(&det.label)?);
		let [x1, y1, x2, y2] = clip_box(det.bbox, width, height);
		for y in y1..y2 {
			for x in x1..x2 {
				mask.put_pixel(x as u32, y as u32, color);
			}
		}
	}

	Ok(mask)
}

fn clip_box(bbox: [i64; 4], width: u32, height: u32) -> [i64; 4] {
	let [x1, y1, x2, y2] = bbox;
	[
		x1.clamp(0, i64::from(width)),
		y1.clamp(0, i64::from(height)),
		x2.clamp(0, i64::from(width)),
		y2.clamp(0, i64::from(height))
	]
}

#[cfg(test)]
mod tests {
	use image::Rgb;

	use super::{class_color, paint_detections};
	use crate::annotators::Detection;

	fn detection(label: &str, bbox: [i64; 4]) -> Detection {
		Detection {
			bbox,
			label: label.to_string(),
			confidence: 0.9
		}
	}

	#[test]
	fn smaller_box_wins_overlap() {
		// the cat box (large) overlaps the dog box (small); the overlap must end up dog-colored
		let detections = vec![detection("dog", [4, 4, 8, 8]), detection("cat", [0, 0, 10, 10])];
		let mask = paint_detections(16, 16, &detections).unwrap();
		assert_eq!(mask.get_pixel(5, 5), &Rgb(class_color("dog").unwrap()));
		assert_eq!(mask.get_pixel(1, 1), &Rgb(class_color("cat").unwrap()));
		// outside every box stays black
		assert_eq!(mask.get_pixel(12, 12), &Rgb([0, 0, 0]));
	}

	#[test]
	fn boxes_are_clipped_to_bounds() {
		let detections = vec![detection("person", [-5, -5, 100, 100])];
		let mask = paint_detections(8, 8, &detections).unwrap();
		assert_eq!(mask.get_pixel(0, 0), &Rgb(class_color("person").unwrap()));
		assert_eq!(mask.get_pixel(7, 7), &Rgb(class_color("person").unwrap()));
	}

	#[test]
	fn unknown_label_is_fatal() {
		let detections = vec![detection("dragon", [0, 0, 4, 4])];
		assert!(paint_detections(8, 8, &detections).is_err());
	}
}
