//! Built-in annotators that need no learned weights.
//!
//! These cover the conditions that are pure image transforms: grayscale conversion for colorization, Gaussian blur for
//! deblurring, rectangular region masking for inpainting, and border extension for outpainting.

use image::{imageops, Rgb, RgbImage};

use super::{Annotator, AnnotatorParams};

/// Converts the input to single-channel grayscale, broadcast back to 3 channels. Used by the colorization task.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrayscaleConverter;

impl Annotator for GrayscaleConverter {
	fn annotate(&self, image: &RgbImage, _: &AnnotatorParams) -> anyhow::Result<RgbImage> {
		let luma = imageops::grayscale(image);
		let mut out = RgbImage::new(image.width(), image.height());
		for (x, y, pixel) in out.enumerate_pixels_mut() {
			let v = luma.get_pixel(x, y).0[0];
			*pixel = Rgb([v, v, v]);
		}
		Ok(out)
	}
}

/// Gaussian-blurs the input with a configurable kernel size. Used by the deblurring task, which conditions generation
/// on a blurred rendition of the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianBlurrer;

impl Annotator for GaussianBlurrer {
	fn annotate(&self, image: &RgbImage, params: &AnnotatorParams) -> anyhow::Result<RgbImage> {
		let ksize = params.blur_kernel_size;
		if ksize < 3 || ksize % 2 == 0 {
			anyhow::bail!("blur kernel size ({ksize}) must be an odd integer >= 3");
		}
		// OpenCV's kernel-size-to-sigma rule, so results line up with cv2.GaussianBlur(img, (k, k), 0)
		let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
		Ok(imageops::blur(image, sigma))
	}
}

/// Blacks out a rectangular region bounded by percentage ratios of the image dimensions. Used by the inpainting task;
/// the model fills the blacked-out region.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionMasker;

impl Annotator for RegionMasker {
	fn annotate(&self, image: &RgbImage, params: &AnnotatorParams) -> anyhow::Result<RgbImage> {
		let ratios = params.mask_ratios;
		if ratios.top > ratios.bottom || ratios.left > ratios.right {
			anyhow::bail!("inpainting mask ratios must satisfy top <= bottom and left <= right");
		}
		let (width, height) = image.dimensions();
		let y1 = (height as f32 * ratios.top / 100.0) as u32;
		let y2 = ((height as f32 * ratios.bottom / 100.0) as u32).min(height);
		let x1 = (width as f32 * ratios.left / 100.0) as u32;
		let x2 = ((width as f32 * ratios.right / 100.0) as u32).min(width);

		let mut out = image.clone();
		for y in y1..y2 {
			for x in x1..x2 {
				out.put_pixel(x, y, Rgb([0, 0, 0]));
			}
		}
		Ok(out)
	}
}

/// Places the input on a larger black canvas, extending each border by a percentage of the original dimension. Used by
/// the outpainting task; the model paints the black borders.
#[derive(Debug, Clone, Copy, Default)]
pub struct BorderExtender;

impl Annotator for BorderExtender {
	fn annotate(&self, image: &RgbImage, params: &AnnotatorParams) -> anyhow::Result<RgbImage> {
		let ratios = params.extend_ratios;
		if ratios.top < 0.0 || ratios.bottom < 0.0 || ratios.left < 0.0 || ratios.right < 0.0 {
			anyhow::bail!("outpainting extension ratios must be non-negative");
		}
		let (width, height) = image.dimensions();
		let top = (height as f32 * ratios.top / 100.0) as u32;
		let bottom = (height as f32 * ratios.bottom / 100.0) as u32;
		let left = (width as f32 * ratios.left / 100.0) as u32;
		let right = (width as f32 * ratios.right / 100.0) as u32;

		let mut canvas = RgbImage::new(width + left + right, height + top + bottom);
		imageops::replace(&mut canvas, image, i64::from(left), i64::from(top));
		Ok(canvas)
	}
}

#[cfg(test)]
mod tests {
	use image::{Rgb, RgbImage};

	use super::*;
	use crate::annotators::{Annotator, AnnotatorParams, RegionRatios};

	fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
		RgbImage::from_pixel(width, height, Rgb(color))
	}

	#[test]
	fn grayscale_broadcasts_three_channels() {
		let out = GrayscaleConverter.annotate(&solid(4, 4, [255, 0, 0]), &AnnotatorParams::default()).unwrap();
		let Rgb([r, g, b]) = *out.get_pixel(0, 0);
		assert_eq!(r, g);
		assert_eq!(g, b);
		assert!(r > 0 && r < 255);
	}

	#[test]
	fn blur_rejects_even_kernel() {
		let params = AnnotatorParams {
			blur_kernel_size: 8,
			..Default::default()
		};
		assert!(GaussianBlurrer.annotate(&solid(4, 4, [10, 10, 10]), &params).is_err());
	}

	#[test]
	fn region_masker_blacks_out_rectangle() {
		let params = AnnotatorParams {
			mask_ratios: RegionRatios::new(25.0, 75.0, 25.0, 75.0),
			..Default::default()
		};
		let out = RegionMasker.annotate(&solid(8, 8, [200, 200, 200]), &params).unwrap();
		assert_eq!(out.get_pixel(4, 4), &Rgb([0, 0, 0]));
		assert_eq!(out.get_pixel(0, 0), &Rgb([200, 200, 200]));
	}

	#[test]
	fn border_extender_grows_canvas() {
		let params = AnnotatorParams {
			extend_ratios: RegionRatios::new(50.0, 50.0, 0.0, 0.0),
			..Default::default()
		};
		let out = BorderExtender.annotate(&solid(8, 8, [200, 200, 200]), &params).unwrap();
		assert_eq!(out.dimensions(), (8, 16));
		assert_eq!(out.get_pixel(4, 0), &Rgb([0, 0, 0]));
		assert_eq!(out.get_pixel(4, 8), &Rgb([200, 200, 200]));
	}
}
