//! `unicontrol` is a library for unified multi-task controllable diffusion inference using [ONNX Runtime],
//! reimplementing the [UniControl] task-conditioning pipeline: one compact diffusion model steered by any of a dozen
//! structural conditions (edges, depth, surface normals, human pose, segmentation, bounding boxes, masked or extended
//! regions, grayscale, and blur) alongside a text prompt.
//!
//! The pipeline normalizes a visual input into a control tensor, attaches a learned task-identity embedding, assembles
//! conditional/unconditional contexts for classifier-free guidance, and drives an iterative denoising sampler:
//! ```ignore
//! use unicontrol::{
//! 	AnnotatorSuite, DDIMScheduler, OrtEnvironment, Task, UniControlOptions, UniControlPipeline,
//! 	UniControlPipelineOptions
//! };
//!
//! let environment = OrtEnvironment::default().into_arc();
//! let mut scheduler = DDIMScheduler::stable_diffusion_v1_default()?;
//! let pipeline = UniControlPipeline::new(&environment, "./unicontrol-v1.1/", UniControlPipelineOptions::default())?;
//! let annotators = AnnotatorSuite::new();
//!
//! let imgs = UniControlOptions::new(Task::Depth, image::open("cabin.png")?)
//! 	.with_prompt("a quiet cabin in the woods")
//! 	.run(&pipeline, &mut scheduler, &annotators)?;
//! ```
//!
//! See [`UniControlOptions`] for the full per-request parameter set and [`UniControlModel`] for the contract an
//! inference backend must satisfy.
//!
//! [ONNX Runtime]: https://onnxruntime.ai/
//! [UniControl]: https://arxiv.org/abs/2305.11147

#![warn(missing_docs)]
#![warn(rustdoc::all)]
#![warn(clippy::correctness, clippy::suspicious, clippy::complexity, clippy::perf, clippy::style)]
#![allow(clippy::tabs_in_doc_comments)]

pub mod annotators;
#[cfg(feature = "tokenizers")]
#[doc(hidden)]
pub mod clip;
pub(crate) mod config;
pub mod pipelines;
pub mod prompting;
pub mod schedulers;
pub mod tasks;

pub use ort::Environment as OrtEnvironment;
use ort::ExecutionProvider;

pub use self::annotators::{AnnotatorParams, AnnotatorSuite, ConditionExtraction, ControlMap, RegionRatios};
pub use self::pipelines::*;
pub use self::schedulers::*;
pub use self::tasks::Task;

/// A device on which to place a model of the diffusion pipeline.
///
/// If a device is not specified, or a configured execution provider is not available, the model will be placed on the
/// CPU.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DiffusionDevice {
	/// Use the CPU as a device. **This is the default device unless another device is specified.**
	CPU,
	/// Use NVIDIA CUDA as a device. Requires an NVIDIA Kepler GPU or later. The value is the device ID (which can be
	/// set to 0 in most cases).
	CUDA(usize),
	/// Use NVIDIA TensorRT as a device. Requires an NVIDIA Kepler GPU or later.
	TensorRT,
	/// Custom execution provider w/ options. Other execution providers have not been tested and may not work with some
	/// models.
	Custom(ExecutionProvider)
}

impl From<DiffusionDevice> for ExecutionProvider {
	fn from(value: DiffusionDevice) -> Self {
		match value {
			DiffusionDevice::CPU => ExecutionProvider::cpu(),
			DiffusionDevice::CUDA(device) => ExecutionProvider::cuda().with("device_id", device.to_string()),
			DiffusionDevice::TensorRT => ExecutionProvider::tensorrt(),
			DiffusionDevice::Custom(ep) => ep
		}
	}
}

/// Select which device each model of the pipeline should be placed on.
///
/// On GPUs with limited VRAM it can be favorable to place the text encoder and VAE decoder on the CPU so the much more
/// intensive control UNet can be placed on the GPU:
/// ```ignore
/// DiffusionDeviceControl {
/// 	control_unet: DiffusionDevice::CUDA(0),
/// 	..Default::default()
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DiffusionDeviceControl {
	/// The device on which to place the text encoder (CLIP).
	pub text_encoder: DiffusionDevice,
	/// The device on which to place the control UNet (the UNet plus its task-aware conditioning branch).
	pub control_unet: DiffusionDevice,
	/// The device on which to place the variational autoencoder decoder.
	pub vae_decoder: DiffusionDevice
}

impl DiffusionDeviceControl {
	/// Constructs [`DiffusionDeviceControl`] with all models on the same device.
	pub fn all(device: DiffusionDevice) -> Self {
		Self {
			text_encoder: device.clone(),
			control_unet: device.clone(),
			vae_decoder: device
		}
	}
}

impl Default for DiffusionDeviceControl {
	fn default() -> Self {
		DiffusionDeviceControl::all(DiffusionDevice::CPU)
	}
}
