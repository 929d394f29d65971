use image::{DynamicImage, RgbImage};
use ndarray::{Array1, Array4};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use num_traits::ToPrimitive;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{conditioning, guidance, UniControlCallback, UniControlModel};
use crate::annotators::{extract, AnnotatorParams, AnnotatorSuite, ConditionExtraction};
use crate::schedulers::DiffusionScheduler;
use crate::tasks::Task;

/// Added to the end of every positive prompt.
const DEFAULT_ADDED_PROMPT: &str = "best quality, extremely detailed, bright";
/// Default negative prompt, tuned for the base model's failure modes.
const DEFAULT_NEGATIVE_PROMPT: &str =
	"longbody, lowres, bad anatomy, bad hands, missing fingers, extra digit, fewer digits, cropped, worst quality, low quality";

/// Options for one generation request; see [`UniControlOptions::run`].
#[derive(Debug)]
pub struct UniControlOptions {
	pub(crate) task: Task,
	pub(crate) image: DynamicImage,
	pub(crate) prompt: String,
	pub(crate) added_prompt: String,
	pub(crate) negative_prompt: String,
	pub(crate) num_samples: usize,
	pub(crate) image_resolution: u32,
	pub(crate) detect_resolution: u32,
	pub(crate) steps: usize,
	pub(crate) guess_mode: bool,
	pub(crate) strength: f32,
	pub(crate) guidance_scale: f32,
	pub(crate) seed: i64,
	pub(crate) extraction: ConditionExtraction,
	pub(crate) annotator_params: AnnotatorParams,
	pub(crate) callback: Option<UniControlCallback>
}

// builder for options
impl UniControlOptions {
	/// Creates a request for `task` conditioned on `image`, with default options.
	pub fn new(task: Task, image: DynamicImage) -> Self {
		Self {
			task,
			image,
			prompt: String::new(),
			added_prompt: DEFAULT_ADDED_PROMPT.to_owned(),
			negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_owned(),
			num_samples: 1,
			image_resolution: 512,
			detect_resolution: 512,
			steps: 20,
			guess_mode: false,
			strength: 1.0,
			guidance_scale: 9.0,
			seed: -1,
			extraction: ConditionExtraction::Detect,
			annotator_params: AnnotatorParams::default(),
			callback: None
		}
	}

	/// Set the text prompt describing the desired output.
	pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
		self.prompt = prompt.into();
		self
	}

	/// Set the quality modifiers appended to the prompt, and the negative prompt, replacing the defaults. An empty
	/// added prompt leaves the prompt as given.
	pub fn with_prompt_modifiers(mut self, added_prompt: impl Into<String>, negative_prompt: impl Into<String>) -> Self {
		self.added_prompt = added_prompt.into();
		self.negative_prompt = negative_prompt.into();
		self
	}

	/// Set the number of samples to draw from the control signal in a single pass.
	pub fn with_num_samples(mut self, num_samples: usize) -> Self {
		self.num_samples = num_samples;
		self
	}

	/// Set the generation resolution. The conditioning image's longest side is scaled to `resolution` and both sides
	/// are rounded to a multiple of 64.
	pub fn with_image_resolution(mut self, resolution: u32) -> Self {
		self.image_resolution = resolution;
		self
	}

	/// Set the resolution at which resolution-sensitive detectors run, independently of the generation resolution.
	pub fn with_detect_resolution(mut self, resolution: u32) -> Self {
		self.detect_resolution = resolution;
		self
	}

	/// The number of denoising steps to take. More steps typically yields higher quality images.
	pub fn with_steps(mut self, steps: usize) -> Self {
		self.steps = steps;
		self
	}

	/// Enable or disable guess mode; see [`guidance::control_scales`].
	pub fn with_guess_mode(mut self, guess_mode: bool) -> Self {
		self.guess_mode = guess_mode;
		self
	}

	/// Set the control strength. `1.0` applies the control signal at full weight.
	pub fn with_strength(mut self, strength: f32) -> Self {
		self.strength = strength;
		self
	}

	/// The 'guidance scale' for classifier-free guidance. A lower guidance scale gives the model more freedom, but
	/// the output may not match the prompt; a higher scale matches the prompt more strictly but may introduce
	/// artifacts.
	pub fn with_guidance_scale(mut self, guidance_scale: f32) -> Self {
		self.guidance_scale = guidance_scale;
		self
	}

	/// Set the seed to use when first generating noise. A negative seed selects a random one per run.
	pub fn with_seed(mut self, seed: i64) -> Self {
		self.seed = seed;
		self
	}

	/// Treat the conditioning image as an already-extracted control map, bypassing detection.
	pub fn with_raw_control(mut self) -> Self {
		self.extraction = ConditionExtraction::Raw;
		self
	}

	/// Override the per-task detector parameters.
	pub fn with_annotator_params(mut self, params: AnnotatorParams) -> Self {
		self.annotator_params = params;
		self
	}
}

// builder for callbacks
impl UniControlOptions {
	/// A simple callback for e.g. reporting progress. Return `false` to cancel the remaining steps. A `frequency` of 0
	/// is treated as 1 (every step).
	pub fn callback_progress<F>(mut self, frequency: usize, callback: F) -> Self
	where
		F: Fn(usize, f32) -> bool + 'static
	{
		self.callback = Some(UniControlCallback::Progress {
			frequency: frequency.max(1),
			cb: Box::new(callback)
		});
		self
	}

	/// A callback to receive each step's latents. Return `false` to cancel the remaining steps. A `frequency` of 0 is
	/// treated as 1 (every step).
	pub fn callback_latents<F>(mut self, frequency: usize, callback: F) -> Self
	where
		F: Fn(usize, f32, Array4<f32>) -> bool + 'static
	{
		self.callback = Some(UniControlCallback::Latents {
			frequency: frequency.max(1),
			cb: Box::new(callback)
		});
		self
	}
}

impl UniControlOptions {
	/// Generates images for this request. Returns the visualized control map followed by `num_samples` generated
	/// images, so the result always holds `num_samples + 1` entries.
	///
	/// `scheduler` must be a Stable Diffusion-compatible scheduler; the reference model was trained against DDIM.
	/// Sampling stochasticity (DDIM's `eta`) is configured on the scheduler itself, e.g. via
	/// [`crate::DDIMScheduler::stable_diffusion_v1_with_eta`]; construct the scheduler per request to vary it.
	///
	/// # Examples
	///
	/// ```no_run
	/// # fn main() -> anyhow::Result<()> {
	/// # use unicontrol::{AnnotatorSuite, DDIMScheduler, OrtEnvironment, Task, UniControlOptions, UniControlPipeline, UniControlPipelineOptions};
	/// # let environment = std::sync::Arc::new(OrtEnvironment::builder().build()?);
	/// let pipeline = UniControlPipeline::new(&environment, "./unicontrol/", UniControlPipelineOptions::default())?;
	/// let mut scheduler = DDIMScheduler::stable_diffusion_v1_default()?;
	/// let annotators = AnnotatorSuite::new();
	///
	/// let mut images = UniControlOptions::new(Task::Canny, image::open("input.png")?)
	/// 	.with_prompt("photo of a red fox")
	/// 	.run(&pipeline, &mut scheduler, &annotators)?;
	/// images.remove(1).save("result.png")?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn run<M: UniControlModel, S: DiffusionScheduler>(&self, model: &M, scheduler: &mut S, annotators: &AnnotatorSuite) -> anyhow::Result<Vec<RgbImage>> {
		if self.steps == 0 {
			anyhow::bail!("`steps` must be > 0");
		}

		let control_map = extract(
			annotators,
			self.task,
			&self.image,
			self.image_resolution,
			self.detect_resolution,
			&self.annotator_params,
			self.extraction
		)?;

		// negative seeds select a fresh seed per run; the narrow range mirrors what the reference UI exposes
		let seed = if self.seed < 0 { rand::thread_rng().gen_range(0..=65535) } else { self.seed as u64 };
		let mut rng = StdRng::seed_from_u64(seed);
		debug!(task = %self.task, seed, width = control_map.width(), height = control_map.height(), "starting generation");

		let (ctx, unctx, latents_shape) = conditioning::assemble(
			model,
			&control_map,
			&self.prompt,
			&self.added_prompt,
			&self.negative_prompt,
			self.task,
			self.num_samples,
			self.guess_mode
		)?;
		let control_scales = Array1::from_iter(guidance::control_scales(self.strength, self.guess_mode));

		scheduler.set_timesteps(self.steps);
		let mut latents = Array4::<f32>::random_using(latents_shape, StandardNormal, &mut rng);
		latents *= scheduler.init_noise_sigma();

		let timesteps = scheduler.timesteps().to_owned();
		for (i, t) in timesteps.indexed_iter() {
			let latent_model_input = scheduler.scale_model_input(latents.view(), *t);
			let timestep = t.to_f32().unwrap();

			// the conditional and unconditional branches see different control tensors, so they cannot share a
			// batched forward pass
			let noise_pred_text = model.predict_noise(
				latent_model_input.view(),
				timestep,
				ctx.control.view(),
				ctx.text_embeddings.view(),
				Some(ctx.task_embedding.view()),
				control_scales.view()
			)?;
			let noise_pred_uncond = model.predict_noise(
				latent_model_input.view(),
				timestep,
				unctx.control.view(),
				unctx.text_embeddings.view(),
				None,
				control_scales.view()
			)?;
			let noise_pred = &noise_pred_uncond + self.guidance_scale * (&noise_pred_text - &noise_pred_uncond);

			let scheduler_output = scheduler.step(noise_pred.view(), *t, latents.view(), &mut rng);
			latents = scheduler_output.prev_sample;

			if let Some(callback) = self.callback.as_ref() {
				let keep_going = match callback {
					UniControlCallback::Progress { frequency, cb } if i % frequency == 0 => cb(i, timestep),
					UniControlCallback::Latents { frequency, cb } if i % frequency == 0 => cb(i, timestep, latents.clone()),
					_ => true
				};
				if !keep_going {
					debug!(step = i, "cancelled by callback");
					break;
				}
			}
		}

		let decoded = model.decode_latents(latents.view())?;
		if decoded.iter().any(|v| !v.is_finite()) {
			anyhow::bail!("decoded samples contain non-finite values; inference backend produced invalid output");
		}

		let (width, height) = (control_map.width(), control_map.height());
		let mut images = Vec::with_capacity(self.num_samples + 1);
		images.push(control_map.visualize());
		for batch in 0..decoded.shape()[0] {
			let mut image = RgbImage::new(width, height);
			for (x, y, pixel) in image.enumerate_pixels_mut() {
				for (channel, value) in pixel.0.iter_mut().enumerate() {
					*value = (decoded[[batch, y as usize, x as usize, channel]] * 127.5 + 127.5).clamp(0.0, 255.0) as u8;
				}
			}
			images.push(image);
		}

		debug!(samples = images.len() - 1, "generation complete");
		Ok(images)
	}
}
