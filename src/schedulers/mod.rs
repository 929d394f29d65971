//! Schedulers take in the output of a trained denoising model, the sample the diffusion process is iterating on, and a
//! timestep, and return a denoised sample.
//!
//! * For inference, the scheduler defines how to update a sample based on a pretrained model's output (most often the
//!   predicted noise).
//! * Schedulers are defined by a noise schedule and an update rule to solve the differential equation solution.

use ndarray::{Array1, Array4, ArrayBase, ArrayView1, ArrayView4};
use num_traits::ToPrimitive;
use rand::Rng;

cfg_if::cfg_if! {
	if #[cfg(feature = "scheduler-ddim")] {
		mod ddim;
		pub use self::ddim::*;
	}
}

/// A mapping from a beta range to a sequence of betas for stepping the model.
#[derive(Debug, Clone)]
pub enum BetaSchedule {
	/// Linear beta schedule.
	Linear,
	/// Scaled linear beta schedule. Used by Stable Diffusion v1 derivatives, including the UniControl base model.
	ScaledLinear,
	/// Glide cosine schedule.
	SquaredcosCapV2,
	/// Pre-trained betas.
	TrainedBetas(Array1<f32>)
}

/// The type of the prediction the denoising model was trained to output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPredictionType {
	/// Predict the noise of the diffusion process.
	Epsilon,
	/// Predict the denoised sample directly.
	Sample,
	/// Predict 'velocity'; see section 2.4 of [Imagen Video](https://imagen.research.google/video/paper.pdf).
	VPrediction
}

/// Computes betas such that the cumulative product of alphas transitions along the given cosine schedule.
pub(crate) fn betas_for_alpha_bar(num_diffusion_timesteps: usize, max_beta: f32) -> Array1<f32> {
	let alpha_bar = |time_step: f32| ((time_step + 0.008) / 1.008 * std::f32::consts::FRAC_PI_2).cos().powi(2);
	let mut betas = Vec::with_capacity(num_diffusion_timesteps);
	for i in 0..num_diffusion_timesteps {
		let t1 = i as f32 / num_diffusion_timesteps as f32;
		let t2 = (i + 1) as f32 / num_diffusion_timesteps as f32;
		betas.push((1.0 - alpha_bar(t2) / alpha_bar(t1)).min(max_beta));
	}
	Array1::from_vec(betas)
}

/// The output returned by a scheduler's `step` function.
pub struct SchedulerStepOutput {
	pub(crate) prev_sample: Array4<f32>,
	pub(crate) pred_original_sample: Option<Array4<f32>>
}

impl SchedulerStepOutput {
	/// Computed sample (`x_{t-1}`) of the previous timestep. `prev_sample` should be used as the next model input in
	/// the denoising loop.
	pub fn prev_sample(&self) -> ArrayView4<'_, f32> {
		self.prev_sample.view()
	}

	/// The predicted denoised sample (`x_{0}`) based on the model output from the current timestep.
	/// `pred_original_sample` can be used to preview progress or for guidance.
	pub fn pred_original_sample(&self) -> Option<ArrayView4<'_, f32>> {
		self.pred_original_sample.as_ref().map(ArrayBase::view)
	}
}

/// A scheduler to be used in diffusion pipelines.
#[allow(clippy::len_without_is_empty)]
pub trait DiffusionScheduler: Clone {
	/// The type of this scheduler's timesteps.
	type TimestepType: ToPrimitive + Copy;

	/// Scales the denoising model input to match the scheduler's algorithm, if required.
	fn scale_model_input(&mut self, sample: ArrayView4<'_, f32>, timestep: Self::TimestepType) -> Array4<f32>;

	/// Sets the number of inference steps. This should be called before `step` to properly compute the timesteps.
	fn set_timesteps(&mut self, num_inference_steps: usize);

	/// Predict the sample at the previous timestep by reversing the SDE. Core function to propagate the diffusion
	/// process from the learned model outputs (most often the predicted noise).
	fn step<R: Rng + ?Sized>(
		&mut self,
		model_output: ArrayView4<'_, f32>,
		timestep: Self::TimestepType,
		sample: ArrayView4<'_, f32>,
		rng: &mut R
	) -> SchedulerStepOutput;

	/// Returns the computed scheduler timesteps.
	fn timesteps(&self) -> ArrayView1<'_, Self::TimestepType>;

	/// Returns the initial sigma noise value.
	fn init_noise_sigma(&self) -> f32;

	/// Returns the number of train timesteps.
	fn len(&self) -> usize;
}
