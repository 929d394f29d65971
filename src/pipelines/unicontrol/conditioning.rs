//! The Conditioning Assembler: builds the paired conditional and unconditional contexts consumed by the denoiser.

use ndarray::{s, Array3, Array4};

use super::UniControlModel;
use crate::annotators::ControlMap;
use crate::prompting::combine_concepts;
use crate::tasks::Task;
use crate::Prompt;

/// Number of latent channels. A hard architectural constant of the denoiser.
pub const LATENT_CHANNELS: usize = 4;
/// Spatial downsampling factor between pixel space and latent space. A hard architectural constant of the denoiser.
pub const LATENT_DOWNSAMPLE: usize = 8;

/// The conditional generation context: structural control, prompt embedding, and task-identity embedding.
#[derive(Debug, Clone)]
pub struct GenerationContext {
	/// Control tensor in [0, 1], NCHW, replicated across the sample batch.
	pub control: Array4<f32>,
	/// Encoded positive prompt (prompt + added prompt), replicated across the sample batch.
	pub text_embeddings: Array3<f32>,
	/// Encoded task instruction, truncated to a single positional slot.
	pub task_embedding: Array3<f32>
}

/// The unconditional counterpart of [`GenerationContext`] for classifier-free guidance. Carries no task embedding.
#[derive(Debug, Clone)]
pub struct UnconditionalContext {
	/// Zeroed in guess mode, otherwise identical to the conditional control tensor.
	pub control: Array4<f32>,
	/// Encoded negative prompt, replicated across the sample batch.
	pub text_embeddings: Array3<f32>
}

/// Assembles the conditional/unconditional contexts and the latent shape for one request.
///
/// The control map is replicated `num_samples` times, which is how several independent samples are drawn from one
/// control signal in a single pass. Guess mode zeroes the unconditional control tensor so that guidance contrasts
/// "no structural hint" against "with structural hint"; otherwise both contexts share the same control signal and
/// guidance contrasts only the text.
#[allow(clippy::too_many_arguments)]
pub fn assemble<M: UniControlModel>(
	model: &M,
	control_map: &ControlMap,
	prompt: &str,
	added_prompt: &str,
	negative_prompt: &str,
	task: Task,
	num_samples: usize,
	guess_mode: bool
) -> anyhow::Result<(GenerationContext, UnconditionalContext, [usize; 4])> {
	if num_samples == 0 {
		anyhow::bail!("num_samples must be > 0");
	}

	let control = control_map.to_batched_tensor(num_samples);

	let positive = combine_concepts(prompt, added_prompt);
	let text_embeddings = model.encode_text(&Prompt::batched(positive, num_samples))?;
	let negative_embeddings = model.encode_text(&Prompt::batched(negative_prompt, num_samples))?;

	// the task embedding keeps only the first positional slot, so the added conditioning signal stays compact and
	// independent of instruction length
	let instruction_embeddings = model.encode_text(&Prompt::from(task.instruction()))?;
	let task_embedding = instruction_embeddings.slice(s![.., ..1, ..]).to_owned();

	let latent_shape = [
		num_samples,
		LATENT_CHANNELS,
		control_map.height() as usize / LATENT_DOWNSAMPLE,
		control_map.width() as usize / LATENT_DOWNSAMPLE
	];

	let unconditional_control = if guess_mode { Array4::zeros(control.raw_dim()) } else { control.clone() };

	Ok((
		GenerationContext {
			control,
			text_embeddings,
			task_embedding
		},
		UnconditionalContext {
			control: unconditional_control,
			text_embeddings: negative_embeddings
		},
		latent_shape
	))
}

#[cfg(test)]
mod tests {
	use image::{Rgb, RgbImage};
	use ndarray::{Array3, Array4, ArrayView1, ArrayView3, ArrayView4};

	use super::*;
	use crate::annotators::ControlMap;

	/// Deterministic text encoder: embeddings derived from byte sums, 5 token slots, hidden size 8.
	struct StubEncoder;

	impl UniControlModel for StubEncoder {
		fn encode_text(&self, prompts: &Prompt) -> anyhow::Result<Array3<f32>> {
			Ok(Array3::from_shape_fn((prompts.len(), 5, 8), |(b, t, h)| {
				let seed: u32 = prompts[b].bytes().map(u32::from).sum();
				(seed as f32 + t as f32 * 0.1 + h as f32 * 0.01) / 1000.0
			}))
		}

		fn predict_noise(
			&self,
			_: ArrayView4<'_, f32>,
			_: f32,
			_: ArrayView4<'_, f32>,
			_: ArrayView3<'_, f32>,
			_: Option<ArrayView3<'_, f32>>,
			_: ArrayView1<'_, f32>
		) -> anyhow::Result<Array4<f32>> {
			unreachable!()
		}

		fn decode_latents(&self, _: ArrayView4<'_, f32>) -> anyhow::Result<Array4<f32>> {
			unreachable!()
		}
	}

	fn control_map(width: u32, height: u32) -> ControlMap {
		ControlMap {
			map: RgbImage::from_pixel(width, height, Rgb([64, 128, 255])),
			task: Task::Depth
		}
	}

	#[test]
	fn latent_shape_and_batching() {
		let (ctx, unctx, latent_shape) = assemble(&StubEncoder, &control_map(512, 256), "a pond", "bright", "lowres", Task::Depth, 3, false).unwrap();
		assert_eq!(latent_shape, [3, 4, 32, 64]);
		assert_eq!(ctx.control.shape(), &[3, 3, 256, 512]);
		assert_eq!(ctx.text_embeddings.shape(), &[3, 5, 8]);
		assert_eq!(unctx.text_embeddings.shape(), &[3, 5, 8]);
		// every batch entry is a copy of the same control signal
		assert_eq!(ctx.control.slice(ndarray::s![0, .., .., ..]), ctx.control.slice(ndarray::s![2, .., .., ..]));
	}

	#[test]
	fn task_embedding_is_a_single_slot() {
		let (ctx, _, _) = assemble(&StubEncoder, &control_map(64, 64), "a pond", "", "", Task::Seg, 1, false).unwrap();
		assert_eq!(ctx.task_embedding.shape(), &[1, 1, 8]);
		// derived from the task instruction, not the prompt
		let instruction = StubEncoder.encode_text(&Prompt::from(Task::Seg.instruction())).unwrap();
		assert_eq!(ctx.task_embedding[[0, 0, 0]], instruction[[0, 0, 0]]);
	}

	#[test]
	fn guess_mode_zeroes_unconditional_control() {
		let (ctx, unctx, _) = assemble(&StubEncoder, &control_map(64, 64), "a pond", "", "", Task::Depth, 2, true).unwrap();
		assert!(unctx.control.iter().all(|&v| v == 0.0));
		assert!(ctx.control.iter().any(|&v| v != 0.0));

		let (ctx, unctx, _) = assemble(&StubEncoder, &control_map(64, 64), "a pond", "", "", Task::Depth, 2, false).unwrap();
		assert_eq!(ctx.control, unctx.control);
	}

	#[test]
	fn rejects_empty_batch() {
		assert!(assemble(&StubEncoder, &control_map(64, 64), "a pond", "", "", Task::Depth, 0, false).is_err());
	}
}
