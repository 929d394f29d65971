// Copyright 2023 the unicontrol project developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Debug;

use ndarray::{Array3, Array4, ArrayView1, ArrayView3, ArrayView4};

pub mod conditioning;
pub mod guidance;
mod impl_generate;

cfg_if::cfg_if! {
	if #[cfg(feature = "unicontrol")] {
		mod impl_main;
		pub use self::impl_main::UniControlPipeline;
	}
}

pub use self::conditioning::{GenerationContext, UnconditionalContext};
pub use self::impl_generate::UniControlOptions;
use crate::{DiffusionDeviceControl, Prompt};

/// The contract an inference backend must satisfy to drive the unified control pipeline.
///
/// The backend owns the loaded text encoder, control UNet, and VAE decoder; it is treated as read-only shared state
/// for the lifetime of the process, so all methods take `&self`. [`UniControlPipeline`] implements this over ONNX
/// Runtime sessions; tests implement it with deterministic stubs.
pub trait UniControlModel {
	/// Encodes a batch of text prompts into embeddings of shape `(batch, tokens, hidden)`.
	fn encode_text(&self, prompts: &Prompt) -> anyhow::Result<Array3<f32>>;

	/// Runs one denoising step: predicts the noise residual for `latents` at `timestep` under the given conditioning.
	///
	/// `control_scales` carries the per-injection-point strength schedule (see [`guidance::control_scales`]) and is
	/// passed on every call rather than installed as mutable state, keeping the backend free of per-request mutation.
	/// `task_embedding` is `None` for the unconditional context.
	fn predict_noise(
		&self,
		latents: ArrayView4<'_, f32>,
		timestep: f32,
		control: ArrayView4<'_, f32>,
		text_embeddings: ArrayView3<'_, f32>,
		task_embedding: Option<ArrayView3<'_, f32>>,
		control_scales: ArrayView1<'_, f32>
	) -> anyhow::Result<Array4<f32>>;

	/// Decodes latents to pixel space: NCHW latents in, NHWC float images out, values in approximately [-1, 1].
	fn decode_latents(&self, latents: ArrayView4<'_, f32>) -> anyhow::Result<Array4<f32>>;
}

/// Options for constructing a [`UniControlPipeline`], including device placement.
#[derive(Default, Debug, Clone)]
pub struct UniControlPipelineOptions {
	/// A [`DiffusionDeviceControl`] object, mapping what device to place each model on.
	pub devices: DiffusionDeviceControl
}

/// Describes a function to be called on each step of the pipeline.
pub enum UniControlCallback {
	/// A simple callback to be used for e.g. reporting progress updates.
	Progress {
		/// Describes how frequently to call this callback (3 = every 3 steps).
		frequency: usize,
		/// Function Parameters:
		/// - **`step`** (usize): The current step number.
		/// - **`timestep`** (f32): This step's timestep.
		cb: Box<dyn Fn(usize, f32) -> bool>
	},
	/// A callback to receive this step's latents.
	Latents {
		/// Describes how frequently to call this callback (3 = every 3 steps).
		frequency: usize,
		/// Function Parameters:
		/// - **`step`** (usize): The current step number.
		/// - **`timestep`** (f32): This step's timestep.
		/// - **`latents`** (`Array4<f32>`): Scheduler latent outputs for this step.
		cb: Box<dyn Fn(usize, f32, Array4<f32>) -> bool>
	}
}

impl Debug for UniControlCallback {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("<UniControlCallback>")
	}
}
