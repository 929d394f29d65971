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

use std::{fs, path::PathBuf, sync::Arc};

use ndarray::{concatenate, Array1, Array3, Array4, ArrayView1, ArrayView3, ArrayView4, Axis, IxDyn};
use ort::{
	tensor::{FromArray, InputTensor, OrtOwnedTensor},
	Environment, Session, SessionBuilder
};

use super::{UniControlModel, UniControlPipelineOptions};
use crate::{
	clip::CLIPStandardTokenizer,
	config::{DiffusionFramework, DiffusionPipeline, TokenizerConfig, UniControlConfig},
	Prompt
};

/// A [UniControl](https://arxiv.org/abs/2305.11147) pipeline backed by ONNX Runtime sessions.
///
/// Holds the text encoder, the control UNet (the denoiser fused with its control branch), and the VAE decoder,
/// loaded from a model directory described by a `unicontrol.toml` manifest.
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// use unicontrol::{OrtEnvironment, UniControlPipeline, UniControlPipelineOptions};
///
/// let environment = std::sync::Arc::new(OrtEnvironment::builder().build()?);
/// let pipeline = UniControlPipeline::new(&environment, "./unicontrol-v1.1/", UniControlPipelineOptions::default())?;
/// # Ok(())
/// # }
/// ```
pub struct UniControlPipeline {
	#[allow(dead_code)]
	environment: Arc<Environment>,
	#[allow(dead_code)]
	options: UniControlPipelineOptions,
	#[allow(dead_code)]
	config: UniControlConfig,
	tokenizer: CLIPStandardTokenizer,
	text_encoder: Session,
	control_unet: Session,
	vae_decoder: Session
}

impl UniControlPipeline {
	/// Creates a new UniControl pipeline, loading models from `root`.
	pub fn new(environment: &Arc<Environment>, root: impl Into<PathBuf>, options: UniControlPipelineOptions) -> anyhow::Result<Self> {
		let root: PathBuf = root.into();
		let config: DiffusionPipeline = toml::from_str(&fs::read_to_string(root.join("unicontrol.toml"))?)?;
		let config: UniControlConfig = match config {
			DiffusionPipeline::UniControl { framework, inner } => {
				match framework {
					DiffusionFramework::Onnx => ()
				}
				inner
			}
			#[allow(unreachable_patterns)]
			_ => anyhow::bail!("not a unicontrol pipeline")
		};

		let tokenizer = match &config.tokenizer {
			TokenizerConfig::CLIPTokenizer {
				path,
				model_max_length,
				bos_token,
				eos_token
			} => CLIPStandardTokenizer::new(root.join(path.clone()), *model_max_length, *bos_token, *eos_token)?,
			#[allow(unreachable_patterns)]
			_ => anyhow::bail!("not a clip tokenizer")
		};

		let text_encoder = SessionBuilder::new(environment)?
			.with_execution_providers([options.devices.text_encoder.clone().into()])?
			.with_model_from_file(root.join(config.text_encoder.path.clone()))?;

		let control_unet = SessionBuilder::new(environment)?
			.with_execution_providers([options.devices.control_unet.clone().into()])?
			.with_model_from_file(root.join(config.control_unet.path.clone()))?;

		let vae_decoder = SessionBuilder::new(environment)?
			.with_execution_providers([options.devices.vae_decoder.clone().into()])?
			.with_model_from_file(root.join(config.vae.decoder.clone()))?;

		tracing::debug!(root = %root.display(), "loaded unicontrol pipeline");

		Ok(Self {
			environment: Arc::clone(environment),
			options,
			config,
			tokenizer,
			text_encoder,
			control_unet,
			vae_decoder
		})
	}
}

impl UniControlModel for UniControlPipeline {
	fn encode_text(&self, prompts: &Prompt) -> anyhow::Result<Array3<f32>> {
		let token_ids = self.tokenizer.encode_for_text_model(prompts)?;
		let embeddings = self.text_encoder.run(vec![InputTensor::from_array(token_ids.into_dyn())])?;
		let embeddings: OrtOwnedTensor<'_, f32, IxDyn> = embeddings[0].try_extract()?;
		Ok(embeddings.view().to_owned().into_dimensionality()?)
	}

	fn predict_noise(
		&self,
		latents: ArrayView4<'_, f32>,
		timestep: f32,
		control: ArrayView4<'_, f32>,
		text_embeddings: ArrayView3<'_, f32>,
		task_embedding: Option<ArrayView3<'_, f32>>,
		control_scales: ArrayView1<'_, f32>
	) -> anyhow::Result<Array4<f32>> {
		// the exported graph has a fixed input signature; the unconditional pass encodes "no task" as a zero
		// embedding, which the fused adapters treat as an all-off gate
		let task_embedding: Array3<f32> = match task_embedding {
			Some(embedding) => embedding.to_owned(),
			None => Array3::zeros((1, 1, text_embeddings.shape()[2]))
		};

		let noise_pred = self.control_unet.run(vec![
			InputTensor::from_array(latents.to_owned().into_dyn()),
			InputTensor::from_array(Array1::from_iter([timestep]).into_dyn()),
			InputTensor::from_array(control.to_owned().into_dyn()),
			InputTensor::from_array(text_embeddings.to_owned().into_dyn()),
			InputTensor::from_array(task_embedding.into_dyn()),
			InputTensor::from_array(control_scales.to_owned().into_dyn()),
		])?;
		let noise_pred: OrtOwnedTensor<'_, f32, IxDyn> = noise_pred[0].try_extract()?;
		Ok(noise_pred.view().to_owned().into_dimensionality()?)
	}

	fn decode_latents(&self, latents: ArrayView4<'_, f32>) -> anyhow::Result<Array4<f32>> {
		let latents = 1.0 / 0.18215 * &latents;

		let mut images = Vec::new();
		for latent_chunk in latents.axis_iter(Axis(0)) {
			let latent_chunk = latent_chunk.into_dyn().insert_axis(Axis(0));
			let image = self.vae_decoder.run(vec![InputTensor::from_array(latent_chunk.to_owned())])?;
			let image: OrtOwnedTensor<'_, f32, IxDyn> = image[0].try_extract()?;
			let image: Array4<f32> = image.view().to_owned().into_dimensionality()?;
			images.push(image.permuted_axes([0, 2, 3, 1]));
		}

		let views: Vec<_> = images.iter().map(Array4::view).collect();
		Ok(concatenate(Axis(0), &views)?)
	}
}
