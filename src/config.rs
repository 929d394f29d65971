use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffusionFramework {
	Onnx
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum TokenizerConfig {
	#[serde(rename_all = "kebab-case")]
	CLIPTokenizer {
		path: String,
		model_max_length: usize,
		bos_token: u32,
		eos_token: u32
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CLIPTextModelConfig {
	pub path: String
}

/// The control UNet: the denoiser fused with its control branch, exported as a single graph.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControlUNetConfig {
	pub path: String
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct VAEConfig {
	pub decoder: String
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UniControlConfig {
	pub tokenizer: TokenizerConfig,
	pub text_encoder: CLIPTextModelConfig,
	pub control_unet: ControlUNetConfig,
	pub vae: VAEConfig
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "pipeline", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum DiffusionPipeline {
	UniControl {
		framework: DiffusionFramework,
		#[serde(flatten)]
		inner: UniControlConfig
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_manifest() {
		let manifest = r#"
pipeline = "uni-control"
framework = "onnx"

[tokenizer]
type = "CLIPTokenizer"
path = "tokenizer.json"
model-max-length = 77
bos-token = 49406
eos-token = 49407

[text-encoder]
path = "text_encoder.onnx"

[control-unet]
path = "control_unet.onnx"

[vae]
decoder = "vae_decoder.onnx"
"#;
		let config: DiffusionPipeline = toml::from_str(manifest).unwrap();
		let DiffusionPipeline::UniControl { framework, inner } = config;
		assert_eq!(framework, DiffusionFramework::Onnx);
		assert_eq!(inner.control_unet.path, "control_unet.onnx");
		assert_eq!(inner.vae.decoder, "vae_decoder.onnx");
	}
}
