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

//! CLIP tokenizer implementation.

use std::path::PathBuf;

use ndarray::Array2;
use tokenizers::Tokenizer;

/// A basic [CLIP](https://arxiv.org/abs/2103.00020) tokenizer.
///
/// CLIP is used by many diffusion models, including the UniControl base model, for prompt tokenization and feature
/// extraction.
pub struct CLIPStandardTokenizer {
	pub inner: Tokenizer,
	model_max_length: usize,
	bos_token_id: u32,
	eos_token_id: u32
}

unsafe impl Send for CLIPStandardTokenizer {}
unsafe impl Sync for CLIPStandardTokenizer {}

impl CLIPStandardTokenizer {
	/// Loads a CLIP tokenizer from a file.
	pub fn new(path: impl Into<PathBuf>, model_max_length: usize, bos_token_id: u32, eos_token_id: u32) -> anyhow::Result<Self> {
		let path = path.into();
		let bytes = std::fs::read(path)?;
		Self::from_bytes(bytes, model_max_length, bos_token_id, eos_token_id)
	}

	/// Loads a CLIP tokenizer from a byte array.
	pub fn from_bytes<B: AsRef<[u8]>>(bytes: B, model_max_length: usize, bos_token_id: u32, eos_token_id: u32) -> anyhow::Result<Self> {
		let tokenizer: Tokenizer = serde_json::from_slice(bytes.as_ref())?;
		Ok(Self {
			inner: tokenizer,
			model_max_length,
			bos_token_id,
			eos_token_id
		})
	}

	/// Returns the maximum length of tokens this tokenizer supports. For most CLIP models, this is 77 tokens.
	#[allow(clippy::len_without_is_empty)]
	pub fn len(&self) -> usize {
		self.model_max_length
	}

	/// Returns the ID of the end-of-string token.
	pub fn eos(&self) -> u32 {
		self.eos_token_id
	}

	/// Returns the ID of the beginning-of-string token.
	#[allow(dead_code)]
	pub fn bos(&self) -> u32 {
		self.bos_token_id
	}

	/// Encodes the input prompts into an [`Array2`] to be passed to a CLIPTextModel, truncating or padding each
	/// sequence to the model's maximum length. Truncated sequences keep their end-of-string token; padding reuses it.
	pub fn encode_for_text_model(&self, prompts: &[String]) -> anyhow::Result<Array2<i32>> {
		let mut ids = Vec::with_capacity(prompts.len() * self.model_max_length);
		for prompt in prompts {
			let encoding = self.inner.encode(prompt.as_str(), true).map_err(|e| anyhow::anyhow!("{e:?}"))?;
			let mut row: Vec<i32> = encoding.get_ids().iter().map(|tok| *tok as i32).collect();
			if row.len() > self.model_max_length {
				row.truncate(self.model_max_length);
				row[self.model_max_length - 1] = self.eos_token_id as i32;
			}
			row.resize(self.model_max_length, self.eos_token_id as i32);
			ids.extend(row);
		}
		Ok(Array2::from_shape_vec((prompts.len(), self.model_max_length), ids)?)
	}
}
