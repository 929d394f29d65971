//! Diffusion pipelines.

use std::{borrow::Cow, ops::Deref};

mod unicontrol;
pub use self::unicontrol::*;

/// Text prompt(s) used as input in diffusion pipelines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt(pub(crate) Vec<String>);

impl Prompt {
	/// Creates a prompt batch of `batch_size` copies of the empty string.
	pub fn default_batched(batch_size: usize) -> Self {
		Self(vec![String::new(); batch_size])
	}

	/// Creates a prompt batch of `batch_size` copies of `text`.
	pub fn batched(text: impl Into<String>, batch_size: usize) -> Self {
		let text: String = text.into();
		Self(vec![text; batch_size])
	}
}

impl Deref for Prompt {
	type Target = Vec<String>;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<'s> From<&'s str> for Prompt {
	fn from(value: &'s str) -> Self {
		Self(vec![value.to_string()])
	}
}

impl From<String> for Prompt {
	fn from(value: String) -> Self {
		Self(vec![value])
	}
}

impl<'s> From<Cow<'s, str>> for Prompt {
	fn from(value: Cow<'s, str>) -> Self {
		Self(vec![value.to_string()])
	}
}

impl<'s> From<&'s [String]> for Prompt {
	fn from(value: &'s [String]) -> Self {
		Self(value.to_vec())
	}
}

impl From<Vec<String>> for Prompt {
	fn from(value: Vec<String>) -> Self {
		Self(value)
	}
}

impl<'s> From<Vec<&'s str>> for Prompt {
	fn from(value: Vec<&'s str>) -> Self {
		Self(value.iter().map(|v| v.to_string()).collect())
	}
}
