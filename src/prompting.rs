//! Utilities for cleaning and combining prompts.

use regex::Regex;

lazy_static::lazy_static! {
	static ref RE_COMMA_RUN: Regex = Regex::new(r"\s*,+\s*").unwrap();
	static ref RE_WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
	static ref RE_EDGE_COMMA: Regex = Regex::new(r"^,+\s*|,+\s*$").unwrap();
}

/// Cleans up a potentially dirty prompt: collapses repeated commas and whitespace and removes leading/trailing commas.
///
/// ```
/// # use unicontrol::prompting::cleanup_prompt;
/// assert_eq!(cleanup_prompt("best quality,,  extremely detailed, ").as_str(), "best quality, extremely detailed");
/// ```
pub fn cleanup_prompt<S: AsRef<str>>(prompt: S) -> String {
	let prompt = RE_COMMA_RUN.replace_all(prompt.as_ref(), ", ");
	let prompt = RE_WHITESPACE.replace_all(prompt.as_ref(), " ");
	let prompt = RE_EDGE_COMMA.replace_all(prompt.as_ref(), "");
	prompt.trim().to_string()
}

/// Combines two concepts into one prompt, joined with a comma separator. This is how a caller's prompt is merged with
/// the quality-decoration "added prompt" before text encoding.
///
/// If either side is empty, the other is returned unchanged (no dangling separator).
///
/// ```
/// # use unicontrol::prompting::combine_concepts;
/// assert_eq!(
/// 	combine_concepts("a quiet cabin in the woods", "best quality, extremely detailed,").as_str(),
/// 	"a quiet cabin in the woods, best quality, extremely detailed"
/// );
/// ```
pub fn combine_concepts<A: AsRef<str>, B: AsRef<str>>(a: A, b: B) -> String {
	let a = RE_EDGE_COMMA.replace_all(a.as_ref(), "");
	let b = RE_EDGE_COMMA.replace_all(b.as_ref(), "");
	let (a, b) = (a.trim(), b.trim());
	if a.is_empty() {
		b.to_string()
	} else if b.is_empty() {
		a.to_string()
	} else {
		format!("{a}, {b}")
	}
}

#[cfg(test)]
mod tests {
	use super::{cleanup_prompt, combine_concepts};

	#[test]
	fn test_cleanup_prompt() {
		assert_eq!(cleanup_prompt(",best quality,,  extremely detailed, bright, ").as_str(), "best quality, extremely detailed, bright");
	}

	#[test]
	fn test_combine_concepts() {
		assert_eq!(combine_concepts("oil painting of a fox,", " best quality, bright").as_str(), "oil painting of a fox, best quality, bright");
		assert_eq!(combine_concepts("oil painting of a fox", "").as_str(), "oil painting of a fox");
		assert_eq!(combine_concepts("", "best quality").as_str(), "best quality");
	}
}
