//! Text helpers

/// Convert text to a URL-safe slug
///
/// Lowercases, drops every character that is not an ASCII letter, digit,
/// underscore, hyphen or whitespace, collapses runs of whitespace and
/// hyphens into one hyphen and trims hyphens and underscores from both ends.
///
/// # Examples
///
/// ```
/// use rango::core::text::slugify;
///
/// assert_eq!(slugify("Other Frameworks"), "other-frameworks");
/// assert_eq!(slugify("  Django -- Rocks! "), "django-rocks");
/// assert_eq!(slugify("Tim's snake_case"), "tims-snake_case");
/// ```
pub fn slugify(text: &str) -> String {
	let mut slug = String::with_capacity(text.len());
	let mut pending_separator = false;

	for ch in text.chars() {
		if ch.is_ascii_alphanumeric() || ch == '_' {
			if pending_separator && !slug.is_empty() {
				slug.push('-');
			}
			pending_separator = false;
			slug.push(ch.to_ascii_lowercase());
		} else if ch.is_whitespace() || ch == '-' {
			pending_separator = true;
		}
	}

	slug.trim_matches(|c| c == '-' || c == '_').to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("Python", "python")]
	#[case("Other Frameworks", "other-frameworks")]
	#[case("C++", "c")]
	#[case("a - b", "a-b")]
	#[case("__init__", "init")]
	#[case("!!!", "")]
	#[case("", "")]
	#[case("Caf\u{e9} Culture", "caf-culture")]
	fn test_slugify(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(slugify(input), expected);
	}

	#[rstest]
	fn test_slugify_is_idempotent() {
		let once = slugify("How to Tango with Django");

		assert_eq!(slugify(&once), once);
	}
}
