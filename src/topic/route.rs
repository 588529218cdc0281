//! Route splitting and canonical route form
//!
//! A route is a separator-delimited path such as `sensors/kitchen/temp`.
//! Empty segments produced by leading, trailing or adjacent separators are
//! dropped, so `a//b`, `/a/b/` and `a/b` all address the same trie node.

use smallvec::SmallVec;

use super::error::TopicTrieError;

/// Separator used when none is configured
pub const DEFAULT_SEPARATOR: char = '/';

/// Route segments, inline for typical topic depths
pub type Segments<'a> = SmallVec<[&'a str; 8]>;

/// Splits `route` into its non-empty segments.
///
/// Fails with [`TopicTrieError::InvalidRoute`] when the route is empty or
/// consists only of separators.
pub fn split_route(
	route: &str,
	separator: char,
) -> Result<Segments<'_>, TopicTrieError> {
	if route.is_empty() {
		return Err(TopicTrieError::invalid_route(route));
	}
	let segments: Segments<'_> = route
		.split(separator)
		.filter(|segment| !segment.is_empty())
		.collect();
	if segments.is_empty() {
		return Err(TopicTrieError::invalid_route(route));
	}
	Ok(segments)
}

/// Joins segments back into the canonical route string
pub fn join_segments<S: AsRef<str>>(segments: &[S], separator: char) -> String {
	let mut route = String::new();
	for (index, segment) in segments.iter().enumerate() {
		if index > 0 {
			route.push(separator);
		}
		route.push_str(segment.as_ref());
	}
	route
}

/// Returns the canonical form of `route` (empty segments removed)
pub fn canonical_route(
	route: &str,
	separator: char,
) -> Result<String, TopicTrieError> {
	let segments = split_route(route, separator)?;
	Ok(join_segments(&segments, separator))
}
