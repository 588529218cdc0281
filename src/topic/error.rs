//! Error types for the topic module

use thiserror::Error;

/// Errors that can occur during topic trie operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicTrieError {
	/// Route is empty or contains no segments
	#[error("Invalid route '{route}': route must contain at least one segment")]
	InvalidRoute {
		/// The rejected route
		route: String,
	},

	/// No binding is stored for the route
	#[error("Route '{route}' not found")]
	RouteNotFound {
		/// The route that was looked up
		route: String,
	},
}

impl TopicTrieError {
	/// Creates a new InvalidRoute error
	pub fn invalid_route(route: impl Into<String>) -> Self {
		Self::InvalidRoute {
			route: route.into(),
		}
	}

	/// Creates a new RouteNotFound error
	pub fn route_not_found(route: impl Into<String>) -> Self {
		Self::RouteNotFound {
			route: route.into(),
		}
	}
}

/// Convenient Result type for trie operations
pub type TrieResult<T> = Result<T, TopicTrieError>;
