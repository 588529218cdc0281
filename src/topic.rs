//! Topic handling module
//!
//! This module provides the topic trie used to index bindings by
//! hierarchical route, and the handler router that dispatches messages to
//! the handler chains bound along a topic's path.

// Submodules
/// Topic error types
pub mod error;
/// Handler chains and dispatch
pub mod handler_router;
/// Route splitting and canonical form
pub mod route;
/// Arena-backed topic trie
pub mod topic_trie;

#[cfg(test)]
mod topic_trie_tests;

// Re-export commonly used types for convenience
pub use error::{TopicTrieError, TrieResult};
pub use handler_router::{
	Flow, HandlerFunc, HandlerRouter, HandlersChain, Routable,
};
pub use route::{DEFAULT_SEPARATOR, canonical_route, split_route};
pub use topic_trie::TopicTrie;
