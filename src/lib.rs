//! # Pubsub Router
//!
//! A topic-routing and subscription-lifecycle layer above a generic
//! publish/subscribe transport.
//!
//! ## Features
//!
//! - **Topic Trie**: Hierarchical route index with orphan pruning
//! - **Handler Routing**: Middleware-style handler chains dispatched along a topic's path
//! - **Connection Reuse**: Subscribers reuse connections already registered for their topic
//! - **Set and Queue Modes**: Independent per-topic subscriptions or one load-balanced queue group
//! - **Layered Configuration**: Per-topic options applied on top of default options
//! - **Completion Tracking**: Await the end of every tracked subscription
//!
//! ## Quick Start
//!
//! ```rust
//! use pubsub_router::prelude::*;
//! use pubsub_router::transport::memory::MemoryTransport;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> pubsub_router::Result<()> {
//!     let broker = Broker::new(MemoryTransport::new());
//!     let multi = MultiSubscriber::new(MultiSubscriberConfig::default());
//!
//!     let (tx, mut rx) = mpsc::channel(16);
//!     multi.chan_subscribe(&broker, "sensors/temperature", "", tx).await?;
//!
//!     broker.transport().publish("sensors/temperature", "23.5");
//!     let message = rx.recv().await.expect("message delivered");
//!     assert_eq!(message.subject.as_str(), "sensors/temperature");
//!
//!     multi.unsubscribe_all().await?;
//!     multi.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Dispatch
//!
//! A [`HandlerRouter`] runs every chain bound on the path from the root to
//! a message's topic, ancestors first. A handler returning [`Flow::Stop`]
//! ends the dispatch.

#![warn(missing_docs)]

/// Connection factory, connection registry and subscriber factory
pub mod broker;
/// Crate-level error aggregation
pub mod error;
/// Subscribers, multi-subscribers and their configuration
pub mod routing;
/// Topic trie and handler dispatch
pub mod topic;
/// Transport abstraction and the in-process transport
pub mod transport;

// === Core Public API ===
pub use broker::{Broker, BrokerOptions};
pub use error::Error;
pub use routing::{
	MultiSubscriber, MultiSubscriberConfig, Subscriber, SubscriberConfig,
	SubscriberOption,
};
pub use topic::{Flow, HandlerRouter, TopicTrie};
pub use transport::{Connection, Subscription, Transport, TransportError};

/// Result type alias for operations that may fail with [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Prelude module for convenient imports
///
/// ```rust
/// use pubsub_router::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most applications

	pub use crate::{
		Broker, BrokerOptions, Error, Flow, HandlerRouter, MultiSubscriber,
		MultiSubscriberConfig, Result, Subscriber, SubscriberConfig,
		SubscriberOption, TopicTrie, Transport,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use pubsub_router::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::Error;
	pub use crate::routing::{SubscribeError, SubscribeResult};
	pub use crate::topic::{TopicTrieError, TrieResult};
	pub use crate::transport::TransportError;
	pub use crate::transport::memory::MemoryTransportError;
}
