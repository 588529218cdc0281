//! Subscription orchestration module
//!
//! This module provides the single-topic [`Subscriber`], the
//! [`MultiSubscriber`] that manages many of them in set or queue mode, their
//! configuration, and the completion tracking behind
//! [`MultiSubscriber::wait`].

/// Completion tracking for bound subscriptions
pub mod completion;
/// Subscriber configuration and functional options
pub mod config;
/// Subscription error types
pub mod error;
/// Set and queue group orchestration over many subscribers
pub mod multi_subscriber;
/// Single topic subscriber
pub mod subscriber;

// Re-export commonly used types for convenience
pub use completion::{CompletionGuard, CompletionTracker};
pub use config::{
	AckPolicy, MultiSubscriberConfig, SubscriberConfig, SubscriberLimit,
	SubscriberOption,
};
pub use error::{SubscribeError, SubscribeResult};
pub use multi_subscriber::{MultiSubscriber, SubscriptionMode};
pub use subscriber::Subscriber;
