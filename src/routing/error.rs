use thiserror::Error;

use crate::transport::TransportError;

/// Errors during subscription operations
#[derive(Debug, Error)]
pub enum SubscribeError {
	/// Topic is empty
	#[error("Invalid topic: topic cannot be empty")]
	InvalidTopic,

	/// Delivery channel is closed and cannot receive messages
	#[error("Invalid delivery channel for topic '{topic}': channel is closed")]
	InvalidChannel {
		/// Topic the channel was meant for
		topic: String,
	},

	/// Topics and channels passed to a batch call differ in length
	#[error("Batch subscribe length mismatch: {topics} topics, {channels} channels")]
	LengthMismatch {
		/// Number of topics
		topics: usize,
		/// Number of channels
		channels: usize,
	},

	/// The multi-subscriber already holds its maximum number of subscribers
	#[error("Subscriber limit of {max} exceeded")]
	SubscriberLimitExceeded {
		/// Configured limit
		max: usize,
	},

	/// Call conflicts with the mode the multi-subscriber is fixed to
	#[error("Mode conflict: subscriber is in {current} mode, call requires {requested}")]
	ModeConflict {
		/// Mode the instance is fixed to
		current: String,
		/// Mode the call asked for
		requested: String,
	},

	/// Subscriber is already bound to a different topic
	#[error("Subscriber is bound to '{bound}', cannot bind '{requested}'")]
	TopicMismatch {
		/// Topic the subscriber is bound to
		bound: String,
		/// Topic the call asked for
		requested: String,
	},

	/// Operation was cancelled by the caller
	#[error("Operation cancelled")]
	Cancelled,

	/// Connection establishment exceeded the configured timeout
	#[error("Connection establishment timed out after {timeout_millis}ms")]
	ConnectTimeout {
		/// Configured timeout
		timeout_millis: u64,
	},

	/// Error reported by the transport, passed through unchanged
	#[error(transparent)]
	Transport(#[from] TransportError),
}

impl SubscribeError {
	/// Creates a new InvalidChannel error
	pub fn invalid_channel(topic: impl Into<String>) -> Self {
		Self::InvalidChannel {
			topic: topic.into(),
		}
	}

	/// Creates a new ModeConflict error
	pub fn mode_conflict(
		current: impl Into<String>,
		requested: impl Into<String>,
	) -> Self {
		Self::ModeConflict {
			current: current.into(),
			requested: requested.into(),
		}
	}

	/// Creates a new TopicMismatch error
	pub fn topic_mismatch(
		bound: impl Into<String>,
		requested: impl Into<String>,
	) -> Self {
		Self::TopicMismatch {
			bound: bound.into(),
			requested: requested.into(),
		}
	}

	/// True for errors raised by the transport rather than by validation
	pub fn is_transport(&self) -> bool {
		matches!(self, Self::Transport(_))
	}
}

/// Convenient Result type for subscribe operations
pub type SubscribeResult<T> = Result<T, SubscribeError>;
