//! Subscriber configuration and the option reducer
//!
//! A configuration is built by applying an ordered sequence of
//! [`SubscriberOption`]s to a base [`SubscriberConfig`]; later options win.
//! Multi-subscribers layer a per-topic override sequence on top of their
//! default sequence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize, Serializer};

/// Acknowledgement policy requested from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
	/// Messages need no acknowledgement
	#[default]
	None,
	/// Every message is acknowledged individually
	Explicit,
	/// Acknowledging a message acknowledges all earlier ones
	All,
}

/// Resolved per-subscriber settings handed to the transport on bind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
	/// Optional label used in diagnostics
	pub name: Option<String>,
	/// Maximum number of undelivered messages buffered by the transport
	pub pending_messages_limit: usize,
	/// Maximum number of undelivered payload bytes buffered by the transport
	pub pending_bytes_limit: usize,
	/// Unsubscribe automatically after this many deliveries
	pub auto_unsubscribe: Option<u64>,
	/// Acknowledgement policy
	pub ack_policy: AckPolicy,
}

impl Default for SubscriberConfig {
	fn default() -> Self {
		Self {
			name: None,
			pending_messages_limit: 65_536,
			pending_bytes_limit: 64 * 1024 * 1024,
			auto_unsubscribe: None,
			ack_policy: AckPolicy::None,
		}
	}
}

impl SubscriberConfig {
	/// Applies `options` in order to the default configuration
	pub fn from_options<'a, I>(options: I) -> Self
	where I: IntoIterator<Item = &'a SubscriberOption> {
		Self::default().with_options(options)
	}

	/// Applies `options` in order on top of `self`
	pub fn with_options<'a, I>(mut self, options: I) -> Self
	where I: IntoIterator<Item = &'a SubscriberOption> {
		for option in options {
			option.apply(&mut self);
		}
		self
	}
}

/// A single configuration step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberOption {
	/// Sets the diagnostic label
	Name(String),
	/// Sets both pending limits
	PendingLimits {
		/// Message count limit
		messages: usize,
		/// Byte limit
		bytes: usize,
	},
	/// Unsubscribes after the given number of deliveries
	AutoUnsubscribe(u64),
	/// Sets the acknowledgement policy
	AckPolicy(AckPolicy),
}

impl SubscriberOption {
	/// Writes this option into `config`
	pub fn apply(&self, config: &mut SubscriberConfig) {
		match self {
			| Self::Name(name) => config.name = Some(name.clone()),
			| Self::PendingLimits { messages, bytes } => {
				config.pending_messages_limit = *messages;
				config.pending_bytes_limit = *bytes;
			}
			| Self::AutoUnsubscribe(max) => config.auto_unsubscribe = Some(*max),
			| Self::AckPolicy(policy) => config.ack_policy = *policy,
		}
	}
}

/// Maximum number of subscribers a multi-subscriber may hold.
///
/// Deserializes from an integer or null; a negative integer or null means
/// unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "Option<i64>")]
pub struct SubscriberLimit(Option<usize>);

impl From<Option<i64>> for SubscriberLimit {
	fn from(max: Option<i64>) -> Self {
		max.map_or(Self::UNLIMITED, Self::from_signed)
	}
}

impl Serialize for SubscriberLimit {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.0.serialize(serializer)
	}
}

impl SubscriberLimit {
	/// No limit
	pub const UNLIMITED: Self = Self(None);

	/// At most `max` subscribers
	pub const fn at_most(max: usize) -> Self {
		Self(Some(max))
	}

	/// Integer form where any negative value means unlimited
	pub fn from_signed(max: i64) -> Self {
		match usize::try_from(max) {
			| Ok(max) => Self(Some(max)),
			| Err(_) if max < 0 => Self::UNLIMITED,
			| Err(_) => Self(Some(usize::MAX)),
		}
	}

	/// The limit, `None` when unlimited
	pub fn get(&self) -> Option<usize> {
		self.0
	}

	/// Whether one more subscriber fits next to `current` existing ones
	pub fn admits(&self, current: usize) -> bool {
		self.0.is_none_or(|max| current < max)
	}
}

/// Settings for a multi-subscriber
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiSubscriberConfig {
	/// Options applied to every subscriber
	pub default_options: Vec<SubscriberOption>,
	/// Per-topic overrides layered on top of the defaults
	pub topic_options: HashMap<String, Vec<SubscriberOption>>,
	/// Maximum number of subscribers
	pub max_subscribers: SubscriberLimit,
}

impl MultiSubscriberConfig {
	/// Creates a config with `default_options`, no overrides and no limit
	pub fn new(default_options: Vec<SubscriberOption>) -> Self {
		Self {
			default_options,
			..Self::default()
		}
	}

	/// Sets the maximum number of subscribers
	pub fn with_max_subscribers(self, max_subscribers: SubscriberLimit) -> Self {
		Self {
			max_subscribers,
			..self
		}
	}

	/// Adds a per-topic override for `topic`
	pub fn with_topic_options(
		mut self,
		topic: impl Into<String>,
		options: Vec<SubscriberOption>,
	) -> Self {
		self.topic_options.insert(topic.into(), options);
		self
	}
}
