//! Transport collaborator interface
//!
//! The routing layer never speaks a wire protocol itself. A [`Transport`]
//! opens [`Connection`]s, and a connection binds a delivery channel to a
//! topic, returning a [`Subscription`] handle. Errors raised here are
//! passed through to callers unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::routing::SubscriberConfig;

/// In-process transport used by tests and demos
pub mod memory;

/// Opaque transport failure
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Message type delivered by transport `T`
pub type MessageOf<T> =
	<<T as Transport>::Connection as Connection>::Message;

/// Callback run once when a subscription ends
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// Subscription handle type produced by transport `T`
pub type SubscriptionOf<T> =
	<<T as Transport>::Connection as Connection>::Subscription;

/// Establishes connections to the messaging backend
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	/// Connection type produced by this transport
	type Connection: Connection;

	/// Opens a new connection. May block on network I/O.
	async fn connect(&self) -> Result<Arc<Self::Connection>, TransportError>;
}

/// An established connection able to bind delivery channels to topics
#[async_trait]
pub trait Connection: Send + Sync + 'static {
	/// Message delivered through bound channels
	type Message: Send + 'static;
	/// Handle representing one bound subscription
	type Subscription: Subscription;

	/// Binds `channel` to `topic`
	async fn chan_subscribe(
		&self,
		topic: &str,
		channel: Sender<Self::Message>,
		config: &SubscriberConfig,
	) -> Result<Self::Subscription, TransportError>;

	/// Binds `channel` to `topic` as a member of the load-balanced `queue`
	async fn chan_queue_subscribe(
		&self,
		topic: &str,
		queue: &str,
		channel: Sender<Self::Message>,
		config: &SubscriberConfig,
	) -> Result<Self::Subscription, TransportError>;
}

/// Handle of a live transport subscription
#[async_trait]
pub trait Subscription: Send + Sync + 'static {
	/// Whether the subscription is still delivering messages
	fn is_valid(&self) -> bool;

	/// Stops delivery. Calling it on an invalid subscription is not an error.
	async fn unsubscribe(&self) -> Result<(), TransportError>;

	/// Registers `hook` to run once when the subscription ends, whether by
	/// [`unsubscribe`](Self::unsubscribe), a delivery limit, or the transport
	/// giving up on the channel. Runs `hook` right away if the subscription
	/// has already ended. Replaces any hook registered earlier.
	///
	/// Implementations must not call `hook` while holding locks of their own.
	fn on_close(&self, hook: CloseHook);
}
