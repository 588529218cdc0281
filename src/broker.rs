//! Broker: connection factory, topic→connection registry and subscriber
//! factory shared by every subscriber.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arcstr::ArcStr;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::routing::{SubscribeError, Subscriber, SubscriberConfig, SubscriberOption};
use crate::transport::Transport;

/// Broker-level settings
#[derive(Debug, Clone, Default)]
pub struct BrokerOptions {
	/// Upper bound on connection establishment; `None` waits indefinitely
	pub connect_timeout: Option<Duration>,
	/// Base configuration that subscriber options are applied to
	pub base_config: SubscriberConfig,
}

impl BrokerOptions {
	/// Bounds connection establishment by `connect_timeout`
	pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
		Self {
			connect_timeout: Some(connect_timeout),
			..self
		}
	}
}

type ConnectionRegistry<C> = HashMap<ArcStr, Arc<C>>;

/// Owns the transport and the registry of connections already bound to
/// topics.
pub struct Broker<T: Transport> {
	transport: T,
	options: BrokerOptions,
	connections: RwLock<ConnectionRegistry<T::Connection>>,
	cancel: CancellationToken,
}

impl<T: Transport> std::fmt::Debug for Broker<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Broker")
			.field("options", &self.options)
			.field("registered_topics", &self.connections.read().len())
			.field("cancelled", &self.cancel.is_cancelled())
			.finish()
	}
}

impl<T: Transport> Broker<T> {
	/// Creates a broker with default options
	pub fn new(transport: T) -> Self {
		Self::with_options(transport, BrokerOptions::default())
	}

	/// Creates a broker with `options`
	pub fn with_options(transport: T, options: BrokerOptions) -> Self {
		Self::with_cancellation(transport, options, CancellationToken::new())
	}

	/// Creates a broker whose connection attempts are abandoned once
	/// `cancel` fires
	pub fn with_cancellation(
		transport: T,
		options: BrokerOptions,
		cancel: CancellationToken,
	) -> Self {
		Self {
			transport,
			options,
			connections: RwLock::new(HashMap::new()),
			cancel,
		}
	}

	/// Underlying transport
	pub fn transport(&self) -> &T {
		&self.transport
	}

	/// Broker-level settings
	pub fn options(&self) -> &BrokerOptions {
		&self.options
	}

	/// Token that aborts pending connection attempts
	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Establishes a new transport connection.
	///
	/// Honours the broker's cancellation token and connect timeout; transport
	/// errors are returned unchanged.
	pub async fn connect(&self) -> Result<Arc<T::Connection>, SubscribeError> {
		if self.cancel.is_cancelled() {
			return Err(SubscribeError::Cancelled);
		}
		let connect = async {
			match self.options.connect_timeout {
				| Some(timeout) => {
					match tokio::time::timeout(timeout, self.transport.connect()).await {
						| Ok(result) => result.map_err(SubscribeError::Transport),
						| Err(_) => Err(SubscribeError::ConnectTimeout {
							timeout_millis: timeout.as_millis() as u64,
						}),
					}
				}
				| None => self
					.transport
					.connect()
					.await
					.map_err(SubscribeError::Transport),
			}
		};

		tokio::select! {
			_ = self.cancel.cancelled() => {
				warn!("Connection establishment cancelled");
				Err(SubscribeError::Cancelled)
			}
			connection = connect => {
				if let Err(err) = &connection {
					debug!(error = %err, "Connection establishment failed");
				}
				connection
			}
		}
	}

	/// Connection already registered for `topic`.
	///
	/// Holds the registry read lock only for the lookup.
	pub fn registered_connection(&self, topic: &str) -> Option<Arc<T::Connection>> {
		self.connections.read().get(topic).cloned()
	}

	/// Registers `connection` as the one to reuse for `topic`. Returns the
	/// connection previously registered for it.
	pub fn register_connection(
		&self,
		topic: impl Into<ArcStr>,
		connection: Arc<T::Connection>,
	) -> Option<Arc<T::Connection>> {
		self.connections.write().insert(topic.into(), connection)
	}

	/// Removes the connection registered for `topic`
	pub fn deregister_connection(&self, topic: &str) -> Option<Arc<T::Connection>> {
		self.connections.write().remove(topic)
	}

	/// Topics with a registered connection, sorted
	pub fn registered_topics(&self) -> Vec<ArcStr> {
		let mut topics: Vec<_> = self.connections.read().keys().cloned().collect();
		topics.sort_unstable();
		topics
	}

	/// Builds an unbound subscriber from `options`, applied in order to the
	/// broker's base configuration
	pub fn create_subscriber<'a, I>(&self, options: I) -> Subscriber<T>
	where I: IntoIterator<Item = &'a SubscriberOption> {
		let config = self.options.base_config.clone().with_options(options);
		Subscriber::new(config)
	}
}
