use std::fmt;
use std::sync::{Arc, Weak};

use arcstr::ArcStr;
use parking_lot::RwLock;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use super::completion::CompletionGuard;
use super::config::SubscriberConfig;
use super::error::{SubscribeError, SubscribeResult};
use crate::broker::Broker;
use crate::transport::{
	Connection, MessageOf, Subscription, SubscriptionOf, Transport,
};

struct SubscriberState<S> {
	topic: Option<ArcStr>,
	queue: Option<ArcStr>,
	subscription: Option<Arc<S>>,
	completion: Option<CompletionGuard>,
}

impl<S: Subscription> SubscriberState<S> {
	fn is_live(&self) -> bool {
		self.subscription
			.as_ref()
			.is_some_and(|subscription| subscription.is_valid())
	}
}

type SharedState<S> = Arc<RwLock<SubscriberState<S>>>;

/// Releases the completion guard once the current subscription has ended.
/// A replaced handle closing while a live one is bound keeps the guard.
fn release_on_close<S: Subscription>(state: &Weak<RwLock<SubscriberState<S>>>) {
	let Some(state) = state.upgrade() else {
		return;
	};
	let released = {
		let mut state = state.write();
		if state.is_live() {
			None
		} else {
			state.completion.take()
		}
	};
	if released.is_some() {
		debug!(
			topic = ?state.read().topic,
			"Subscription ended, completion released"
		);
	}
}

/// Binds one topic to one delivery channel through one transport
/// connection.
///
/// The broker registry is consulted under its read lock only for the
/// reuse-or-connect decision, so concurrent `chan_subscribe` calls on the
/// same subscriber are not serialised; callers needing that must
/// synchronise themselves.
///
/// Dropping a subscriber drops its transport handle; whether that releases
/// the transport subscription is up to the transport.
pub struct Subscriber<T: Transport> {
	config: SubscriberConfig,
	state: SharedState<SubscriptionOf<T>>,
}

impl<T: Transport> fmt::Debug for Subscriber<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.read();
		f.debug_struct("Subscriber")
			.field("topic", &state.topic)
			.field("queue", &state.queue)
			.field("bound", &state.subscription.is_some())
			.field("config", &self.config)
			.finish()
	}
}

impl<T: Transport> Subscriber<T> {
	/// Creates an unbound subscriber. Usually obtained from
	/// [`Broker::create_subscriber`].
	pub fn new(config: SubscriberConfig) -> Self {
		Self {
			config,
			state: Arc::new(RwLock::new(SubscriberState {
				topic: None,
				queue: None,
				subscription: None,
				completion: None,
			})),
		}
	}

	/// Resolved configuration handed to the transport on bind
	pub fn config(&self) -> &SubscriberConfig {
		&self.config
	}

	/// Topic this subscriber is bound to
	pub fn topic(&self) -> Option<ArcStr> {
		self.state.read().topic.clone()
	}

	/// Queue group this subscriber is a member of
	pub fn queue(&self) -> Option<ArcStr> {
		self.state.read().queue.clone()
	}

	/// Current transport subscription handle
	pub fn subscription(&self) -> Option<Arc<SubscriptionOf<T>>> {
		self.state.read().subscription.clone()
	}

	/// Whether a live transport subscription is held
	pub fn is_valid(&self) -> bool {
		self.state.read().is_live()
	}

	/// Binds `channel` to `topic`, reusing the connection the broker has
	/// registered for the topic or establishing a new one.
	///
	/// On failure the subscriber is left unchanged.
	pub async fn chan_subscribe(
		&self,
		broker: &Broker<T>,
		topic: &str,
		channel: Sender<MessageOf<T>>,
	) -> SubscribeResult<()> {
		self.bind(broker, topic, None, channel).await
	}

	/// Binds `channel` to `topic` as a member of queue group `queue`.
	/// An empty `queue` binds a plain subscription.
	pub async fn chan_queue_subscribe(
		&self,
		broker: &Broker<T>,
		topic: &str,
		queue: &str,
		channel: Sender<MessageOf<T>>,
	) -> SubscribeResult<()> {
		let queue = Some(queue).filter(|queue| !queue.is_empty());
		self.bind(broker, topic, queue, channel).await
	}

	async fn bind(
		&self,
		broker: &Broker<T>,
		topic: &str,
		queue: Option<&str>,
		channel: Sender<MessageOf<T>>,
	) -> SubscribeResult<()> {
		if topic.is_empty() {
			return Err(SubscribeError::InvalidTopic);
		}
		if channel.is_closed() {
			return Err(SubscribeError::invalid_channel(topic));
		}
		if let Some(bound) = self.state.read().topic.as_ref() {
			if bound.as_str() != topic {
				return Err(SubscribeError::topic_mismatch(bound.as_str(), topic));
			}
		}

		let connection = match broker.registered_connection(topic) {
			| Some(connection) => {
				debug!(topic = %topic, "Reusing registered connection");
				connection
			}
			| None => {
				debug!(topic = %topic, "No registered connection, connecting");
				broker.connect().await?
			}
		};

		let subscription = match queue {
			| Some(queue) => {
				connection
					.chan_queue_subscribe(topic, queue, channel, &self.config)
					.await?
			}
			| None => {
				connection
					.chan_subscribe(topic, channel, &self.config)
					.await?
			}
		};

		let subscription = Arc::new(subscription);
		let previous = {
			let mut state = self.state.write();
			if state.topic.is_none() {
				state.topic = Some(ArcStr::from(topic));
			}
			state.queue = queue.map(ArcStr::from);
			state.subscription.replace(Arc::clone(&subscription))
		};
		let weak = Arc::downgrade(&self.state);
		subscription.on_close(Box::new(move || release_on_close(&weak)));
		if let Some(previous) = previous.filter(|previous| previous.is_valid()) {
			debug!(topic = %topic, "Replacing live subscription handle");
			if let Err(err) = previous.unsubscribe().await {
				warn!(topic = %topic, error = %err, "Failed to release replaced subscription");
			}
		}
		Ok(())
	}

	/// Whether a completion guard is held
	pub(crate) fn is_tracked(&self) -> bool {
		self.state.read().completion.is_some()
	}

	/// Attaches a completion guard; the guard is released when the
	/// subscription ends, on unsubscribe, or on drop. A subscription that has
	/// already ended completes at once. Returns false if the subscriber is
	/// already tracked.
	pub(crate) fn track(&self, guard: CompletionGuard) -> bool {
		let mut state = self.state.write();
		if state.completion.is_some() {
			return false;
		}
		if state.is_live() {
			state.completion = Some(guard);
		}
		true
	}

	/// Unsubscribes the transport handle and completes the subscriber.
	///
	/// Calling it on an unbound subscriber is a no-op.
	pub async fn unsubscribe(&self) -> SubscribeResult<()> {
		let (subscription, completion) = {
			let mut state = self.state.write();
			(state.subscription.take(), state.completion.take())
		};
		let result = match subscription {
			| Some(subscription) => subscription
				.unsubscribe()
				.await
				.map_err(SubscribeError::Transport),
			| None => Ok(()),
		};
		drop(completion);
		result
	}
}

#[cfg(test)]
mod tests {
	use tokio::sync::mpsc;

	use super::*;
	use crate::routing::SubscriberOption;
	use crate::transport::memory::MemoryTransport;

	fn broker() -> Broker<MemoryTransport> {
		Broker::new(MemoryTransport::new())
	}

	#[tokio::test]
	async fn test_subscribe_establishes_connection() {
		let broker = broker();
		let subscriber = broker.create_subscriber(&[]);
		let (tx, mut rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "a/b", tx).await.unwrap();

		assert_eq!(broker.transport().connect_count(), 1);
		assert_eq!(subscriber.topic().as_deref(), Some("a/b"));
		assert!(subscriber.is_valid());
		assert_eq!(broker.transport().publish("a/b", "x"), 1);
		assert!(rx.recv().await.is_some());
	}

	#[tokio::test]
	async fn test_subscribe_reuses_registered_connection() {
		let broker = broker();
		let connection = broker.connect().await.unwrap();
		broker.register_connection("a/b", connection);
		let subscriber = broker.create_subscriber(&[]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "a/b", tx).await.unwrap();

		// only the connection made above
		assert_eq!(broker.transport().connect_count(), 1);
		assert!(subscriber.is_valid());
	}

	#[tokio::test]
	async fn test_validation_errors() {
		let broker = broker();
		let subscriber = broker.create_subscriber(&[]);
		let (tx, rx) = mpsc::channel(4);

		let err = subscriber.chan_subscribe(&broker, "", tx.clone()).await;
		assert!(matches!(err, Err(SubscribeError::InvalidTopic)));

		drop(rx);
		let err = subscriber.chan_subscribe(&broker, "a", tx).await;
		assert!(matches!(err, Err(SubscribeError::InvalidChannel { .. })));

		assert_eq!(broker.transport().connect_count(), 0);
		assert!(subscriber.topic().is_none());
	}

	#[tokio::test]
	async fn test_failure_leaves_state_unchanged() {
		let broker = broker();
		broker.transport().reject_topic("a");
		let subscriber = broker.create_subscriber(&[]);
		let (tx, _rx) = mpsc::channel(4);

		let err = subscriber.chan_subscribe(&broker, "a", tx).await.unwrap_err();
		assert!(err.is_transport());
		assert!(subscriber.topic().is_none());
		assert!(subscriber.subscription().is_none());

		broker.transport().set_connect_failure(true);
		let (tx, _rx2) = mpsc::channel(4);
		let err = subscriber.chan_subscribe(&broker, "b", tx).await.unwrap_err();
		assert!(err.is_transport());
		assert!(subscriber.topic().is_none());
	}

	#[tokio::test]
	async fn test_rebind_replaces_subscription() {
		let broker = broker();
		let subscriber = broker.create_subscriber(&[]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "t", tx.clone()).await.unwrap();
		let first = subscriber.subscription().unwrap();
		subscriber.chan_subscribe(&broker, "t", tx).await.unwrap();

		assert!(!first.is_valid());
		assert!(subscriber.is_valid());
		assert_eq!(broker.transport().subscription_count("t"), 1);
	}

	#[tokio::test]
	async fn test_bound_topic_is_immutable() {
		let broker = broker();
		let subscriber = broker.create_subscriber(&[]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "t", tx.clone()).await.unwrap();
		let err = subscriber.chan_subscribe(&broker, "u", tx).await;

		assert!(matches!(err, Err(SubscribeError::TopicMismatch { .. })));
		assert_eq!(subscriber.topic().as_deref(), Some("t"));
	}

	#[tokio::test]
	async fn test_config_reaches_transport() {
		let broker = broker();
		let subscriber =
			broker.create_subscriber(&[SubscriberOption::AutoUnsubscribe(1)]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "t", tx).await.unwrap();
		assert_eq!(broker.transport().publish("t", "once"), 1);
		assert!(!subscriber.is_valid());
	}

	#[tokio::test]
	async fn test_completion_released_when_subscription_ends() {
		let broker = broker();
		let tracker = crate::routing::CompletionTracker::new();
		let subscriber =
			broker.create_subscriber(&[SubscriberOption::AutoUnsubscribe(1)]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "t", tx).await.unwrap();
		assert!(subscriber.track(tracker.track()));
		assert_eq!(tracker.pending(), 1);

		assert_eq!(broker.transport().publish("t", "once"), 1);
		assert_eq!(tracker.pending(), 0);
	}

	#[tokio::test]
	async fn test_rebind_keeps_completion() {
		let broker = broker();
		let tracker = crate::routing::CompletionTracker::new();
		let subscriber = broker.create_subscriber(&[]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "t", tx.clone()).await.unwrap();
		subscriber.track(tracker.track());
		subscriber.chan_subscribe(&broker, "t", tx).await.unwrap();
		assert_eq!(tracker.pending(), 1);

		subscriber.unsubscribe().await.unwrap();
		assert_eq!(tracker.pending(), 0);
	}

	#[tokio::test]
	async fn test_tracking_ended_subscription_completes_at_once() {
		let broker = broker();
		let tracker = crate::routing::CompletionTracker::new();
		let subscriber =
			broker.create_subscriber(&[SubscriberOption::AutoUnsubscribe(1)]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber.chan_subscribe(&broker, "t", tx).await.unwrap();
		broker.transport().publish("t", "once");
		subscriber.track(tracker.track());

		assert_eq!(tracker.pending(), 0);
	}

	#[tokio::test]
	async fn test_queue_subscribe_and_unsubscribe() {
		let broker = broker();
		let subscriber = broker.create_subscriber(&[]);
		let (tx, _rx) = mpsc::channel(4);

		subscriber
			.chan_queue_subscribe(&broker, "jobs", "workers", tx)
			.await
			.unwrap();
		assert_eq!(subscriber.queue().as_deref(), Some("workers"));
		assert_eq!(broker.transport().subscription_count("jobs"), 1);

		subscriber.unsubscribe().await.unwrap();
		assert!(!subscriber.is_valid());
		assert_eq!(broker.transport().subscription_count("jobs"), 0);
		// second call is a no-op
		subscriber.unsubscribe().await.unwrap();
	}
}
