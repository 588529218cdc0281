//! Orchestration of many subscribers, either as a set of independent
//! topics or as one queue group on a single topic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;
use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::completion::CompletionTracker;
use super::config::{MultiSubscriberConfig, SubscriberLimit, SubscriberOption};
use super::error::{SubscribeError, SubscribeResult};
use super::subscriber::Subscriber;
use crate::broker::Broker;
use crate::transport::{MessageOf, Transport};

/// Mode a multi-subscriber is fixed to by its first accepted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMode {
	/// Independent subscriptions on distinct topics
	Set,
	/// One load-balanced queue group on a single topic
	Queue {
		/// Queue group name
		queue: ArcStr,
		/// The single topic the group consumes
		topic: ArcStr,
	},
}

impl fmt::Display for SubscriptionMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| Self::Set => write!(f, "set"),
			| Self::Queue { queue, topic } => {
				write!(f, "queue '{queue}' on '{topic}'")
			}
		}
	}
}

struct MultiState<T: Transport> {
	mode: Option<SubscriptionMode>,
	subscribers: HashMap<ArcStr, Arc<Subscriber<T>>>,
	topic_options: HashMap<ArcStr, Vec<SubscriberOption>>,
}

impl<T: Transport> MultiState<T> {
	/// Fixes the mode on first use and rejects calls for any other mode
	fn claim(&mut self, requested: SubscriptionMode) -> SubscribeResult<()> {
		match &self.mode {
			| None => {
				debug!(mode = %requested, "Multi-subscriber mode fixed");
				self.mode = Some(requested);
				Ok(())
			}
			| Some(current) if *current == requested => Ok(()),
			| Some(current) => Err(SubscribeError::mode_conflict(
				current.to_string(),
				requested.to_string(),
			)),
		}
	}

	/// Drops `subscriber` from the map if it is still the one registered
	fn discard(&mut self, topic: &str, subscriber: &Arc<Subscriber<T>>) {
		if self
			.subscribers
			.get(topic)
			.is_some_and(|current| Arc::ptr_eq(current, subscriber))
		{
			self.subscribers.remove(topic);
		}
	}
}

/// A group of subscribers managed through one batch API.
///
/// Operates either as a set of independent per-topic subscriptions or as a
/// queue group on one topic; the first accepted call fixes the mode for the
/// lifetime of the instance. Internal maps are guarded by a mutex that is
/// never held while a connection is established or a channel is bound.
///
/// Dropping the instance drops every subscriber and with it the transport
/// handles. The in-memory transport unbinds a handle when it is dropped;
/// other transports may only release a subscription on an explicit
/// unsubscribe, so call [`unsubscribe_all`](Self::unsubscribe_all) for an
/// orderly teardown.
pub struct MultiSubscriber<T: Transport> {
	default_options: Vec<SubscriberOption>,
	max: SubscriberLimit,
	state: Mutex<MultiState<T>>,
	completion: CompletionTracker,
}

impl<T: Transport> fmt::Debug for MultiSubscriber<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("MultiSubscriber")
			.field("mode", &state.mode)
			.field("subscribers", &state.subscribers.len())
			.field("max", &self.max)
			.field("pending", &self.completion.pending())
			.finish()
	}
}

impl<T: Transport> MultiSubscriber<T> {
	/// Creates an empty multi-subscriber. The mode is fixed by the first
	/// accepted call.
	pub fn new(config: MultiSubscriberConfig) -> Self {
		let topic_options = config
			.topic_options
			.into_iter()
			.map(|(topic, options)| (ArcStr::from(topic), options))
			.collect();
		Self {
			default_options: config.default_options,
			max: config.max_subscribers,
			state: Mutex::new(MultiState {
				mode: None,
				subscribers: HashMap::new(),
				topic_options,
			}),
			completion: CompletionTracker::new(),
		}
	}

	/// Registers a per-topic override layered on top of the default options.
	/// Returns the override it replaces.
	pub fn set_topic_options(
		&self,
		topic: impl Into<ArcStr>,
		options: Vec<SubscriberOption>,
	) -> Option<Vec<SubscriberOption>> {
		self.state.lock().topic_options.insert(topic.into(), options)
	}

	/// Removes the per-topic override for `topic`
	pub fn remove_topic_options(
		&self,
		topic: &str,
	) -> Option<Vec<SubscriberOption>> {
		self.state.lock().topic_options.remove(topic)
	}

	/// Per-topic override registered for `topic`
	pub fn topic_options(&self, topic: &str) -> Option<Vec<SubscriberOption>> {
		self.state.lock().topic_options.get(topic).cloned()
	}

	/// Option sequence a new subscriber for `topic` would be built from:
	/// the defaults, then the per-topic override if one is registered
	pub fn resolved_options(&self, topic: &str) -> Vec<SubscriberOption> {
		let state = self.state.lock();
		self.default_options
			.iter()
			.chain(state.topic_options.get(topic).into_iter().flatten())
			.cloned()
			.collect()
	}

	/// Options applied to every new subscriber
	pub fn default_options(&self) -> &[SubscriberOption] {
		&self.default_options
	}

	/// Maximum number of subscribers
	pub fn max(&self) -> SubscriberLimit {
		self.max
	}

	/// Mode fixed by the first accepted call, if any
	pub fn mode(&self) -> Option<SubscriptionMode> {
		self.state.lock().mode.clone()
	}

	/// True once fixed to queue mode
	pub fn is_queue(&self) -> bool {
		matches!(self.state.lock().mode, Some(SubscriptionMode::Queue { .. }))
	}

	/// Queue group name, set only in queue mode
	pub fn queue_name(&self) -> Option<ArcStr> {
		match &self.state.lock().mode {
			| Some(SubscriptionMode::Queue { queue, .. }) => Some(queue.clone()),
			| _ => None,
		}
	}

	/// Topic of the queue group, set only in queue mode
	pub fn topic(&self) -> Option<ArcStr> {
		match &self.state.lock().mode {
			| Some(SubscriptionMode::Queue { topic, .. }) => Some(topic.clone()),
			| _ => None,
		}
	}

	/// Number of registered subscribers
	pub fn len(&self) -> usize {
		self.state.lock().subscribers.len()
	}

	/// True when no subscriber is registered
	pub fn is_empty(&self) -> bool {
		self.state.lock().subscribers.is_empty()
	}

	/// Topics with a registered subscriber, sorted
	pub fn topics(&self) -> Vec<ArcStr> {
		let mut topics: Vec<_> =
			self.state.lock().subscribers.keys().cloned().collect();
		topics.sort_unstable();
		topics
	}

	/// Subscriber registered for `topic`
	pub fn subscriber(&self, topic: &str) -> Option<Arc<Subscriber<T>>> {
		self.state.lock().subscribers.get(topic).cloned()
	}

	/// Tracked subscriptions that have not completed yet
	pub fn pending(&self) -> usize {
		self.completion.pending()
	}

	fn ensure_capacity(&self, state: &MultiState<T>) -> SubscribeResult<()> {
		match self.max.get() {
			| Some(max) if !self.max.admits(state.subscribers.len()) => {
				Err(SubscribeError::SubscriberLimitExceeded { max })
			}
			| _ => Ok(()),
		}
	}

	/// Creates and registers a subscriber for `topic` from `options`
	fn register<'a, I>(
		&self,
		state: &mut MultiState<T>,
		broker: &Broker<T>,
		topic: &str,
		options: I,
	) -> Arc<Subscriber<T>>
	where
		I: IntoIterator<Item = &'a SubscriberOption>,
	{
		let subscriber = Arc::new(broker.create_subscriber(options));
		state
			.subscribers
			.insert(ArcStr::from(topic), Arc::clone(&subscriber));
		subscriber
	}

	/// Starts completion tracking after a successful bind, or unregisters a
	/// new subscriber whose bind failed. A rebound subscriber whose earlier
	/// subscription already completed is tracked again.
	fn settle(
		&self,
		topic: &str,
		subscriber: &Arc<Subscriber<T>>,
		fresh: bool,
		result: SubscribeResult<()>,
	) -> SubscribeResult<()> {
		match result {
			| Ok(()) => {
				if !subscriber.is_tracked() {
					subscriber.track(self.completion.track());
				}
				Ok(())
			}
			| Err(err) => {
				if fresh {
					self.state.lock().discard(topic, subscriber);
				}
				Err(err)
			}
		}
	}

	/// Binds `channel` to `topic`.
	///
	/// A non-empty `queue` puts the instance into queue mode on `topic`;
	/// repeated calls for the same queue and topic are idempotent while the
	/// group subscription is live. An empty `queue` registers in set mode:
	/// an existing subscriber for the topic is reused, otherwise one is built
	/// from the default options with any per-topic override layered on top.
	pub async fn chan_subscribe(
		&self,
		broker: &Broker<T>,
		topic: &str,
		queue: &str,
		channel: Sender<MessageOf<T>>,
	) -> SubscribeResult<()> {
		if topic.is_empty() {
			return Err(SubscribeError::InvalidTopic);
		}
		if channel.is_closed() {
			return Err(SubscribeError::invalid_channel(topic));
		}
		if !queue.is_empty() {
			return self.queue_subscribe(broker, topic, queue, channel).await;
		}

		let (subscriber, fresh) = {
			let mut state = self.state.lock();
			state.claim(SubscriptionMode::Set)?;
			match state.subscribers.get(topic) {
				| Some(existing) => (Arc::clone(existing), false),
				| None => {
					self.ensure_capacity(&state)?;
					let options = state
						.topic_options
						.get(topic)
						.cloned()
						.unwrap_or_default();
					let subscriber = self.register(
						&mut state,
						broker,
						topic,
						self.default_options.iter().chain(&options),
					);
					(subscriber, true)
				}
			}
		};

		let result = subscriber.chan_subscribe(broker, topic, channel).await;
		self.settle(topic, &subscriber, fresh, result)
	}

	async fn queue_subscribe(
		&self,
		broker: &Broker<T>,
		topic: &str,
		queue: &str,
		channel: Sender<MessageOf<T>>,
	) -> SubscribeResult<()> {
		let (subscriber, fresh) = {
			let mut state = self.state.lock();
			state.claim(SubscriptionMode::Queue {
				queue: ArcStr::from(queue),
				topic: ArcStr::from(topic),
			})?;
			match state.subscribers.get(topic) {
				| Some(existing) if existing.is_valid() => {
					debug!(
						topic = %topic,
						queue = %queue,
						"Queue group membership already declared"
					);
					return Ok(());
				}
				| Some(existing) => (Arc::clone(existing), false),
				| None => {
					self.ensure_capacity(&state)?;
					let options = state
						.topic_options
						.get(topic)
						.cloned()
						.unwrap_or_default();
					let subscriber = self.register(
						&mut state,
						broker,
						topic,
						self.default_options.iter().chain(&options),
					);
					(subscriber, true)
				}
			}
		};

		let result = subscriber
			.chan_queue_subscribe(broker, topic, queue, channel)
			.await;
		self.settle(topic, &subscriber, fresh, result)
	}

	/// Binds each `(topics[i], channels[i])` pair in order.
	///
	/// Unlike [`chan_subscribe`](Self::chan_subscribe), a topic is only
	/// subscribed here when a per-topic override is registered for it; topics
	/// without one are skipped. Empty topics, closed channels and topics that
	/// already hold a live subscription are skipped too. Skips are logged, not
	/// returned. The first bind error aborts the batch; bindings made earlier
	/// in the batch are kept.
	pub async fn multi_chan_subscribe<S: AsRef<str>>(
		&self,
		broker: &Broker<T>,
		topics: &[S],
		channels: &[Sender<MessageOf<T>>],
	) -> SubscribeResult<()> {
		if topics.len() != channels.len() {
			return Err(SubscribeError::LengthMismatch {
				topics: topics.len(),
				channels: channels.len(),
			});
		}
		self.state.lock().claim(SubscriptionMode::Set)?;

		for (index, (topic, channel)) in topics.iter().zip(channels).enumerate() {
			let topic = topic.as_ref();
			if topic.is_empty() {
				warn!(index, "Skipping batch entry with empty topic");
				continue;
			}
			if channel.is_closed() {
				warn!(index, topic = %topic, "Skipping batch entry with closed channel");
				continue;
			}

			let subscriber = {
				let mut state = self.state.lock();
				let existing = state.subscribers.get(topic);
				if existing.is_some_and(|subscriber| subscriber.is_valid()) {
					warn!(index, topic = %topic, "Topic already subscribed, skipping");
					continue;
				}
				let replacing = existing.is_some();
				let Some(options) = state.topic_options.get(topic).cloned() else {
					info!(
						index,
						topic = %topic,
						"No per-topic configuration registered, skipping"
					);
					continue;
				};
				if !replacing {
					self.ensure_capacity(&state)?;
				}
				self.register(
					&mut state,
					broker,
					topic,
					self.default_options.iter().chain(&options),
				)
			};

			let result = subscriber.chan_subscribe(broker, topic, channel.clone()).await;
			if let Err(err) = &result {
				error!(index, topic = %topic, error = %err, "Batch subscribe aborted");
			}
			self.settle(topic, &subscriber, true, result)?;
		}
		Ok(())
	}

	/// Unsubscribes and removes the subscriber for `topic`. Returns whether
	/// one was registered.
	pub async fn unsubscribe(&self, topic: &str) -> SubscribeResult<bool> {
		let Some(subscriber) = self.state.lock().subscribers.remove(topic) else {
			return Ok(false);
		};
		subscriber.unsubscribe().await?;
		debug!(topic = %topic, "Subscriber removed");
		Ok(true)
	}

	/// Unsubscribes every subscriber. All are removed even if some fail;
	/// the first failure is returned.
	pub async fn unsubscribe_all(&self) -> SubscribeResult<()> {
		let subscribers: Vec<_> =
			self.state.lock().subscribers.drain().collect();
		let mut first_error = None;
		for (topic, subscriber) in subscribers {
			if let Err(err) = subscriber.unsubscribe().await {
				warn!(topic = %topic, error = %err, "Failed to unsubscribe");
				first_error.get_or_insert(err);
			}
		}
		first_error.map_or(Ok(()), Err)
	}

	/// Resolves once every tracked subscription has completed: unsubscribed,
	/// dropped, or ended by the transport
	pub async fn wait(&self) {
		self.completion.wait().await
	}

	/// Like [`wait`](Self::wait), returning
	/// [`SubscribeError::Cancelled`] if `cancel` fires first
	pub async fn wait_with_cancel(
		&self,
		cancel: &CancellationToken,
	) -> SubscribeResult<()> {
		self.completion.wait_with_cancel(cancel).await
	}
}

impl<T: Transport> Drop for MultiSubscriber<T> {
	fn drop(&mut self) {
		let live = self
			.state
			.get_mut()
			.subscribers
			.values()
			.filter(|subscriber| subscriber.is_valid())
			.count();
		if live > 0 {
			warn!(
				live,
				"MultiSubscriber dropped with live subscriptions. Call \
				 unsubscribe_all() before dropping to release them."
			);
		}
	}
}
