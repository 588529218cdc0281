//! In-process publish/subscribe bus implementing the transport traits.
//!
//! Topics match exactly. Every plain subscription on a topic receives a
//! copy of each message; each queue group on the topic receives one copy,
//! handed to its members round-robin.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use arcstr::ArcStr;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::{CloseHook, Connection, Subscription, Transport, TransportError};
use crate::routing::SubscriberConfig;
use crate::topic::Routable;

/// Errors raised by the in-memory transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryTransportError {
	/// Connecting was disabled with [`MemoryTransport::set_connect_failure`]
	#[error("Connection refused by in-memory transport")]
	ConnectRefused,

	/// Binding was disabled for the topic with [`MemoryTransport::reject_topic`]
	#[error("Subscription to '{topic}' rejected")]
	TopicRejected {
		/// The rejected topic
		topic: String,
	},
}

/// Message delivered by the in-memory transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMessage {
	/// Topic the message was published on
	pub subject: ArcStr,
	/// Raw payload
	pub payload: Bytes,
}

impl Routable for MemoryMessage {
	fn topic(&self) -> &str {
		&self.subject
	}
}

struct EntryState {
	active: AtomicBool,
	delivered: AtomicU64,
	limit: Option<u64>,
	on_close: Mutex<Option<CloseHook>>,
}

impl std::fmt::Debug for EntryState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EntryState")
			.field("active", &self.active)
			.field("delivered", &self.delivered)
			.field("limit", &self.limit)
			.field("hooked", &self.on_close.lock().is_some())
			.finish()
	}
}

impl EntryState {
	fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	/// Marks the entry ended. Returns true on the transition.
	fn deactivate(&self) -> bool {
		self.active.swap(false, Ordering::AcqRel)
	}

	/// Runs the close hook of an ended entry, at most once
	fn notify_closed(&self) {
		if self.is_active() {
			return;
		}
		let hook = self.on_close.lock().take();
		if let Some(hook) = hook {
			hook();
		}
	}

	fn set_close_hook(&self, hook: CloseHook) {
		let mut slot = self.on_close.lock();
		// checked under the slot lock so a concurrent close cannot miss it
		if self.is_active() {
			*slot = Some(hook);
			return;
		}
		drop(slot);
		hook();
	}
}

enum Delivery {
	Delivered,
	Dropped,
	Gone,
}

#[derive(Debug)]
struct Entry {
	id: u64,
	channel: Sender<MemoryMessage>,
	state: Arc<EntryState>,
}

impl Entry {
	fn deliver(&self, message: &MemoryMessage) -> Delivery {
		if !self.state.is_active() {
			return Delivery::Gone;
		}
		match self.channel.try_send(message.clone()) {
			| Ok(()) => {
				let delivered =
					self.state.delivered.fetch_add(1, Ordering::AcqRel) + 1;
				if self.state.limit.is_some_and(|limit| delivered >= limit) {
					debug!(subscription_id = self.id, "Auto-unsubscribe limit reached");
					self.state.deactivate();
				}
				Delivery::Delivered
			}
			| Err(TrySendError::Full(_)) => {
				warn!(
					subscription_id = self.id,
					topic = %message.subject,
					"Delivery channel full, message dropped"
				);
				Delivery::Dropped
			}
			| Err(TrySendError::Closed(_)) => {
				debug!(subscription_id = self.id, "Delivery channel closed");
				self.state.deactivate();
				Delivery::Gone
			}
		}
	}

	fn is_active(&self) -> bool {
		self.state.is_active()
	}
}

#[derive(Debug, Default)]
struct QueueGroup {
	members: Vec<Entry>,
	next: usize,
}

impl QueueGroup {
	/// Hands the message to the next live member. Returns true if one took it.
	/// Members that ended are removed and pushed to `ended`.
	fn deliver(
		&mut self,
		message: &MemoryMessage,
		ended: &mut Vec<Arc<EntryState>>,
	) -> bool {
		let mut attempts = self.members.len();
		while attempts > 0 && !self.members.is_empty() {
			attempts -= 1;
			let index = self.next % self.members.len();
			match self.members[index].deliver(message) {
				| Delivery::Delivered => {
					if self.members[index].is_active() {
						self.next = index + 1;
					} else {
						ended.push(self.members.remove(index).state);
						self.next = index;
					}
					return true;
				}
				| Delivery::Dropped => self.next = index + 1,
				| Delivery::Gone => {
					ended.push(self.members.remove(index).state);
				}
			}
		}
		false
	}
}

#[derive(Debug, Default)]
struct TopicEntries {
	plain: Vec<Entry>,
	groups: HashMap<ArcStr, QueueGroup>,
}

impl TopicEntries {
	fn remove(&mut self, id: u64) {
		self.plain.retain(|entry| entry.id != id);
		for group in self.groups.values_mut() {
			group.members.retain(|entry| entry.id != id);
		}
		self.groups.retain(|_, group| !group.members.is_empty());
	}

	fn is_empty(&self) -> bool {
		self.plain.is_empty() && self.groups.is_empty()
	}

	fn active_count(&self) -> usize {
		self.plain.iter().filter(|entry| entry.is_active()).count()
			+ self
				.groups
				.values()
				.flat_map(|group| &group.members)
				.filter(|entry| entry.is_active())
				.count()
	}
}

#[derive(Debug, Default)]
struct MemoryBus {
	topics: Mutex<HashMap<ArcStr, TopicEntries>>,
	rejected: Mutex<HashSet<String>>,
	next_id: AtomicU64,
	connects: AtomicUsize,
	fail_connect: AtomicBool,
}

impl MemoryBus {
	fn bind(
		self: &Arc<Self>,
		topic: &str,
		queue: Option<&str>,
		channel: Sender<MemoryMessage>,
		config: &SubscriberConfig,
	) -> Result<MemorySubscription, TransportError> {
		if self.rejected.lock().contains(topic) {
			return Err(Box::new(MemoryTransportError::TopicRejected {
				topic: topic.to_string(),
			}));
		}

		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let state = Arc::new(EntryState {
			active: AtomicBool::new(true),
			delivered: AtomicU64::new(0),
			limit: config.auto_unsubscribe,
			on_close: Mutex::new(None),
		});
		let entry = Entry {
			id,
			channel,
			state: Arc::clone(&state),
		};
		let topic = ArcStr::from(topic);
		let queue = queue.map(ArcStr::from);

		let mut topics = self.topics.lock();
		let entries = topics.entry(topic.clone()).or_default();
		match &queue {
			| Some(queue) => entries
				.groups
				.entry(queue.clone())
				.or_default()
				.members
				.push(entry),
			| None => entries.plain.push(entry),
		}
		debug!(subscription_id = id, topic = %topic, queue = ?queue, "Subscription bound");

		Ok(MemorySubscription {
			id,
			topic,
			queue,
			state,
			bus: Arc::downgrade(self),
		})
	}

	fn unbind(&self, topic: &str, id: u64) {
		let mut topics = self.topics.lock();
		if let Some(entries) = topics.get_mut(topic) {
			entries.remove(id);
			if entries.is_empty() {
				topics.remove(topic);
			}
		}
	}
}

/// Cloneable handle to a shared in-process bus
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
	bus: Arc<MemoryBus>,
}

impl MemoryTransport {
	/// Creates a handle to a fresh bus
	pub fn new() -> Self {
		Self::default()
	}

	/// Publishes `payload` on `topic`; returns how many deliveries happened
	pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
		let message = MemoryMessage {
			subject: ArcStr::from(topic),
			payload: payload.into(),
		};

		let mut delivered = 0;
		let mut ended = Vec::new();
		{
			let mut topics = self.bus.topics.lock();
			let Some(entries) = topics.get_mut(topic) else {
				return 0;
			};

			entries.plain.retain(|entry| {
				let keep = match entry.deliver(&message) {
					| Delivery::Delivered => {
						delivered += 1;
						entry.is_active()
					}
					| Delivery::Dropped => true,
					| Delivery::Gone => false,
				};
				if !keep {
					ended.push(Arc::clone(&entry.state));
				}
				keep
			});
			for group in entries.groups.values_mut() {
				if group.deliver(&message, &mut ended) {
					delivered += 1;
				}
			}
			entries.groups.retain(|_, group| !group.members.is_empty());
			if entries.is_empty() {
				topics.remove(topic);
			}
		}
		for state in ended {
			state.notify_closed();
		}
		delivered
	}

	/// Makes subsequent `connect` calls fail while `fail` is set
	pub fn set_connect_failure(&self, fail: bool) {
		self.bus.fail_connect.store(fail, Ordering::Release);
	}

	/// Makes binds on `topic` fail
	pub fn reject_topic(&self, topic: impl Into<String>) {
		self.bus.rejected.lock().insert(topic.into());
	}

	/// Lifts a rejection set by [`reject_topic`](Self::reject_topic)
	pub fn allow_topic(&self, topic: &str) {
		self.bus.rejected.lock().remove(topic);
	}

	/// Number of successful `connect` calls so far
	pub fn connect_count(&self) -> usize {
		self.bus.connects.load(Ordering::Acquire)
	}

	/// Number of live subscriptions on `topic`, queue members included
	pub fn subscription_count(&self, topic: &str) -> usize {
		self.bus
			.topics
			.lock()
			.get(topic)
			.map_or(0, TopicEntries::active_count)
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	type Connection = MemoryConnection;

	async fn connect(&self) -> Result<Arc<MemoryConnection>, TransportError> {
		if self.bus.fail_connect.load(Ordering::Acquire) {
			return Err(Box::new(MemoryTransportError::ConnectRefused));
		}
		let id = self.bus.connects.fetch_add(1, Ordering::AcqRel);
		debug!(connection_id = id, "In-memory connection established");
		Ok(Arc::new(MemoryConnection {
			id,
			bus: Arc::clone(&self.bus),
		}))
	}
}

/// Connection to a [`MemoryTransport`] bus
#[derive(Debug)]
pub struct MemoryConnection {
	id: usize,
	bus: Arc<MemoryBus>,
}

impl MemoryConnection {
	/// Sequence number of this connection on its bus
	pub fn id(&self) -> usize {
		self.id
	}
}

#[async_trait]
impl Connection for MemoryConnection {
	type Message = MemoryMessage;
	type Subscription = MemorySubscription;

	async fn chan_subscribe(
		&self,
		topic: &str,
		channel: Sender<MemoryMessage>,
		config: &SubscriberConfig,
	) -> Result<MemorySubscription, TransportError> {
		self.bus.bind(topic, None, channel, config)
	}

	async fn chan_queue_subscribe(
		&self,
		topic: &str,
		queue: &str,
		channel: Sender<MemoryMessage>,
		config: &SubscriberConfig,
	) -> Result<MemorySubscription, TransportError> {
		self.bus.bind(topic, Some(queue), channel, config)
	}
}

/// Subscription on a [`MemoryTransport`] bus
#[derive(Debug)]
pub struct MemorySubscription {
	id: u64,
	topic: ArcStr,
	queue: Option<ArcStr>,
	state: Arc<EntryState>,
	bus: Weak<MemoryBus>,
}

impl MemorySubscription {
	/// Topic this subscription is bound to
	pub fn topic(&self) -> &str {
		&self.topic
	}

	/// Queue group, if bound as a member of one
	pub fn queue(&self) -> Option<&str> {
		self.queue.as_deref()
	}

	/// Messages delivered through this subscription
	pub fn delivered(&self) -> u64 {
		self.state.delivered.load(Ordering::Acquire)
	}

	fn release(&self) {
		if self.state.deactivate() {
			debug!(subscription_id = self.id, topic = %self.topic, "Subscription released");
		}
		if let Some(bus) = self.bus.upgrade() {
			bus.unbind(&self.topic, self.id);
		}
		self.state.notify_closed();
	}
}

impl Drop for MemorySubscription {
	fn drop(&mut self) {
		self.release();
	}
}

#[async_trait]
impl Subscription for MemorySubscription {
	fn is_valid(&self) -> bool {
		self.state.is_active()
	}

	async fn unsubscribe(&self) -> Result<(), TransportError> {
		self.release();
		Ok(())
	}

	fn on_close(&self, hook: CloseHook) {
		self.state.set_close_hook(hook);
	}
}
