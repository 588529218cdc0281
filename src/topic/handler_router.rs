//! Handler-chain dispatch over the topic trie
//!
//! Routes are bound to ordered handler chains. A message is dispatched to
//! every chain on its topic path, root-to-leaf: chains bound to ancestor
//! (group) routes run before the chain bound to the exact route. Any
//! handler may end the dispatch by returning [`Flow::Stop`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::error::TrieResult;
use super::topic_trie::TopicTrie;
use super::TopicTrieError;

/// Outcome of a single handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	/// Run the next handler
	Continue,
	/// Stop dispatching this message
	Stop,
}

/// Handler invoked with the concrete topic and the message
pub type HandlerFunc<M> = Arc<dyn Fn(&str, &M) -> Flow + Send + Sync>;

/// Messages that carry the topic they were published on
pub trait Routable {
	/// Topic the message was published on
	fn topic(&self) -> &str;
}

/// Ordered list of handlers bound to one route
pub struct HandlersChain<M> {
	handlers: Vec<HandlerFunc<M>>,
}

impl<M> Clone for HandlersChain<M> {
	fn clone(&self) -> Self {
		Self {
			handlers: self.handlers.clone(),
		}
	}
}

impl<M> Default for HandlersChain<M> {
	fn default() -> Self {
		Self::new()
	}
}

impl<M> fmt::Debug for HandlersChain<M> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandlersChain")
			.field("len", &self.handlers.len())
			.finish()
	}
}

impl<M> HandlersChain<M> {
	/// Creates an empty chain
	pub fn new() -> Self {
		Self {
			handlers: Vec::new(),
		}
	}

	/// Appends a handler; handlers run in insertion order
	pub fn then<F>(mut self, handler: F) -> Self
	where F: Fn(&str, &M) -> Flow + Send + Sync + 'static {
		self.handlers.push(Arc::new(handler));
		self
	}

	/// Number of handlers
	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	/// True when the chain holds no handlers
	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	/// Runs the chain. Returns the number of handlers executed and whether
	/// a handler asked to stop.
	fn run(&self, topic: &str, message: &M) -> (usize, Flow) {
		for (executed, handler) in self.handlers.iter().enumerate() {
			if handler(topic, message) == Flow::Stop {
				return (executed + 1, Flow::Stop);
			}
		}
		(self.handlers.len(), Flow::Continue)
	}
}

impl<M> FromIterator<HandlerFunc<M>> for HandlersChain<M> {
	fn from_iter<I: IntoIterator<Item = HandlerFunc<M>>>(iter: I) -> Self {
		Self {
			handlers: iter.into_iter().collect(),
		}
	}
}

/// Dispatches messages to handler chains by topic
pub struct HandlerRouter<M> {
	routes: TopicTrie<HandlersChain<M>>,
}

impl<M> Default for HandlerRouter<M> {
	fn default() -> Self {
		Self {
			routes: TopicTrie::default(),
		}
	}
}

impl<M> fmt::Debug for HandlerRouter<M> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandlerRouter")
			.field("routes", &self.routes)
			.finish()
	}
}

impl<M> HandlerRouter<M> {
	/// Creates a router splitting routes on `separator`
	pub fn new(separator: char) -> Self {
		Self {
			routes: TopicTrie::new(separator),
		}
	}

	/// Binds `chain` to `route`, replacing any existing chain.
	///
	/// Returns `true` when the route was not bound before.
	pub fn handle(&self, route: &str, chain: HandlersChain<M>) -> TrieResult<bool> {
		self.routes.put(route, chain)
	}

	/// Unbinds the chain for `route`
	pub fn remove(&self, route: &str) -> Option<HandlersChain<M>> {
		self.routes.remove(route)
	}

	/// Routes bound beneath `prefix`
	pub fn groups(&self, prefix: &str) -> Option<Vec<String>> {
		self.routes.is_group(prefix)
	}

	/// Underlying trie of bound chains
	pub fn routes(&self) -> &TopicTrie<HandlersChain<M>> {
		&self.routes
	}

	/// Chain bound to exactly `route`
	pub fn chain(&self, route: &str) -> TrieResult<HandlersChain<M>> {
		self.routes.get(route)
	}

	/// Runs every chain matching `topic`, root-to-leaf.
	///
	/// Returns the number of handlers executed, or
	/// [`TopicTrieError::RouteNotFound`] when no chain is bound on the
	/// topic's path.
	pub fn dispatch(&self, topic: &str, message: &M) -> TrieResult<usize> {
		let chains = self.routes.matching(topic)?;
		if chains.is_empty() {
			return Err(TopicTrieError::route_not_found(topic));
		}

		let mut executed = 0;
		for (route, chain) in chains {
			let (count, flow) = chain.run(topic, message);
			executed += count;
			if flow == Flow::Stop {
				trace!(topic = %topic, route = %route, "Dispatch stopped by handler");
				break;
			}
		}
		Ok(executed)
	}
}

impl<M: Routable> HandlerRouter<M> {
	/// Dispatches messages from `receiver` until it closes or `cancel`
	/// fires. Returns the number of messages that reached a handler.
	pub async fn serve(
		&self,
		mut receiver: Receiver<M>,
		cancel: CancellationToken,
	) -> usize {
		let mut delivered = 0;
		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					info!("HandlerRouter: Cancellation received, stopping dispatch");
					break;
				}
				message = receiver.recv() => {
					let Some(message) = message else {
						debug!("HandlerRouter: Delivery channel closed");
						break;
					};
					match self.dispatch(message.topic(), &message) {
						| Ok(_) => delivered += 1,
						| Err(err) => {
							debug!(
								topic = %message.topic(),
								error = %err,
								"No handler chain for message"
							);
						}
					}
				}
			}
		}
		delivered
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;

	fn recording_chain(
		log: &Arc<Mutex<Vec<String>>>,
		labels: &[&'static str],
	) -> HandlersChain<u32> {
		labels.iter().fold(HandlersChain::new(), |chain, &label| {
			let log = Arc::clone(log);
			chain.then(move |topic, message| {
				log.lock().unwrap().push(format!("{label}:{topic}:{message}"));
				Flow::Continue
			})
		})
	}

	#[test]
	fn test_dispatch_runs_chains_root_to_leaf() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let router = HandlerRouter::new('/');
		router
			.handle("orders/eu/created", recording_chain(&log, &["leaf"]))
			.unwrap();
		router
			.handle("orders", recording_chain(&log, &["auth", "metrics"]))
			.unwrap();

		let executed = router.dispatch("orders/eu/created", &5).unwrap();

		assert_eq!(executed, 3);
		assert_eq!(*log.lock().unwrap(), vec![
			"auth:orders/eu/created:5",
			"metrics:orders/eu/created:5",
			"leaf:orders/eu/created:5",
		]);
	}

	#[test]
	fn test_stop_ends_dispatch() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let router = HandlerRouter::new('/');
		router
			.handle(
				"a",
				HandlersChain::new()
					.then(|_, message: &u32| {
						if *message == 0 { Flow::Stop } else { Flow::Continue }
					}),
			)
			.unwrap();
		router.handle("a/b", recording_chain(&log, &["leaf"])).unwrap();

		assert_eq!(router.dispatch("a/b", &0), Ok(1));
		assert!(log.lock().unwrap().is_empty());

		assert_eq!(router.dispatch("a/b", &1), Ok(2));
		assert_eq!(log.lock().unwrap().len(), 1);
	}

	#[test]
	fn test_dispatch_without_chain() {
		let router = HandlerRouter::<u32>::new('/');
		router.handle("a/b", HandlersChain::new()).unwrap();

		assert_eq!(
			router.dispatch("x/y", &1),
			Err(TopicTrieError::route_not_found("x/y"))
		);
		// bound but empty chain still counts as a match
		assert_eq!(router.dispatch("a/b", &1), Ok(0));
	}

	#[test]
	fn test_remove_chain() {
		let router = HandlerRouter::<u32>::new('/');
		router.handle("a/b", HandlersChain::new()).unwrap();
		router.handle("a/c", HandlersChain::new()).unwrap();
		assert_eq!(
			router.groups("a"),
			Some(vec!["a/b".to_string(), "a/c".to_string()])
		);

		assert!(router.remove("a/b").is_some());
		assert!(router.chain("a/b").is_err());
		assert_eq!(router.groups("a"), Some(vec!["a/c".to_string()]));
	}

	struct Event {
		topic: String,
	}

	impl Routable for Event {
		fn topic(&self) -> &str {
			&self.topic
		}
	}

	#[tokio::test]
	async fn test_serve_until_channel_closes() {
		let hits = Arc::new(Mutex::new(0));
		let router = HandlerRouter::new('/');
		let counter = Arc::clone(&hits);
		router
			.handle(
				"events",
				HandlersChain::new().then(move |_, _: &Event| {
					*counter.lock().unwrap() += 1;
					Flow::Continue
				}),
			)
			.unwrap();

		let (tx, rx) = tokio::sync::mpsc::channel(8);
		for topic in ["events/a", "other", "events"] {
			tx.send(Event {
				topic: topic.to_string(),
			})
			.await
			.unwrap();
		}
		drop(tx);

		let delivered = router.serve(rx, CancellationToken::new()).await;
		assert_eq!(delivered, 2);
		assert_eq!(*hits.lock().unwrap(), 2);
	}

	#[tokio::test]
	async fn test_serve_stops_on_cancel() {
		let router = HandlerRouter::<Event>::new('/');
		let (_tx, rx) = tokio::sync::mpsc::channel(1);
		let cancel = CancellationToken::new();
		cancel.cancel();

		assert_eq!(router.serve(rx, cancel).await, 0);
	}
}
