//! Arena-backed prefix tree keyed by topic segments
//!
//! Nodes live in a flat arena and refer to their parent by index, so
//! orphan pruning can walk upward without owning back-references. Every
//! bound route is stored at its terminal node under its canonical form.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use super::error::{TopicTrieError, TrieResult};
use super::route::{DEFAULT_SEPARATOR, join_segments, split_route};

/// Index of a node inside the trie arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(usize);

const ROOT: NodeId = NodeId(0);

#[derive(Debug)]
struct RouteBinding<B> {
	/// Canonical route this binding was stored under
	route: String,
	value: B,
}

#[derive(Debug)]
struct TrieNode<B> {
	segment: String,
	parent: Option<NodeId>,
	children: HashMap<String, NodeId>,
	binding: Option<RouteBinding<B>>,
}

impl<B> TrieNode<B> {
	fn new(segment: impl Into<String>, parent: Option<NodeId>) -> Self {
		Self {
			segment: segment.into(),
			parent,
			children: HashMap::new(),
			binding: None,
		}
	}

	fn is_orphan(&self) -> bool {
		self.binding.is_none() && self.children.is_empty()
	}
}

struct TrieArena<B> {
	nodes: Vec<Option<TrieNode<B>>>,
	free: Vec<usize>,
	size: usize,
}

impl<B> TrieArena<B> {
	fn new() -> Self {
		Self {
			nodes: vec![Some(TrieNode::new(String::new(), None))],
			free: Vec::new(),
			size: 0,
		}
	}

	fn node(&self, id: NodeId) -> &TrieNode<B> {
		self.nodes[id.0].as_ref().unwrap_or_else(|| {
			panic!("BUG: trie node {id:?} referenced after being released")
		})
	}

	fn node_mut(&mut self, id: NodeId) -> &mut TrieNode<B> {
		self.nodes[id.0].as_mut().unwrap_or_else(|| {
			panic!("BUG: trie node {id:?} referenced after being released")
		})
	}

	fn alloc(&mut self, node: TrieNode<B>) -> NodeId {
		match self.free.pop() {
			| Some(slot) => {
				self.nodes[slot] = Some(node);
				NodeId(slot)
			}
			| None => {
				self.nodes.push(Some(node));
				NodeId(self.nodes.len() - 1)
			}
		}
	}

	fn release(&mut self, id: NodeId) -> Option<TrieNode<B>> {
		let node = self.nodes[id.0].take();
		if node.is_some() {
			self.free.push(id.0);
		}
		node
	}

	fn find(&self, segments: &[&str]) -> Option<NodeId> {
		segments.iter().try_fold(ROOT, |current, segment| {
			self.node(current).children.get(*segment).copied()
		})
	}

	/// Detaches bindingless leaves from `start` upward, stopping at the
	/// first node that still holds a binding or a child, or at the root.
	fn prune(&mut self, start: NodeId) {
		let mut current = start;
		while current != ROOT && self.node(current).is_orphan() {
			let Some(parent) = self.node(current).parent else {
				break;
			};
			if let Some(orphan) = self.release(current) {
				self.node_mut(parent).children.remove(&orphan.segment);
			}
			current = parent;
		}
	}

	fn collect_routes(&self, from: NodeId, routes: &mut Vec<String>) {
		for &child in self.node(from).children.values() {
			if let Some(binding) = &self.node(child).binding {
				routes.push(binding.route.clone());
			}
			self.collect_routes(child, routes);
		}
	}

	fn live_nodes(&self) -> usize {
		self.nodes.iter().filter(|node| node.is_some()).count()
	}
}

/// Prefix tree mapping topic routes to bindings.
///
/// Mutations (`put`, `remove`, `clear`) take the write lock; lookups take
/// the read lock.
pub struct TopicTrie<B> {
	arena: RwLock<TrieArena<B>>,
	separator: char,
}

impl<B> Default for TopicTrie<B> {
	fn default() -> Self {
		Self::new(DEFAULT_SEPARATOR)
	}
}

impl<B> fmt::Debug for TopicTrie<B> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let arena = self.arena.read();
		f.debug_struct("TopicTrie")
			.field("separator", &self.separator)
			.field("size", &arena.size)
			.field("nodes", &arena.live_nodes())
			.finish()
	}
}

impl<B> TopicTrie<B> {
	/// Creates an empty trie. A `'\0'` separator selects `'/'`.
	pub fn new(separator: char) -> Self {
		let separator = if separator == '\0' {
			DEFAULT_SEPARATOR
		} else {
			separator
		};
		Self {
			arena: RwLock::new(TrieArena::new()),
			separator,
		}
	}

	/// Separator used to split routes
	pub fn separator(&self) -> char {
		self.separator
	}

	/// Returns true when no route passes through the root
	pub fn is_empty(&self) -> bool {
		self.arena.read().node(ROOT).children.is_empty()
	}

	/// Number of routes currently holding a binding
	pub fn len(&self) -> usize {
		self.arena.read().size
	}

	/// Drops every node and binding
	pub fn clear(&self) {
		*self.arena.write() = TrieArena::new();
	}

	/// Binds `value` to `route`, creating intermediate nodes as needed.
	///
	/// Returns `true` when the route was not bound before, `false` when an
	/// existing binding was replaced.
	pub fn put(&self, route: &str, value: B) -> TrieResult<bool> {
		let segments = split_route(route, self.separator)?;
		let canonical = join_segments(&segments, self.separator);

		let mut arena = self.arena.write();
		let mut current = ROOT;
		for segment in &segments {
			let existing = arena.node(current).children.get(*segment).copied();
			current = match existing {
				| Some(child) => child,
				| None => {
					let child =
						arena.alloc(TrieNode::new(*segment, Some(current)));
					arena
						.node_mut(current)
						.children
						.insert((*segment).to_string(), child);
					child
				}
			};
		}

		let fresh = arena
			.node_mut(current)
			.binding
			.replace(RouteBinding {
				route: canonical,
				value,
			})
			.is_none();
		if fresh {
			arena.size += 1;
		}
		Ok(fresh)
	}

	/// Removes the binding for `route` and prunes nodes left empty.
	///
	/// Returns the removed binding; absent or invalid routes are a no-op.
	pub fn remove(&self, route: &str) -> Option<B> {
		let segments = split_route(route, self.separator).ok()?;

		let mut arena = self.arena.write();
		let terminal = arena.find(&segments)?;
		let removed = arena.node_mut(terminal).binding.take()?;
		arena.size -= 1;
		arena.prune(terminal);
		Some(removed.value)
	}

	/// Canonical routes bound strictly beneath `prefix`, if any.
	///
	/// A binding stored at `prefix` itself does not make it a group.
	pub fn is_group(&self, prefix: &str) -> Option<Vec<String>> {
		let segments = split_route(prefix, self.separator).ok()?;

		let arena = self.arena.read();
		let node = arena.find(&segments)?;
		let mut routes = Vec::new();
		arena.collect_routes(node, &mut routes);
		if routes.is_empty() {
			return None;
		}
		routes.sort_unstable();
		Some(routes)
	}

	/// Every bound canonical route, sorted
	pub fn routes(&self) -> Vec<String> {
		let arena = self.arena.read();
		let mut routes = Vec::with_capacity(arena.size);
		arena.collect_routes(ROOT, &mut routes);
		routes.sort_unstable();
		routes
	}

	#[cfg(test)]
	pub(crate) fn node_count(&self) -> usize {
		// root excluded
		self.arena.read().live_nodes() - 1
	}
}

impl<B: Clone> TopicTrie<B> {
	/// Exact lookup of the binding stored for `route`
	pub fn get(&self, route: &str) -> TrieResult<B> {
		let segments = split_route(route, self.separator)?;

		let arena = self.arena.read();
		arena
			.find(&segments)
			.and_then(|id| arena.node(id).binding.as_ref())
			.map(|binding| binding.value.clone())
			.ok_or_else(|| TopicTrieError::route_not_found(route))
	}

	/// Bindings along the path of `topic`, ordered root-to-leaf.
	///
	/// Ancestor routes come first and the exact route, when bound, last.
	pub fn matching(&self, topic: &str) -> TrieResult<Vec<(String, B)>> {
		let segments = split_route(topic, self.separator)?;

		let arena = self.arena.read();
		let mut matches = Vec::new();
		let mut current = ROOT;
		for segment in &segments {
			let Some(child) = arena.node(current).children.get(*segment)
			else {
				break;
			};
			current = *child;
			if let Some(binding) = &arena.node(current).binding {
				matches.push((binding.route.clone(), binding.value.clone()));
			}
		}
		Ok(matches)
	}
}
