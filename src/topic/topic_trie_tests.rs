//! Tests for TopicTrie insertion, lookup and orphan pruning

use super::{TopicTrie, TopicTrieError};

fn trie_with(routes: &[(&str, u32)]) -> TopicTrie<u32> {
	let trie = TopicTrie::new('/');
	for (route, value) in routes {
		trie.put(route, *value).expect("route should be valid");
	}
	trie
}

mod put_get_tests {
	use super::*;

	#[test]
	fn test_put_then_get_returns_binding() {
		let trie = trie_with(&[
			("sensors/temperature", 1),
			("sensors/humidity", 2),
			("devices/light/status", 3),
		]);

		assert_eq!(trie.get("sensors/temperature"), Ok(1));
		assert_eq!(trie.get("sensors/humidity"), Ok(2));
		assert_eq!(trie.get("devices/light/status"), Ok(3));
		assert_eq!(trie.len(), 3);
	}

	#[test]
	fn test_put_reports_fresh_routes() {
		let trie = TopicTrie::new('/');
		assert_eq!(trie.put("a/b", "first"), Ok(true));
		assert_eq!(trie.put("a/b", "second"), Ok(false));
		assert_eq!(trie.len(), 1);
		assert_eq!(trie.get("a/b"), Ok("second"));
	}

	#[test]
	fn test_adjacent_separators_address_same_node() {
		let trie = TopicTrie::new('/');
		assert_eq!(trie.put("a//b", 7), Ok(true));
		assert_eq!(trie.put("a/b", 8), Ok(false));
		assert_eq!(trie.len(), 1);
		assert_eq!(trie.node_count(), 2);
		assert_eq!(trie.get("/a/b/"), Ok(8));
	}

	#[test]
	fn test_empty_route_is_rejected() {
		let trie = TopicTrie::<u32>::new('/');
		assert_eq!(trie.put("", 1), Err(TopicTrieError::invalid_route("")));
		assert_eq!(trie.put("//", 1), Err(TopicTrieError::invalid_route("//")));
		assert!(trie.is_empty());
		assert_eq!(trie.len(), 0);
	}

	#[test]
	fn test_get_missing_route() {
		let trie = trie_with(&[("a/b/c", 1)]);

		// intermediate node without binding
		assert_eq!(
			trie.get("a/b"),
			Err(TopicTrieError::route_not_found("a/b"))
		);
		// missing segment
		assert_eq!(
			trie.get("a/x/c"),
			Err(TopicTrieError::route_not_found("a/x/c"))
		);
		// longer than any stored route
		assert_eq!(
			trie.get("a/b/c/d"),
			Err(TopicTrieError::route_not_found("a/b/c/d"))
		);
	}

	#[test]
	fn test_intermediate_and_leaf_bindings_coexist() {
		let trie = trie_with(&[("a", 1), ("a/b", 2), ("a/b/c", 3)]);
		assert_eq!(trie.get("a"), Ok(1));
		assert_eq!(trie.get("a/b"), Ok(2));
		assert_eq!(trie.get("a/b/c"), Ok(3));
		assert_eq!(trie.len(), 3);
		assert_eq!(trie.node_count(), 3);
	}

	#[test]
	fn test_default_separator_for_nul() {
		let trie = TopicTrie::new('\0');
		assert_eq!(trie.separator(), '/');
		trie.put("x/y", 1).unwrap();
		assert_eq!(trie.get("x//y"), Ok(1));
	}

	#[test]
	fn test_custom_separator() {
		let trie = TopicTrie::new('.');
		trie.put("orders.eu.created", 1).unwrap();
		assert_eq!(trie.get("orders..eu.created"), Ok(1));
		assert!(trie.get("orders/eu/created").is_err());
		assert_eq!(trie.routes(), vec!["orders.eu.created".to_string()]);
	}
}

mod remove_tests {
	use super::*;

	#[test]
	fn test_remove_only_route_prunes_to_root() {
		let trie = trie_with(&[("a/b/c/d", 1)]);
		assert_eq!(trie.node_count(), 4);

		assert_eq!(trie.remove("a/b/c/d"), Some(1));
		assert!(trie.is_empty());
		assert_eq!(trie.len(), 0);
		assert_eq!(trie.node_count(), 0);
		assert_eq!(
			trie.get("a/b/c/d"),
			Err(TopicTrieError::route_not_found("a/b/c/d"))
		);
	}

	#[test]
	fn test_pruning_stops_at_shared_ancestor() {
		let trie = trie_with(&[("a/b/c", 1), ("a/x", 2)]);
		assert_eq!(trie.node_count(), 4);

		trie.remove("a/b/c");
		// `a` survives because `a/x` still hangs off it
		assert_eq!(trie.node_count(), 2);
		assert_eq!(trie.get("a/x"), Ok(2));
		assert!(!trie.is_empty());
	}

	#[test]
	fn test_pruning_stops_at_bound_ancestor() {
		let trie = trie_with(&[("a", 1), ("a/b/c", 2)]);

		trie.remove("a/b/c");
		assert_eq!(trie.node_count(), 1);
		assert_eq!(trie.get("a"), Ok(1));
		assert_eq!(trie.len(), 1);
	}

	#[test]
	fn test_remove_inner_route_keeps_children() {
		let trie = trie_with(&[("a/b", 1), ("a/b/c", 2)]);

		assert_eq!(trie.remove("a/b"), Some(1));
		assert_eq!(trie.node_count(), 3);
		assert!(trie.get("a/b").is_err());
		assert_eq!(trie.get("a/b/c"), Ok(2));

		// removing the leaf now prunes the whole chain
		trie.remove("a/b/c");
		assert!(trie.is_empty());
		assert_eq!(trie.node_count(), 0);
	}

	#[test]
	fn test_remove_missing_route_is_noop() {
		let trie = trie_with(&[("a/b", 1)]);

		assert_eq!(trie.remove("a/c"), None);
		assert_eq!(trie.remove("a"), None);
		assert_eq!(trie.remove(""), None);
		assert_eq!(trie.remove("a/b/c"), None);
		assert_eq!(trie.len(), 1);
		assert_eq!(trie.node_count(), 2);
	}

	#[test]
	fn test_remove_twice_does_not_underflow() {
		let trie = trie_with(&[("a/b", 1)]);
		assert_eq!(trie.remove("a/b"), Some(1));
		assert_eq!(trie.remove("a/b"), None);
		assert_eq!(trie.len(), 0);
	}

	#[test]
	fn test_size_tracks_put_remove_sequence() {
		let trie = TopicTrie::new('/');
		let operations: &[(&str, bool)] = &[
			("a/b", true),
			("a/c", true),
			("a//b", true),
			("x", true),
			("a/b", false),
			("a/b", false),
			("a/c/d", true),
			("x", false),
			("a/c", false),
		];
		let mut bound = std::collections::HashSet::new();
		for (route, insert) in operations {
			let canonical = route.replace("//", "/");
			if *insert {
				trie.put(route, ()).unwrap();
				bound.insert(canonical);
			} else {
				trie.remove(route);
				bound.remove(&canonical);
			}
			assert_eq!(trie.len(), bound.len(), "after {route}");
		}
		assert_eq!(trie.routes(), vec!["a/c/d".to_string()]);
	}

	#[test]
	fn test_released_slots_are_reused() {
		let trie = TopicTrie::new('/');
		for round in 0 .. 10 {
			trie.put("r/s/t", round).unwrap();
			trie.remove("r/s/t");
		}
		trie.put("r/s/t", 99).unwrap();
		assert_eq!(trie.node_count(), 3);
		assert_eq!(trie.get("r/s/t"), Ok(99));
	}

	#[test]
	fn test_clear_resets_trie() {
		let trie = trie_with(&[("a/b", 1), ("c", 2)]);
		trie.clear();
		assert!(trie.is_empty());
		assert_eq!(trie.len(), 0);
		assert_eq!(trie.node_count(), 0);
		assert_eq!(trie.separator(), '/');
		assert_eq!(trie.put("a/b", 3), Ok(true));
	}
}

mod group_tests {
	use super::*;

	#[test]
	fn test_is_group_lists_routes_beneath_prefix() {
		let trie = trie_with(&[
			("home/kitchen/temp", 1),
			("home/kitchen/light", 2),
			("home/garage", 3),
			("office/desk", 4),
		]);

		assert_eq!(
			trie.is_group("home"),
			Some(vec![
				"home/garage".to_string(),
				"home/kitchen/light".to_string(),
				"home/kitchen/temp".to_string(),
			])
		);
		assert_eq!(
			trie.is_group("home/kitchen"),
			Some(vec![
				"home/kitchen/light".to_string(),
				"home/kitchen/temp".to_string(),
			])
		);
	}

	#[test]
	fn test_leaf_route_is_not_group() {
		let trie = trie_with(&[("a/b", 1)]);
		assert_eq!(trie.is_group("a/b"), None);
		assert_eq!(trie.is_group("a/b/c"), None);
		assert_eq!(trie.is_group("z"), None);
		assert_eq!(trie.is_group(""), None);
	}

	#[test]
	fn test_group_excludes_own_binding() {
		let trie = trie_with(&[("a", 1), ("a/b", 2)]);
		assert_eq!(trie.is_group("a"), Some(vec!["a/b".to_string()]));
	}

	#[test]
	fn test_matching_orders_root_to_leaf() {
		let trie = trie_with(&[("a", 1), ("a/b/c", 3), ("a/b", 2), ("x", 9)]);

		let matches = trie.matching("a/b/c").unwrap();
		assert_eq!(
			matches,
			vec![
				("a".to_string(), 1),
				("a/b".to_string(), 2),
				("a/b/c".to_string(), 3),
			]
		);

		// deeper than any route: ancestors still match
		let matches = trie.matching("a/b/c/d/e").unwrap();
		assert_eq!(matches.len(), 3);

		assert!(trie.matching("y/z").unwrap().is_empty());
		assert!(trie.matching("").is_err());
	}
}

mod concurrency_tests {
	use std::sync::Arc;
	use std::thread;

	use super::*;

	#[test]
	fn test_concurrent_put_and_get() {
		let trie = Arc::new(TopicTrie::new('/'));
		let writers: Vec<_> = (0 .. 4)
			.map(|worker| {
				let trie = Arc::clone(&trie);
				thread::spawn(move || {
					for i in 0 .. 50 {
						let route = format!("w{worker}/item/{i}");
						trie.put(&route, i).unwrap();
						assert_eq!(trie.get(&route), Ok(i));
					}
				})
			})
			.collect();
		for writer in writers {
			writer.join().unwrap();
		}
		assert_eq!(trie.len(), 200);

		for worker in 0 .. 4 {
			for i in 0 .. 50 {
				trie.remove(&format!("w{worker}/item/{i}"));
			}
		}
		assert!(trie.is_empty());
		assert_eq!(trie.node_count(), 0);
	}
}
