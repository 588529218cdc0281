//! # Queue Group - Pubsub Router
//!
//! Three workers join the queue group "workers" on topic "jobs" and share
//! the published jobs round-robin, while a monitor holds a set of
//! independent subscriptions configured from JSON and dispatches what it
//! receives through a handler router.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example queue_group
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pubsub_router::prelude::*;
use pubsub_router::topic::HandlersChain;
use pubsub_router::transport::memory::{MemoryMessage, MemoryTransport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MONITOR_CONFIG: &str = r#"{
	"default_options": [{ "pending_limits": { "messages": 256, "bytes": 65536 } }],
	"topic_options": {
		"metrics/cpu": [{ "name": "cpu" }],
		"metrics/memory": [{ "name": "memory" }, { "ack_policy": "explicit" }]
	},
	"max_subscribers": 4
}"#;

fn setup_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| "info".into());
	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_target(true).compact())
		.init();
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
	setup_tracing();

	let transport = MemoryTransport::new();
	let broker = Broker::new(transport.clone());

	// === 1. QUEUE GROUP ===
	let mut workers = Vec::new();
	let mut inboxes = Vec::new();
	for _ in 0..3 {
		let worker = MultiSubscriber::new(MultiSubscriberConfig::default());
		let (tx, rx) = mpsc::channel::<MemoryMessage>(32);
		worker.chan_subscribe(&broker, "jobs", "workers", tx).await?;
		workers.push(worker);
		inboxes.push(rx);
	}

	for n in 0..9 {
		transport.publish("jobs", format!("job-{n}"));
	}
	for (index, inbox) in inboxes.iter_mut().enumerate() {
		let mut jobs = Vec::new();
		while let Ok(message) = inbox.try_recv() {
			jobs.push(String::from_utf8_lossy(&message.payload).into_owned());
		}
		println!("worker {index} handled {jobs:?}");
	}

	// === 2. CONFIGURED SET ===
	let config: MultiSubscriberConfig = serde_json::from_str(MONITOR_CONFIG)?;
	let monitor = MultiSubscriber::new(config);
	let topics = ["metrics/cpu", "metrics/memory", "metrics/disk"];
	let (tx, rx) = mpsc::channel::<MemoryMessage>(32);
	let senders = vec![tx.clone(), tx.clone(), tx];
	// metrics/disk has no per-topic configuration and is skipped
	monitor.multi_chan_subscribe(&broker, &topics, &senders).await?;
	drop(senders);
	println!("monitor subscribed to {:?}", monitor.topics());

	// === 3. DISPATCH ===
	let handled = Arc::new(AtomicUsize::new(0));
	let router = HandlerRouter::<MemoryMessage>::default();
	let counter = Arc::clone(&handled);
	router.handle(
		"metrics",
		HandlersChain::new().then(move |topic, _: &MemoryMessage| {
			counter.fetch_add(1, Ordering::Relaxed);
			tracing::info!(topic = %topic, "metrics sample");
			Flow::Continue
		}),
	)?;
	router.handle(
		"metrics/memory",
		HandlersChain::new().then(|_, message: &MemoryMessage| {
			println!(
				"memory usage: {}",
				String::from_utf8_lossy(&message.payload)
			);
			Flow::Stop
		}),
	)?;

	transport.publish("metrics/cpu", "12%");
	transport.publish("metrics/memory", "512MiB");
	transport.publish("metrics/disk", "80%");

	// === 4. SHUTDOWN ===
	monitor.unsubscribe_all().await?;
	let dispatched = router.serve(rx, CancellationToken::new()).await;
	println!(
		"dispatched {dispatched} messages, {} reached the metrics chain",
		handled.load(Ordering::Relaxed)
	);

	for worker in &workers {
		worker.unsubscribe_all().await?;
	}
	for worker in &workers {
		worker.wait().await;
	}
	monitor.wait().await;
	Ok(())
}
