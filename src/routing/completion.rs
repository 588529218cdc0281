//! Completion tracking behind `MultiSubscriber::wait`
//!
//! Each tracked subscription holds a [`CompletionGuard`]; the counter drops
//! when the guard is released. Waiters resolve once the counter is zero.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::error::SubscribeError;

/// Counts tracked subscriptions that have not completed yet
#[derive(Debug)]
pub struct CompletionTracker {
	pending: watch::Sender<usize>,
}

impl Default for CompletionTracker {
	fn default() -> Self {
		Self::new()
	}
}

impl CompletionTracker {
	/// Creates a tracker with nothing pending
	pub fn new() -> Self {
		let (pending, _) = watch::channel(0);
		Self { pending }
	}

	/// Starts tracking one subscription
	pub fn track(&self) -> CompletionGuard {
		self.pending.send_modify(|pending| *pending += 1);
		CompletionGuard {
			pending: self.pending.clone(),
		}
	}

	/// Number of tracked subscriptions not yet complete
	pub fn pending(&self) -> usize {
		*self.pending.borrow()
	}

	/// Resolves once every tracked subscription has completed
	pub async fn wait(&self) {
		let mut pending = self.pending.subscribe();
		// the sender lives in `self`, so the channel cannot close here
		let _ = pending.wait_for(|pending| *pending == 0).await;
	}

	/// Like [`wait`](Self::wait), giving up when `cancel` fires
	pub async fn wait_with_cancel(
		&self,
		cancel: &CancellationToken,
	) -> Result<(), SubscribeError> {
		tokio::select! {
			_ = self.wait() => Ok(()),
			_ = cancel.cancelled() => Err(SubscribeError::Cancelled),
		}
	}
}

/// Marks one tracked subscription; completes it on drop
#[derive(Debug)]
pub struct CompletionGuard {
	pending: watch::Sender<usize>,
}

impl Drop for CompletionGuard {
	fn drop(&mut self) {
		self.pending.send_modify(|pending| {
			*pending = pending.saturating_sub(1);
			trace!(pending = *pending, "Tracked subscription completed");
		});
	}
}
