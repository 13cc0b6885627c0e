//! `(pool, subsystem)` backoff membership, skipping a subsystem's next tick after a failure.

// std
use std::{collections::HashSet, sync::Mutex};
// self
use crate::_prelude::*;

/// Tracks which subsystems are currently sitting out a failure backoff window.
#[derive(Debug, Default)]
pub struct BackoffSet {
	pending: Mutex<HashSet<&'static str>>,
}
impl BackoffSet {
	/// Construct an empty backoff set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether `subsystem` is presently in backoff and its next tick should be skipped.
	pub fn is_active(&self, subsystem: &'static str) -> bool {
		self.pending.lock().expect("backoff set mutex poisoned").contains(subsystem)
	}

	/// Insert `subsystem` into backoff immediately, clearing it again after `duration` on a
	/// background task - matching the original tool's fixed sleep-then-clear retry cooldown.
	pub fn insert(self: &Arc<Self>, subsystem: &'static str, duration: Duration) {
		self.pending.lock().expect("backoff set mutex poisoned").insert(subsystem);

		let set = Arc::clone(self);

		tokio::spawn(async move {
			tokio::time::sleep(duration).await;

			set.pending.lock().expect("backoff set mutex poisoned").remove(subsystem);
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn inserted_subsystem_is_active_then_clears_after_the_backoff_window() {
		let set = Arc::new(BackoffSet::new());

		set.insert("ns", Duration::from_millis(20));

		assert!(set.is_active("ns"));

		tokio::time::sleep(Duration::from_millis(60)).await;

		assert!(!set.is_active("ns"));
	}
}
