//! Single-owner guard ("flip-bit") used to keep at most one collector in flight per subsystem.

// std
use std::{
	collections::HashSet,
	sync::Mutex,
};

/// A set of busy markers keyed by subsystem id.
///
/// `acquire` returns `true` (and records the subsystem as busy) iff no other caller currently
/// holds it; the returned [`FlipBitGuard`] releases the marker on drop, so every exit path -
/// including early returns and panics - flips the bit back.
#[derive(Debug, Default)]
pub struct FlipBitSet {
	busy: Mutex<HashSet<&'static str>>,
}
impl FlipBitSet {
	/// Construct an empty set; no subsystem starts out busy.
	pub fn new() -> Self {
		Self::default()
	}

	/// Attempt to acquire the guard for `subsystem`. Returns `None` if it is already held.
	pub fn acquire(&self, subsystem: &'static str) -> Option<FlipBitGuard<'_>> {
		let mut busy = self.busy.lock().expect("flip-bit set mutex poisoned");

		if busy.insert(subsystem) { Some(FlipBitGuard { set: self, subsystem }) } else { None }
	}

	/// Whether `subsystem` is currently held by another caller.
	pub fn is_busy(&self, subsystem: &'static str) -> bool {
		self.busy.lock().expect("flip-bit set mutex poisoned").contains(subsystem)
	}
}

/// RAII handle released automatically when a collection run completes or unwinds.
#[derive(Debug)]
pub struct FlipBitGuard<'a> {
	set: &'a FlipBitSet,
	subsystem: &'static str,
}
impl Drop for FlipBitGuard<'_> {
	fn drop(&mut self) {
		self.set.busy.lock().expect("flip-bit set mutex poisoned").remove(self.subsystem);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn second_acquire_is_rejected_while_the_first_guard_lives() {
		let set = FlipBitSet::new();
		let first = set.acquire("ns").expect("first acquire succeeds");

		assert!(set.acquire("ns").is_none());
		assert!(set.is_busy("ns"));

		drop(first);

		assert!(!set.is_busy("ns"));
		assert!(set.acquire("ns").is_some());
	}

	#[test]
	fn distinct_subsystems_are_independent() {
		let set = FlipBitSet::new();
		let _ns = set.acquire("ns").expect("ns acquire succeeds");
		let _ssl = set.acquire("ssl").expect("ssl acquire succeeds");
	}
}
