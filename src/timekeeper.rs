//! Process-wide `(appliance, subsystem) -> last-successful-timestamp` table.
//!
//! Read-mostly: every successful subsystem collection stamps `now`; the self-exporter
//! [`crate::metrics::ExporterCollector`] reads a full snapshot on every scrape to compute
//! per-subsystem scrape lag.

// std
use std::{collections::HashMap, sync::Mutex};
// self
use crate::{_prelude::*, subsystem::SubsystemKind};

/// Tracks the last successful collection timestamp for every `(appliance, subsystem)` pair.
#[derive(Debug, Default)]
pub struct Timekeeper {
	last_success: Mutex<HashMap<(String, SubsystemKind), DateTime<Utc>>>,
}
impl Timekeeper {
	/// Construct an empty timekeeper; nothing has been collected yet.
	pub fn new() -> Self {
		Self::default()
	}

	/// Record that `(appliance, subsystem)` completed a successful collection at `now`.
	pub fn record(&self, appliance: &str, subsystem: SubsystemKind, now: DateTime<Utc>) {
		self.last_success
			.lock()
			.expect("timekeeper mutex poisoned")
			.insert((appliance.to_owned(), subsystem), now);
	}

	/// The last recorded success for `(appliance, subsystem)`, if any collection has succeeded.
	pub fn last_success(&self, appliance: &str, subsystem: SubsystemKind) -> Option<DateTime<Utc>> {
		self.last_success
			.lock()
			.expect("timekeeper mutex poisoned")
			.get(&(appliance.to_owned(), subsystem))
			.copied()
	}

	/// Every recorded `(appliance, subsystem, last-success)` triple, for the self-collector.
	pub fn snapshot(&self) -> Vec<(String, SubsystemKind, DateTime<Utc>)> {
		self.last_success
			.lock()
			.expect("timekeeper mutex poisoned")
			.iter()
			.map(|((appliance, subsystem), last)| (appliance.clone(), *subsystem, *last))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn records_and_reads_back_the_latest_success() {
		let tk = Timekeeper::new();

		assert!(tk.last_success("lb01", SubsystemKind::Ns).is_none());

		let first = Utc::now();

		tk.record("lb01", SubsystemKind::Ns, first);
		assert_eq!(tk.last_success("lb01", SubsystemKind::Ns), Some(first));

		let second = first + chrono::Duration::seconds(5);

		tk.record("lb01", SubsystemKind::Ns, second);
		assert_eq!(tk.last_success("lb01", SubsystemKind::Ns), Some(second));
	}

	#[test]
	fn snapshot_is_isolated_per_appliance_and_subsystem() {
		let tk = Timekeeper::new();
		let now = Utc::now();

		tk.record("lb01", SubsystemKind::Ns, now);
		tk.record("lb01", SubsystemKind::Ssl, now);
		tk.record("lb02", SubsystemKind::Ns, now);

		assert_eq!(tk.snapshot().len(), 3);
	}
}
