//! Label-TTL reaper: garbage-collects stale Prometheus label tuples.
//!
//! Prometheus metric vectors retain every label tuple ever observed. Without reaping, series for
//! vservers/services removed from the appliance persist forever and mislead dashboards. Entries
//! are keyed by a hash of the metric descriptor and a hash of `(descriptor, label-values)` so
//! deletion is cheap and the hot write path never formats label strings for lookup purposes.

// std
use std::{
	collections::{HashMap, hash_map::DefaultHasher},
	hash::{Hash, Hasher},
	sync::Mutex,
};
// crates.io
use prometheus::GaugeVec;
// self
use crate::_prelude::*;

type Remover = Arc<dyn Fn(&[String]) -> prometheus::Result<()> + Send + Sync>;

struct Entry {
	remover: Remover,
	labels: Vec<String>,
	last_seen: Instant,
}

/// Side table tracking the last time each `(metric, label-tuple)` pair was written.
pub struct LabelTtlTable {
	ttl: Duration,
	buckets: Mutex<HashMap<u64, HashMap<u64, Entry>>>,
}
impl LabelTtlTable {
	/// Construct a reaper with the given TTL. The recommended TTL comfortably exceeds one
	/// collection interval (at least 4x is a reasonable default).
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, buckets: Mutex::new(HashMap::new()) }
	}

	/// Upsert the entry for `(descriptor, label_values)` against `vec`, stamping `now`.
	pub fn touch(&self, descriptor: &'static str, vec: &GaugeVec, label_values: &[&str]) {
		let outer = hash64(&descriptor);
		let inner = hash64(&(descriptor, label_values));
		let gauge = vec.clone();
		let owned: Vec<String> = label_values.iter().map(|s| (*s).to_owned()).collect();
		let entry = Entry {
			remover: Arc::new(move |labels: &[String]| {
				let refs: Vec<&str> = labels.iter().map(String::as_str).collect();

				gauge.remove_label_values(&refs)
			}),
			labels: owned,
			last_seen: Instant::now(),
		};
		let mut buckets = self.buckets.lock().expect("label-ttl mutex poisoned");

		buckets.entry(outer).or_default().insert(inner, entry);
	}

	/// Remove every entry whose `last_seen + ttl < now`, dropping the label tuple from its
	/// underlying metric vector, then compact any emptied outer bucket.
	pub fn delete_stale(&self) {
		let now = Instant::now();
		let mut buckets = self.buckets.lock().expect("label-ttl mutex poisoned");

		buckets.retain(|_, bucket| {
			bucket.retain(|_, entry| {
				if now.saturating_duration_since(entry.last_seen) >= self.ttl {
					if let Err(error) = (entry.remover)(&entry.labels) {
						tracing::warn!(?error, labels = ?entry.labels, "failed to remove stale label tuple");
					}

					false
				} else {
					true
				}
			});

			!bucket.is_empty()
		});
	}

	/// Number of live label tuples currently tracked, for diagnostics and tests.
	pub fn len(&self) -> usize {
		self.buckets.lock().expect("label-ttl mutex poisoned").values().map(HashMap::len).sum()
	}

	/// Whether the table currently tracks no label tuples.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

fn hash64<T: Hash>(value: &T) -> u64 {
	let mut hasher = DefaultHasher::new();

	value.hash(&mut hasher);
	hasher.finish()
}

#[cfg(test)]
mod tests {
	// crates.io
	use prometheus::{Opts, Registry};
	// self
	use super::*;

	#[test]
	fn stale_entries_are_reaped_and_can_be_restored() {
		let registry = Registry::new();
		let gauge =
			GaugeVec::new(Opts::new("lbvserver_state", "state"), &["citrixadc_instance", "lb"])
				.unwrap();

		registry.register(Box::new(gauge.clone())).unwrap();
		gauge.with_label_values(&["lb01", "vsX"]).set(1.0);

		let table = LabelTtlTable::new(Duration::from_millis(10));

		table.touch("lbvserver_state", &gauge, &["lb01", "vsX"]);
		assert_eq!(table.len(), 1);

		std::thread::sleep(Duration::from_millis(25));
		table.delete_stale();

		assert!(table.is_empty());
		assert!(gauge.get_metric_with_label_values(&["lb01", "vsX"]).unwrap().get() == 0.0);

		gauge.with_label_values(&["lb01", "vsX"]).set(1.0);
		table.touch("lbvserver_state", &gauge, &["lb01", "vsX"]);
		assert_eq!(table.len(), 1);
	}

	#[test]
	fn fresh_entries_survive_a_reap_pass() {
		let gauge =
			GaugeVec::new(Opts::new("ssl_sessions", "sessions"), &["citrixadc_instance"]).unwrap();
		let table = LabelTtlTable::new(Duration::from_secs(60));

		table.touch("ssl_sessions", &gauge, &["lb01"]);
		table.delete_stale();

		assert_eq!(table.len(), 1);
	}
}
