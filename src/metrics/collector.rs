//! Custom `Collector` gathering `ns_info`, scrape lag, and the re-emitted self-counters.
//!
//! Mirrors the original tool's hand-built `exporter` collector: rather than a dynamic `Desc` list,
//! `desc()` returns nothing and every metric is produced fresh on each `collect()` call, the
//! "unchecked collector" pattern the `prometheus` crate supports for exactly this case.

// crates.io
use prometheus::{
	GaugeVec, Opts,
	core::{Collector, Desc},
	proto::{Counter, MetricFamily, MetricType},
};
// self
use super::Metrics;
use crate::{_prelude::*, timekeeper::Timekeeper};

/// One appliance's cached model/version/year, as populated by the info-refresh task.
#[derive(Debug, Clone)]
pub struct ApplianceInfo {
	pub instance: String,
	pub model: String,
	pub version: String,
	pub year: String,
}

/// Supplies the appliance-info snapshots the collector emits on every scrape.
pub trait ApplianceInfoSource: Send + Sync {
	/// Current model/version/year for every pool that has completed at least one info refresh.
	fn snapshot(&self) -> Vec<ApplianceInfo>;
}

/// The exporter's own `Collector`, registered into the main registry alongside subsystem gauges.
pub struct ExporterCollector {
	metrics: Arc<Metrics>,
	timekeeper: Arc<Timekeeper>,
	info: Arc<dyn ApplianceInfoSource>,
}
impl ExporterCollector {
	/// Construct a collector over the given metric families, timekeeper, and info source.
	pub fn new(
		metrics: Arc<Metrics>,
		timekeeper: Arc<Timekeeper>,
		info: Arc<dyn ApplianceInfoSource>,
	) -> Self {
		Self { metrics, timekeeper, info }
	}
}
impl Collector for ExporterCollector {
	fn desc(&self) -> Vec<&Desc> {
		Vec::new()
	}

	fn collect(&self) -> Vec<MetricFamily> {
		let mut families = Vec::new();

		let info_gauge = GaugeVec::new(
			Opts::new("ns_info", "Appliance model/version/year, always 1 when present")
				.namespace("citrixadc"),
			&["citrixadc_instance", "citrixadc_ns_model", "citrixadc_ns_version", "citrixadc_ns_year"],
		)
		.expect("static ns_info options are always valid");

		for info in self.info.snapshot() {
			info_gauge
				.with_label_values(&[&info.instance, &info.model, &info.version, &info.year])
				.set(1.0);
		}

		families.extend(info_gauge.collect());

		let lag_gauge = GaugeVec::new(
			Opts::new(
				"exporter_scrape_lag_seconds",
				"Seconds between a subsystem's last successful collection and this scrape",
			)
			.namespace("citrixadc"),
			&["citrixadc_instance", "citrixadc_subsystem"],
		)
		.expect("static scrape-lag options are always valid");
		let now = Utc::now();

		for (instance, subsystem, last) in self.timekeeper.snapshot() {
			let lag_seconds = (now - last).num_milliseconds() as f64 / 1000.0;

			lag_gauge.with_label_values(&[&instance, subsystem.as_str()]).set(lag_seconds.max(0.0));
		}

		families.extend(lag_gauge.collect());
		families.extend(self.metrics.counter_registry().gather().into_iter().map(as_counter_family));

		families
	}
}

/// Reinterpret a gauge-typed family gathered from the sidecar registry as a counter family, so the
/// monotonic self-metrics the pipeline writes via gauge semantics scrape as real counters.
fn as_counter_family(mut family: MetricFamily) -> MetricFamily {
	family.set_field_type(MetricType::COUNTER);

	for metric in family.mut_metric() {
		let value = metric.get_gauge().get_value();
		let mut counter = Counter::default();

		counter.set_value(value);
		metric.set_counter(counter);
	}

	family
}

#[cfg(test)]
mod tests {
	// crates.io
	use prometheus::Registry;
	// self
	use super::*;

	struct NoAppliances;
	impl ApplianceInfoSource for NoAppliances {
		fn snapshot(&self) -> Vec<ApplianceInfo> {
			Vec::new()
		}
	}

	#[test]
	fn sidecar_gauges_scrape_as_counters() {
		let registry = Registry::new();
		let metrics = Metrics::new(&registry).unwrap();

		metrics.counters.api_collect_failures_total.with_label_values(&["lb01", "ns"]).inc();

		let timekeeper = Arc::new(Timekeeper::new());
		let collector =
			ExporterCollector::new(Arc::clone(&metrics), timekeeper, Arc::new(NoAppliances));
		let families = collector.collect();
		let reemitted = families
			.iter()
			.find(|family| family.get_name() == "citrixadc_exporter_api_collect_failures_total")
			.expect("re-emitted family present");

		assert_eq!(reemitted.get_field_type(), MetricType::COUNTER);
		assert_eq!(reemitted.get_metric()[0].get_counter().get_value(), 1.0);
	}
}
