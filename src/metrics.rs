//! Prometheus metric families for every subsystem, plus the self-exporter collector.
//!
//! Every family carries the universal `citrixadc_instance` label first, followed by whatever
//! object-identifying labels the subsystem needs (`lb`, `svc`, `gslb`). Subsystem Prom writers
//! live next to their collector in [`crate::subsystem`]'s sibling modules; this module only owns
//! registration of the vectors they write into.

// crates.io
use prometheus::{GaugeVec, Opts, Registry};
// self
use crate::_prelude::*;

mod collector;

pub use collector::{ApplianceInfo, ApplianceInfoSource, ExporterCollector};

const NS: &str = "citrixadc";

fn gauge(name: &str, help: &str, labels: &[&str], registry: &Registry) -> prometheus::Result<GaugeVec> {
	let vec = GaugeVec::new(Opts::new(name, help).namespace(NS), labels)?;

	registry.register(Box::new(vec.clone()))?;

	Ok(vec)
}

/// `stat/ns` gauges.
pub struct NsMetrics {
	pub cpu_usage_percent: GaugeVec,
	pub memory_usage_percent: GaugeVec,
	pub packet_cpu_usage_percent: GaugeVec,
	pub flash_partition_usage_percent: GaugeVec,
	pub var_partition_usage_percent: GaugeVec,
	pub received_bytes: GaugeVec,
	pub transmit_bytes: GaugeVec,
	pub http_requests: GaugeVec,
	pub http_responses: GaugeVec,
	pub tcp_client_connections: GaugeVec,
	pub tcp_client_connections_established: GaugeVec,
	pub tcp_server_connections: GaugeVec,
	pub tcp_server_connections_established: GaugeVec,
}
impl NsMetrics {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		let instance = &["citrixadc_instance"];

		Ok(Self {
			cpu_usage_percent: gauge("ns_cpu_usage_percent", "CPU utilization", instance, registry)?,
			memory_usage_percent: gauge(
				"ns_memory_usage_percent",
				"Memory utilization",
				instance,
				registry,
			)?,
			packet_cpu_usage_percent: gauge(
				"ns_packet_cpu_usage_percent",
				"Packet-engine CPU utilization",
				instance,
				registry,
			)?,
			flash_partition_usage_percent: gauge(
				"ns_flash_partition_usage_percent",
				"/flash partition utilization",
				instance,
				registry,
			)?,
			var_partition_usage_percent: gauge(
				"ns_var_partition_usage_percent",
				"/var partition utilization",
				instance,
				registry,
			)?,
			received_bytes: gauge("ns_received_bytes", "Bytes received", instance, registry)?,
			transmit_bytes: gauge("ns_transmit_bytes", "Bytes transmitted", instance, registry)?,
			http_requests: gauge("ns_http_requests", "HTTP requests observed", instance, registry)?,
			http_responses: gauge("ns_http_responses", "HTTP responses observed", instance, registry)?,
			tcp_client_connections: gauge(
				"ns_tcp_client_connections",
				"Current client-side TCP connections",
				instance,
				registry,
			)?,
			tcp_client_connections_established: gauge(
				"ns_tcp_client_connections_established",
				"Current established client-side TCP connections",
				instance,
				registry,
			)?,
			tcp_server_connections: gauge(
				"ns_tcp_server_connections",
				"Current server-side TCP connections",
				instance,
				registry,
			)?,
			tcp_server_connections_established: gauge(
				"ns_tcp_server_connections_established",
				"Current established server-side TCP connections",
				instance,
				registry,
			)?,
		})
	}
}

/// `stat/ssl` gauges.
pub struct SslMetrics {
	pub transactions: GaugeVec,
	pub total_sessions: GaugeVec,
	pub current_sessions: GaugeVec,
}
impl SslMetrics {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		let instance = &["citrixadc_instance"];

		Ok(Self {
			transactions: gauge("ssl_transactions", "Total SSL transactions", instance, registry)?,
			total_sessions: gauge("ssl_total_sessions", "Total SSL sessions", instance, registry)?,
			current_sessions: gauge("ssl_current_sessions", "Current SSL sessions", instance, registry)?,
		})
	}
}

/// `stat/lbvserver` gauges, labeled by virtual-server name.
pub struct LbVServerMetrics {
	pub average_ttlb_seconds: GaugeVec,
	pub state: GaugeVec,
	pub requests: GaugeVec,
	pub responses: GaugeVec,
	pub request_bytes: GaugeVec,
	pub response_bytes: GaugeVec,
	pub packets_received: GaugeVec,
	pub packets_sent: GaugeVec,
	pub active_services: GaugeVec,
	pub hits: GaugeVec,
	pub surge_count: GaugeVec,
	pub service_surge_count: GaugeVec,
	pub vserver_surge_count: GaugeVec,
}
impl LbVServerMetrics {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		let labels = &["citrixadc_instance", "lb"];

		Ok(Self {
			average_ttlb_seconds: gauge(
				"lbvserver_average_time_to_last_byte_seconds",
				"Average client time-to-last-byte",
				labels,
				registry,
			)?,
			state: gauge("lbvserver_state", "Virtual server state", labels, registry)?,
			requests: gauge("lbvserver_requests", "Total requests", labels, registry)?,
			responses: gauge("lbvserver_responses", "Total responses", labels, registry)?,
			request_bytes: gauge("lbvserver_request_bytes", "Total request bytes", labels, registry)?,
			response_bytes: gauge("lbvserver_response_bytes", "Total response bytes", labels, registry)?,
			packets_received: gauge(
				"lbvserver_packets_received",
				"Total packets received",
				labels,
				registry,
			)?,
			packets_sent: gauge("lbvserver_packets_sent", "Total packets sent", labels, registry)?,
			active_services: gauge(
				"lbvserver_active_services",
				"Bound services currently active",
				labels,
				registry,
			)?,
			hits: gauge("lbvserver_hits", "Total hits", labels, registry)?,
			surge_count: gauge("lbvserver_surge_count", "Surge queue depth", labels, registry)?,
			service_surge_count: gauge(
				"lbvserver_service_surge_count",
				"Per-service surge queue depth",
				labels,
				registry,
			)?,
			vserver_surge_count: gauge(
				"lbvserver_vserver_surge_count",
				"Virtual-server surge queue depth",
				labels,
				registry,
			)?,
		})
	}
}

/// `config/lbvserver` gauges, labeled by virtual-server name.
pub struct LbVServerCfgMetrics {
	pub state_change_seconds: GaugeVec,
}
impl LbVServerCfgMetrics {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		Ok(Self {
			state_change_seconds: gauge(
				"lbvserver_cfg_state_change_seconds",
				"Seconds since the virtual server last changed state",
				&["citrixadc_instance", "lb"],
				registry,
			)?,
		})
	}
}

/// `stat/gslbvserver` gauges, labeled by GSLB virtual-server name.
pub struct GslbVServerMetrics {
	pub state: GaugeVec,
	pub established_connections: GaugeVec,
	pub health_percent: GaugeVec,
	pub active_services: GaugeVec,
	pub hits: GaugeVec,
	pub request_bytes: GaugeVec,
	pub response_bytes: GaugeVec,
}
impl GslbVServerMetrics {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		let labels = &["citrixadc_instance", "gslb"];

		Ok(Self {
			state: gauge("gslb_vserver_state", "GSLB virtual server state", labels, registry)?,
			established_connections: gauge(
				"gslb_vserver_established_connections",
				"Established connections",
				labels,
				registry,
			)?,
			health_percent: gauge(
				"gslb_vserver_health_percent",
				"Fraction of bound services that are up",
				labels,
				registry,
			)?,
			active_services: gauge(
				"gslb_vserver_active_services",
				"Bound services currently active",
				labels,
				registry,
			)?,
			hits: gauge("gslb_vserver_hits", "Total hits", labels, registry)?,
			request_bytes: gauge("gslb_vserver_request_bytes", "Total request bytes", labels, registry)?,
			response_bytes: gauge(
				"gslb_vserver_response_bytes",
				"Total response bytes",
				labels,
				registry,
			)?,
		})
	}
}

/// GSLB service entries embedded in a targeted vserver fetch, labeled by vserver and service name.
pub struct GslbServiceMetrics {
	pub state: GaugeVec,
	pub established_connections: GaugeVec,
	pub request_bytes: GaugeVec,
	pub response_bytes: GaugeVec,
	pub hits: GaugeVec,
}
impl GslbServiceMetrics {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		let labels = &["citrixadc_instance", "gslb", "svc"];

		Ok(Self {
			state: gauge("gslb_service_state", "GSLB service state", labels, registry)?,
			established_connections: gauge(
				"gslb_service_established_connections",
				"Established connections",
				labels,
				registry,
			)?,
			request_bytes: gauge("gslb_service_request_bytes", "Total request bytes", labels, registry)?,
			response_bytes: gauge(
				"gslb_service_response_bytes",
				"Total response bytes",
				labels,
				registry,
			)?,
			hits: gauge("gslb_service_hits", "Total service hits", labels, registry)?,
		})
	}
}

/// `stat/service` gauges, labeled by the bound virtual server and the service name.
pub struct ServiceMetrics {
	pub throughput_bytes: GaugeVec,
	pub average_time_to_first_byte_seconds: GaugeVec,
	pub state: GaugeVec,
	pub requests: GaugeVec,
	pub responses: GaugeVec,
	pub request_bytes: GaugeVec,
	pub response_bytes: GaugeVec,
	pub client_connections: GaugeVec,
	pub surge_count: GaugeVec,
	pub server_connections: GaugeVec,
	pub server_established_connections: GaugeVec,
	pub reuse_pool: GaugeVec,
	pub max_clients: GaugeVec,
	pub load: GaugeVec,
	pub vserver_hits: GaugeVec,
	pub active_transactions: GaugeVec,
}
impl ServiceMetrics {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		let labels = &["citrixadc_instance", "lb", "svc"];

		Ok(Self {
			throughput_bytes: gauge("service_throughput_bytes", "Throughput", labels, registry)?,
			average_time_to_first_byte_seconds: gauge(
				"service_average_time_to_first_byte_seconds",
				"Average server time to first byte",
				labels,
				registry,
			)?,
			state: gauge("service_state", "Service state", labels, registry)?,
			requests: gauge("service_requests", "Total requests", labels, registry)?,
			responses: gauge("service_responses", "Total responses", labels, registry)?,
			request_bytes: gauge("service_request_bytes", "Total request bytes", labels, registry)?,
			response_bytes: gauge("service_response_bytes", "Total response bytes", labels, registry)?,
			client_connections: gauge(
				"service_client_connections",
				"Current client connections",
				labels,
				registry,
			)?,
			surge_count: gauge("service_surge_count", "Surge queue depth", labels, registry)?,
			server_connections: gauge(
				"service_server_connections",
				"Current server connections",
				labels,
				registry,
			)?,
			server_established_connections: gauge(
				"service_server_established_connections",
				"Established server connections",
				labels,
				registry,
			)?,
			reuse_pool: gauge("service_reuse_pool", "Current connection reuse pool size", labels, registry)?,
			max_clients: gauge("service_max_clients", "Configured max clients", labels, registry)?,
			load: gauge("service_load", "Current load", labels, registry)?,
			vserver_hits: gauge("service_vserver_hits", "Hits via bound virtual servers", labels, registry)?,
			active_transactions: gauge(
				"service_active_transactions",
				"Active transactions",
				labels,
				registry,
			)?,
		})
	}
}

/// Monotonic self-observability counters, stored as gauges internally (see
/// [`collector::ExporterCollector`]) so an appliance-side or process-side reset is representable,
/// then re-emitted as true Prometheus counters on scrape.
pub struct SelfCounters {
	pub api_collect_failures_total: GaugeVec,
	pub processing_failures_total: GaugeVec,
	pub prometheus_collect_failures_total: GaugeVec,
	pub missed_metrics_total: GaugeVec,
}
impl SelfCounters {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		let labels = &["citrixadc_instance", "citrixadc_subsystem"];

		Ok(Self {
			api_collect_failures_total: gauge(
				"exporter_api_collect_failures_total",
				"Upstream API fetch failures",
				labels,
				registry,
			)?,
			processing_failures_total: gauge(
				"exporter_processing_failures_total",
				"Record decode/processing failures",
				labels,
				registry,
			)?,
			prometheus_collect_failures_total: gauge(
				"exporter_prometheus_collect_failures_total",
				"Prom-stage submission failures",
				labels,
				registry,
			)?,
			missed_metrics_total: gauge(
				"exporter_missed_metrics_total",
				"Sub-fetches missed after exhausting retries",
				labels,
				registry,
			)?,
		})
	}
}

/// Non-monotonic self-observability gauges, registered directly in the main registry.
pub struct SelfGauges {
	pub processing_time_seconds: GaugeVec,
}
impl SelfGauges {
	fn new(registry: &Registry) -> prometheus::Result<Self> {
		Ok(Self {
			processing_time_seconds: gauge(
				"exporter_processing_time_seconds",
				"Wall time spent processing the last successful collection run",
				&["citrixadc_instance", "citrixadc_subsystem"],
				registry,
			)?,
		})
	}
}

/// Every metric family the exporter writes to, grouped by subsystem.
///
/// `counters` lives in a private sidecar [`Registry`] (never scraped directly); `ExporterCollector`
/// re-emits its families as true Prometheus counters into the main registry it is registered in.
pub struct Metrics {
	pub ns: NsMetrics,
	pub ssl: SslMetrics,
	pub lbvserver: LbVServerMetrics,
	pub lbvserver_cfg: LbVServerCfgMetrics,
	pub gslb_vserver: GslbVServerMetrics,
	pub gslb_service: GslbServiceMetrics,
	pub service: ServiceMetrics,
	pub gauges: SelfGauges,
	pub counters: SelfCounters,
	counter_registry: Registry,
}
impl Metrics {
	/// Build every family and register the plain gauges into `registry`. The monotonic
	/// self-counters register into an internal sidecar registry instead; call
	/// [`Metrics::counter_registry`] to hand that to [`ExporterCollector`].
	pub fn new(registry: &Registry) -> prometheus::Result<Arc<Self>> {
		let counter_registry = Registry::new();

		Ok(Arc::new(Self {
			ns: NsMetrics::new(registry)?,
			ssl: SslMetrics::new(registry)?,
			lbvserver: LbVServerMetrics::new(registry)?,
			lbvserver_cfg: LbVServerCfgMetrics::new(registry)?,
			gslb_vserver: GslbVServerMetrics::new(registry)?,
			gslb_service: GslbServiceMetrics::new(registry)?,
			service: ServiceMetrics::new(registry)?,
			gauges: SelfGauges::new(registry)?,
			counters: SelfCounters::new(&counter_registry)?,
			counter_registry,
		}))
	}

	/// The private registry backing `counters`, gathered by [`ExporterCollector`] on every scrape.
	pub fn counter_registry(&self) -> &Registry {
		&self.counter_registry
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_family_registers_without_collision() {
		let registry = Registry::new();
		let metrics = Metrics::new(&registry).expect("families register cleanly");

		metrics.service.throughput_bytes.with_label_values(&["appliance1", "vs1", "svcA"]).set(1048576.0);
		metrics.counters.api_collect_failures_total.with_label_values(&["appliance1", "ns"]).inc();

		assert_eq!(registry.gather().len(), 59);
		assert_eq!(metrics.counter_registry().gather().len(), 4);
	}
}
