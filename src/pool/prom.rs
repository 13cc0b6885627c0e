//! Prom-stage writers: one function per [`DataRecord`] variant, each setting its gauges and
//! touching the label-TTL table so the tuple survives the next reap pass.

// self
use crate::{
	metrics::Metrics,
	nitro::types::{
		GslbServiceStats, GslbVServerStats, LbVServerConfig, LbVServerStats, NsStats, ServiceStats,
		SslStats,
	},
	pool::team::DataRecord,
	ttl::LabelTtlTable,
	vipmap::VipMap,
};

const MB_TO_BYTES: f64 = 1024.0 * 1024.0;
const MS_TO_SECONDS: f64 = 0.001;

/// Write one decoded record's gauges and refresh its label-TTL entries.
pub fn write(metrics: &Metrics, ttl: &LabelTtlTable, appliance: &str, vip_map: &VipMap, record: &DataRecord) {
	match record {
		DataRecord::Ns(stats) => write_ns(metrics, ttl, appliance, stats),
		DataRecord::Ssl(stats) => write_ssl(metrics, ttl, appliance, stats),
		DataRecord::LbVServer(stats) => write_lbvserver(metrics, ttl, appliance, stats),
		DataRecord::LbVServerCfg(cfg) => write_lbvserver_cfg(metrics, ttl, appliance, cfg),
		DataRecord::GslbVServer(stats) => write_gslb_vserver(metrics, ttl, appliance, stats),
		DataRecord::Service(stats) => write_service(metrics, ttl, appliance, vip_map, stats),
	}
}

fn write_ns(metrics: &Metrics, ttl: &LabelTtlTable, appliance: &str, stats: &NsStats) {
	let labels = [appliance];
	let m = &metrics.ns;

	m.cpu_usage_percent.with_label_values(&labels).set(stats.cpu_usage_pct);
	ttl.touch("ns_cpu_usage_percent", &m.cpu_usage_percent, &labels);

	m.memory_usage_percent.with_label_values(&labels).set(stats.mem_usage_pct);
	ttl.touch("ns_memory_usage_percent", &m.memory_usage_percent, &labels);

	m.packet_cpu_usage_percent.with_label_values(&labels).set(stats.pkt_cpu_usage_pct);
	ttl.touch("ns_packet_cpu_usage_percent", &m.packet_cpu_usage_percent, &labels);

	m.flash_partition_usage_percent.with_label_values(&labels).set(stats.flash_partition_usage);
	ttl.touch("ns_flash_partition_usage_percent", &m.flash_partition_usage_percent, &labels);

	m.var_partition_usage_percent.with_label_values(&labels).set(stats.var_partition_usage);
	ttl.touch("ns_var_partition_usage_percent", &m.var_partition_usage_percent, &labels);

	m.received_bytes.with_label_values(&labels).set(stats.total_received_mb * MB_TO_BYTES);
	ttl.touch("ns_received_bytes", &m.received_bytes, &labels);

	m.transmit_bytes.with_label_values(&labels).set(stats.total_transmit_mb * MB_TO_BYTES);
	ttl.touch("ns_transmit_bytes", &m.transmit_bytes, &labels);

	m.http_requests.with_label_values(&labels).set(stats.http_requests);
	ttl.touch("ns_http_requests", &m.http_requests, &labels);

	m.http_responses.with_label_values(&labels).set(stats.http_responses);
	ttl.touch("ns_http_responses", &m.http_responses, &labels);

	m.tcp_client_connections.with_label_values(&labels).set(stats.tcp_current_client_connections);
	ttl.touch("ns_tcp_client_connections", &m.tcp_client_connections, &labels);

	m.tcp_client_connections_established
		.with_label_values(&labels)
		.set(stats.tcp_current_client_connections_established);
	ttl.touch(
		"ns_tcp_client_connections_established",
		&m.tcp_client_connections_established,
		&labels,
	);

	m.tcp_server_connections.with_label_values(&labels).set(stats.tcp_current_server_connections);
	ttl.touch("ns_tcp_server_connections", &m.tcp_server_connections, &labels);

	m.tcp_server_connections_established
		.with_label_values(&labels)
		.set(stats.tcp_current_server_connections_established);
	ttl.touch(
		"ns_tcp_server_connections_established",
		&m.tcp_server_connections_established,
		&labels,
	);
}

fn write_ssl(metrics: &Metrics, ttl: &LabelTtlTable, appliance: &str, stats: &SslStats) {
	let labels = [appliance];
	let m = &metrics.ssl;

	m.transactions.with_label_values(&labels).set(stats.total_ssl_transactions);
	ttl.touch("ssl_transactions", &m.transactions, &labels);

	m.total_sessions.with_label_values(&labels).set(stats.total_ssl_sessions);
	ttl.touch("ssl_total_sessions", &m.total_sessions, &labels);

	m.current_sessions.with_label_values(&labels).set(stats.ssl_sessions);
	ttl.touch("ssl_current_sessions", &m.current_sessions, &labels);
}

fn write_lbvserver(metrics: &Metrics, ttl: &LabelTtlTable, appliance: &str, stats: &LbVServerStats) {
	let labels = [appliance, stats.name.as_str()];
	let m = &metrics.lbvserver;

	m.average_ttlb_seconds.with_label_values(&labels).set(stats.avg_client_ttlb_ms * MS_TO_SECONDS);
	ttl.touch("lbvserver_average_time_to_last_byte_seconds", &m.average_ttlb_seconds, &labels);

	m.state.with_label_values(&labels).set(stats.state.value());
	ttl.touch("lbvserver_state", &m.state, &labels);

	m.requests.with_label_values(&labels).set(stats.total_requests);
	ttl.touch("lbvserver_requests", &m.requests, &labels);

	m.responses.with_label_values(&labels).set(stats.total_responses);
	ttl.touch("lbvserver_responses", &m.responses, &labels);

	m.request_bytes.with_label_values(&labels).set(stats.request_bytes);
	ttl.touch("lbvserver_request_bytes", &m.request_bytes, &labels);

	m.response_bytes.with_label_values(&labels).set(stats.response_bytes);
	ttl.touch("lbvserver_response_bytes", &m.response_bytes, &labels);

	m.packets_received.with_label_values(&labels).set(stats.total_packets_received);
	ttl.touch("lbvserver_packets_received", &m.packets_received, &labels);

	m.packets_sent.with_label_values(&labels).set(stats.total_packets_sent);
	ttl.touch("lbvserver_packets_sent", &m.packets_sent, &labels);

	m.active_services.with_label_values(&labels).set(stats.active_services);
	ttl.touch("lbvserver_active_services", &m.active_services, &labels);

	m.hits.with_label_values(&labels).set(stats.total_hits);
	ttl.touch("lbvserver_hits", &m.hits, &labels);

	m.surge_count.with_label_values(&labels).set(stats.surge_count);
	ttl.touch("lbvserver_surge_count", &m.surge_count, &labels);

	m.service_surge_count.with_label_values(&labels).set(stats.svc_surge_count);
	ttl.touch("lbvserver_service_surge_count", &m.service_surge_count, &labels);

	m.vserver_surge_count.with_label_values(&labels).set(stats.vsvr_surge_count);
	ttl.touch("lbvserver_vserver_surge_count", &m.vserver_surge_count, &labels);

	for embedded in &stats.service {
		write_service_metrics(metrics, ttl, appliance, &stats.name, embedded);
	}
}

fn write_lbvserver_cfg(metrics: &Metrics, ttl: &LabelTtlTable, appliance: &str, cfg: &LbVServerConfig) {
	let labels = [appliance, cfg.name.as_str()];
	let m = &metrics.lbvserver_cfg;

	m.state_change_seconds.with_label_values(&labels).set(cfg.state_change_time_seconds);
	ttl.touch("lbvserver_cfg_state_change_seconds", &m.state_change_seconds, &labels);
}

fn write_gslb_vserver(metrics: &Metrics, ttl: &LabelTtlTable, appliance: &str, stats: &GslbVServerStats) {
	let labels = [appliance, stats.name.as_str()];
	let m = &metrics.gslb_vserver;

	m.state.with_label_values(&labels).set(stats.state.value());
	ttl.touch("gslb_vserver_state", &m.state, &labels);

	m.established_connections.with_label_values(&labels).set(stats.established_connections);
	ttl.touch("gslb_vserver_established_connections", &m.established_connections, &labels);

	m.health_percent.with_label_values(&labels).set(stats.health);
	ttl.touch("gslb_vserver_health_percent", &m.health_percent, &labels);

	m.active_services.with_label_values(&labels).set(stats.active_services);
	ttl.touch("gslb_vserver_active_services", &m.active_services, &labels);

	m.hits.with_label_values(&labels).set(stats.total_hits);
	ttl.touch("gslb_vserver_hits", &m.hits, &labels);

	m.request_bytes.with_label_values(&labels).set(stats.total_request_bytes);
	ttl.touch("gslb_vserver_request_bytes", &m.request_bytes, &labels);

	m.response_bytes.with_label_values(&labels).set(stats.total_response_bytes);
	ttl.touch("gslb_vserver_response_bytes", &m.response_bytes, &labels);

	for service in &stats.gslb_service {
		write_gslb_service(metrics, ttl, appliance, &stats.name, service);
	}
}

fn write_gslb_service(
	metrics: &Metrics,
	ttl: &LabelTtlTable,
	appliance: &str,
	gslb: &str,
	stats: &GslbServiceStats,
) {
	let labels = [appliance, gslb, stats.servicename.as_str()];
	let m = &metrics.gslb_service;

	m.state.with_label_values(&labels).set(stats.state.value());
	ttl.touch("gslb_service_state", &m.state, &labels);

	m.established_connections.with_label_values(&labels).set(stats.established_connections);
	ttl.touch("gslb_service_established_connections", &m.established_connections, &labels);

	m.request_bytes.with_label_values(&labels).set(stats.total_request_bytes);
	ttl.touch("gslb_service_request_bytes", &m.request_bytes, &labels);

	m.response_bytes.with_label_values(&labels).set(stats.total_response_bytes);
	ttl.touch("gslb_service_response_bytes", &m.response_bytes, &labels);

	m.hits.with_label_values(&labels).set(stats.service_hits);
	ttl.touch("gslb_service_hits", &m.hits, &labels);
}

/// Standalone `stat/service` records are labeled via [`VipMap`]; a service with no known binding
/// is skipped rather than written under an empty vserver label (§8, the unbound-service scenario).
fn write_service(metrics: &Metrics, ttl: &LabelTtlTable, appliance: &str, vip_map: &VipMap, stats: &ServiceStats) {
	let bound = vip_map.lookup(stats.lookup_name());

	if bound.is_empty() {
		tracing::debug!(
			appliance,
			service = stats.lookup_name(),
			"service has no known vserver binding, skipping write"
		);

		return;
	}

	for vserver in &bound {
		write_service_metrics(metrics, ttl, appliance, vserver, stats);
	}
}

fn write_service_metrics(
	metrics: &Metrics,
	ttl: &LabelTtlTable,
	appliance: &str,
	vserver: &str,
	stats: &ServiceStats,
) {
	let service_name = stats.lookup_name();
	let labels = [appliance, vserver, service_name];
	let m = &metrics.service;

	m.throughput_bytes.with_label_values(&labels).set(stats.throughput_mb * MB_TO_BYTES);
	ttl.touch("service_throughput_bytes", &m.throughput_bytes, &labels);

	m.average_time_to_first_byte_seconds
		.with_label_values(&labels)
		.set(stats.avg_time_to_first_byte_ms * MS_TO_SECONDS);
	ttl.touch(
		"service_average_time_to_first_byte_seconds",
		&m.average_time_to_first_byte_seconds,
		&labels,
	);

	m.state.with_label_values(&labels).set(stats.state.value());
	ttl.touch("service_state", &m.state, &labels);

	m.requests.with_label_values(&labels).set(stats.total_requests);
	ttl.touch("service_requests", &m.requests, &labels);

	m.responses.with_label_values(&labels).set(stats.total_responses);
	ttl.touch("service_responses", &m.responses, &labels);

	m.request_bytes.with_label_values(&labels).set(stats.request_bytes);
	ttl.touch("service_request_bytes", &m.request_bytes, &labels);

	m.response_bytes.with_label_values(&labels).set(stats.response_bytes);
	ttl.touch("service_response_bytes", &m.response_bytes, &labels);

	m.client_connections.with_label_values(&labels).set(stats.current_client_connections);
	ttl.touch("service_client_connections", &m.client_connections, &labels);

	m.surge_count.with_label_values(&labels).set(stats.surge_count);
	ttl.touch("service_surge_count", &m.surge_count, &labels);

	m.server_connections.with_label_values(&labels).set(stats.current_server_connections);
	ttl.touch("service_server_connections", &m.server_connections, &labels);

	m.server_established_connections
		.with_label_values(&labels)
		.set(stats.server_established_connections);
	ttl.touch(
		"service_server_established_connections",
		&m.server_established_connections,
		&labels,
	);

	m.reuse_pool.with_label_values(&labels).set(stats.current_reuse_pool);
	ttl.touch("service_reuse_pool", &m.reuse_pool, &labels);

	m.max_clients.with_label_values(&labels).set(stats.max_clients);
	ttl.touch("service_max_clients", &m.max_clients, &labels);

	m.load.with_label_values(&labels).set(stats.current_load);
	ttl.touch("service_load", &m.load, &labels);

	m.vserver_hits.with_label_values(&labels).set(stats.vserver_service_hits);
	ttl.touch("service_vserver_hits", &m.vserver_hits, &labels);

	m.active_transactions.with_label_values(&labels).set(stats.active_transactions);
	ttl.touch("service_active_transactions", &m.active_transactions, &labels);
}

#[cfg(test)]
mod tests {
	// crates.io
	use prometheus::Registry;
	// self
	use super::*;

	#[test]
	fn unbound_service_is_skipped_without_writing_any_label_tuple() {
		let registry = Registry::new();
		let metrics = Metrics::new(&registry).unwrap();
		let ttl = LabelTtlTable::new(crate::_prelude::Duration::from_secs(60));
		let vip_map = VipMap::new("lb01", std::env::temp_dir());
		let stats: ServiceStats = serde_json::from_str(
			r#"{
				"name": "svcA", "throughput": "1", "avgsvrttfb": "1", "state": "UP",
				"totalrequests": "1", "totalresponses": "1", "totalrequestbytes": "1", "totalresponsebytes": "1",
				"curclntconnections": "1", "surgecount": "0", "cursrvrconnections": "1",
				"svrestablishedconn": "1", "curreusepool": "0", "maxclients": "0", "curload": "0",
				"vsvrservicehits": "1", "activetransactions": "0"
			}"#,
		)
		.unwrap();

		write_service(&metrics, &ttl, "lb01", &vip_map, &stats);

		assert!(ttl.is_empty());
	}

	#[test]
	fn bound_service_writes_one_tuple_per_vserver() {
		let registry = Registry::new();
		let metrics = Metrics::new(&registry).unwrap();
		let ttl = LabelTtlTable::new(crate::_prelude::Duration::from_secs(60));
		let dir = tempfile::tempdir().unwrap();
		let vip_map = VipMap::new("lb01", dir.path());
		let mut bindings = std::collections::HashMap::new();

		bindings.insert("svcA".to_owned(), vec!["vs1".to_owned(), "vs2".to_owned()]);

		tokio::runtime::Runtime::new().unwrap().block_on(vip_map.update(bindings, None)).unwrap();

		let stats: ServiceStats = serde_json::from_str(
			r#"{
				"name": "svcA", "throughput": "1", "avgsvrttfb": "1", "state": "UP",
				"totalrequests": "1", "totalresponses": "1", "totalrequestbytes": "1", "totalresponsebytes": "1",
				"curclntconnections": "1", "surgecount": "0", "cursrvrconnections": "1",
				"svrestablishedconn": "1", "curreusepool": "0", "maxclients": "0", "curload": "0",
				"vsvrservicehits": "1", "activetransactions": "0"
			}"#,
		)
		.unwrap();

		write_service(&metrics, &ttl, "lb01", &vip_map, &stats);

		assert_eq!(ttl.len(), 16 * 2);
		assert_eq!(metrics.service.requests.with_label_values(&["lb01", "vs1", "svcA"]).get(), 1.0);
		assert_eq!(metrics.service.requests.with_label_values(&["lb01", "vs2", "svcA"]).get(), 1.0);
	}
}
