//! Typed payloads returned by the appliance's Nitro-style JSON API.
//!
//! Numeric counters are transported by the appliance as JSON strings; `deserialize_numeric_string`
//! centralizes the string-to-`f64` coercion so every subsystem struct can declare its fields as
//! plain numbers.

// crates.io
use serde::{Deserialize, Deserializer};

/// Operational state of a service or virtual server, as reported by the appliance.
///
/// `Value` mirrors the fixed mapping the original tool used when emitting the `state` gauge:
/// unrecognized strings collapse to `Unknown` rather than failing deserialization, since the
/// appliance is known to report additional transitional states under some firmware versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum CurState {
	/// `DOWN`.
	Down,
	/// `UP`.
	Up,
	/// `OUT OF SERVICE`.
	OutOfService,
	/// Any other reported state.
	Unknown,
}
impl CurState {
	/// The numeric gauge value the original tool emits for this state.
	pub fn value(self) -> f64 {
		match self {
			Self::Down => 0.0,
			Self::Up => 1.0,
			Self::OutOfService => 2.0,
			Self::Unknown => 3.0,
		}
	}
}
impl From<String> for CurState {
	fn from(value: String) -> Self {
		match value.as_str() {
			"DOWN" => Self::Down,
			"UP" => Self::Up,
			"OUT OF SERVICE" => Self::OutOfService,
			_ => Self::Unknown,
		}
	}
}

pub(crate) fn numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = String::deserialize(deserializer)?;

	raw.parse().map_err(serde::de::Error::custom)
}

/// `/stat/ns` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct NsStats {
	#[serde(rename = "cpuusagepcnt")]
	pub cpu_usage_pct: f64,
	#[serde(rename = "memusagepcnt")]
	pub mem_usage_pct: f64,
	#[serde(rename = "pktcpuusagepcnt")]
	pub pkt_cpu_usage_pct: f64,
	#[serde(rename = "disk0perusage")]
	pub flash_partition_usage: f64,
	#[serde(rename = "disk1perusage")]
	pub var_partition_usage: f64,
	#[serde(rename = "totrxmbits", deserialize_with = "numeric_string")]
	pub total_received_mb: f64,
	#[serde(rename = "tottxmbits", deserialize_with = "numeric_string")]
	pub total_transmit_mb: f64,
	#[serde(rename = "httptotrequests", deserialize_with = "numeric_string")]
	pub http_requests: f64,
	#[serde(rename = "httptotresponses", deserialize_with = "numeric_string")]
	pub http_responses: f64,
	#[serde(rename = "tcpcurclientconn", deserialize_with = "numeric_string")]
	pub tcp_current_client_connections: f64,
	#[serde(rename = "tcpcurclientconnestablished", deserialize_with = "numeric_string")]
	pub tcp_current_client_connections_established: f64,
	#[serde(rename = "tcpcurserverconn", deserialize_with = "numeric_string")]
	pub tcp_current_server_connections: f64,
	#[serde(rename = "tcpcurserverconnestablished", deserialize_with = "numeric_string")]
	pub tcp_current_server_connections_established: f64,
}

/// `/stat/ssl` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SslStats {
	#[serde(rename = "ssltottransactions", deserialize_with = "numeric_string")]
	pub total_ssl_transactions: f64,
	#[serde(rename = "ssltotsessions", deserialize_with = "numeric_string")]
	pub total_ssl_sessions: f64,
	#[serde(rename = "sslcursessions", deserialize_with = "numeric_string")]
	pub ssl_sessions: f64,
}

/// `/stat/service` payload, also embedded under `lbvserver.service[]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStats {
	pub name: String,
	#[serde(default)]
	pub servicename: Option<String>,
	#[serde(rename = "throughput", deserialize_with = "numeric_string")]
	pub throughput_mb: f64,
	#[serde(rename = "avgsvrttfb", deserialize_with = "numeric_string")]
	pub avg_time_to_first_byte_ms: f64,
	pub state: CurState,
	#[serde(rename = "totalrequests", deserialize_with = "numeric_string")]
	pub total_requests: f64,
	#[serde(rename = "totalresponses", deserialize_with = "numeric_string")]
	pub total_responses: f64,
	#[serde(rename = "totalrequestbytes", deserialize_with = "numeric_string")]
	pub request_bytes: f64,
	#[serde(rename = "totalresponsebytes", deserialize_with = "numeric_string")]
	pub response_bytes: f64,
	#[serde(rename = "curclntconnections", deserialize_with = "numeric_string")]
	pub current_client_connections: f64,
	#[serde(rename = "surgecount", deserialize_with = "numeric_string")]
	pub surge_count: f64,
	#[serde(rename = "cursrvrconnections", deserialize_with = "numeric_string")]
	pub current_server_connections: f64,
	#[serde(rename = "svrestablishedconn", deserialize_with = "numeric_string")]
	pub server_established_connections: f64,
	#[serde(rename = "curreusepool", deserialize_with = "numeric_string")]
	pub current_reuse_pool: f64,
	#[serde(rename = "maxclients", deserialize_with = "numeric_string")]
	pub max_clients: f64,
	#[serde(rename = "curload", deserialize_with = "numeric_string")]
	pub current_load: f64,
	#[serde(rename = "vsvrservicehits", deserialize_with = "numeric_string")]
	pub vserver_service_hits: f64,
	#[serde(rename = "activetransactions", deserialize_with = "numeric_string")]
	pub active_transactions: f64,
}
impl ServiceStats {
	/// The name used to look up this service's vserver bindings in the mapping cache.
	pub fn lookup_name(&self) -> &str {
		self.servicename.as_deref().unwrap_or(&self.name)
	}
}

/// `/stat/lbvserver` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct LbVServerStats {
	pub name: String,
	#[serde(rename = "avgcltttlb", deserialize_with = "numeric_string")]
	pub avg_client_ttlb_ms: f64,
	pub state: CurState,
	#[serde(rename = "totalrequests", deserialize_with = "numeric_string")]
	pub total_requests: f64,
	#[serde(rename = "totalresponses", deserialize_with = "numeric_string")]
	pub total_responses: f64,
	#[serde(rename = "totalrequestbytes", deserialize_with = "numeric_string")]
	pub request_bytes: f64,
	#[serde(rename = "totalresponsebytes", deserialize_with = "numeric_string")]
	pub response_bytes: f64,
	#[serde(rename = "totalpktsrecvd", deserialize_with = "numeric_string")]
	pub total_packets_received: f64,
	#[serde(rename = "totalpktssent", deserialize_with = "numeric_string")]
	pub total_packets_sent: f64,
	#[serde(rename = "actsvcs", deserialize_with = "numeric_string")]
	pub active_services: f64,
	#[serde(rename = "tothits", deserialize_with = "numeric_string")]
	pub total_hits: f64,
	#[serde(rename = "surgecount", deserialize_with = "numeric_string")]
	pub surge_count: f64,
	#[serde(rename = "svcsurgecount", deserialize_with = "numeric_string")]
	pub svc_surge_count: f64,
	#[serde(rename = "vsvrsurgecount", deserialize_with = "numeric_string")]
	pub vsvr_surge_count: f64,
	/// Services embedded in the batch response, when the appliance includes them.
	#[serde(default, rename = "service")]
	pub service: Vec<ServiceStats>,
}

/// `/config/lbvserver` payload, used for the `lbvserver_cfg` subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct LbVServerConfig {
	pub name: String,
	#[serde(rename = "statechangetimeseconds", deserialize_with = "numeric_string")]
	pub state_change_time_seconds: f64,
}

/// `/stat/gslbvserver` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GslbVServerStats {
	pub name: String,
	pub state: CurState,
	#[serde(rename = "establishedconn", deserialize_with = "numeric_string")]
	pub established_connections: f64,
	#[serde(rename = "vslbhealth", deserialize_with = "numeric_string")]
	pub health: f64,
	#[serde(rename = "actsvcs", deserialize_with = "numeric_string")]
	pub active_services: f64,
	#[serde(rename = "tothits", deserialize_with = "numeric_string")]
	pub total_hits: f64,
	#[serde(rename = "totalrequestbytes", deserialize_with = "numeric_string")]
	pub total_request_bytes: f64,
	#[serde(rename = "totalresponsebytes", deserialize_with = "numeric_string")]
	pub total_response_bytes: f64,
	/// Populated only by the targeted `?statbindings=yes` fetch.
	#[serde(default, rename = "gslbservice")]
	pub gslb_service: Vec<GslbServiceStats>,
}

/// Nested service entry within a targeted GSLB vserver fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct GslbServiceStats {
	pub servicename: String,
	pub state: CurState,
	#[serde(rename = "establishedconn", deserialize_with = "numeric_string")]
	pub established_connections: f64,
	#[serde(rename = "totalrequestbytes", deserialize_with = "numeric_string")]
	pub total_request_bytes: f64,
	#[serde(rename = "totalresponsebytes", deserialize_with = "numeric_string")]
	pub total_response_bytes: f64,
	#[serde(rename = "vsvrservicehits", deserialize_with = "numeric_string")]
	pub service_hits: f64,
}

/// One row of `/config/lbvserver_service_binding`, the source of truth for `VipMap`.
#[derive(Debug, Clone, Deserialize)]
pub struct SvcBind {
	pub name: String,
	pub servicename: String,
}

/// `/config/nsversion` payload, used by the appliance-info refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct NsVersionInfo {
	pub version: String,
}

/// `/config/nshardware` payload, used by the appliance-info refresh.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NsHardwareInfo {
	#[serde(default)]
	pub hwdescription: String,
	#[serde(default)]
	pub manufactureyear: String,
}

/// Extract the value nested under `key` in a Nitro API envelope, e.g. `{"ns": {...}}` or
/// `{"service": [...]}`. Missing keys deserialize as if the field were entirely absent.
pub(crate) fn extract_field<T>(bytes: &[u8], key: &str) -> serde_json::Result<T>
where
	T: serde::de::DeserializeOwned,
{
	let root: serde_json::Value = serde_json::from_slice(bytes)?;
	let value = root.get(key).cloned().unwrap_or(serde_json::Value::Null);

	serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn curstate_values_match_the_documented_mapping() {
		assert_eq!(CurState::from("DOWN".to_owned()).value(), 0.0);
		assert_eq!(CurState::from("UP".to_owned()).value(), 1.0);
		assert_eq!(CurState::from("OUT OF SERVICE".to_owned()).value(), 2.0);
		assert_eq!(CurState::from("SOMETHING ELSE".to_owned()).value(), 3.0);
	}

	#[test]
	fn service_stats_parses_numeric_strings() {
		let raw = r#"{
			"name": "svcA",
			"throughput": "1",
			"avgsvrttfb": "500",
			"state": "UP",
			"totalrequests": "10",
			"totalresponses": "10",
			"totalrequestbytes": "100",
			"totalresponsebytes": "200",
			"curclntconnections": "1",
			"surgecount": "0",
			"cursrvrconnections": "1",
			"svrestablishedconn": "1",
			"curreusepool": "0",
			"maxclients": "0",
			"curload": "0",
			"vsvrservicehits": "10",
			"activetransactions": "0"
		}"#;
		let parsed: ServiceStats = serde_json::from_str(raw).expect("valid payload");

		assert_eq!(parsed.lookup_name(), "svcA");
		assert_eq!(parsed.throughput_mb, 1.0);
		assert_eq!(parsed.state.value(), 1.0);
	}
}
