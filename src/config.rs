//! YAML configuration loading and validation.
//!
//! The exporter is configured entirely from a single YAML file read once at startup; there is no
//! hot-reload path. Defaults are applied where the document omits a field, matching the posture
//! the appliance operators expect from the original tool this exporter replaces.

// std
use std::{path::Path, time::Duration};
// crates.io
use serde::Deserialize;
use url::Url;
// self
use crate::_prelude::*;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAPPINGS_DIR: &str = "/tmp/mappings";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9280";
const DEFAULT_MIN_POOL_WORKERS: usize = 10;
const DEFAULT_MIN_POOL_WORKER_QUEUE: usize = 1_000;

/// Top-level exporter configuration as loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	/// Log verbosity, forwarded to the `tracing` subscriber filter.
	#[serde(default = "default_log_level")]
	pub loglevel: String,
	/// Interval between collection ticks, applied to every configured appliance.
	#[serde(default = "default_interval", with = "humantime_duration")]
	pub interval: Duration,
	/// Directory mapping YAML snapshots are written to and served from.
	#[serde(default = "default_mappings_dir")]
	pub mappings_dir: String,
	/// HTTP listen address for the `/metrics` and ops surface.
	#[serde(default = "default_listen_addr")]
	pub listen_addr: String,
	/// One entry per appliance to scrape.
	pub lbservers: Vec<ApplianceConfig>,
}
impl Config {
	/// Load and validate a configuration document from a YAML file on disk.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let raw = std::fs::read_to_string(path)?;

		Self::parse(&raw)
	}

	/// Parse and validate a configuration document from an in-memory YAML string.
	pub fn parse(raw: &str) -> Result<Self> {
		let mut config: Self = serde_yaml::from_str(raw)?;

		if config.lbservers.is_empty() {
			return Err(Error::Validation {
				field: "lbservers",
				reason: "at least one appliance must be configured".into(),
			});
		}

		for appliance in &mut config.lbservers {
			appliance.apply_defaults_and_validate()?;
		}

		Ok(config)
	}
}

/// Per-appliance section of the configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplianceConfig {
	/// Base URL of the appliance's Nitro API, e.g. `https://lb01.example.com`.
	pub url: Url,
	/// Basic-auth username.
	pub user: String,
	/// Basic-auth password.
	pub pass: String,
	/// Accept invalid/self-signed TLS certificates when connecting to this appliance.
	#[serde(default)]
	pub ignore_cert: bool,
	/// Worker count for this appliance's task team. Defaults to `max(10, metrics.len() * 10)`.
	#[serde(default)]
	pub pool_workers: Option<usize>,
	/// Bounded queue depth for this appliance's task team. Defaults to `max(1000, pool_workers)`.
	#[serde(default)]
	pub pool_worker_queue: Option<usize>,
	/// Whether the service→vserver mapping cache should be maintained for this appliance.
	#[serde(default)]
	pub collect_mappings: bool,
	/// Optional URL to fetch a mapping snapshot from instead of the appliance's own binding API.
	#[serde(default)]
	pub mappings_url: Option<Url>,
	/// Optional sink to mirror mapping snapshots to after a change.
	#[serde(default)]
	pub upload_config: Option<UploadConfig>,
	/// Subsystem ids to collect for this appliance (see the subsystem table in the design docs).
	pub metrics: Vec<String>,
}
impl ApplianceConfig {
	fn apply_defaults_and_validate(&mut self) -> Result<()> {
		if self.metrics.is_empty() {
			return Err(Error::Validation {
				field: "metrics",
				reason: format!("appliance '{}' must enable at least one subsystem", self.url),
			});
		}

		let min_workers = (self.metrics.len() * 10).max(DEFAULT_MIN_POOL_WORKERS);
		let workers = self.pool_workers.unwrap_or(min_workers).max(1);

		self.pool_workers = Some(workers);
		self.pool_worker_queue =
			Some(self.pool_worker_queue.unwrap_or(DEFAULT_MIN_POOL_WORKER_QUEUE).max(DEFAULT_MIN_POOL_WORKER_QUEUE));

		Ok(())
	}

	/// Derive the short appliance id used as the `citrixadc_instance` label, from the host name.
	pub fn instance_id(&self) -> String {
		self.url.host_str().unwrap_or("unknown").split('.').next().unwrap_or("unknown").to_owned()
	}
}

/// Destination an updated mapping snapshot is mirrored to after a change.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
	/// Upload endpoint URL.
	pub upload_url: Url,
	/// HTTP method used for the upload, e.g. `POST`.
	#[serde(default = "default_upload_method")]
	pub method: String,
	/// Additional headers sent with the upload request.
	#[serde(default)]
	pub headers: std::collections::HashMap<String, String>,
	/// Accept invalid/self-signed TLS certificates for the upload endpoint.
	#[serde(default)]
	pub insecure: bool,
}

fn default_log_level() -> String {
	DEFAULT_LOG_LEVEL.into()
}

fn default_interval() -> Duration {
	Duration::from_secs(DEFAULT_INTERVAL_SECS)
}

fn default_mappings_dir() -> String {
	DEFAULT_MAPPINGS_DIR.into()
}

fn default_listen_addr() -> String {
	DEFAULT_LISTEN_ADDR.into()
}

fn default_upload_method() -> String {
	"POST".into()
}

mod humantime_duration {
	// std
	use std::time::Duration;
	// crates.io
	use serde::{Deserialize, Deserializer};

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;
		let trimmed = raw.trim();
		let (digits, unit) = trimmed.split_at(
			trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len()),
		);
		let value: u64 = digits.parse().map_err(serde::de::Error::custom)?;

		let seconds = match unit {
			"" | "s" => value,
			"m" => value * 60,
			"h" => value * 3_600,
			other => return Err(serde::de::Error::custom(format!("unsupported duration unit '{other}'"))),
		};

		Ok(Duration::from_secs(seconds))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"
loglevel: debug
interval: 10s
lbservers:
  - url: https://lb01.example.com
    user: admin
    pass: secret
    metrics: [ns, ssl]
"#;

	#[test]
	fn applies_documented_defaults() {
		let config = Config::parse(SAMPLE).expect("valid config");
		let appliance = &config.lbservers[0];

		assert_eq!(config.interval, Duration::from_secs(10));
		assert_eq!(config.mappings_dir, DEFAULT_MAPPINGS_DIR);
		assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
		assert_eq!(appliance.pool_workers, Some(20));
		assert_eq!(appliance.pool_worker_queue, Some(DEFAULT_MIN_POOL_WORKER_QUEUE));
		assert_eq!(appliance.instance_id(), "lb01");
	}

	#[test]
	fn rejects_empty_appliance_list() {
		let err = Config::parse("loglevel: info\nlbservers: []\n").unwrap_err();

		assert!(matches!(err, Error::Validation { field: "lbservers", .. }));
	}

	#[test]
	fn honors_explicit_worker_override() {
		let raw = r#"
lbservers:
  - url: https://lb02.example.com
    user: admin
    pass: secret
    pool_workers: 4
    metrics: [ns]
"#;
		let config = Config::parse(raw).expect("valid config");

		assert_eq!(config.lbservers[0].pool_workers, Some(4));
	}
}
