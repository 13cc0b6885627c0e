//! Top-level process state (§9, "process-wide state"): owns every appliance's [`Pool`], the
//! shared metrics registry/timekeeper, and the schedulers and manual-refresh rate limiters the
//! HTTP ops surface drives.

// std
use std::{
	collections::HashMap,
	sync::{Mutex, Weak},
};
// crates.io
use prometheus::Registry;
use tokio::task::JoinSet;
// self
use crate::{
	_prelude::*,
	config::Config,
	metrics::{ApplianceInfo, ApplianceInfoSource, ExporterCollector, Metrics},
	nitro::{NitroClient, client::DEFAULT_TIMEOUT},
	pool::{Pool, backoff::BackoffSet},
	subsystem::SubsystemKind,
	timekeeper::Timekeeper,
};

/// How many HTTP clients each pool rotates across, widening TLS session reuse (§9).
const CLIENT_POOL_SIZE: usize = 3;
/// Label-TTL multiple of the collection interval (§4.4 recommends at least 4x).
const LABEL_TTL_INTERVAL_MULTIPLE: u32 = 4;
/// How often the forced mapping-refresh ticker fires.
const MAPPING_REFRESH_INTERVAL: Duration = Duration::from_secs(3_600);
/// How long a manual `/update/info` or `/update/mappings` request blocks a repeat (§4.6).
const MANUAL_REFRESH_COOLDOWN: Duration = Duration::from_secs(3_600);
/// UTC hour/minute the daily info+mappings refresh fires.
const DAILY_REFRESH_HOUR: u32 = 3;
const DAILY_REFRESH_MINUTE: u32 = 30;
const DAILY_REFRESH_PERIOD: Duration = Duration::from_secs(86_400);

const MANUAL_INFO_KEY: &str = "info";
const MANUAL_MAPPINGS_KEY: &str = "mappings";

/// The exporter process: every configured appliance's [`Pool`], the shared Prometheus registry,
/// and the schedulers that drive collection and mapping/info refresh.
pub struct Exporter {
	config: Config,
	registry: Registry,
	metrics: Arc<Metrics>,
	timekeeper: Arc<Timekeeper>,
	pools: HashMap<String, Arc<Pool>>,
	manual_refresh: Arc<BackoffSet>,
	manual_history: Mutex<HashMap<&'static str, DateTime<Utc>>>,
}
impl Exporter {
	/// Handshake every configured appliance, build its [`Pool`], and load mappings/info for the
	/// ones that succeed. An appliance that fails its handshake is logged and skipped (§7,
	/// "non-fatal startup per-appliance"); if none succeed, startup fails (§7, "fatal startup").
	pub async fn bootstrap(config: Config) -> Result<Arc<Self>> {
		let registry = Registry::new();
		let metrics = Metrics::new(&registry)?;
		let timekeeper = Arc::new(Timekeeper::new());
		let mut pools = HashMap::new();

		for appliance in &config.lbservers {
			let instance = appliance.instance_id();

			let clients = match build_clients(appliance) {
				Ok(clients) => clients,
				Err(error) => {
					tracing::warn!(appliance = %instance, %error, "failed to build http client, skipping appliance");

					continue;
				},
			};

			if let Err(error) = clients[0].handshake(DEFAULT_TIMEOUT).await {
				tracing::warn!(appliance = %instance, %error, "appliance unreachable at startup, skipping");

				continue;
			}

			let label_ttl = config.interval * LABEL_TTL_INTERVAL_MULTIPLE;
			let pool = Pool::spawn(
				instance.clone(),
				appliance.clone(),
				clients,
				config.mappings_dir.clone(),
				label_ttl,
				Arc::clone(&metrics),
				Arc::clone(&timekeeper),
			);

			pool.refresh_info().await;

			if appliance.collect_mappings
				&& let Err(error) = pool.collect_mappings(false).await
			{
				tracing::warn!(appliance = %instance, %error, "initial mapping load failed, will retry on schedule");
			}

			tracing::info!(appliance = %instance, "appliance registered");
			pools.insert(instance, pool);
		}

		if pools.is_empty() {
			return Err(Error::ApplianceUnreachable {
				appliance: "*".into(),
				reason: "no configured appliance was reachable at startup".into(),
			});
		}

		let exporter = Arc::new_cyclic(|weak: &Weak<Exporter>| {
			let info_source: Arc<dyn ApplianceInfoSource> = Arc::new(WeakInfoSource(weak.clone()));
			let collector = ExporterCollector::new(Arc::clone(&metrics), Arc::clone(&timekeeper), info_source);

			registry.register(Box::new(collector)).expect("exporter collector registers exactly once");

			Self {
				config,
				registry,
				metrics,
				timekeeper,
				pools,
				manual_refresh: Arc::new(BackoffSet::new()),
				manual_history: Mutex::new(HashMap::new()),
			}
		});

		Ok(exporter)
	}

	/// The validated configuration this exporter was built from.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// The main Prometheus registry, scraped directly by the `/metrics` handler.
	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// The process-wide last-success table, read by the `/ops` page.
	pub fn timekeeper(&self) -> &Arc<Timekeeper> {
		&self.timekeeper
	}

	/// The appliance ids this exporter registered a pool for at startup.
	pub fn appliance_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.pools.keys().cloned().collect();

		ids.sort();

		ids
	}

	/// When each manual refresh kind (`"info"`, `"mappings"`) last actually ran, for the `/ops`
	/// page. Requests rejected by the one-hour rate limit do not update this.
	pub fn manual_history(&self) -> Vec<(&'static str, DateTime<Utc>)> {
		self.manual_history.lock().expect("manual history mutex poisoned").iter().map(|(k, v)| (*k, *v)).collect()
	}

	/// Trigger an appliance-info refresh across every pool, rate-limited to once per hour.
	/// Returns `false` without doing anything if a request ran within the last hour.
	pub async fn request_info_refresh(self: &Arc<Self>) -> bool {
		if self.manual_refresh.is_active(MANUAL_INFO_KEY) {
			return false;
		}

		self.manual_refresh.insert(MANUAL_INFO_KEY, MANUAL_REFRESH_COOLDOWN);
		self.record_manual(MANUAL_INFO_KEY);
		self.refresh_all_info().await;

		true
	}

	/// Trigger a forced mapping refresh across every pool with mapping collection enabled,
	/// rate-limited to once per hour. Returns `false` without doing anything if a request ran
	/// within the last hour.
	pub async fn request_mappings_refresh(self: &Arc<Self>) -> bool {
		if self.manual_refresh.is_active(MANUAL_MAPPINGS_KEY) {
			return false;
		}

		self.manual_refresh.insert(MANUAL_MAPPINGS_KEY, MANUAL_REFRESH_COOLDOWN);
		self.record_manual(MANUAL_MAPPINGS_KEY);
		self.refresh_all_mappings(true).await;

		true
	}

	fn record_manual(&self, key: &'static str) {
		self.manual_history.lock().expect("manual history mutex poisoned").insert(key, Utc::now());
	}

	async fn refresh_all_info(&self) {
		let mut set = JoinSet::new();

		for pool in self.pools.values().cloned() {
			set.spawn(async move { pool.refresh_info().await });
		}

		while set.join_next().await.is_some() {}
	}

	async fn refresh_all_mappings(&self, force: bool) {
		let mut set = JoinSet::new();

		for pool in self.pools.values().filter(|pool| pool.config().collect_mappings).cloned() {
			set.spawn(async move {
				if let Err(error) = pool.collect_mappings(force).await {
					tracing::warn!(appliance = %pool.appliance(), %error, "mapping refresh failed");
				}
			});
		}

		while set.join_next().await.is_some() {}
	}

	/// Run the collection ticker, the hourly mapping-refresh ticker, and the daily 03:30 UTC
	/// info+mappings refresh until `shutdown` resolves, then stop every pool (§4.6, §5).
	pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
		let mut collect_tick = tokio::time::interval(self.config.interval);
		let mut mapping_tick = tokio::time::interval(MAPPING_REFRESH_INTERVAL);
		let mut daily_tick = tokio::time::interval_at(
			tokio::time::Instant::now() + duration_until_next_daily_refresh(),
			DAILY_REFRESH_PERIOD,
		);

		collect_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		mapping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		daily_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = collect_tick.tick() => self.spawn_collection_round(),
				_ = mapping_tick.tick() => {
					let exporter = Arc::clone(&self);

					tokio::spawn(async move { exporter.refresh_all_mappings(true).await });
				},
				_ = daily_tick.tick() => {
					let exporter = Arc::clone(&self);

					tokio::spawn(async move {
						exporter.refresh_all_info().await;
						exporter.refresh_all_mappings(true).await;
					});
				},
				_ = &mut shutdown => {
					tracing::info!("shutdown signal received, stopping collection");

					break;
				},
			}
		}

		self.stop().await;
	}

	fn spawn_collection_round(self: &Arc<Self>) {
		for (instance, pool) in &self.pools {
			let Some(appliance) = self.config.lbservers.iter().find(|a| &a.instance_id() == instance) else {
				continue;
			};

			for subsystem in enabled_subsystems(appliance) {
				let pool = Arc::clone(pool);

				tokio::spawn(async move { pool.collect(subsystem).await });
			}
		}
	}

	/// Stop accepting new work and drain every pool's in-flight pipeline.
	pub async fn stop(&self) {
		let mut set = JoinSet::new();

		for pool in self.pools.values().cloned() {
			set.spawn(async move { pool.stop().await });
		}

		while set.join_next().await.is_some() {}
	}
}

struct WeakInfoSource(Weak<Exporter>);
impl ApplianceInfoSource for WeakInfoSource {
	fn snapshot(&self) -> Vec<ApplianceInfo> {
		let Some(exporter) = self.0.upgrade() else {
			return Vec::new();
		};

		exporter
			.pools
			.values()
			.filter_map(|pool| {
				pool.cached_model().map(|model| ApplianceInfo {
					instance: pool.appliance().to_owned(),
					model: model.model,
					version: model.version,
					year: model.year,
				})
			})
			.collect()
	}
}

fn build_clients(appliance: &crate::config::ApplianceConfig) -> Result<Vec<NitroClient>> {
	(0..CLIENT_POOL_SIZE)
		.map(|_| {
			NitroClient::new(appliance.url.clone(), appliance.user.clone(), appliance.pass.clone(), appliance.ignore_cert)
		})
		.collect()
}

fn enabled_subsystems(appliance: &crate::config::ApplianceConfig) -> Vec<SubsystemKind> {
	appliance
		.metrics
		.iter()
		.filter_map(|id| SubsystemKind::parse(id))
		.filter(|kind| kind.is_schedulable())
		.collect()
}

fn duration_until_next_daily_refresh() -> Duration {
	let now = Utc::now();
	let today = now
		.date_naive()
		.and_hms_opt(DAILY_REFRESH_HOUR, DAILY_REFRESH_MINUTE, 0)
		.expect("static hour/minute are always valid");
	let today = DateTime::<Utc>::from_naive_utc_and_offset(today, Utc);
	let target = if today > now { today } else { today + chrono::Duration::days(1) };

	(target - now).to_std().unwrap_or(Duration::from_secs(0))
}

#[cfg(test)]
mod tests {
	// crates.io
	use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};
	// self
	use super::*;

	fn sample_config(url: &str) -> Config {
		Config::parse(&format!(
			"lbservers:\n  - url: {url}\n    user: admin\n    pass: secret\n    metrics: [ns]\n"
		))
		.unwrap()
	}

	#[tokio::test]
	async fn bootstrap_fails_fast_when_no_appliance_is_reachable() {
		let config = sample_config("http://127.0.0.1:1");

		let err = Exporter::bootstrap(config).await.unwrap_err();

		assert!(matches!(err, Error::ApplianceUnreachable { .. }));
	}

	#[tokio::test]
	async fn bootstrap_registers_reachable_appliances_and_exposes_the_self_collector() {
		let server = MockServer::start().await;

		Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("{}")).mount(&server).await;

		let config = sample_config(&server.uri());
		let exporter = Exporter::bootstrap(config).await.expect("one reachable appliance");

		assert_eq!(exporter.appliance_ids().len(), 1);

		let families = exporter.registry().gather();

		assert!(families.iter().any(|f| f.get_name() == "citrixadc_ns_info" || f.get_name() == "citrixadc_ns_cpu_usage_percent"));

		exporter.stop().await;
	}

	#[tokio::test]
	async fn manual_refresh_is_rate_limited_to_once_per_hour() {
		let server = MockServer::start().await;

		Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("{}")).mount(&server).await;

		let config = sample_config(&server.uri());
		let exporter = Exporter::bootstrap(config).await.expect("one reachable appliance");

		assert!(exporter.request_info_refresh().await);
		assert!(!exporter.request_info_refresh().await);
		assert_eq!(exporter.manual_history().len(), 1);

		exporter.stop().await;
	}
}
