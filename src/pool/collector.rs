//! Task dispatch (§4.1) and the per-subsystem collection procedure (§4.2).

// std
use std::collections::HashMap;
// crates.io
use rand::Rng;
use tokio::{
	sync::{mpsc, oneshot},
	task::JoinSet,
};
// self
use crate::{
	_prelude::*,
	nitro::{
		client::DEFAULT_TIMEOUT,
		types::{
			GslbServiceStats, GslbVServerStats, LbVServerConfig, LbVServerStats, NsStats,
			ServiceStats, SslStats, extract_field,
		},
	},
	pool::{
		Pool, prom,
		team::{DataRecord, TaskPayload, TaskReply},
	},
	subsystem::SubsystemKind,
};

/// Hard timeout on the reply channel of an `Api` task, per §5.
const API_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed backoff cooldown a subsystem sits out after an API failure.
const BACKOFF_COOLDOWN: Duration = Duration::from_secs(30);
/// Upper bound on the random jitter added on top of a backoff/retry delay, so that many
/// subsystems failing at once don't all retry in lockstep.
const MAX_JITTER: Duration = Duration::from_millis(750);
/// Retries attempted per GSLB vserver's targeted fetch before the record is counted missed.
const GSLB_TARGETED_ATTEMPTS: u32 = 3;
/// Vservers grouped per fan-out task when backfilling missing embedded `lbvserver` services.
const FAN_OUT_GROUP_SIZE: usize = 10;

/// Add a random duration in `[0, MAX_JITTER]` on top of `base`, full-jitter style.
fn jittered(base: Duration) -> Duration {
	let extra = rand::rng().random_range(0.0..=MAX_JITTER.as_secs_f64());

	base + Duration::from_secs_f64(extra)
}

/// Route one task pulled off a [`crate::pool::team::Team`] queue to its handler (§4.1).
pub async fn dispatch(pool: &Arc<Pool>, payload: TaskPayload, reply: oneshot::Sender<TaskReply>) {
	match payload {
		TaskPayload::Api { subsystem, target } => {
			let bytes = handle_api(pool, subsystem, target).await;

			let _ = reply.send(TaskReply::Bytes(bytes));
		},
		TaskPayload::Raw { subsystem, bytes } => {
			let ok = handle_raw(pool, subsystem, bytes).await;

			let _ = reply.send(TaskReply::Bool(ok));
		},
		TaskPayload::Data(record) => {
			let ok = handle_data(pool, record).await;

			let _ = reply.send(TaskReply::Bool(ok));
		},
		TaskPayload::Prom(record) => {
			prom::write(&pool.metrics, &pool.label_ttl, &pool.appliance, &pool.vip_map, &record);

			let _ = reply.send(TaskReply::Bool(true));
		},
	}
}

async fn handle_api(pool: &Arc<Pool>, subsystem: SubsystemKind, target: Option<String>) -> Vec<u8> {
	let client = pool.next_client();
	let result = if subsystem.is_config() {
		client.config_all(subsystem.endpoint(), DEFAULT_TIMEOUT).await
	} else if let Some(target) = target {
		client.stat_targeted(subsystem.endpoint(), &target, DEFAULT_TIMEOUT).await
	} else {
		client.stat_all(subsystem.endpoint(), DEFAULT_TIMEOUT).await
	};

	match result {
		Ok(bytes) => bytes,
		Err(error) => {
			tracing::debug!(
				appliance = %pool.appliance,
				subsystem = subsystem.as_str(),
				%error,
				"api fetch failed"
			);

			Vec::new()
		},
	}
}

async fn handle_raw(pool: &Arc<Pool>, subsystem: SubsystemKind, bytes: Vec<u8>) -> bool {
	if bytes.is_empty() {
		return false;
	}

	match subsystem {
		SubsystemKind::Ns =>
			submit_one::<NsStats>(pool, &bytes, subsystem, "ns", DataRecord::Ns).await,
		SubsystemKind::Ssl =>
			submit_one::<SslStats>(pool, &bytes, subsystem, "ssl", DataRecord::Ssl).await,
		SubsystemKind::LbVServer => handle_lbvserver_raw(pool, &bytes).await,
		SubsystemKind::LbVServerCfg => submit_many::<LbVServerConfig>(
			pool,
			&bytes,
			subsystem,
			"lbvserver",
			DataRecord::LbVServerCfg,
		)
		.await,
		SubsystemKind::GslbVServer => handle_gslb_raw(pool, &bytes).await,
		SubsystemKind::GslbService => true,
		SubsystemKind::Service =>
			submit_many::<ServiceStats>(pool, &bytes, subsystem, "service", DataRecord::Service).await,
	}
}

async fn handle_data(pool: &Arc<Pool>, record: DataRecord) -> bool {
	let subsystem = record.subsystem();
	let (tx, rx) = oneshot::channel();

	if !pool.team.submit(TaskPayload::Prom(record), tx) {
		pool.metrics
			.counters
			.prometheus_collect_failures_total
			.with_label_values(&[&pool.appliance, subsystem.as_str()])
			.inc();

		return false;
	}

	rx.await.map(TaskReply::into_bool).unwrap_or(false)
}

async fn submit_data(pool: &Arc<Pool>, record: DataRecord) -> bool {
	let subsystem = record.subsystem();
	let (tx, rx) = oneshot::channel();

	if !pool.team.submit(TaskPayload::Data(record), tx) {
		pool.metrics
			.counters
			.prometheus_collect_failures_total
			.with_label_values(&[&pool.appliance, subsystem.as_str()])
			.inc();

		return false;
	}

	rx.await.map(TaskReply::into_bool).unwrap_or(false)
}

async fn submit_one<T>(
	pool: &Arc<Pool>,
	bytes: &[u8],
	subsystem: SubsystemKind,
	key: &str,
	wrap: fn(T) -> DataRecord,
) -> bool
where
	T: serde::de::DeserializeOwned,
{
	match extract_field::<T>(bytes, key) {
		Ok(value) => submit_data(pool, wrap(value)).await,
		Err(error) => {
			pool.metrics
				.counters
				.processing_failures_total
				.with_label_values(&[&pool.appliance, subsystem.as_str()])
				.inc();

			tracing::warn!(
				appliance = %pool.appliance,
				subsystem = subsystem.as_str(),
				%error,
				"failed to parse raw payload"
			);

			false
		},
	}
}

async fn submit_many<T>(
	pool: &Arc<Pool>,
	bytes: &[u8],
	subsystem: SubsystemKind,
	key: &str,
	wrap: fn(T) -> DataRecord,
) -> bool
where
	T: serde::de::DeserializeOwned,
{
	let records: Vec<T> = match extract_field(bytes, key) {
		Ok(records) => records,
		Err(error) => {
			pool.metrics
				.counters
				.processing_failures_total
				.with_label_values(&[&pool.appliance, subsystem.as_str()])
				.inc();

			tracing::warn!(
				appliance = %pool.appliance,
				subsystem = subsystem.as_str(),
				%error,
				"failed to parse raw payload"
			);

			return false;
		},
	};
	let mut all_ok = true;

	for record in records {
		if !submit_data(pool, wrap(record)).await {
			all_ok = false;
		}
	}

	all_ok
}

/// `lbvserver` decodes the batch response, then backfills any vserver whose embedded `service[]`
/// is empty via a bounded, grouped targeted fan-out (§4.2, the canonical single-batch design with
/// the per-vserver refetch as fallback - see §9's Open Question resolution).
async fn handle_lbvserver_raw(pool: &Arc<Pool>, bytes: &[u8]) -> bool {
	let mut records: Vec<LbVServerStats> = match extract_field(bytes, "lbvserver") {
		Ok(records) => records,
		Err(error) => {
			pool.metrics
				.counters
				.processing_failures_total
				.with_label_values(&[&pool.appliance, SubsystemKind::LbVServer.as_str()])
				.inc();

			tracing::warn!(appliance = %pool.appliance, %error, "failed to parse lbvserver payload");

			return false;
		},
	};
	let missing: Vec<String> = records
		.iter()
		.filter(|entry| entry.service.is_empty())
		.map(|entry| entry.name.clone())
		.collect();

	if !missing.is_empty() {
		let fetched = fan_out_missing_services(pool, missing).await;

		for entry in &mut records {
			if entry.service.is_empty() && let Some(services) = fetched.get(&entry.name) {
				entry.service = services.clone();
			}
		}
	}

	let mut all_ok = true;

	for record in records {
		if !submit_data(pool, DataRecord::LbVServer(record)).await {
			all_ok = false;
		}
	}

	all_ok
}

/// Divide `names` into `⌈N/10⌉` groups, each refetched serially inside its own task (§4.2); a
/// vserver whose targeted refetch fails in every group is counted as a missed metric rather than
/// retried further.
async fn fan_out_missing_services(
	pool: &Arc<Pool>,
	names: Vec<String>,
) -> HashMap<String, Vec<ServiceStats>> {
	if names.is_empty() {
		return HashMap::new();
	}

	let group_count = names.len().div_ceil(FAN_OUT_GROUP_SIZE).max(1);
	let mut groups: Vec<Vec<String>> = vec![Vec::new(); group_count];

	for (index, name) in names.into_iter().enumerate() {
		groups[index % group_count].push(name);
	}

	let (tx, mut rx) = mpsc::unbounded_channel();
	let mut set = JoinSet::new();

	for group in groups {
		let pool = Arc::clone(pool);
		let tx = tx.clone();

		set.spawn(async move {
			for name in group {
				match fetch_targeted_lbvserver(&pool, &name).await {
					Some(services) => {
						let _ = tx.send((name, services));
					},
					None => {
						pool.metrics
							.counters
							.missed_metrics_total
							.with_label_values(&[&pool.appliance, SubsystemKind::LbVServer.as_str()])
							.inc();
					},
				}
			}
		});
	}

	drop(tx);

	while set.join_next().await.is_some() {}

	let mut merged = HashMap::new();

	while let Ok((name, services)) = rx.try_recv() {
		merged.insert(name, services);
	}

	merged
}

async fn fetch_targeted_lbvserver(pool: &Arc<Pool>, name: &str) -> Option<Vec<ServiceStats>> {
	let bytes = pool.next_client().stat_targeted("lbvserver", name, DEFAULT_TIMEOUT).await.ok()?;
	let parsed: Vec<LbVServerStats> = extract_field(&bytes, "lbvserver").ok()?;

	parsed.into_iter().next().map(|entry| entry.service)
}

/// `gslb_vserver` / `gslb_service` two-stage fetch: list all GSLB vservers, then fan out a
/// targeted `?statbindings=yes` fetch per vserver with bounded exponential-backoff retries
/// (§4.2).
async fn handle_gslb_raw(pool: &Arc<Pool>, bytes: &[u8]) -> bool {
	let listed: Vec<GslbVServerStats> = match extract_field(bytes, "gslbvserver") {
		Ok(listed) => listed,
		Err(error) => {
			pool.metrics
				.counters
				.processing_failures_total
				.with_label_values(&[&pool.appliance, SubsystemKind::GslbVServer.as_str()])
				.inc();

			tracing::warn!(appliance = %pool.appliance, %error, "failed to parse gslbvserver payload");

			return false;
		},
	};
	let mut all_ok = true;

	for mut entry in listed {
		match fetch_gslb_targeted_with_retry(pool, &entry.name).await {
			Some(services) => entry.gslb_service = services,
			None => {
				pool.metrics
					.counters
					.missed_metrics_total
					.with_label_values(&[&pool.appliance, SubsystemKind::GslbVServer.as_str()])
					.inc();
			},
		}

		if !submit_data(pool, DataRecord::GslbVServer(entry)).await {
			all_ok = false;
		}
	}

	all_ok
}

async fn fetch_gslb_targeted_with_retry(pool: &Arc<Pool>, name: &str) -> Option<Vec<GslbServiceStats>> {
	for attempt in 0..GSLB_TARGETED_ATTEMPTS {
		if let Some(services) = fetch_gslb_targeted(pool, name).await {
			return Some(services);
		}

		pool.metrics
			.counters
			.api_collect_failures_total
			.with_label_values(&[&pool.appliance, SubsystemKind::GslbVServer.as_str()])
			.inc();

		if attempt + 1 < GSLB_TARGETED_ATTEMPTS {
			tokio::time::sleep(jittered(Duration::from_secs(u64::from(attempt + 1)))).await;
		}
	}

	None
}

async fn fetch_gslb_targeted(pool: &Arc<Pool>, name: &str) -> Option<Vec<GslbServiceStats>> {
	let bytes = pool.next_client().stat_targeted("gslbvserver", name, DEFAULT_TIMEOUT).await.ok()?;
	let parsed: Vec<GslbVServerStats> = extract_field(&bytes, "gslbvserver").ok()?;

	parsed.into_iter().next().map(|entry| entry.gslb_service)
}

/// The per-subsystem collection procedure (§4.2): guard, backoff, mapping-dependency, timed
/// `Api`/`Raw` round-trip, and (on success) a timekeeper stamp and processing-time gauge.
pub async fn collect(pool: &Arc<Pool>, subsystem: SubsystemKind) {
	let Some(_guard) = pool.guards.acquire(subsystem.as_str()) else {
		tracing::debug!(
			appliance = %pool.appliance,
			subsystem = subsystem.as_str(),
			"collection already in flight, skipping tick"
		);

		return;
	};

	if pool.is_stopped() {
		return;
	}

	if pool.backoff.is_active(subsystem.as_str()) {
		tracing::debug!(
			appliance = %pool.appliance,
			subsystem = subsystem.as_str(),
			"subsystem in backoff, skipping tick"
		);

		return;
	}

	if subsystem.awaits_mapping_load(pool.config().collect_mappings) && !pool.vip_map.is_loaded() {
		tracing::debug!(
			appliance = %pool.appliance,
			subsystem = subsystem.as_str(),
			"mapping cache not loaded yet, skipping tick"
		);

		return;
	}

	let started = Instant::now();
	let (api_tx, api_rx) = oneshot::channel();

	if !pool.team.submit(TaskPayload::Api { subsystem, target: None }, api_tx) {
		pool.metrics
			.counters
			.prometheus_collect_failures_total
			.with_label_values(&[&pool.appliance, subsystem.as_str()])
			.inc();

		return;
	}

	let bytes = match tokio::time::timeout(API_REPLY_TIMEOUT, api_rx).await {
		Ok(Ok(reply)) => reply.into_bytes(),
		_ => Vec::new(),
	};

	if bytes.is_empty() {
		pool.metrics
			.counters
			.api_collect_failures_total
			.with_label_values(&[&pool.appliance, subsystem.as_str()])
			.inc();
		pool.backoff.insert(subsystem.as_str(), jittered(BACKOFF_COOLDOWN));

		return;
	}

	let (raw_tx, raw_rx) = oneshot::channel();

	if !pool.team.submit(TaskPayload::Raw { subsystem, bytes }, raw_tx) {
		pool.metrics
			.counters
			.prometheus_collect_failures_total
			.with_label_values(&[&pool.appliance, subsystem.as_str()])
			.inc();

		return;
	}

	let ok = raw_rx.await.map(TaskReply::into_bool).unwrap_or(false);

	if !ok {
		tracing::debug!(
			appliance = %pool.appliance,
			subsystem = subsystem.as_str(),
			"collection run completed with failures"
		);

		return;
	}

	pool.timekeeper.record(&pool.appliance, subsystem, Utc::now());
	pool.metrics
		.gauges
		.processing_time_seconds
		.with_label_values(&[&pool.appliance, subsystem.as_str()])
		.set(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
	// crates.io
	use prometheus::Registry;
	use wiremock::{
		Mock, MockServer, ResponseTemplate,
		matchers::{method, path, query_param},
	};
	// self
	use super::*;
	use crate::{config::ApplianceConfig, metrics::Metrics, nitro::NitroClient, timekeeper::Timekeeper};

	async fn spawn_test_pool(server: &MockServer) -> Arc<Pool> {
		let dir = tempfile::tempdir().unwrap();
		let client = NitroClient::new(url::Url::parse(&server.uri()).unwrap(), "admin", "secret", false).unwrap();
		let config: ApplianceConfig = serde_yaml::from_str(&format!(
			"url: {}\nuser: admin\npass: secret\nmetrics: [ns, lbvserver, service]\n",
			server.uri()
		))
		.unwrap();
		let registry = Registry::new();
		let metrics = Metrics::new(&registry).unwrap();

		Pool::spawn(
			"lb01".into(),
			config,
			vec![client],
			dir.path(),
			Duration::from_secs(60),
			metrics,
			Arc::new(Timekeeper::new()),
		)
	}

	#[tokio::test]
	async fn successful_ns_collection_stamps_the_timekeeper_and_writes_gauges() {
		let server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/nitro/v1/stat/ns"))
			.respond_with(ResponseTemplate::new(200).set_body_string(
				r#"{"ns": {
					"cpuusagepcnt": 12.5, "memusagepcnt": 30.0, "pktcpuusagepcnt": 1.0,
					"disk0perusage": 1.0, "disk1perusage": 1.0,
					"totrxmbits": "1", "tottxmbits": "1",
					"httptotrequests": "1", "httptotresponses": "1",
					"tcpcurclientconn": "1", "tcpcurclientconnestablished": "1",
					"tcpcurserverconn": "1", "tcpcurserverconnestablished": "1"
				}}"#,
			))
			.mount(&server)
			.await;

		let pool = spawn_test_pool(&server).await;

		collect(&pool, SubsystemKind::Ns).await;

		assert!(pool.timekeeper.last_success("lb01", SubsystemKind::Ns).is_some());
		assert_eq!(pool.metrics.ns.cpu_usage_percent.with_label_values(&["lb01"]).get(), 12.5);

		pool.stop().await;
	}

	#[tokio::test]
	async fn api_failure_engages_backoff_and_skips_the_next_tick() {
		let server = MockServer::start().await;

		Mock::given(method("GET")).and(path("/nitro/v1/stat/ns")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

		let pool = spawn_test_pool(&server).await;

		collect(&pool, SubsystemKind::Ns).await;

		assert!(pool.backoff.is_active("ns"));
		assert!(pool.timekeeper.last_success("lb01", SubsystemKind::Ns).is_none());
		assert_eq!(
			pool.metrics.counters.api_collect_failures_total.with_label_values(&["lb01", "ns"]).get(),
			1.0
		);

		pool.stop().await;
	}

	#[tokio::test]
	async fn lbvserver_without_embedded_services_is_backfilled_via_targeted_fetch() {
		let server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/nitro/v1/stat/lbvserver"))
			.respond_with(ResponseTemplate::new(200).set_body_string(
				r#"{"lbvserver": [{
					"name": "vs1", "avgcltttlb": "1", "state": "UP",
					"totalrequests": "1", "totalresponses": "1", "totalrequestbytes": "1", "totalresponsebytes": "1",
					"totalpktsrecvd": "1", "totalpktssent": "1", "actsvcs": "1", "tothits": "1",
					"surgecount": "0", "svcsurgecount": "0", "vsvrsurgecount": "0"
				}]}"#,
			))
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path("/nitro/v1/stat/lbvserver/vs1"))
			.and(query_param("statbindings", "yes"))
			.respond_with(ResponseTemplate::new(200).set_body_string(
				r#"{"lbvserver": [{
					"name": "vs1", "avgcltttlb": "1", "state": "UP",
					"totalrequests": "1", "totalresponses": "1", "totalrequestbytes": "1", "totalresponsebytes": "1",
					"totalpktsrecvd": "1", "totalpktssent": "1", "actsvcs": "1", "tothits": "1",
					"surgecount": "0", "svcsurgecount": "0", "vsvrsurgecount": "0",
					"service": [{
						"name": "svcA", "throughput": "1", "avgsvrttfb": "1", "state": "UP",
						"totalrequests": "1", "totalresponses": "1", "totalrequestbytes": "1", "totalresponsebytes": "1",
						"curclntconnections": "1", "surgecount": "0", "cursrvrconnections": "1",
						"svrestablishedconn": "1", "curreusepool": "0", "maxclients": "0", "curload": "0",
						"vsvrservicehits": "1", "activetransactions": "0"
					}]
				}]}"#,
			))
			.mount(&server)
			.await;

		let pool = spawn_test_pool(&server).await;

		collect(&pool, SubsystemKind::LbVServer).await;

		assert!(pool.timekeeper.last_success("lb01", SubsystemKind::LbVServer).is_some());
		assert_eq!(
			pool.metrics.service.requests.with_label_values(&["lb01", "vs1", "svcA"]).get(),
			1.0
		);

		pool.stop().await;
	}

	#[tokio::test]
	async fn unreachable_appliance_yields_empty_api_bytes() {
		let client = NitroClient::new(url::Url::parse("http://127.0.0.1:1").unwrap(), "admin", "secret", false)
			.unwrap();
		let registry = Registry::new();
		let metrics = Metrics::new(&registry).unwrap();
		let dir = tempfile::tempdir().unwrap();
		let config: ApplianceConfig = serde_yaml::from_str(
			"url: http://127.0.0.1:1\nuser: admin\npass: secret\nmetrics: [ns]\n",
		)
		.unwrap();
		let pool = Pool::spawn(
			"lb02".into(),
			config,
			vec![client],
			dir.path(),
			Duration::from_secs(60),
			metrics,
			Arc::new(Timekeeper::new()),
		);

		let bytes = handle_api(&pool, SubsystemKind::Ns, None).await;

		assert!(bytes.is_empty());

		pool.stop().await;
	}
}
