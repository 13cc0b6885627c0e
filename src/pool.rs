//! Per-appliance collection engine: task pipeline, mapping cache, label-TTL table, and the
//! per-subsystem scheduling guards that keep collection runs isolated (§4 of the design docs).

pub mod backoff;
pub mod flipbit;
pub mod team;

mod collector;
mod prom;

// std
use std::sync::{
	RwLock, Weak,
	atomic::{AtomicBool, AtomicUsize, Ordering},
};
// self
use crate::{
	_prelude::*,
	config::ApplianceConfig,
	metrics::Metrics,
	nitro::NitroClient,
	pool::{
		backoff::BackoffSet,
		flipbit::FlipBitSet,
		team::{Handler, TaskReply, Team},
	},
	timekeeper::Timekeeper,
	ttl::LabelTtlTable,
	vipmap::VipMap,
};

/// Cached appliance identity, populated by the daily/manual info refresh (§4.6).
#[derive(Debug, Clone, Default)]
pub struct ApplianceModel {
	/// Hardware model description, from `config/nshardware`.
	pub model: String,
	/// Firmware version, from `config/nsversion`.
	pub version: String,
	/// Manufacture year, from `config/nshardware`.
	pub year: String,
}

/// One appliance's collection engine.
///
/// Constructed via [`Pool::spawn`] using `Arc::new_cyclic` so the [`Team`]'s task handlers can
/// close over a `Weak<Pool>` resolved at construction time (§9, "cyclic-looking references")
/// rather than a raw self-referential struct; each handler upgrades the weak reference for the
/// duration of one dispatch and lets it drop once the task completes.
pub struct Pool {
	appliance: String,
	config: ApplianceConfig,
	clients: Vec<NitroClient>,
	client_cursor: AtomicUsize,
	team: Team,
	vip_map: VipMap,
	label_ttl: LabelTtlTable,
	guards: FlipBitSet,
	backoff: Arc<BackoffSet>,
	stopped: AtomicBool,
	model: RwLock<Option<ApplianceModel>>,
	metrics: Arc<Metrics>,
	timekeeper: Arc<Timekeeper>,
}
impl Pool {
	/// Build and spawn a new pool for `config`, rotating across `clients` for each request.
	pub fn spawn(
		appliance: String,
		config: ApplianceConfig,
		clients: Vec<NitroClient>,
		mappings_dir: impl Into<std::path::PathBuf>,
		label_ttl: Duration,
		metrics: Arc<Metrics>,
		timekeeper: Arc<Timekeeper>,
	) -> Arc<Self> {
		let workers = config.pool_workers.unwrap_or(10);
		let queue = config.pool_worker_queue.unwrap_or(1_000);
		let vip_map = VipMap::new(appliance.clone(), mappings_dir);

		Arc::new_cyclic(|weak: &Weak<Pool>| {
			let weak = weak.clone();
			let handler: Handler = Arc::new(move |payload, reply| {
				let weak = weak.clone();

				Box::pin(async move {
					match weak.upgrade() {
						Some(pool) => collector::dispatch(&pool, payload, reply).await,
						None => {
							let _ = reply.send(TaskReply::Bool(false));
						},
					}
				})
			});

			Self {
				appliance,
				config,
				clients,
				client_cursor: AtomicUsize::new(0),
				team: Team::new(workers, queue, handler),
				vip_map,
				label_ttl: LabelTtlTable::new(label_ttl),
				guards: FlipBitSet::new(),
				backoff: Arc::new(BackoffSet::new()),
				stopped: AtomicBool::new(false),
				model: RwLock::new(None),
				metrics,
				timekeeper,
			}
		})
	}

	/// The short appliance id this pool serves.
	pub fn appliance(&self) -> &str {
		&self.appliance
	}

	/// Whether this pool has been stopped; submissions after this point fail fast.
	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Acquire)
	}

	/// The mapping cache backing `service`/`lbvserver_cfg` relabeling.
	pub fn vip_map(&self) -> &VipMap {
		&self.vip_map
	}

	/// The label-TTL table for this appliance's gauges/counters.
	pub fn label_ttl(&self) -> &LabelTtlTable {
		&self.label_ttl
	}

	/// This pool's validated appliance configuration.
	pub fn config(&self) -> &ApplianceConfig {
		&self.config
	}

	/// The next HTTP client in the round-robin rotation, widening TLS session reuse.
	pub fn next_client(&self) -> &NitroClient {
		let index = self.client_cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len();

		&self.clients[index]
	}

	/// Refresh the cached appliance model/version/year from `config/nsversion` and
	/// `config/nshardware`. A failed lookup leaves the previous cached value in place.
	pub async fn refresh_info(&self) {
		let client = self.next_client();
		let timeout = crate::nitro::client::DEFAULT_TIMEOUT;

		let version = match client.ns_version(timeout).await {
			Ok(bytes) => crate::nitro::types::extract_field::<crate::nitro::types::NsVersionInfo>(
				&bytes, "nsversion",
			)
			.ok()
			.map(|info| info.version),
			Err(error) => {
				tracing::warn!(appliance = %self.appliance, %error, "failed to refresh ns version");

				None
			},
		};
		let hardware = match client.ns_hardware(timeout).await {
			Ok(bytes) => crate::nitro::types::extract_field::<crate::nitro::types::NsHardwareInfo>(
				&bytes, "nshardware",
			)
			.ok(),
			Err(error) => {
				tracing::warn!(appliance = %self.appliance, %error, "failed to refresh ns hardware");

				None
			},
		};

		if version.is_none() && hardware.is_none() {
			return;
		}

		let mut model = self.model.write().expect("pool model mutex poisoned");
		let previous = model.clone().unwrap_or_default();

		*model = Some(ApplianceModel {
			version: version.unwrap_or(previous.version),
			model: hardware.as_ref().map(|h| h.hwdescription.clone()).unwrap_or(previous.model),
			year: hardware.map(|h| h.manufactureyear).unwrap_or(previous.year),
		});
	}

	/// The currently cached appliance model, if an info refresh has ever succeeded.
	pub fn cached_model(&self) -> Option<ApplianceModel> {
		self.model.read().expect("pool model mutex poisoned").clone()
	}

	/// Force or opportunistic mapping refresh, per the load order in §4.3.
	pub async fn collect_mappings(&self, force: bool) -> Result<()> {
		let client = self.next_client();

		self.vip_map
			.collect(client, self.config.mappings_url.as_ref(), self.config.upload_config.as_ref(), force)
			.await
	}

	/// Run the per-subsystem collection procedure described in §4.2.
	pub async fn collect(self: &Arc<Self>, subsystem: crate::subsystem::SubsystemKind) {
		collector::collect(self, subsystem).await;
	}

	/// Stop accepting new work and drain the in-flight pipeline. Idempotent.
	pub async fn stop(&self) {
		self.stopped.store(true, Ordering::Release);
		self.team.stop().await;
	}
}
