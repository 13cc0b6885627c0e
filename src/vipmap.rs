//! Service-to-virtual-server mapping cache (`VipMap`).
//!
//! One instance is owned by each [`crate::pool::Pool`] and holds that single appliance's
//! `service-name -> [vserver-name, ...]` index, persisted to `<mappings_dir>/<appliance>.yaml`.
//! Collection of `service` (and, when enabled, `lbvserver_cfg`) stats is gated on
//! [`VipMap::is_loaded`].

// std
use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::{Mutex, atomic::{AtomicBool, Ordering}},
};
// crates.io
use reqwest::Client;
use url::Url;
// self
use crate::{
	_prelude::*,
	config::UploadConfig,
	nitro::{NitroClient, client::MAPPING_RETRY_TIMEOUT, types::SvcBind},
};

/// Attempts made against the appliance's binding endpoint before giving up as
/// [`Error::MappingUnavailable`]. The original tool retried this fetch forever; this rewrite
/// deliberately bounds it (see the design notes on retry loops).
const MAX_BINDING_FETCH_ATTEMPTS: u32 = 3;
/// Delay between binding-fetch retries, matching the original tool's fixed 3-second cooldown.
const BINDING_FETCH_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Per-appliance `service-name -> [vserver-name, ...]` index.
#[derive(Debug)]
pub struct VipMap {
	appliance: String,
	mappings_dir: PathBuf,
	bindings: Mutex<HashMap<String, Vec<String>>>,
	loaded: AtomicBool,
}
impl VipMap {
	/// Construct an empty, unloaded map for `appliance`, persisting under `mappings_dir`.
	pub fn new(appliance: impl Into<String>, mappings_dir: impl Into<PathBuf>) -> Self {
		Self {
			appliance: appliance.into(),
			mappings_dir: mappings_dir.into(),
			bindings: Mutex::new(HashMap::new()),
			loaded: AtomicBool::new(false),
		}
	}

	/// The virtual servers bound to `service`, or an empty sequence if none are known.
	pub fn lookup(&self, service: &str) -> Vec<String> {
		self.bindings.lock().expect("vipmap mutex poisoned").get(service).cloned().unwrap_or_default()
	}

	/// Whether at least one successful load has populated the map.
	pub fn is_loaded(&self) -> bool {
		self.loaded.load(Ordering::Acquire)
	}

	/// Path the map is persisted to: `<mappings_dir>/<appliance>.yaml`.
	pub fn path(&self) -> PathBuf {
		self.mappings_dir.join(format!("{}.yaml", self.appliance))
	}

	/// Load order per §4.3: a configured mappings URL, then the local snapshot, then a live fetch
	/// against the appliance (always taken when `force` is set).
	pub async fn collect(
		&self,
		client: &NitroClient,
		mappings_url: Option<&Url>,
		upload_config: Option<&UploadConfig>,
		force: bool,
	) -> Result<()> {
		if !force && let Some(url) = mappings_url {
			return self.collect_from_url(url).await;
		}

		if !force && self.collect_from_disk().is_ok() {
			return Ok(());
		}

		self.collect_from_appliance(client, upload_config).await
	}

	async fn collect_from_url(&self, url: &Url) -> Result<()> {
		let http = Client::new();
		let response = http.get(url.clone()).send().await?;
		let bytes = response.bytes().await?;
		let parsed: HashMap<String, Vec<String>> = serde_yaml::from_slice(&bytes)?;

		self.replace(parsed);
		self.persist_local()?;
		self.loaded.store(true, Ordering::Release);

		tracing::debug!(appliance = %self.appliance, url = %url, "loaded mappings from configured URL");

		Ok(())
	}

	fn collect_from_disk(&self) -> Result<()> {
		let raw = std::fs::read_to_string(self.path())?;
		let parsed: HashMap<String, Vec<String>> = serde_yaml::from_str(&raw)?;

		self.replace(parsed);
		self.loaded.store(true, Ordering::Release);

		tracing::debug!(appliance = %self.appliance, path = ?self.path(), "loaded mappings from local snapshot");

		Ok(())
	}

	async fn collect_from_appliance(
		&self,
		client: &NitroClient,
		upload_config: Option<&UploadConfig>,
	) -> Result<()> {
		let mut attempts = 0;
		let bytes = loop {
			attempts += 1;

			match client.service_bindings(MAPPING_RETRY_TIMEOUT).await {
				Ok(bytes) => break bytes,
				Err(error) if attempts < MAX_BINDING_FETCH_ATTEMPTS => {
					tracing::warn!(
						appliance = %self.appliance,
						attempt = attempts,
						%error,
						"binding fetch failed, retrying"
					);

					tokio::time::sleep(BINDING_FETCH_RETRY_DELAY).await;
				},
				Err(_) => {
					return Err(Error::MappingUnavailable {
						appliance: self.appliance.clone(),
						attempts,
					});
				},
			}
		};
		let bindings: Vec<SvcBind> = crate::nitro::types::extract_field(&bytes, "lbvserver_service_binding")?;
		let mut grouped: HashMap<String, Vec<String>> = HashMap::new();

		for binding in bindings {
			grouped.entry(binding.servicename).or_default().push(binding.name);
		}

		self.update(grouped, upload_config).await?;
		self.loaded.store(true, Ordering::Release);

		Ok(())
	}

	/// Compare-and-swap the whole map; persists locally (and uploads, if configured) only if the
	/// new map differs structurally from the current one.
	pub async fn update(
		&self,
		new_map: HashMap<String, Vec<String>>,
		upload_config: Option<&UploadConfig>,
	) -> Result<()> {
		let changed = {
			let mut bindings = self.bindings.lock().expect("vipmap mutex poisoned");

			if *bindings == new_map {
				false
			} else {
				*bindings = new_map;

				true
			}
		};

		if !changed {
			return Ok(());
		}

		self.persist_local()?;

		if let Some(upload_config) = upload_config {
			self.upload(upload_config).await;
		}

		Ok(())
	}

	fn replace(&self, new_map: HashMap<String, Vec<String>>) {
		*self.bindings.lock().expect("vipmap mutex poisoned") = new_map;
	}

	fn persist_local(&self) -> Result<()> {
		let path = self.path();

		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let snapshot = self.bindings.lock().expect("vipmap mutex poisoned").clone();
		let yaml = serde_yaml::to_string(&snapshot)?;

		std::fs::write(path, yaml)?;

		Ok(())
	}

	async fn upload(&self, upload_config: &UploadConfig) {
		let snapshot = self.bindings.lock().expect("vipmap mutex poisoned").clone();
		let body = match serde_yaml::to_string(&snapshot) {
			Ok(body) => body,
			Err(error) => {
				tracing::error!(appliance = %self.appliance, %error, "failed to serialize mappings for upload");

				return;
			},
		};
		let http = match Client::builder().danger_accept_invalid_certs(upload_config.insecure).build() {
			Ok(http) => http,
			Err(error) => {
				tracing::error!(appliance = %self.appliance, %error, "failed to build mapping-upload client");

				return;
			},
		};
		let method = upload_config.method.parse().unwrap_or(reqwest::Method::POST);
		let mut request = http.request(method, upload_config.upload_url.clone()).body(body);

		for (name, value) in &upload_config.headers {
			request = request.header(name, value);
		}

		match request.send().await {
			Ok(response) if response.status().as_u16() == 201 => {
				tracing::debug!(appliance = %self.appliance, "mapping upload accepted");
			},
			Ok(response) => {
				tracing::error!(
					appliance = %self.appliance,
					status = response.status().as_u16(),
					"mapping upload rejected"
				);
			},
			Err(error) => {
				tracing::error!(appliance = %self.appliance, %error, "mapping upload request failed");
			},
		}
	}
}

/// Read a persisted mapping file directly, without going through a [`VipMap`] instance. Used by
/// the `/mappings/<file>` static-serve route to validate requested paths stay under the directory.
pub fn mappings_file_path(mappings_dir: &Path, appliance: &str) -> PathBuf {
	mappings_dir.join(format!("{appliance}.yaml"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn round_trip_through_disk_reproduces_the_map() {
		let dir = tempfile::tempdir().unwrap();
		let map = VipMap::new("lb01", dir.path());
		let mut new_map = HashMap::new();

		new_map.insert("svcA".to_owned(), vec!["vs1".to_owned(), "vs2".to_owned()]);

		map.update(new_map.clone(), None).await.unwrap();
		assert!(map.path().exists());

		let reloaded = VipMap::new("lb01", dir.path());

		reloaded.collect_from_disk().unwrap();
		assert_eq!(reloaded.lookup("svcA"), vec!["vs1", "vs2"]);
	}

	#[tokio::test]
	async fn update_is_a_no_op_when_the_map_is_unchanged() {
		let dir = tempfile::tempdir().unwrap();
		let map = VipMap::new("lb01", dir.path());
		let mut new_map = HashMap::new();

		new_map.insert("svcA".to_owned(), vec!["vs1".to_owned()]);

		map.update(new_map.clone(), None).await.unwrap();

		let written_at = std::fs::metadata(map.path()).unwrap().modified().unwrap();

		std::thread::sleep(Duration::from_millis(10));
		map.update(new_map, None).await.unwrap();

		let rewritten_at = std::fs::metadata(map.path()).unwrap().modified().unwrap();

		assert_eq!(written_at, rewritten_at);
	}

	#[test]
	fn unbound_service_returns_an_empty_sequence() {
		let dir = tempfile::tempdir().unwrap();
		let map = VipMap::new("lb01", dir.path());

		assert!(map.lookup("svcUnknown").is_empty());
		assert!(!map.is_loaded());
	}
}
