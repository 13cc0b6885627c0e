//! Thin typed client for the appliance's Nitro-style JSON API.
//!
//! This does not attempt to model the whole Nitro surface, only the handful of endpoints the
//! exporter's subsystems need: `stat/*` counters, `config/lbvserver*` for the mapping cache and
//! `lbvserver_cfg` subsystem, and `config/nsversion` / `config/nshardware` for the appliance-info
//! refresh.

// crates.io
use reqwest::Client;
use url::Url;
// self
use crate::_prelude::*;

/// Default per-request timeout applied unless a caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout applied while the mapping cache retries its fallback fetch against a busy appliance.
pub const MAPPING_RETRY_TIMEOUT: Duration = Duration::from_secs(120);

/// A single HTTP client bound to one appliance's Nitro API.
///
/// Pools keep a small round-robin set of these to widen TLS session reuse and spread keep-alives
/// across connections, per the original tool's client-pool design.
#[derive(Clone, Debug)]
pub struct NitroClient {
	http: Client,
	base_url: Url,
	user: String,
	pass: String,
}
impl NitroClient {
	/// Build a new client for the given appliance.
	pub fn new(base_url: Url, user: impl Into<String>, pass: impl Into<String>, ignore_cert: bool) -> Result<Self> {
		let http = Client::builder().danger_accept_invalid_certs(ignore_cert).build()?;

		Ok(Self { http, base_url, user: user.into(), pass: pass.into() })
	}

	/// Fetch all records for a `stat/<id>` endpoint.
	pub async fn stat_all(&self, id: &str, timeout: Duration) -> Result<Vec<u8>> {
		self.get(&format!("nitro/v1/stat/{id}"), timeout).await
	}

	/// Fetch a targeted `stat/<id>/<target>?statbindings=yes` lookup, used by the GSLB fan-out.
	pub async fn stat_targeted(&self, id: &str, target: &str, timeout: Duration) -> Result<Vec<u8>> {
		self.get(&format!("nitro/v1/stat/{id}/{target}?statbindings=yes"), timeout).await
	}

	/// Fetch a `config/<id>` endpoint.
	pub async fn config_all(&self, id: &str, timeout: Duration) -> Result<Vec<u8>> {
		self.get(&format!("nitro/v1/config/{id}"), timeout).await
	}

	/// Cheap handshake used at startup to decide whether an appliance is reachable at all.
	pub async fn handshake(&self, timeout: Duration) -> Result<()> {
		self.config_all("nsversion", timeout).await.map(|_| ())
	}

	/// Fetch `config/lbvserver_service_binding`, the source of truth the mapping cache falls
	/// back to when no mappings URL or local snapshot is available.
	pub async fn service_bindings(&self, timeout: Duration) -> Result<Vec<u8>> {
		self.config_all("lbvserver_service_binding", timeout).await
	}

	/// Fetch `config/nsversion`, used by the appliance-info refresh.
	pub async fn ns_version(&self, timeout: Duration) -> Result<Vec<u8>> {
		self.config_all("nsversion", timeout).await
	}

	/// Fetch `config/nshardware`, used by the appliance-info refresh.
	pub async fn ns_hardware(&self, timeout: Duration) -> Result<Vec<u8>> {
		self.config_all("nshardware", timeout).await
	}

	async fn get(&self, path: &str, timeout: Duration) -> Result<Vec<u8>> {
		let url = self.base_url.join(path)?;
		let response = self
			.http
			.get(url.clone())
			.basic_auth(&self.user, Some(&self.pass))
			.timeout(timeout)
			.send()
			.await?;
		let status = response.status();

		if !status.is_success() {
			return Err(Error::HttpStatus { status, url: url.to_string() });
		}

		Ok(response.bytes().await?.to_vec())
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use wiremock::{
		Mock, MockServer, ResponseTemplate,
		matchers::{method, path},
	};
	// self
	use super::*;

	#[tokio::test]
	async fn stat_all_builds_the_expected_path() {
		let server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/nitro/v1/stat/ns"))
			.respond_with(ResponseTemplate::new(200).set_body_string("{}"))
			.expect(1)
			.mount(&server)
			.await;

		let client =
			NitroClient::new(Url::parse(&server.uri()).unwrap(), "admin", "secret", false).unwrap();
		let body = client.stat_all("ns", DEFAULT_TIMEOUT).await.expect("response");

		assert_eq!(body, b"{}");
	}

	#[tokio::test]
	async fn non_success_status_surfaces_http_status_error() {
		let server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/nitro/v1/stat/ssl"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;

		let client =
			NitroClient::new(Url::parse(&server.uri()).unwrap(), "admin", "secret", false).unwrap();
		let err = client.stat_all("ssl", DEFAULT_TIMEOUT).await.unwrap_err();

		assert!(matches!(err, Error::HttpStatus { status, .. } if status.as_u16() == 503));
	}
}
