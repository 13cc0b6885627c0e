//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the exporter crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Yaml(#[from] serde_yaml::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),
	#[error(transparent)]
	Prometheus(#[from] prometheus::Error),

	#[error("appliance '{appliance}' is unreachable: {reason}")]
	ApplianceUnreachable { appliance: String, reason: String },
	#[error("Upstream HTTP status {status} from {url}")]
	HttpStatus { status: reqwest::StatusCode, url: String },
	#[error("mapping cache unavailable for appliance '{appliance}' after {attempts} attempt(s)")]
	MappingUnavailable { appliance: String, attempts: u32 },
	#[error("no appliance '{appliance}' is registered")]
	NotRegistered { appliance: String },
	#[error("submission to the '{subsystem}' team rejected for appliance '{appliance}': queue full or stopped")]
	Submission { appliance: String, subsystem: &'static str },
	#[error("validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
