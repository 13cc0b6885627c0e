//! Multi-target Prometheus exporter for Citrix ADC / NetScaler appliances.
//!
//! For every configured appliance the exporter owns a [`pool::Pool`] that drives a four-stage
//! collection pipeline (`Api` → `Raw` → `Data` → `Prom`) over a bounded worker [`pool::team::Team`].
//! Service-level samples are relabelled with their bound virtual-server names via
//! [`vipmap::VipMap`], and stale label tuples are reaped from the Prometheus registry by the
//! [`ttl::LabelTtlTable`].

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod config;
pub mod http_server;
pub mod metrics;
pub mod nitro;
pub mod pool;
pub mod subsystem;
pub mod vipmap;

mod app;
mod error;
mod timekeeper;
mod ttl;

mod _prelude {
	pub use std::sync::Arc;

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::{Duration, Instant};

	pub use crate::{Error, Result};
}

pub use crate::{
	app::Exporter,
	error::{Error, Result},
	timekeeper::Timekeeper,
	ttl::LabelTtlTable,
};

#[cfg(test)]
mod _test {
	use tempfile as _;
	use wiremock as _;
}

// `clap` and `tracing-subscriber` back the `src/main.rs` binary target only; this library
// compilation unit never references them on its own.
mod _bin {
	use clap as _;
	use tracing_subscriber as _;
}
