//! HTTP surface (§6): `/metrics`, `/ops`, the manual refresh endpoints, and static-served
//! mapping files.

// std
use std::sync::Arc;
// crates.io
use axum::{
	extract::State,
	http::{StatusCode, header},
	response::{Html, IntoResponse},
	routing::get,
};
use prometheus::{Encoder, TextEncoder};
use tower_http::services::ServeDir;
// self
use crate::app::Exporter;

/// Build the exporter's axum router, ready to be served by the caller's chosen bind address.
pub fn router(exporter: Arc<Exporter>) -> axum::Router {
	let mappings_dir = exporter.config().mappings_dir.clone();

	axum::Router::new()
		.route("/metrics", get(metrics_handler))
		.route("/ops", get(ops_handler))
		.route("/update/info", get(update_info_handler))
		.route("/update/mappings", get(update_mappings_handler))
		.nest_service("/mappings", ServeDir::new(mappings_dir))
		.with_state(exporter)
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> impl IntoResponse {
	let families = exporter.registry().gather();
	let encoder = TextEncoder::new();
	let mut buffer = Vec::new();

	if let Err(error) = encoder.encode(&families, &mut buffer) {
		tracing::error!(%error, "failed to encode metrics");

		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}

	(StatusCode::OK, [(header::CONTENT_TYPE, encoder.format_type().to_owned())], buffer).into_response()
}

async fn ops_handler(State(exporter): State<Arc<Exporter>>) -> Html<String> {
	let mut rows = String::new();

	for (kind, at) in exporter.manual_history() {
		rows.push_str(&format!("<tr><td>manual:{kind}</td><td>{}</td></tr>", at.to_rfc3339()));
	}

	let mut stamps = exporter.timekeeper().snapshot();

	stamps.sort_by_key(|(appliance, subsystem, _)| (appliance.clone(), subsystem.as_str()));

	for (appliance, subsystem, at) in stamps {
		rows.push_str(&format!(
			"<tr><td>{appliance}/{}</td><td>{}</td></tr>",
			subsystem.as_str(),
			at.to_rfc3339()
		));
	}

	Html(format!(
		"<html><head><title>citrixadc-exporter ops</title></head><body>\
		<h1>citrixadc-exporter</h1>\
		<p>appliances: {}</p>\
		<table border=\"1\"><tr><th>operation</th><th>last run (UTC)</th></tr>{rows}</table>\
		</body></html>",
		exporter.appliance_ids().join(", "),
	))
}

async fn update_info_handler(State(exporter): State<Arc<Exporter>>) -> Html<&'static str> {
	if exporter.request_info_refresh().await {
		Html("<html><body>appliance info refresh triggered</body></html>")
	} else {
		Html("<html><body>appliance info refresh already ran within the last hour</body></html>")
	}
}

async fn update_mappings_handler(State(exporter): State<Arc<Exporter>>) -> Html<&'static str> {
	if exporter.request_mappings_refresh().await {
		Html("<html><body>mapping refresh triggered</body></html>")
	} else {
		Html("<html><body>mapping refresh already ran within the last hour</body></html>")
	}
}
