//! Binary entrypoint: parse the config path, bootstrap the [`Exporter`], and serve its HTTP
//! surface until a shutdown signal arrives.

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use citrixadc_exporter::{Exporter, config::Config};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// How long the HTTP server is given to drain in-flight requests on shutdown (§5).
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "citrixadc-exporter", about = "Prometheus exporter for Citrix ADC / NetScaler appliances")]
struct Cli {
	/// Path to the YAML configuration file.
	#[arg(default_value = "config.yaml")]
	config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let config = match Config::load(&cli.config) {
		Ok(config) => config,
		Err(error) => {
			eprintln!("failed to load configuration from {}: {error}", cli.config.display());

			return ExitCode::FAILURE;
		},
	};

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_new(&config.loglevel).unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let listen_addr = config.listen_addr.clone();

	let exporter = match Exporter::bootstrap(config).await {
		Ok(exporter) => exporter,
		Err(error) => {
			tracing::error!(%error, "startup failed, no configured appliance was reachable");

			return ExitCode::FAILURE;
		},
	};

	let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
		Ok(listener) => listener,
		Err(error) => {
			tracing::error!(%error, %listen_addr, "failed to bind HTTP listener");

			return ExitCode::FAILURE;
		},
	};

	let router = citrixadc_exporter::http_server::router(Arc::clone(&exporter));
	let (scheduler_shutdown_tx, scheduler_shutdown_rx) = tokio::sync::oneshot::channel();
	let (http_shutdown_tx, http_shutdown_rx) = tokio::sync::oneshot::channel::<()>();

	let scheduler = tokio::spawn(Arc::clone(&exporter).run(scheduler_shutdown_rx));
	let server = tokio::spawn(
		axum::serve(listener, router).with_graceful_shutdown(async {
			http_shutdown_rx.await.ok();
		}),
	);

	tracing::info!(%listen_addr, "citrixadc-exporter listening");

	wait_for_shutdown_signal().await;

	tracing::info!("shutdown signal received, draining HTTP server");

	let _ = http_shutdown_tx.send(());
	let _ = scheduler_shutdown_tx.send(());

	if tokio::time::timeout(HTTP_SHUTDOWN_GRACE, server).await.is_err() {
		tracing::warn!("HTTP server did not drain within the grace period, shutting down anyway");
	}

	let _ = scheduler.await;

	ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
