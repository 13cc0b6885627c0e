//! Bounded worker pool (`Team`) that runs the four-stage `Api → Raw → Data → Prom` pipeline.
//!
//! A `Team` owns a fixed number of worker tasks pulling from one bounded channel. Handlers for
//! the four task kinds are registered once, as a single dispatching closure, at construction -
//! mirroring the original tool's per-kind handler map but collapsed into one `match` so the
//! subsystem identifier can double as both the dispatch key and the counter label.

// std
use std::{
	future::Future,
	pin::Pin,
	sync::atomic::{AtomicBool, Ordering},
};
// crates.io
use tokio::{
	sync::{Mutex as AsyncMutex, mpsc, oneshot},
	task::JoinHandle,
};
// self
use crate::{_prelude::*, subsystem::SubsystemKind};

/// Payload carried by one submitted task.
#[derive(Debug)]
pub enum TaskPayload {
	/// Fetch raw bytes from the appliance for `subsystem`, optionally targeting one object.
	Api {
		/// Which subsystem's endpoint to hit.
		subsystem: SubsystemKind,
		/// Targeted lookup (e.g. a GSLB vserver name); `None` means "fetch all".
		target: Option<String>,
	},
	/// Parse a raw JSON payload into typed records and fan them out as `Data` tasks.
	Raw {
		/// Which subsystem the bytes came from.
		subsystem: SubsystemKind,
		/// Raw response body.
		bytes: Vec<u8>,
	},
	/// Route one typed record to its `Prom` writer.
	Data(DataRecord),
	/// Write one typed record's gauges/counters and refresh the label-TTL table.
	Prom(DataRecord),
}

/// One decoded record flowing through the `Data`/`Prom` stages.
#[derive(Debug, Clone)]
pub enum DataRecord {
	/// `/stat/ns`.
	Ns(crate::nitro::types::NsStats),
	/// `/stat/ssl`.
	Ssl(crate::nitro::types::SslStats),
	/// One `/stat/lbvserver` entry (services embedded when present).
	LbVServer(crate::nitro::types::LbVServerStats),
	/// One `/config/lbvserver` entry.
	LbVServerCfg(crate::nitro::types::LbVServerConfig),
	/// One `/stat/gslbvserver` entry (services embedded when present).
	GslbVServer(crate::nitro::types::GslbVServerStats),
	/// One service record, already labeled with its lookup key.
	Service(crate::nitro::types::ServiceStats),
}
impl DataRecord {
	/// The subsystem id this record counts against for self-metrics and routing.
	pub fn subsystem(&self) -> SubsystemKind {
		match self {
			Self::Ns(_) => SubsystemKind::Ns,
			Self::Ssl(_) => SubsystemKind::Ssl,
			Self::LbVServer(_) => SubsystemKind::LbVServer,
			Self::LbVServerCfg(_) => SubsystemKind::LbVServerCfg,
			Self::GslbVServer(_) => SubsystemKind::GslbVServer,
			Self::Service(_) => SubsystemKind::Service,
		}
	}
}

/// Reply value closed over a task's one-shot channel.
#[derive(Debug, Clone)]
pub enum TaskReply {
	/// Raw bytes from an `Api` task (empty on failure).
	Bytes(Vec<u8>),
	/// Success/failure outcome of a `Raw` or `Data` task.
	Bool(bool),
}
impl TaskReply {
	/// Unwrap the bytes variant, treating anything else as empty.
	pub fn into_bytes(self) -> Vec<u8> {
		match self {
			Self::Bytes(bytes) => bytes,
			Self::Bool(_) => Vec::new(),
		}
	}

	/// Unwrap the boolean variant, treating anything else as failure.
	pub fn into_bool(self) -> bool {
		matches!(self, Self::Bool(true))
	}
}

struct TaskMessage {
	payload: TaskPayload,
	reply: oneshot::Sender<TaskReply>,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// Single dispatching handler invoked for every task pulled off the queue.
pub type Handler = Arc<dyn Fn(TaskPayload, oneshot::Sender<TaskReply>) -> BoxFuture + Send + Sync>;

/// Bounded worker pool backing one appliance's collection pipeline.
///
/// Stop takes `&self` rather than `&mut self` - the tx slot and worker handles live behind
/// `std::sync::Mutex`es so a `Team` can be reached through a shared `Arc<Pool>` without an async
/// lock on the submission hot path.
pub struct Team {
	tx: std::sync::Mutex<Option<mpsc::Sender<TaskMessage>>>,
	rx: Arc<AsyncMutex<mpsc::Receiver<TaskMessage>>>,
	stopped: Arc<AtomicBool>,
	workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}
impl Team {
	/// Spawn `workers` tasks pulling from a queue bounded to `queue_depth`, all dispatching
	/// through `handler`.
	pub fn new(workers: usize, queue_depth: usize, handler: Handler) -> Self {
		let (tx, rx) = mpsc::channel(queue_depth.max(1));
		let rx = Arc::new(AsyncMutex::new(rx));
		let stopped = Arc::new(AtomicBool::new(false));
		let mut handles = Vec::with_capacity(workers);

		for _ in 0..workers.max(1) {
			let rx = Arc::clone(&rx);
			let handler = Arc::clone(&handler);

			handles.push(tokio::spawn(async move {
				loop {
					let message = {
						let mut guard = rx.lock().await;

						guard.recv().await
					};

					match message {
						Some(TaskMessage { payload, reply }) => handler(payload, reply).await,
						None => break,
					}
				}
			}));
		}

		Self { tx: std::sync::Mutex::new(Some(tx)), rx, stopped, workers: std::sync::Mutex::new(handles) }
	}

	/// Submit a task. Returns `false` without enqueuing - and immediately closes `reply` with a
	/// failure value - if the team is stopped or the bounded queue is full.
	pub fn submit(&self, payload: TaskPayload, reply: oneshot::Sender<TaskReply>) -> bool {
		if self.stopped.load(Ordering::Acquire) {
			let _ = reply.send(TaskReply::Bool(false));

			return false;
		}

		let tx = { self.tx.lock().expect("team tx mutex poisoned").clone() };
		let Some(tx) = tx else {
			let _ = reply.send(TaskReply::Bool(false));

			return false;
		};

		match tx.try_send(TaskMessage { payload, reply }) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(message)) => {
				let _ = message.reply.send(TaskReply::Bool(false));

				false
			},
			Err(mpsc::error::TrySendError::Closed(message)) => {
				let _ = message.reply.send(TaskReply::Bool(false));

				false
			},
		}
	}

	/// Stop accepting new work, fail every already-queued task fast, and wait for in-flight
	/// handlers to finish before returning.
	pub async fn stop(&self) {
		self.stopped.store(true, Ordering::Release);
		*self.tx.lock().expect("team tx mutex poisoned") = None;

		{
			let mut rx = self.rx.lock().await;

			while let Ok(TaskMessage { reply, .. }) = rx.try_recv() {
				let _ = reply.send(TaskReply::Bool(false));
			}
		}

		let handles: Vec<_> = self.workers.lock().expect("team workers mutex poisoned").drain(..).collect();

		for handle in handles {
			let _ = handle.await;
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::sync::Barrier;
	// self
	use super::*;

	fn echo_handler() -> Handler {
		Arc::new(|payload, reply| {
			Box::pin(async move {
				let _ = match payload {
					TaskPayload::Api { .. } => reply.send(TaskReply::Bytes(b"ok".to_vec())),
					_ => reply.send(TaskReply::Bool(true)),
				};
			})
		})
	}

	#[tokio::test]
	async fn submit_round_trips_through_a_worker() {
		let team = Team::new(2, 8, echo_handler());
		let (tx, rx) = oneshot::channel();

		assert!(team.submit(TaskPayload::Api { subsystem: SubsystemKind::Ns, target: None }, tx));
		assert_eq!(rx.await.unwrap().into_bytes(), b"ok".to_vec());
	}

	#[tokio::test]
	async fn full_queue_rejects_without_blocking() {
		let barrier = Arc::new(Barrier::new(2));
		let handler: Handler = {
			let barrier = Arc::clone(&barrier);

			Arc::new(move |_payload, reply| {
				let barrier = Arc::clone(&barrier);

				Box::pin(async move {
					barrier.wait().await;

					let _ = reply.send(TaskReply::Bool(true));
				})
			})
		};
		let team = Team::new(1, 1, handler);
		let (tx1, _rx1) = oneshot::channel();

		assert!(team.submit(TaskPayload::Data(DataRecord::Ns(sample_ns())), tx1));

		// Give the sole worker a moment to pick up the first task and block on the barrier.
		tokio::task::yield_now().await;

		let (tx2, rx2) = oneshot::channel();

		assert!(team.submit(TaskPayload::Data(DataRecord::Ns(sample_ns())), tx2));

		let (tx3, rx3) = oneshot::channel();
		let accepted = team.submit(TaskPayload::Data(DataRecord::Ns(sample_ns())), tx3);

		assert!(!accepted);
		assert!(!rx3.await.unwrap().into_bool());

		barrier.wait().await;

		assert!(rx2.await.unwrap().into_bool());
	}

	#[tokio::test]
	async fn stop_fails_pending_tasks_and_rejects_new_submissions() {
		let team = Team::new(1, 4, echo_handler());

		team.stop().await;

		let (tx, rx) = oneshot::channel();
		let accepted = team.submit(TaskPayload::Data(DataRecord::Ns(sample_ns())), tx);

		assert!(!accepted);
		assert!(!rx.await.unwrap().into_bool());
	}

	fn sample_ns() -> crate::nitro::types::NsStats {
		serde_json::from_str(
			r#"{
				"cpuusagepcnt": 1.0, "memusagepcnt": 1.0, "pktcpuusagepcnt": 1.0,
				"disk0perusage": 1.0, "disk1perusage": 1.0,
				"totrxmbits": "1", "tottxmbits": "1",
				"httptotrequests": "1", "httptotresponses": "1",
				"tcpcurclientconn": "1", "tcpcurclientconnestablished": "1",
				"tcpcurserverconn": "1", "tcpcurserverconnestablished": "1"
			}"#,
		)
		.unwrap()
	}
}
