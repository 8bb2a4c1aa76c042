use crate::config::PrinterConfig;
use crate::errors::{DaemonError, Result};
use crate::outcome_log::{JobOutcome, OutcomeLog};
use crate::printer::PrintDriver;
use crate::sentry_init;
use chrono::Utc;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One request to print an image. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: Option<String>,
    pub trace_id: String,
    pub image: Vec<u8>,
    pub printer: PrinterConfig,
    /// The request body as received, echoed back in responses
    pub request: Arc<serde_json::Value>,
}

impl PrintJob {
    pub fn new(
        id: Option<String>,
        image: Vec<u8>,
        printer: PrinterConfig,
        request: Arc<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            trace_id: uuid::Uuid::new_v4().to_string(),
            image,
            printer,
            request,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Dispatching,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub state: QueueState,
    /// Jobs accepted but not yet handed to the driver
    pub pending: usize,
}

struct QueuedJob {
    job: PrintJob,
    reply: oneshot::Sender<JobOutcome>,
}

#[derive(Default)]
struct QueueStatus {
    dispatching: AtomicBool,
    pending: AtomicUsize,
}

/// Handle to an accepted job; resolves once the dispatcher has run it.
pub struct JobTicket {
    trace_id: String,
    receiver: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub async fn outcome(self) -> Result<JobOutcome> {
        self.receiver.await.map_err(|_| {
            DaemonError::Queue(format!("Job {} was dropped before completion", self.trace_id))
        })
    }
}

/// Serializes print jobs onto a single device.
///
/// Any number of producers may enqueue; one dispatcher task executes jobs
/// strictly in arrival order, one at a time. Every accepted job receives
/// exactly one outcome, success or failure.
pub struct PrintQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
    status: Arc<QueueStatus>,
}

impl PrintQueue {
    /// Spawn the dispatcher. It stops once the queue handle is dropped and
    /// all pending jobs are drained.
    pub fn start(
        driver: Arc<dyn PrintDriver>,
        outcomes: Arc<RwLock<OutcomeLog>>,
        job_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let status = Arc::new(QueueStatus::default());

        let dispatcher = Dispatcher {
            driver,
            outcomes,
            job_timeout,
            status: status.clone(),
        };
        let handle = tokio::spawn(dispatcher.run(receiver));

        (Self { sender, status }, handle)
    }

    /// Accept a job. Its position in the queue is fixed when this returns.
    pub fn enqueue(&self, job: PrintJob) -> Result<JobTicket> {
        let (reply, receiver) = oneshot::channel();
        let trace_id = job.trace_id.clone();

        self.status.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(QueuedJob { job, reply }).is_err() {
            self.status.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(DaemonError::Queue("Print queue is not running".to_string()));
        }

        debug!(
            "Job {} enqueued ({} pending)",
            trace_id,
            self.status.pending.load(Ordering::SeqCst)
        );
        Ok(JobTicket { trace_id, receiver })
    }

    /// Enqueue and wait for the outcome.
    ///
    /// Device failures come back as `Ok` outcomes with `success == false`;
    /// `Err` means the queue itself is unavailable.
    pub async fn submit(&self, job: PrintJob) -> Result<JobOutcome> {
        self.enqueue(job)?.outcome().await
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = if self.status.dispatching.load(Ordering::SeqCst) {
            QueueState::Dispatching
        } else {
            QueueState::Idle
        };

        QueueSnapshot {
            state,
            pending: self.status.pending.load(Ordering::SeqCst),
        }
    }
}

struct Dispatcher {
    driver: Arc<dyn PrintDriver>,
    outcomes: Arc<RwLock<OutcomeLog>>,
    job_timeout: Duration,
    status: Arc<QueueStatus>,
}

impl Dispatcher {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<QueuedJob>) {
        info!("Print queue dispatcher started (job timeout {:?})", self.job_timeout);

        while let Some(QueuedJob { job, reply }) = receiver.recv().await {
            self.status.pending.fetch_sub(1, Ordering::SeqCst);
            self.status.dispatching.store(true, Ordering::SeqCst);

            let outcome = self.execute(job).await;
            self.outcomes.write().await.record(outcome.clone());

            self.status.dispatching.store(false, Ordering::SeqCst);

            if reply.send(outcome).is_err() {
                debug!("Submitter went away before its job completed");
            }
        }

        info!("Print queue dispatcher stopped");
    }

    #[tracing::instrument(skip_all, fields(trace_id = %job.trace_id, job_id = ?job.id))]
    async fn execute(&self, job: PrintJob) -> JobOutcome {
        let started = Instant::now();
        info!("Dispatching print job");

        let attempt =
            AssertUnwindSafe(async { self.driver.print_image(&job.printer, &job.image).await })
                .catch_unwind();

        let result = match tokio::time::timeout(self.job_timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(DaemonError::PrintJob(format!(
                "Printer driver panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(DaemonError::Timeout(format!(
                "Print job did not finish within {}ms",
                self.job_timeout.as_millis()
            ))),
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        let error_message = match result {
            Ok(()) => {
                info!("Print job completed in {}ms", duration_ms);
                None
            }
            Err(e) => {
                match &e {
                    DaemonError::Timeout(_) => warn!("Print job timed out: {}", e),
                    _ => {
                        // Reported to Sentry once, by the explicit capture
                        warn!(category = ?e.category(), "Print job failed: {}", e);
                        sentry_init::capture_print_failure(&job.trace_id, &e.to_string());
                    }
                }
                Some(e.client_message())
            }
        };

        JobOutcome {
            success: error_message.is_none(),
            job_id: job.id,
            trace_id: job.trace_id,
            request: job.request,
            error_message,
            completed_at: Utc::now(),
            duration_ms,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
