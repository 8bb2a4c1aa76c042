use crate::config::{AppConfig, PrinterConfig};
use crate::dedup::DedupGuard;
use crate::errors::{DaemonError, ErrorCategory, Result};
use crate::outcome_log::{JobOutcome, OutcomeLog};
use crate::printer::{PrintDriver, PrinterEndpoint};
use crate::queue::{PrintJob, PrintQueue, QueueSnapshot};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Json, State},
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Browsers and POS clients send both padded and unpadded base64
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// HTTP API server state
#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<PrintQueue>,
    pub dedup: Arc<Mutex<DedupGuard>>,
    pub outcomes: Arc<RwLock<OutcomeLog>>,
    /// Used directly by `/test` and `/health-check`
    pub driver: Arc<dyn PrintDriver>,
    pub job_timeout: Duration,
    pub start_time: Instant,
}

impl ApiState {
    /// Build state and spawn the print queue dispatcher.
    pub fn new(config: &AppConfig, driver: Arc<dyn PrintDriver>) -> (Self, JoinHandle<()>) {
        let outcomes = Arc::new(RwLock::new(OutcomeLog::new(config.outcome_log_capacity)));
        let (queue, dispatcher) =
            PrintQueue::start(driver.clone(), outcomes.clone(), config.job_timeout());

        let state = Self {
            queue: Arc::new(queue),
            dedup: Arc::new(Mutex::new(DedupGuard::new(config.dedup_window))),
            outcomes,
            driver,
            job_timeout: config.job_timeout(),
            start_time: Instant::now(),
        };

        (state, dispatcher)
    }
}

/// Print / test request payload
#[derive(Debug, Deserialize)]
pub struct PrintRequest {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "printerConfig", default)]
    pub printer_config: Option<PrinterConfig>,
}

impl PrintRequest {
    /// Dedup key: strings as-is, numbers etc. by their JSON text
    pub fn job_key(&self) -> Option<String> {
        match &self.id {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(id)) => Some(id.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    fn image(&self) -> Result<&str> {
        self.image
            .as_deref()
            .filter(|image| !image.is_empty())
            .ok_or_else(|| DaemonError::InvalidInput("could not find image.".to_string()))
    }

    fn printer(&self) -> Result<PrinterConfig> {
        self.printer_config
            .clone()
            .ok_or_else(|| DaemonError::InvalidInput("could not find printer".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct PrintSuccess {
    #[serde(rename = "SUCCESS")]
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub data: Arc<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PrintFailure {
    pub data: Option<Arc<serde_json::Value>>,
    #[serde(rename = "ERROR")]
    pub error: bool,
    #[serde(rename = "DUPLICATE", skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PrintResponse {
    Success(PrintSuccess),
    Failure(PrintFailure),
}

impl PrintResponse {
    fn success(data: Arc<serde_json::Value>) -> Self {
        PrintResponse::Success(PrintSuccess {
            success: true,
            id: data.get("id").cloned(),
            data,
        })
    }

    fn failure(data: Option<Arc<serde_json::Value>>, error_message: impl Into<String>) -> Self {
        PrintResponse::Failure(PrintFailure {
            data,
            error: true,
            duplicate: false,
            error_message: error_message.into(),
        })
    }

    fn duplicate(data: Arc<serde_json::Value>, job_id: &str) -> Self {
        PrintResponse::Failure(PrintFailure {
            data: Some(data),
            error: true,
            duplicate: true,
            error_message: format!("duplicate print request: {}", job_id),
        })
    }
}

/// Diagnostics snapshot
#[derive(Debug, Serialize, Deserialize)]
pub struct PrintLogsResponse {
    pub queue: QueueSnapshot,
    pub outcomes: Vec<JobOutcome>,
    pub uptime_secs: u64,
}

/// Extract the bytes from `data:<mime>;base64,<payload>`.
pub fn decode_image_payload(data_url: &str) -> Result<Vec<u8>> {
    let (_, payload) = data_url.split_once(',').ok_or_else(|| {
        DaemonError::InvalidInput("image must be a base64 data URL".to_string())
    })?;

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = LENIENT_BASE64.decode(compact)?;

    if bytes.is_empty() {
        return Err(DaemonError::InvalidInput("image payload is empty".to_string()));
    }

    Ok(bytes)
}

/// Validate a `/print` body and turn it into a queued job.
/// Everything here fails before the dedup window or the device is touched.
fn build_print_job(body: Arc<serde_json::Value>) -> Result<PrintJob> {
    let request = PrintRequest::deserialize(&*body)?;
    let image = decode_image_payload(request.image()?)?;
    let printer = request.printer()?;
    PrinterEndpoint::from_config(&printer)?;

    Ok(PrintJob::new(request.job_key(), image, printer, body))
}

/// POST /print - Deduplicate, queue and wait for the print outcome
async fn handle_print(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Json<PrintResponse> {
    let body = match payload {
        Ok(Json(body)) => Arc::new(body),
        Err(rejection) => {
            warn!("Rejected /print body: {}", rejection.body_text());
            return Json(PrintResponse::failure(None, rejection.body_text()));
        }
    };

    let job = match build_print_job(body.clone()) {
        Ok(job) => job,
        Err(e) => {
            warn!(category = ?e.category(), "Print request rejected: {}", e);
            return Json(PrintResponse::failure(Some(body), e.client_message()));
        }
    };

    let job_id = job.id.clone();
    let accepted = state.dedup.lock().await.should_accept(job_id.as_deref());
    if !accepted {
        let job_id = job_id.unwrap_or_default();
        info!("Duplicate print request ignored: {}", job_id);
        return Json(PrintResponse::duplicate(body, &job_id));
    }

    debug!("Print request accepted: {:?} (trace {})", job_id, job.trace_id);

    let ticket = match state.queue.enqueue(job) {
        Ok(ticket) => ticket,
        Err(e) => {
            error!("Print queue unavailable: {}", e);
            release_job_id(&state.dedup, job_id.as_deref()).await;
            return Json(PrintResponse::failure(Some(body), e.client_message()));
        }
    };

    // Settled on its own task so the id is released even if the client
    // disconnects and this handler is dropped mid-job.
    let dedup = state.dedup.clone();
    let settled = tokio::spawn(async move {
        let outcome = ticket.outcome().await;
        if !matches!(&outcome, Ok(o) if o.success) {
            release_job_id(&dedup, job_id.as_deref()).await;
        }
        outcome
    });

    let failure = match settled.await {
        Ok(Ok(outcome)) if outcome.success => return Json(PrintResponse::success(body)),
        Ok(Ok(outcome)) => outcome
            .error_message
            .unwrap_or_else(|| "Print job failed".to_string()),
        Ok(Err(e)) => {
            error!("Print queue unavailable: {}", e);
            e.client_message()
        }
        Err(e) => {
            error!("Print outcome task failed: {}", e);
            format!("Print outcome task failed: {}", e)
        }
    };

    Json(PrintResponse::failure(Some(body), failure))
}

/// A failed print may be retried with the same id
async fn release_job_id(dedup: &Mutex<DedupGuard>, job_id: Option<&str>) {
    if let Some(job_id) = job_id {
        if dedup.lock().await.forget(job_id) {
            debug!("Released id {} after failed print", job_id);
        }
    }
}

/// POST /test - Print immediately, bypassing dedup and the queue
async fn handle_test(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Json<PrintResponse> {
    let body = match payload {
        Ok(Json(body)) => Arc::new(body),
        Err(rejection) => return Json(PrintResponse::failure(None, rejection.body_text())),
    };

    match test_print(&state, &body).await {
        Ok(()) => {
            info!("Test print completed");
            Json(PrintResponse::success(body))
        }
        Err(e) => {
            // Client mistakes are not crash reports
            match e.category() {
                ErrorCategory::Input | ErrorCategory::Configuration => {
                    warn!(category = ?e.category(), "Test print rejected: {}", e)
                }
                _ => error!(category = ?e.category(), "Test print failed: {}", e),
            }
            Json(PrintResponse::failure(None, e.client_message()))
        }
    }
}

async fn test_print(state: &ApiState, body: &serde_json::Value) -> Result<()> {
    let request = PrintRequest::deserialize(body)?;
    let image = request.image()?;
    let printer = request.printer()?;
    let bytes = decode_image_payload(image)?;

    tokio::time::timeout(state.job_timeout, state.driver.print_image(&printer, &bytes))
        .await
        .map_err(|_| {
            DaemonError::Timeout(format!(
                "Test print did not finish within {}ms",
                state.job_timeout.as_millis()
            ))
        })?
}

/// POST /health-check - Probe the printer described by the body
async fn handle_health_check(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Json<serde_json::Value> {
    let (body, probe) = match payload {
        Ok(Json(body)) => {
            let probe = match PrinterConfig::deserialize(&body) {
                Ok(printer) => state.driver.is_connected(&printer).await,
                Err(e) => Err(DaemonError::Json(e)),
            };
            (body, probe)
        }
        Err(rejection) => (
            serde_json::Value::Null,
            Err(DaemonError::InvalidInput(rejection.body_text())),
        ),
    };

    let mut response = match body {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    match probe {
        Ok(connected) => {
            response.insert("connected".to_string(), connected.into());
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            response.insert("connected".to_string(), false.into());
            response.insert("ERROR".to_string(), true.into());
            response.insert("errorMessage".to_string(), e.client_message().into());
        }
    }

    Json(serde_json::Value::Object(response))
}

/// GET / - Liveness
async fn handle_root() -> &'static str {
    "Receipt print server is running!"
}

/// GET /print-logs - Queue state and recent outcomes
async fn handle_print_logs(State(state): State<ApiState>) -> Json<PrintLogsResponse> {
    Json(PrintLogsResponse {
        queue: state.queue.snapshot(),
        outcomes: state.outcomes.read().await.entries(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Create HTTP API router
pub fn create_router(state: ApiState, config: &AppConfig) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/print", post(handle_print))
        .route("/test", post(handle_test))
        .route("/health-check", post(handle_health_check))
        .route("/print-logs", get(handle_print_logs))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.cors_origins)),
        )
        .with_state(state)
}

/// Start HTTP API server; returns once `shutdown` resolves and
/// in-flight requests have drained.
pub async fn start_api_server<F>(config: &AppConfig, state: ApiState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);

    info!("Starting HTTP API server on {}", config.bind_address);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!("HTTP API server error: {}", e);
            DaemonError::Io(e)
        })
}
