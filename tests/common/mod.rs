// Common test utilities and fixtures

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use receipt_print_server::api::{create_router, ApiState};
use receipt_print_server::config::{AppConfig, PrinterConfig};
use receipt_print_server::errors::{DaemonError, Result};
use receipt_print_server::printer::PrintDriver;
use receipt_print_server::queue::PrintJob;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// Recording driver for testing.
///
/// Jobs are identified by their image bytes read as UTF-8, so tests can
/// print "a", "b", "c" and assert on the order the device saw them.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct MockDriver {
    state: Arc<MockState>,
    delay: Duration,
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    offline: AtomicBool,
}

/// Decrements the in-flight count even when the print future is dropped
struct InFlight<'a>(&'a MockState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every print takes `delay` to complete
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_on(&self, marker: &str) {
        self.state.failing.lock().unwrap().insert(marker.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.failing.lock().unwrap().clear();
    }

    /// The print never completes
    pub fn hang_on(&self, marker: &str) {
        self.state.hanging.lock().unwrap().insert(marker.to_string());
    }

    pub fn set_online(&self, online: bool) {
        self.state.offline.store(!online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrintDriver for MockDriver {
    async fn print_image(&self, _printer: &PrinterConfig, image: &[u8]) -> Result<()> {
        let marker = String::from_utf8_lossy(image).to_string();

        let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.state);
        self.state.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.state.calls.lock().unwrap().push(marker.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let hangs = self.state.hanging.lock().unwrap().contains(&marker);
        if hangs {
            std::future::pending::<()>().await;
        }

        let fails = self.state.failing.lock().unwrap().contains(&marker);
        if fails {
            return Err(DaemonError::Network(format!("Simulated printer failure: {}", marker)));
        }

        Ok(())
    }

    async fn is_connected(&self, printer: &PrinterConfig) -> Result<bool> {
        if printer.tcp_address.is_none() {
            return Err(DaemonError::Config("Printer TCP address is not defined.".to_string()));
        }
        Ok(!self.state.offline.load(Ordering::SeqCst))
    }
}

/// Small limits so timeout tests finish quickly
#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        bind_address: "127.0.0.1:0".to_string(),
        job_timeout_ms: 2_000,
        connect_timeout_ms: 500,
        write_timeout_ms: 500,
        probe_timeout_ms: 500,
        ..AppConfig::default()
    }
}

#[allow(dead_code)]
pub fn data_url(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

/// Print request whose image decodes to `marker`
#[allow(dead_code)]
pub fn print_body(id: serde_json::Value, marker: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "image": data_url(marker.as_bytes()),
        "printerConfig": { "TCP_ADDRESS": "127.0.0.1:9100" }
    })
}

#[allow(dead_code)]
pub fn job(id: &str) -> PrintJob {
    PrintJob::new(
        Some(id.to_string()),
        id.as_bytes().to_vec(),
        PrinterConfig::with_address("127.0.0.1:9100"),
        Arc::new(serde_json::json!({ "id": id })),
    )
}

#[allow(dead_code)]
pub fn test_app(config: &AppConfig, driver: Arc<dyn PrintDriver>) -> (Router, ApiState) {
    let (state, _dispatcher) = ApiState::new(config, driver);
    (create_router(state.clone(), config), state)
}

#[allow(dead_code)]
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> serde_json::Value {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[allow(dead_code)]
pub async fn get_json(app: Router, uri: &str) -> serde_json::Value {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Encoded PNG of a solid black block
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::GrayImage::from_pixel(width, height, image::Luma([0]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
