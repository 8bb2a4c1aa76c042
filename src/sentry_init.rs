use once_cell::sync::Lazy;
use regex::Regex;
use sentry::{ClientInitGuard, ClientOptions};
use std::env;
use std::sync::Arc;
use tracing::info;

// Compiled once; receipt images arrive as data URLs and must never leave the host
static DATA_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"data:[A-Za-z0-9.+/-]*;base64,[A-Za-z0-9+/=]*")
        .expect("Invalid data URL regex pattern")
});
static BASE64_BLOB_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9+/]{64,}={0,2}").expect("Invalid base64 regex pattern")
});
static IPV4_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}(?::\d{1,5})?\b").expect("Invalid IPv4 regex pattern")
});

/// Initialize Sentry crash reporting
///
/// # Environment Variables
/// - `SENTRY_DSN`: Sentry Data Source Name (required)
/// - `SENTRY_ENVIRONMENT`: Environment name (default: "development")
/// - `SENTRY_RELEASE`: Release version (default: from Cargo.toml)
/// - `SENTRY_TRACES_SAMPLE_RATE`: Performance monitoring sample rate (default: 0.1)
///
/// Returns `None` when no DSN is configured. The guard must be kept alive
/// for the lifetime of the process.
pub fn init() -> Option<ClientInitGuard> {
    let dsn = match env::var("SENTRY_DSN").ok() {
        Some(d) if !d.is_empty() => d,
        _ => {
            info!("Sentry DSN not configured - crash reporting disabled");
            return None;
        }
    };

    let environment = env::var("SENTRY_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    let release = env::var("SENTRY_RELEASE").unwrap_or_else(|_| {
        format!("{}@{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    });
    let traces_sample_rate = env::var("SENTRY_TRACES_SAMPLE_RATE")
        .ok()
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(0.1);

    let guard = sentry::init((
        dsn,
        ClientOptions {
            release: Some(release.into()),
            environment: Some(environment.into()),
            traces_sample_rate,
            attach_stacktrace: true,
            send_default_pii: false,
            before_send: Some(Arc::new(before_send_filter)),
            ..Default::default()
        },
    ));

    info!(
        "Sentry crash reporting initialized (environment: {})",
        guard.options().environment.as_deref().unwrap_or("unknown")
    );

    Some(guard)
}

/// Scrub image payloads and device addresses before an event is sent.
fn before_send_filter(
    mut event: sentry::protocol::Event<'static>,
) -> Option<sentry::protocol::Event<'static>> {
    if let Some(message) = event.message.as_mut() {
        *message = scrub_message(message);
    }

    for exception in &mut event.exception.values {
        if let Some(value) = exception.value.as_mut() {
            *value = scrub_message(value);
        }
    }

    for breadcrumb in &mut event.breadcrumbs.values {
        if let Some(message) = breadcrumb.message.as_mut() {
            *message = scrub_message(message);
        }
    }

    event.tags.insert("server_version".into(), env!("CARGO_PKG_VERSION").into());
    event.tags.insert("platform".into(), std::env::consts::OS.into());
    event.tags.insert("arch".into(), std::env::consts::ARCH.into());

    Some(event)
}

/// Strip receipt images and printer addresses from a message
pub fn scrub_message(message: &str) -> String {
    // Data URLs first so the prefix goes with the payload
    let cleaned = DATA_URL_REGEX.replace_all(message, "[IMAGE_REDACTED]");
    let cleaned = BASE64_BLOB_REGEX.replace_all(&cleaned, "[IMAGE_REDACTED]");
    IPV4_REGEX.replace_all(&cleaned, "[ADDRESS_REDACTED]").to_string()
}

/// Report a failed print job with its trace id; the payload is never attached.
pub fn capture_print_failure(trace_id: &str, error: &str) {
    sentry::with_scope(
        |scope| {
            scope.set_tag("event_type", "print_job_failure");
            scope.set_tag("trace_id", trace_id);
        },
        || {
            sentry::capture_message(
                &format!("Print job failed: {}", scrub_message(error)),
                sentry::Level::Error,
            );
        },
    );
}
