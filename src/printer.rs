use crate::config::{AppConfig, PrinterConfig};
use crate::errors::{DaemonError, Result};
use crate::escpos::{format_image_receipt, PaperWidth};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use url::Url;

/// Raw-socket port most thermal printers listen on
pub const DEFAULT_PRINTER_PORT: u16 = 9100;

/// Hardware-facing operations the print queue and HTTP surface rely on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrintDriver: Send + Sync {
    /// Render `image` (PNG/JPEG/... bytes) and print it, followed by a cut
    /// and a beep, as one operation.
    async fn print_image(&self, printer: &PrinterConfig, image: &[u8]) -> Result<()>;

    /// Non-destructive liveness probe. Unreachable devices yield `Ok(false)`.
    async fn is_connected(&self, printer: &PrinterConfig) -> Result<bool>;
}

/// Resolved network location of a printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterEndpoint {
    host: String,
    port: u16,
}

impl PrinterEndpoint {
    /// Fails with a configuration error when `TCP_ADDRESS` is missing or unusable.
    pub fn from_config(config: &PrinterConfig) -> Result<Self> {
        let raw = config
            .tcp_address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .ok_or_else(|| DaemonError::Config("Printer TCP address is not defined.".to_string()))?;

        Self::parse(raw)
    }

    /// Accepts `host`, `host:port` and `tcp://host[:port]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("tcp://{}", raw)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| DaemonError::Config(format!("Invalid printer address {:?}: {}", raw, e)))?;

        if url.scheme() != "tcp" {
            return Err(DaemonError::Config(format!(
                "Unsupported printer interface {:?} (only tcp:// is supported)",
                raw
            )));
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| DaemonError::Config(format!("Printer address {:?} has no host", raw)))?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_PRINTER_PORT),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` string suitable for `TcpStream::connect`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PrinterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// Timeouts and defaults for the network driver
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub probe_timeout: Duration,
    pub default_paper_width: PaperWidth,
}

impl DriverOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            write_timeout: config.write_timeout(),
            probe_timeout: config.probe_timeout(),
            default_paper_width: config.default_paper_width,
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// ESC/POS printer reached over raw TCP.
///
/// Opens one connection per operation; the device is only ever driven by
/// the queue's dispatcher (or a `/test` print), so there is nothing to pool.
pub struct NetworkPrinter {
    options: DriverOptions,
}

impl NetworkPrinter {
    pub fn new(options: DriverOptions) -> Self {
        Self { options }
    }

    /// Decode and encode on the blocking pool; large images take a while.
    async fn render(image: &[u8], paper_width: PaperWidth) -> Result<Vec<u8>> {
        let image = image.to_vec();
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&image)?;
            debug!("Decoded image {}x{}", img.width(), img.height());
            Ok::<_, DaemonError>(format_image_receipt(&img, paper_width))
        })
        .await
        .map_err(|e| DaemonError::PrintJob(format!("Image rendering task failed: {}", e)))?
    }

    /// Send the full command stream over a fresh connection.
    ///
    /// Timeouts: connect and write per `DriverOptions`, flush 5s.
    async fn send(&self, endpoint: &PrinterEndpoint, data: &[u8]) -> Result<()> {
        let mut stream = tokio::time::timeout(
            self.options.connect_timeout,
            TcpStream::connect(endpoint.authority()),
        )
        .await
        .map_err(|_| DaemonError::Timeout(format!("Connection timed out to {}", endpoint)))?
        .map_err(|e| DaemonError::Network(format!("Connection to {} failed: {}", endpoint, e)))?;

        tokio::time::timeout(self.options.write_timeout, stream.write_all(data))
            .await
            .map_err(|_| {
                DaemonError::Timeout(format!("Write timed out to {} ({} bytes)", endpoint, data.len()))
            })?
            .map_err(|e| DaemonError::Network(e.to_string()))?;

        tokio::time::timeout(Duration::from_secs(5), stream.flush())
            .await
            .map_err(|_| DaemonError::Timeout(format!("Flush timed out to {}", endpoint)))?
            .map_err(|e| DaemonError::Network(e.to_string()))?;

        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown of connection to {} failed: {} (non-fatal)", endpoint, e);
        }

        Ok(())
    }
}

#[async_trait]
impl PrintDriver for NetworkPrinter {
    #[tracing::instrument(skip_all, fields(address = ?printer.tcp_address, bytes = image.len()))]
    async fn print_image(&self, printer: &PrinterConfig, image: &[u8]) -> Result<()> {
        let endpoint = PrinterEndpoint::from_config(printer)?;
        let paper_width = printer.paper_width.unwrap_or(self.options.default_paper_width);

        let commands = Self::render(image, paper_width).await?;
        debug!("Generated {} bytes of ESC/POS for {}", commands.len(), endpoint);

        self.send(&endpoint, &commands).await?;
        info!("Image printed on {}", endpoint);
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(address = ?printer.tcp_address))]
    async fn is_connected(&self, printer: &PrinterConfig) -> Result<bool> {
        let endpoint = PrinterEndpoint::from_config(printer)?;

        match tokio::time::timeout(
            self.options.probe_timeout,
            TcpStream::connect(endpoint.authority()),
        )
        .await
        {
            Ok(Ok(_)) => {
                debug!("Printer {} reachable", endpoint);
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!("Printer {} unreachable: {}", endpoint, e);
                Ok(false)
            }
            Err(_) => {
                warn!("Printer {} probe timed out", endpoint);
                Ok(false)
            }
        }
    }
}
