//! HTTP print server that turns base64 receipt images into ESC/POS raster
//! jobs and runs them one at a time against network thermal printers.

pub mod api;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod escpos;
pub mod outcome_log;
pub mod printer;
pub mod queue;
pub mod sentry_init;

pub use errors::{DaemonError, Result};
