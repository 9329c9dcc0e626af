//! Rateline Core - Common infrastructure for MRF streaming pipelines
//!
//! This crate provides the transport and concurrency plumbing shared by the
//! MRF search pipeline: HTTP streaming, gzip decompression, retry, a counting
//! semaphore, cancellation, and progress reporting.

pub mod cancel;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod semaphore;
pub mod stream;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use logging::{init_logging, IndicatifLogger};
pub use progress::{human_bytes, human_count, InteractiveSink, LogSink, ProgressSink, Tracker};
pub use retry::backoff_duration;
pub use semaphore::Semaphore;
pub use stream::{
    http_client, http_config, open_gzip_reader, set_http_config, ByteCounter, GzipMode,
    GzipReader, HttpConfig, StreamError, SHARED_RUNTIME,
};
