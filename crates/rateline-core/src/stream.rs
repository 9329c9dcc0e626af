//! HTTP streaming with gzip decompression and stall detection.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall
//! detection, but presents a sync Read interface for the streaming parser.

use std::io::{self, BufReader, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, LazyLock, OnceLock};
use std::task::Context;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};

use crate::cancel::CancelToken;

/// Buffer size for decompressed stream reads (256KB)
pub const GZIP_BUF_SIZE: usize = 256 * 1024;

/// Readahead depth of the pipelined decoder, in GZIP_BUF_SIZE chunks.
const PIPELINE_DEPTH: usize = 4;

/// HTTP transport tunables.
///
/// The overall deadline is hours because a 40 GB compressed file on a slow
/// CDN can legitimately take that long. Stall detection is separate: a read
/// that produces no bytes for `read_timeout` fails with a retryable timeout.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub overall_deadline: Duration,
    pub pool_idle_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            overall_deadline: Duration::from_secs(6 * 60 * 60),
            pool_idle_timeout: Duration::from_secs(90),
            max_attempts: 3,
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install transport tunables. Must be called before the first request;
/// returns false if the client was already configured.
pub fn set_http_config(cfg: HttpConfig) -> bool {
    HTTP_CONFIG.set(cfg).is_ok()
}

pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Error types for stream operations
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error
    Io(io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // Client errors (expired signed URLs, bad requests) never recover
            Self::Http { status, .. } => !matches!(status, Some(400..=499)),
            Self::Io(e) => e.kind() != io::ErrorKind::StorageFull,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    let cfg = http_config();
    reqwest::Client::builder()
        .connect_timeout(cfg.connect_timeout)
        .timeout(cfg.overall_deadline)
        .pool_idle_timeout(cfg.pool_idle_timeout)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Gzip decode strategy for a pipeline attempt.
///
/// Pipelined runs the decoder on its own thread with bounded readahead so
/// download+decompress overlap with parsing. Serial decodes inline; slower,
/// but the conservative choice for CDN streams that have produced corrupt
/// pipelined reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GzipMode {
    #[default]
    Pipelined,
    Serial,
}

/// Buffered reader over a decompressed HTTP body.
pub type GzipReader = BufReader<Box<dyn Read + Send>>;

/// Shared byte counter for compressed-payload accounting.
pub type ByteCounter = Arc<AtomicU64>;

/// HTTP GET with retry. Returns a stall-guarded sync reader over the raw
/// (still compressed) body plus the declared Content-Length.
///
/// Transport errors and 5xx responses are retried up to
/// `HttpConfig::max_attempts` with exponential backoff (1s, 2s, 4s); 4xx
/// returns immediately.
pub fn http_get(
    url: &str,
    cancel: &CancelToken,
) -> Result<(TimeoutReader, Option<u64>), StreamError> {
    let cfg = http_config();
    let mut last_err = StreamError::Http {
        status: None,
        message: "no attempts made".to_string(),
    };

    for attempt in 0..cfg.max_attempts {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << (attempt - 1));
            log::debug!("GET retry {attempt}/{} in {delay:?}", cfg.max_attempts - 1);
            if !cancel.sleep(delay) {
                return Err(StreamError::Io(cancelled_error()));
            }
        }
        if cancel.is_cancelled() {
            return Err(StreamError::Io(cancelled_error()));
        }

        let result = SHARED_RUNTIME.handle().block_on(async {
            let response = SHARED_CLIENT
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| StreamError::from_reqwest(&e))?;

            let total_bytes = response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());

            let stream = response.bytes_stream();
            let async_reader = tokio_util::io::StreamReader::new(
                stream.map(|result| result.map_err(io::Error::other)),
            );

            Ok::<_, StreamError>((TimeoutReader::new(Box::pin(async_reader)), total_bytes))
        });

        match result {
            Ok(out) => return Ok(out),
            Err(e) if e.is_retryable() => last_err = e,
            Err(e) => return Err(e),
        }
    }

    Err(last_err)
}

fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "operation cancelled")
}

/// HTTP GET → gunzip → buffered reader, with compressed-byte counting.
///
/// `on_progress` is invoked with (compressed bytes downloaded, total) as the
/// body is consumed; the returned counter exposes the same count for the
/// caller's truncation check.
pub fn open_gzip_reader(
    url: &str,
    mode: GzipMode,
    cancel: &CancelToken,
    on_progress: impl FnMut(u64, Option<u64>) + Send + 'static,
) -> Result<(GzipReader, ByteCounter, Option<u64>), StreamError> {
    let (reader, total_bytes) = http_get(url, cancel)?;

    let counter: ByteCounter = Arc::new(AtomicU64::new(0));
    let counting = CountingReader {
        inner: reader,
        count: counter.clone(),
    };
    let progress = ProgressReader {
        inner: counting,
        count: counter.clone(),
        total: total_bytes,
        callback: Box::new(on_progress),
    };

    let gz = MultiGzDecoder::new(progress);
    let boxed: Box<dyn Read + Send> = match mode {
        GzipMode::Serial => Box::new(gz),
        GzipMode::Pipelined => Box::new(PipelinedReader::spawn(gz)),
    };

    Ok((
        BufReader::with_capacity(GZIP_BUF_SIZE, boxed),
        counter,
        total_bytes,
    ))
}

/// Reader wrapper that tracks bytes read
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Reader wrapper that reports download progress on every read.
struct ProgressReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
    total: Option<u64>,
    callback: Box<dyn FnMut(u64, Option<u64>) + Send>,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            (self.callback)(self.count.load(Ordering::Relaxed), self.total);
        }
        Ok(n)
    }
}

/// Async-to-sync bridge with read timeout.
///
/// Wraps an async reader and provides a sync Read interface. Each read
/// operation has a timeout - if no data arrives within
/// `HttpConfig::read_timeout`, returns TimedOut (which triggers retry).
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
}

impl TimeoutReader {
    fn new(inner: Pin<Box<dyn AsyncRead + Send + Sync>>) -> Self {
        Self { inner }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SHARED_RUNTIME.handle().block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    Pin::as_mut(&mut self.inner).poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            match tokio::time::timeout(http_config().read_timeout, read_future).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "read timeout (no data from server)",
                )),
            }
        })
    }
}

/// Decompression pipelined onto a dedicated thread.
///
/// The thread drains `inner` in GZIP_BUF_SIZE chunks into a bounded channel;
/// the consumer side replays them as a plain Read. Dropping the reader closes
/// the channel and the thread exits on its next send.
pub struct PipelinedReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    pos: usize,
    done: bool,
}

impl PipelinedReader {
    pub fn spawn(mut inner: impl Read + Send + 'static) -> Self {
        let (tx, rx) = std::sync::mpsc::sync_channel::<io::Result<Vec<u8>>>(PIPELINE_DEPTH);
        std::thread::Builder::new()
            .name("gzip-pipeline".to_string())
            .spawn(move || pump(&mut inner, &tx))
            .expect("failed to spawn gzip pipeline thread");
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

fn pump(inner: &mut impl Read, tx: &SyncSender<io::Result<Vec<u8>>>) {
    loop {
        let mut chunk = vec![0u8; GZIP_BUF_SIZE];
        match inner.read(&mut chunk) {
            Ok(0) => {
                // EOF: let the channel close by returning
                return;
            }
            Ok(n) => {
                chunk.truncate(n);
                if tx.send(Ok(chunk)).is_err() {
                    return; // consumer gone
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

impl Read for PipelinedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.current.len() {
            if self.done {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                Err(_) => {
                    // sender dropped: clean EOF
                    self.done = true;
                    return Ok(0);
                }
            }
        }
        let n = (self.current.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_err(status: u16) -> StreamError {
        StreamError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn http_4xx_not_retryable() {
        assert!(!http_err(400).is_retryable());
        assert!(!http_err(403).is_retryable());
        assert!(!http_err(404).is_retryable());
        assert!(!http_err(410).is_retryable());
        assert!(!http_err(429).is_retryable());
    }

    #[test]
    fn http_5xx_retryable() {
        assert!(http_err(500).is_retryable());
        assert!(http_err(503).is_retryable());
    }

    #[test]
    fn http_none_status_retryable() {
        // Network error without status code should be retryable
        let err = StreamError::Http {
            status: None,
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn io_timeout_retryable() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
        assert!(err.is_retryable());
    }

    #[test]
    fn io_storage_full_not_retryable() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", http_err(404)), "HTTP 404: test");
    }

    #[test]
    fn display_http_without_status() {
        let err = StreamError::Http {
            status: None,
            message: "timeout".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP error: timeout");
    }

    #[test]
    fn pipelined_reader_replays_stream() {
        let data: Vec<u8> = (0..GZIP_BUF_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let mut reader = PipelinedReader::spawn(io::Cursor::new(data.clone()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn pipelined_reader_propagates_error() {
        struct FailAfter(usize);
        impl Read for FailAfter {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt"));
                }
                let n = self.0.min(buf.len());
                self.0 -= n;
                buf[..n].fill(0xAB);
                Ok(n)
            }
        }
        let mut reader = PipelinedReader::spawn(FailAfter(10));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn gzip_round_trip_both_modes() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"{\"hello\": [1, 2, 3]}").unwrap();
        let gz = enc.finish().unwrap();

        let mut serial = MultiGzDecoder::new(io::Cursor::new(gz.clone()));
        let mut out = String::new();
        serial.read_to_string(&mut out).unwrap();
        assert_eq!(out, "{\"hello\": [1, 2, 3]}");

        let mut piped = PipelinedReader::spawn(MultiGzDecoder::new(io::Cursor::new(gz)));
        let mut out2 = String::new();
        piped.read_to_string(&mut out2).unwrap();
        assert_eq!(out, out2);
    }
}
