//! Per-URL pipeline: download → gunzip → streaming parse.
//!
//! One attempt is a single composed data path; the whole path is retried on
//! transient failures, with the result buffer reset so a replayed attempt
//! cannot double-emit. A reversed-section document triggers a full re-fetch
//! within the same attempt, carrying the provider index built on the first
//! pass.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rateline_core::cancel::CancelToken;
use rateline_core::progress::Tracker;
use rateline_core::retry::{retry_with_backoff, Retryable};
use rateline_core::stream::{open_gzip_reader, GzipMode, StreamError};

use crate::config::SearchConfig;
use crate::parse::{stream_parse, ParseEvents, ParseOutcome};
use crate::token::ParseError;
use crate::types::{NpiSet, ProviderIndex, RateResult};

const MAX_PIPELINE_ATTEMPTS: u32 = 3;

/// Error from processing a single MRF URL.
#[derive(Debug)]
pub enum PipelineError {
    /// Transport failure (network, 5xx, stalled read, 4xx).
    Stream(StreamError),
    /// Compressed payload shorter than the declared Content-Length.
    Truncated { detail: String },
    /// Corrupt or malformed gzip stream.
    Decompress(io::Error),
    /// Structural JSON failure the parser could not skip past.
    Malformed(String),
    /// Out of disk space; retrying cannot help.
    DiskFull(io::Error),
    Cancelled,
    /// A prebuilt-index pass asked for another pass; indicates a bug.
    SecondPassLoop,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "download: {e}"),
            Self::Truncated { detail } => write!(f, "download truncated: {detail}"),
            Self::Decompress(e) => write!(f, "decompression: {e}"),
            Self::Malformed(msg) => write!(f, "parse: {msg}"),
            Self::DiskFull(e) => write!(
                f,
                "disk full: {e} (point --tmp-dir at a larger volume or reduce --workers)"
            ),
            Self::Cancelled => write!(f, "cancelled"),
            Self::SecondPassLoop => {
                write!(f, "second pass requested another pass; file is inconsistent")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_retryable(),
            Self::Truncated { .. } | Self::Decompress(_) => true,
            Self::Malformed(_) | Self::DiskFull(_) | Self::Cancelled | Self::SecondPassLoop => {
                false
            }
        }
    }
}

impl From<ParseError> for PipelineError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Cancelled => Self::Cancelled,
            ParseError::Truncated => Self::Truncated {
                detail: "decompressed stream ended before the closing brace".to_string(),
            },
            ParseError::Malformed { offset, msg } => {
                Self::Malformed(format!("malformed JSON at byte {offset}: {msg}"))
            }
            ParseError::Io(e) => Self::from_io(e),
        }
    }
}

impl PipelineError {
    /// Classify an I/O error bubbling out of the read stack. Gzip decoders
    /// surface corrupt input as InvalidData/InvalidInput.
    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::StorageFull => Self::DiskFull(e),
            io::ErrorKind::Interrupted => Self::Cancelled,
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => Self::Decompress(e),
            _ => Self::Stream(StreamError::Io(e)),
        }
    }
}

/// Results of processing a single MRF file.
#[derive(Debug)]
pub struct PipelineResult {
    pub url: String,
    pub results: Vec<RateResult>,
    pub err: Option<PipelineError>,
}

impl PipelineResult {
    pub(crate) fn pending(url: &str) -> Self {
        Self {
            url: url.to_string(),
            results: Vec::new(),
            err: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

/// Per-attempt scan counters, shared between the parse-event adapter and the
/// emit callback.
#[derive(Default)]
struct Counters {
    refs_scanned: AtomicU64,
    codes_scanned: AtomicU64,
}

/// Bridges parser callbacks onto the progress tracker.
struct TrackerEvents<'a> {
    tracker: &'a dyn Tracker,
    counters: &'a Counters,
}

impl ParseEvents for TrackerEvents<'_> {
    fn on_ref_scanned(&self) {
        let n = self.counters.refs_scanned.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 10_000 == 0 {
            self.tracker.set_counter("refs_scanned", n);
        }
    }

    fn on_code_scanned(&self) {
        let n = self.counters.codes_scanned.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 10_000 == 0 {
            self.tracker.set_counter("codes_scanned", n);
        }
    }

    fn on_stage_change(&self, stage: &str) {
        self.tracker.set_stage(stage);
    }

    fn on_warning(&self, msg: &str) {
        self.tracker.warn(msg);
    }
}

/// Process one MRF URL end to end. Never panics on bad input; all failure
/// detail lands in the returned result's `err`.
pub fn run_pipeline(
    url: &str,
    target: &NpiSet,
    config: &SearchConfig,
    tracker: Arc<dyn Tracker>,
    cancel: &CancelToken,
) -> PipelineResult {
    let results: Mutex<Vec<RateResult>> = Mutex::new(Vec::new());

    let attempt_outcome = retry_with_backoff(
        MAX_PIPELINE_ATTEMPTS,
        cancel,
        |_attempt, is_final| {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            // A failed attempt may have emitted partial results.
            results.lock().unwrap().clear();

            // The pipelined decoder is faster but has been seen to go wrong
            // on badly segmented CDN streams; the last attempt (and
            // --serial-gzip) decodes inline instead.
            let mode = if config.serial_gzip || is_final {
                GzipMode::Serial
            } else {
                GzipMode::Pipelined
            };
            run_attempt(url, target, config, mode, &tracker, &results, cancel)
        },
        |attempt, err, delay| {
            tracker.warn(&format!(
                "Attempt {attempt}/{MAX_PIPELINE_ATTEMPTS} failed: {err}"
            ));
            tracker.set_stage(&format!(
                "Retry {}/{} (waiting {}s)",
                attempt + 1,
                MAX_PIPELINE_ATTEMPTS,
                delay.as_secs()
            ));
        },
    );

    let results = results.into_inner().unwrap();
    match attempt_outcome {
        Ok(()) => {
            if results.is_empty() {
                tracker.set_stage("Done (no matches)");
            } else {
                tracker.set_stage(&format!("Done ({} rates)", results.len()));
            }
            PipelineResult {
                url: url.to_string(),
                results,
                err: None,
            }
        }
        Err(err) => PipelineResult {
            url: url.to_string(),
            results: Vec::new(),
            err: Some(err),
        },
    }
}

/// One full attempt: first pass, plus the re-download pass when the document
/// stores in_network ahead of provider_references.
fn run_attempt(
    url: &str,
    target: &NpiSet,
    config: &SearchConfig,
    mode: GzipMode,
    tracker: &Arc<dyn Tracker>,
    results: &Mutex<Vec<RateResult>>,
    cancel: &CancelToken,
) -> Result<(), PipelineError> {
    tracker.set_stage("Streaming");

    let counters = Counters::default();
    let events = TrackerEvents {
        tracker: tracker.as_ref(),
        counters: &counters,
    };
    let emit = |r: RateResult| {
        let n = {
            let mut buf = results.lock().unwrap();
            buf.push(r);
            buf.len() as u64
        };
        tracker.set_counter("rates_found", n);
    };

    let outcome = fetch_and_parse(url, target, config, mode, tracker, &events, &emit, None, cancel)?;
    tracker.set_counter("npi_matches", outcome.providers.len() as u64);
    tracker.set_counter("refs_scanned", counters.refs_scanned.load(Ordering::Relaxed));
    tracker.set_counter("codes_scanned", counters.codes_scanned.load(Ordering::Relaxed));

    if outcome.need_second_pass {
        tracker.set_stage("Re-downloading for in_network");
        let second = fetch_and_parse(
            url,
            target,
            config,
            mode,
            tracker,
            &events,
            &emit,
            Some(&outcome.providers),
            cancel,
        )?;
        if second.need_second_pass {
            return Err(PipelineError::SecondPassLoop);
        }
    }

    Ok(())
}

/// Compose fetch → byte accounting → gunzip → parse for one pass, then
/// verify the full declared compressed payload was consumed.
#[allow(clippy::too_many_arguments)]
fn fetch_and_parse(
    url: &str,
    target: &NpiSet,
    config: &SearchConfig,
    mode: GzipMode,
    tracker: &Arc<dyn Tracker>,
    events: &dyn ParseEvents,
    emit: &(dyn Fn(RateResult) + Sync),
    prebuilt: Option<&ProviderIndex>,
    cancel: &CancelToken,
) -> Result<ParseOutcome, PipelineError> {
    let progress_tracker = tracker.clone();
    let (mut reader, counter, content_length) = open_gzip_reader(
        url,
        mode,
        cancel,
        move |downloaded, total| progress_tracker.set_progress(downloaded, total),
    )
    .map_err(|e| match e {
        // Interrupted here means the cancel token fired during the fetch.
        StreamError::Io(io) => PipelineError::from_io(io),
        other => PipelineError::Stream(other),
    })?;

    let outcome = stream_parse(
        &mut reader,
        target,
        url,
        events,
        emit,
        prebuilt,
        &config.parse_options(),
        cancel,
    )?;

    // Drain trailing whitespace and the gzip trailer so the byte count
    // reflects the whole compressed stream.
    io::copy(&mut reader, &mut io::sink()).map_err(PipelineError::from_io)?;

    if let Some(total) = content_length {
        let got = counter.load(Ordering::Relaxed);
        if got != total {
            return Err(PipelineError::Truncated {
                detail: format!("got {got} of {total} compressed bytes"),
            });
        }
    }

    Ok(outcome)
}

/// Human-readable filename portion of a URL (query string stripped).
pub fn file_name_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_strips_query() {
        assert_eq!(
            file_name_from_url("https://cdn.example.com/mrf/2025-07_plan.json.gz?Expires=1&Signature=abc"),
            "2025-07_plan.json.gz"
        );
    }

    #[test]
    fn file_name_plain_path() {
        assert_eq!(
            file_name_from_url("https://example.com/a/b/file.json.gz"),
            "file.json.gz"
        );
    }

    #[test]
    fn file_name_no_path() {
        assert_eq!(file_name_from_url("file.json.gz"), "file.json.gz");
    }

    #[test]
    fn parse_errors_map_to_taxonomy() {
        let e: PipelineError = ParseError::Truncated.into();
        assert!(matches!(e, PipelineError::Truncated { .. }));
        assert!(e.is_retryable());

        let e: PipelineError = ParseError::Malformed {
            offset: 7,
            msg: "x".to_string(),
        }
        .into();
        assert!(matches!(e, PipelineError::Malformed(_)));
        assert!(!e.is_retryable());

        let e: PipelineError = ParseError::Cancelled.into();
        assert!(!e.is_retryable());
    }

    #[test]
    fn io_errors_classify_by_kind() {
        let e = PipelineError::from_io(io::Error::new(io::ErrorKind::InvalidData, "corrupt gzip"));
        assert!(matches!(e, PipelineError::Decompress(_)));
        assert!(e.is_retryable());

        let e = PipelineError::from_io(io::Error::new(io::ErrorKind::StorageFull, "full"));
        assert!(matches!(e, PipelineError::DiskFull(_)));
        assert!(!e.is_retryable());

        let e = PipelineError::from_io(io::Error::new(io::ErrorKind::TimedOut, "stall"));
        assert!(matches!(e, PipelineError::Stream(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn second_pass_loop_not_retryable() {
        assert!(!PipelineError::SecondPassLoop.is_retryable());
    }
}
