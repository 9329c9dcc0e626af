//! Per-URL progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: indicatif progress bars, one per in-flight file.
//! Non-TTY mode: throttled log lines (for CI and cloud workers).

use std::io::IsTerminal;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Minimum interval between emitted log lines per tracker.
const LOG_INTERVAL: Duration = Duration::from_secs(20);

/// Tracks one file's trip through the pipeline.
///
/// Implementations must be callable from the pipeline thread and the
/// parser's element workers concurrently.
pub trait Tracker: Send + Sync {
    fn set_stage(&self, stage: &str);
    /// Byte progress: compressed bytes downloaded out of Content-Length.
    fn set_progress(&self, current: u64, total: Option<u64>);
    fn set_counter(&self, name: &str, value: u64);
    fn warn(&self, msg: &str);
    fn done(&self);
}

/// Hands out per-URL trackers.
pub trait ProgressSink: Send + Sync {
    fn tracker(&self, index: usize, total: usize, name: &str) -> Arc<dyn Tracker>;
}

// ---------------------------------------------------------------------------
// Interactive (indicatif) backend
// ---------------------------------------------------------------------------

/// Pending style — shown before total bytes are known
fn pending_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:<32.dim} {wide_msg:.dim}")
        .expect("invalid template")
}

/// Byte-progress style, once Content-Length is known
fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:<32.dim} {bar:26.green/dim} {binary_bytes:>9}/{binary_total_bytes:9} {binary_bytes_per_sec:>11} {wide_msg:.dim}",
    )
    .expect("invalid template")
    .progress_chars("--")
}

/// Multi-bar progress backend. Off a TTY every tracker is a hidden no-op, so
/// the same sink also serves `--no-progress`.
pub struct InteractiveSink {
    multi: MultiProgress,
    enabled: bool,
}

impl InteractiveSink {
    /// Create a sink, enabling bars only when stderr is a terminal.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            enabled: std::io::stderr().is_terminal(),
        }
    }

    /// A sink whose trackers are all hidden (for `--no-progress`).
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get reference to `MultiProgress` for the log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for InteractiveSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for InteractiveSink {
    fn tracker(&self, index: usize, total: usize, name: &str) -> Arc<dyn Tracker> {
        if !self.enabled {
            return Arc::new(BarTracker {
                pb: ProgressBar::hidden(),
                name: name.to_string(),
                state: Mutex::new(BarState::default()),
            });
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(pending_style());
        pb.set_prefix(format!("[{}/{}] {}", index + 1, total, truncate(name, 24)));
        pb.enable_steady_tick(Duration::from_millis(120));
        Arc::new(BarTracker {
            pb,
            name: name.to_string(),
            state: Mutex::new(BarState::default()),
        })
    }
}

#[derive(Default)]
struct BarState {
    stage: String,
    has_length: bool,
}

struct BarTracker {
    pb: ProgressBar,
    name: String,
    state: Mutex<BarState>,
}

impl Tracker for BarTracker {
    fn set_stage(&self, stage: &str) {
        let mut st = self.state.lock().unwrap();
        st.stage = stage.to_string();
        self.pb.set_message(stage.to_string());
    }

    fn set_progress(&self, current: u64, total: Option<u64>) {
        let mut st = self.state.lock().unwrap();
        if let Some(total) = total {
            if !st.has_length {
                st.has_length = true;
                self.pb.set_length(total);
                self.pb.set_style(bar_style());
            }
        }
        self.pb.set_position(current);
    }

    fn set_counter(&self, name: &str, value: u64) {
        let st = self.state.lock().unwrap();
        self.pb
            .set_message(format!("{}  {}: {}", st.stage, name, human_count(value)));
    }

    fn warn(&self, msg: &str) {
        // Routed through the log facade so the indicatif bridge can print
        // above active bars.
        log::warn!("[{}] {}", self.name, msg);
    }

    fn done(&self) {
        self.pb.finish();
    }
}

// ---------------------------------------------------------------------------
// Line-log backend
// ---------------------------------------------------------------------------

/// Throttled line-based progress for non-interactive environments. One
/// status line per tracker per `LOG_INTERVAL`, via the log facade.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn tracker(&self, index: usize, total: usize, name: &str) -> Arc<dyn Tracker> {
        Arc::new(LogTracker {
            label: format!("[{}/{}] [{}]", index + 1, total, name),
            start: Instant::now(),
            state: Mutex::new(LogState::default()),
        })
    }
}

#[derive(Default)]
struct LogState {
    stage: String,
    last_line: Option<Instant>,
    prev_bytes: u64,
    prev_time: Option<Instant>,
}

struct LogTracker {
    label: String,
    start: Instant,
    state: Mutex<LogState>,
}

impl LogTracker {
    fn throttled(&self, st: &mut LogState) -> bool {
        match st.last_line {
            Some(t) if t.elapsed() < LOG_INTERVAL => true,
            _ => {
                st.last_line = Some(Instant::now());
                false
            }
        }
    }
}

impl Tracker for LogTracker {
    fn set_stage(&self, stage: &str) {
        let mut st = self.state.lock().unwrap();
        st.stage = stage.to_string();
        st.last_line = None; // next progress update prints immediately
        st.prev_bytes = 0;
        st.prev_time = None;
        log::info!("{} {}", self.label, stage);
    }

    fn set_progress(&self, current: u64, total: Option<u64>) {
        let mut st = self.state.lock().unwrap();
        if self.throttled(&mut st) {
            return;
        }

        let now = Instant::now();
        let speed = match st.prev_time {
            Some(prev) => {
                let secs = now.duration_since(prev).as_secs_f64();
                if secs > 0.0 {
                    format!(
                        "  {:.1} MB/s",
                        (current.saturating_sub(st.prev_bytes)) as f64 / secs / (1024.0 * 1024.0)
                    )
                } else {
                    String::new()
                }
            }
            None => String::new(),
        };
        st.prev_bytes = current;
        st.prev_time = Some(now);

        match total {
            Some(total) if total > 0 => {
                let pct = current as f64 / total as f64 * 100.0;
                log::info!(
                    "{} {}  {} / {} ({pct:.0}%){speed}",
                    self.label,
                    st.stage,
                    human_bytes(current),
                    human_bytes(total)
                );
            }
            _ if current > 0 => {
                log::info!("{} {}  {}{speed}", self.label, st.stage, human_bytes(current));
            }
            _ => {}
        }
    }

    fn set_counter(&self, name: &str, value: u64) {
        let mut st = self.state.lock().unwrap();
        if self.throttled(&mut st) {
            return;
        }
        log::info!("{} {}  {}: {}", self.label, st.stage, name, human_count(value));
    }

    fn warn(&self, msg: &str) {
        log::warn!("{} {}", self.label, msg);
    }

    fn done(&self) {
        log::info!(
            "{} finished in {:.0?}",
            self.label,
            self.start.elapsed()
        );
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Format a byte count as a human-readable string (e.g. "1.5 GB").
pub fn human_bytes(b: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;
    match b {
        _ if b >= TB => format!("{:.1} TB", b as f64 / TB as f64),
        _ if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        _ if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        _ if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        _ => format!("{b} B"),
    }
}

/// Format a number with thousand separators.
pub fn human_count(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
