//! rateline — search CMS price-transparency MRF files by NPI

mod cli;
mod output;
mod registry;
mod summary;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use rateline_core::cancel::CancelToken;
use rateline_core::logging::init_logging;
use rateline_core::progress::{human_bytes, InteractiveSink, LogSink, ProgressSink, Tracker as _};
use rateline_core::stream::{open_gzip_reader, GzipMode};
use rateline_mrf::{file_name_from_url, FileDefaults, Pool, SearchConfig, DEFAULT_WORKERS};

use crate::cli::{Cli, Command, DownloadArgs, SearchArgs};
use crate::summary::Summary;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Search(args) => run_search(args, cli.quiet, cli.verbose),
        Command::Download(args) => run_download(args, cli.quiet, cli.verbose),
    }
}

fn run_search(args: SearchArgs, quiet: bool, verbose: bool) -> ExitCode {
    // Pick the progress backend first: the logging bridge needs the
    // MultiProgress handle when bars are active.
    let interactive = if args.log_progress {
        None
    } else if args.no_progress {
        Some(InteractiveSink::hidden())
    } else {
        Some(InteractiveSink::new())
    };
    let multi = interactive
        .as_ref()
        .filter(|s| s.is_enabled())
        .map(|s| s.multi());
    init_logging(quiet, verbose, multi);

    let log_sink = LogSink;
    let sink: &dyn ProgressSink = match &interactive {
        Some(s) => s,
        None => &log_sink,
    };
    let is_tty = interactive.as_ref().is_some_and(|s| s.is_enabled());

    let cancel = CancelToken::new();
    setup_signal_handler(&cancel);

    match search(args, sink, is_tty, &cancel) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn search(
    args: SearchArgs,
    sink: &dyn ProgressSink,
    is_tty: bool,
    cancel: &CancelToken,
) -> anyhow::Result<ExitCode> {
    let urls = if args.url.is_empty() {
        let path = args.urls_file.as_deref().expect("clap enforces a source");
        read_urls(path)?
    } else {
        args.url.clone()
    };
    anyhow::ensure!(!urls.is_empty(), "no URLs to search");

    let target: rateline_mrf::NpiSet = args.npi.iter().copied().collect();

    // Show who we are searching for before committing bandwidth.
    if !args.no_lookup {
        let not_found = registry::print_provider_info(&args.npi);
        if !not_found.is_empty() && !registry::confirm_continue(&not_found) {
            anyhow::bail!(
                "aborted: {} NPI(s) not found in NPPES registry",
                not_found.len()
            );
        }
    }

    let mut config = SearchConfig {
        workers: args.workers.unwrap_or(DEFAULT_WORKERS),
        serial_gzip: args.serial_gzip,
        skip_unreferenced_in_network: args.skip_unreferenced,
        element_workers: args.element_workers,
        tmp_dir: args.tmp_dir.clone(),
    };
    let defaults = FileDefaults::load().map_err(anyhow::Error::msg)?;
    defaults.apply(&mut config, args.workers.is_some());

    log::info!(
        "searching {} file(s) with {} worker(s), {} gzip decoder",
        urls.len(),
        config.workers,
        if config.serial_gzip { "serial" } else { "pipelined" }
    );

    let start = Instant::now();
    let pool = Pool {
        target: &target,
        config: &config,
        progress: sink,
    };
    let results = pool.run(&urls, cancel);
    let duration = start.elapsed();

    let mut all_rates = Vec::new();
    let mut matched_files = 0;
    let mut failed_files = 0;
    for result in results {
        if let Some(err) = &result.err {
            failed_files += 1;
            log::error!("Error processing {}: {err}", file_name_from_url(&result.url));
            continue;
        }
        if !result.results.is_empty() {
            matched_files += 1;
            all_rates.extend(result.results);
        }
    }

    let summary = Summary {
        searched_files: urls.len(),
        matched_files,
        failed_files,
        rates_found: all_rates.len(),
        duration_seconds: duration.as_secs_f64(),
    };
    let params = summary.params(args.npi.clone());

    output::write_results(&args.output, params, all_rates).context("writing output")?;

    if is_tty {
        summary.print();
    } else {
        summary.log();
    }
    log::info!("results written to {}", args.output.display());

    // Per-URL failures are reported above but do not fail the run.
    if cancel.is_cancelled() {
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_download(args: DownloadArgs, quiet: bool, verbose: bool) -> ExitCode {
    let sink = InteractiveSink::new();
    let multi = if sink.is_enabled() {
        Some(sink.multi())
    } else {
        None
    };
    init_logging(quiet, verbose, multi);

    let cancel = CancelToken::new();
    setup_signal_handler(&cancel);

    match download(args, &sink, &cancel) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn download(
    args: DownloadArgs,
    sink: &InteractiveSink,
    cancel: &CancelToken,
) -> anyhow::Result<ExitCode> {
    let name = file_name_from_url(&args.url).to_string();
    let dest: PathBuf = args
        .output
        .unwrap_or_else(|| PathBuf::from(name.strip_suffix(".gz").unwrap_or(&name)));

    let tracker = sink.tracker(0, 1, &name);
    tracker.set_stage("Downloading");

    let mode = if args.serial_gzip {
        GzipMode::Serial
    } else {
        GzipMode::Pipelined
    };
    let progress = tracker.clone();
    let start = Instant::now();
    let (mut reader, counter, total) = open_gzip_reader(&args.url, mode, cancel, move |c, t| {
        progress.set_progress(c, t)
    })
    .map_err(anyhow::Error::new)
    .context("download failed")?;

    let mut file = std::fs::File::create(&dest)
        .with_context(|| format!("creating {}", dest.display()))?;
    let written = std::io::copy(&mut reader, &mut file)
        .with_context(|| format!("writing {}", dest.display()))?;
    tracker.done();

    if let Some(total) = total {
        let got = counter.load(Ordering::Relaxed);
        anyhow::ensure!(
            got == total,
            "download truncated: got {got} of {total} compressed bytes"
        );
    }

    log::info!(
        "downloaded and decompressed in {:.0?}",
        start.elapsed()
    );
    log::info!(
        "  compressed:   {}",
        human_bytes(counter.load(Ordering::Relaxed))
    );
    log::info!("  decompressed: {}", human_bytes(written));
    log::info!("  output: {}", dest.display());

    Ok(ExitCode::SUCCESS)
}

/// First signal requests graceful shutdown; the second force-exits.
/// SAFETY comment: the handler only touches an atomic and process::exit,
/// both async-signal-safe.
fn setup_signal_handler(cancel: &CancelToken) {
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let token = cancel.clone();
        unsafe {
            signal_hook::low_level::register(sig, move || {
                if !token.cancel_once() {
                    std::process::exit(130);
                }
            })
            .expect("failed to register signal handler");
        }
    }
}

/// Read MRF URLs, one per line. Blank lines and `#` comments are skipped;
/// lines can be very long (signed CDN URLs run to a megabyte).
fn read_urls(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading URLs from {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_urls_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(
            &path,
            "# plan A\nhttps://a.example/one.json.gz\n\n  https://a.example/two.json.gz  \n#tail\n",
        )
        .unwrap();
        let urls = read_urls(&path).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://a.example/one.json.gz".to_string(),
                "https://a.example/two.json.gz".to_string(),
            ]
        );
    }

    #[test]
    fn read_urls_missing_file_is_an_error() {
        assert!(read_urls(Path::new("/definitely/not/here.txt")).is_err());
    }
}
