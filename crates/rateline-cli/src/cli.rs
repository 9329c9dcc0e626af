//! CLI argument definitions (clap derive)

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "rateline",
    about = "Search CMS price-transparency MRF files for negotiated rates by NPI"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress info logs (only warnings and errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search MRF files for negotiated rates matching the given NPIs
    Search(SearchArgs),
    /// Download and decompress a single MRF file
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["urls_file", "url"])))]
pub struct SearchArgs {
    /// File containing MRF URLs, one per line ('#' comments allowed)
    #[arg(long)]
    pub urls_file: Option<PathBuf>,

    /// MRF URL(s) to search (repeatable)
    #[arg(long)]
    pub url: Vec<String>,

    /// Comma-separated 10-digit NPI numbers to search for
    #[arg(
        long,
        required = true,
        value_delimiter = ',',
        value_parser = clap::value_parser!(u64).range(1_000_000_000..=9_999_999_999)
    )]
    pub npi: Vec<u64>,

    /// Output file path (use '-' for stdout)
    #[arg(short, long, default_value = "results.json")]
    pub output: PathBuf,

    /// Number of concurrent file workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Use the conservative inline gzip decoder for every attempt
    #[arg(long)]
    pub serial_gzip: bool,

    /// Skip in_network when provider_references yields no matches
    /// (faster, but forgoes inline provider_group matches in that file)
    #[arg(long)]
    pub skip_unreferenced: bool,

    /// Element-processing threads per file (default: CPU count)
    #[arg(long)]
    pub element_workers: Option<usize>,

    /// Scratch directory (unused by the streaming pipeline)
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,

    /// Line-based progress logging (for non-TTY environments)
    #[arg(long)]
    pub log_progress: bool,

    /// Disable progress output entirely
    #[arg(long)]
    pub no_progress: bool,

    /// Skip the NPPES registry lookup of target NPIs
    #[arg(long)]
    pub no_lookup: bool,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// MRF URL to download
    pub url: String,

    /// Output file path (default: URL filename without .gz)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Use the conservative inline gzip decoder
    #[arg(long)]
    pub serial_gzip: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn npi_range_is_enforced() {
        let err = Cli::try_parse_from([
            "rateline", "search", "--url", "https://x/y.gz", "--npi", "123",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("123"));
    }

    #[test]
    fn search_requires_a_source() {
        assert!(Cli::try_parse_from(["rateline", "search", "--npi", "1234567890"]).is_err());
    }

    #[test]
    fn npi_list_parses_comma_separated() {
        let cli = Cli::try_parse_from([
            "rateline",
            "search",
            "--url",
            "https://x/y.gz",
            "--npi",
            "1234567890,9876543210",
        ])
        .unwrap();
        let Command::Search(args) = cli.command else {
            panic!("expected search")
        };
        assert_eq!(args.npi, vec![1234567890, 9876543210]);
    }
}
