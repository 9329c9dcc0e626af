//! Rateline MRF - streaming search over CMS in-network-rates files
//!
//! The data path is: HTTP download → gzip decompression → token-level walk
//! of the top-level JSON object → matched rate emission. Two top-level
//! arrays matter: `provider_references` (maps group ids to provider NPIs)
//! and `in_network` (billing codes with negotiated rates that link back to
//! those ids, or carry inline provider groups). Everything else is skipped
//! without being materialized.

pub mod config;
pub mod parse;
pub mod pipeline;
pub mod pool;
pub mod prefilter;
pub mod token;
pub mod types;

pub use config::{FileDefaults, SearchConfig, DEFAULT_WORKERS};
pub use parse::{stream_parse, NoEvents, ParseEvents, ParseOptions, ParseOutcome};
pub use pipeline::{file_name_from_url, run_pipeline, PipelineError, PipelineResult};
pub use pool::Pool;
pub use prefilter::NpiPatterns;
pub use token::ParseError;
pub use types::{
    is_valid_npi, GroupId, InNetworkItem, MatchedProvider, NpiSet, ProviderIndex,
    ProviderReference, RateResult, SearchOutput, SearchParams, Tin, NPI_MAX, NPI_MIN,
};
