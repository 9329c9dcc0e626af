//! Output serialization for search results

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use rateline_mrf::{RateResult, SearchOutput, SearchParams};

/// Write the final JSON document to `path`, or stdout when the path is "-".
/// `results` is always serialized as an array, never null.
pub fn write_results(
    path: &Path,
    params: SearchParams,
    results: Vec<RateResult>,
) -> anyhow::Result<()> {
    let output = SearchOutput {
        search_params: params,
        results,
    };
    let data = serde_json::to_string_pretty(&output).context("serializing results")?;

    if path.as_os_str() == "-" {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(data.as_bytes())?;
        stdout.write_all(b"\n")?;
        return Ok(());
    }

    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))
}
