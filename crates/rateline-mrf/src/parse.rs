//! Streaming walk of a top-level MRF object.
//!
//! One forward pass over `{ "provider_references": [...], "in_network":
//! [...], ... }` in whatever order the producer wrote it. provider_references
//! elements build the provider index; in_network elements are matched against
//! it (and against inline provider groups) and emitted. When in_network
//! precedes provider_references the array is skipped and the caller replays
//! the stream with the index built on the first pass.

use std::io::BufRead;
use std::sync::mpsc::sync_channel;
use std::sync::Mutex;

use rateline_core::cancel::CancelToken;
use serde::Deserialize;

use crate::prefilter::NpiPatterns;
use crate::token::{ParseError, Token, TokenReader};
use crate::types::{
    GroupId, InNetworkItem, MatchedProvider, NpiSet, ProviderIndex, ProviderReference, RateResult,
};

/// Progress hooks invoked during the walk. `on_ref_scanned` and
/// `on_code_scanned` fire once per array element before any filtering.
pub trait ParseEvents: Sync {
    fn on_ref_scanned(&self) {}
    fn on_code_scanned(&self) {}
    fn on_stage_change(&self, _stage: &str) {}
    fn on_warning(&self, _msg: &str) {}
}

/// No-op events for tests and the download helper.
pub struct NoEvents;
impl ParseEvents for NoEvents {}

/// Parser tunables, derived from [`crate::SearchConfig`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Skip in_network entirely when provider_references produced no
    /// matches, forgoing inline provider_group matches in that file. Off by
    /// default: the conservative win rarely justifies the missed rates.
    pub skip_unreferenced_in_network: bool,
    /// Element-processing worker count. Defaults to host parallelism.
    pub element_workers: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            skip_unreferenced_in_network: false,
            element_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// What a pass over one document produced.
#[derive(Debug)]
pub struct ParseOutcome {
    /// The stream must be re-fetched and re-parsed with `providers` prebuilt.
    pub need_second_pass: bool,
    /// Index built from provider_references (empty on a prebuilt pass).
    pub providers: ProviderIndex,
}

/// Walk one MRF document from `reader`, emitting a [`RateResult`] per
/// (matched provider × negotiated price) pair.
///
/// `prebuilt` is the index from a prior pass over the same document; when
/// present, provider_references is skipped and in_network is processed
/// unconditionally. `emit` is called from element worker threads and must
/// synchronize its own state.
pub fn stream_parse<R: BufRead>(
    reader: R,
    target: &NpiSet,
    source_file: &str,
    events: &dyn ParseEvents,
    emit: &(dyn Fn(RateResult) + Sync),
    prebuilt: Option<&ProviderIndex>,
    opts: &ParseOptions,
    cancel: &CancelToken,
) -> Result<ParseOutcome, ParseError> {
    let mut tr = TokenReader::new(reader);
    tr.expect_object_start()?;

    let patterns = NpiPatterns::new(target);
    let mut index = ProviderIndex::new();
    let mut refs_seen = false;
    let mut skipped_in_network = false;

    loop {
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        if !tr.object_has_more()? {
            match tr.next()? {
                Token::ObjectEnd => break,
                tok => {
                    return Err(ParseError::Malformed {
                        offset: tr.offset(),
                        msg: format!("expected '}}', got {tok:?}"),
                    })
                }
            }
        }
        let key = match tr.next()? {
            Token::String(s) => s,
            tok => {
                return Err(ParseError::Malformed {
                    offset: tr.offset(),
                    msg: format!("expected object key, got {tok:?}"),
                })
            }
        };

        match key.as_str() {
            "provider_references" => {
                if prebuilt.is_some() {
                    // Index came from the first pass; no need to rescan.
                    tr.skip_value()?;
                } else {
                    refs_seen = true;
                    events.on_stage_change("Streaming: provider_references");
                    scan_provider_references(&mut tr, target, &patterns, &mut index, events, cancel)?;
                }
            }
            "in_network" => {
                let active = match prebuilt {
                    Some(p) => Some(p),
                    None if refs_seen => Some(&index),
                    None => None,
                };
                match active {
                    None => {
                        events.on_warning(
                            "in_network precedes provider_references; re-download needed for a second pass",
                        );
                        skipped_in_network = true;
                        tr.skip_value()?;
                    }
                    Some(idx)
                        if prebuilt.is_none()
                            && idx.is_empty()
                            && opts.skip_unreferenced_in_network =>
                    {
                        events.on_stage_change("Skipping in_network (no provider_references matches)");
                        tr.skip_value()?;
                    }
                    Some(idx) => {
                        events.on_stage_change("Streaming: in_network");
                        scan_in_network(&mut tr, target, idx, source_file, events, emit, opts, cancel)?;
                    }
                }
            }
            _ => tr.skip_value()?,
        }
    }

    // A skipped in_network needs a replay if anything could match it: the
    // index has entries, or the active policy would process inline groups.
    let need_second_pass =
        skipped_in_network && (!index.is_empty() || !opts.skip_unreferenced_in_network);

    Ok(ParseOutcome {
        need_second_pass,
        providers: index,
    })
}

/// Build the provider index from the provider_references array.
///
/// Elements that fail the byte prefilter are discarded unparsed; elements
/// that fail to deserialize are skipped silently (best-effort record stream).
fn scan_provider_references<R: BufRead>(
    tr: &mut TokenReader<R>,
    target: &NpiSet,
    patterns: &NpiPatterns,
    index: &mut ProviderIndex,
    events: &dyn ParseEvents,
    cancel: &CancelToken,
) -> Result<(), ParseError> {
    tr.expect_array_start()?;
    let mut raw = Vec::with_capacity(4096);

    while tr.array_has_more()? {
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        tr.read_raw_value(&mut raw)?;
        events.on_ref_scanned();

        if !patterns.matches_any(&raw) {
            continue;
        }

        let reference = match serde_json::from_slice::<ProviderReference>(&raw) {
            Ok(reference) => reference,
            Err(e) => {
                log::debug!("skipping provider_references element: {e}");
                continue;
            }
        };
        let gid = GroupId::from_number(&reference.provider_group_id);
        for group in &reference.provider_groups {
            for &npi in &group.npi {
                if target.contains(&npi) {
                    index.insert(
                        gid.clone(),
                        MatchedProvider {
                            npi,
                            tin: group.tin.clone(),
                        },
                    );
                }
            }
        }
    }

    tr.expect_array_end()
}

/// Partial view of an in_network element: just enough to decide whether any
/// negotiated rate links to a matched provider.
#[derive(Deserialize)]
struct RateLinkProbe {
    #[serde(default)]
    negotiated_rates: Vec<RateLink>,
}

#[derive(Deserialize)]
struct RateLink {
    #[serde(default)]
    provider_references: Vec<serde_json::Number>,
    #[serde(default)]
    provider_groups: Vec<GroupProbe>,
}

#[derive(Deserialize)]
struct GroupProbe {
    #[serde(default)]
    npi: Vec<u64>,
}

/// Walk the in_network array: serial element decode feeding a bounded
/// channel, with match checking and emission fanned out across workers.
/// Token reads stay on this thread; the channel's backpressure throttles the
/// reader when workers fall behind.
#[allow(clippy::too_many_arguments)]
fn scan_in_network<R: BufRead>(
    tr: &mut TokenReader<R>,
    target: &NpiSet,
    index: &ProviderIndex,
    source_file: &str,
    events: &dyn ParseEvents,
    emit: &(dyn Fn(RateResult) + Sync),
    opts: &ParseOptions,
    cancel: &CancelToken,
) -> Result<(), ParseError> {
    tr.expect_array_start()?;

    let workers = opts.element_workers.max(1);
    let (tx, rx) = sync_channel::<Vec<u8>>(workers * 2);
    let rx = Mutex::new(rx);

    std::thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                let msg = rx.lock().unwrap().recv();
                match msg {
                    Ok(raw) => process_element(&raw, target, index, source_file, emit),
                    Err(_) => break, // channel closed, array done
                }
            });
        }

        let mut feed = || -> Result<(), ParseError> {
            while tr.array_has_more()? {
                if cancel.is_cancelled() {
                    return Err(ParseError::Cancelled);
                }
                let mut raw = Vec::with_capacity(4096);
                tr.read_raw_value(&mut raw)?;
                events.on_code_scanned();
                if tx.send(raw).is_err() {
                    break;
                }
            }
            tr.expect_array_end()
        };
        let result = feed();
        drop(tx); // close the channel so workers drain and exit
        result
    })
}

/// Match-check one raw element and emit its rates if it links to a target.
/// Runs on element workers; `index` and `target` are read-only here.
fn process_element(
    raw: &[u8],
    target: &NpiSet,
    index: &ProviderIndex,
    source_file: &str,
    emit: &(dyn Fn(RateResult) + Sync),
) {
    let Ok(probe) = serde_json::from_slice::<RateLinkProbe>(raw) else {
        return;
    };

    let mut matched = false;
    'rates: for rate in &probe.negotiated_rates {
        if !index.is_empty() {
            for id in &rate.provider_references {
                if index.contains(&GroupId::from_number(id)) {
                    matched = true;
                    break 'rates;
                }
            }
        }
        for group in &rate.provider_groups {
            for npi in &group.npi {
                if target.contains(npi) {
                    matched = true;
                    break 'rates;
                }
            }
        }
    }
    if !matched {
        return;
    }

    let item = match serde_json::from_slice::<InNetworkItem>(raw) {
        Ok(item) => item,
        Err(e) => {
            log::debug!("skipping matched in_network element: {e}");
            return;
        }
    };
    emit_rates(&item, target, index, source_file, emit);
}

/// Emit one result per (candidate provider × price) pair of each rate.
pub(crate) fn emit_rates(
    item: &InNetworkItem,
    target: &NpiSet,
    index: &ProviderIndex,
    source_file: &str,
    emit: &(dyn Fn(RateResult) + Sync),
) {
    let description = if item.name.is_empty() {
        &item.description
    } else {
        &item.name
    };

    for rate in &item.negotiated_rates {
        let mut providers: Vec<MatchedProvider> = Vec::new();

        for id in &rate.provider_references {
            if let Some(matches) = index.get(&GroupId::from_number(id)) {
                providers.extend_from_slice(matches);
            }
        }
        for group in &rate.provider_groups {
            for &npi in &group.npi {
                if target.contains(&npi) {
                    providers.push(MatchedProvider {
                        npi,
                        tin: group.tin.clone(),
                    });
                }
            }
        }

        if providers.is_empty() {
            continue;
        }

        for provider in &providers {
            for price in &rate.negotiated_prices {
                emit(RateResult {
                    source_file: source_file.to_string(),
                    npi: provider.npi,
                    tin: provider.tin.clone(),
                    billing_code_type: item.billing_code_type.clone(),
                    billing_code: item.billing_code.clone(),
                    billing_code_description: description.clone(),
                    negotiation_arrangement: item.negotiation_arrangement.clone(),
                    negotiated_rate: price.negotiated_rate,
                    negotiated_type: price.negotiated_type.clone(),
                    billing_class: price.billing_class.clone(),
                    setting: price.setting.clone(),
                    expiration_date: price.expiration_date.clone(),
                    service_code: price.service_code.clone(),
                    billing_code_modifier: price.billing_code_modifier.clone(),
                });
            }
        }
    }
}
