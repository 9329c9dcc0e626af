//! MRF wire types and emitted result records.
//!
//! Wire structs mirror the CMS in-network-rates schema; every field the
//! matcher does not strictly require is `#[serde(default)]` so sparse or
//! sloppy producer output still parses.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Target NPIs, read-only after construction.
pub type NpiSet = FxHashSet<u64>;

pub const NPI_MIN: u64 = 1_000_000_000;
pub const NPI_MAX: u64 = 9_999_999_999;

/// Whether `n` is a well-formed 10-digit NPI.
pub fn is_valid_npi(n: u64) -> bool {
    (NPI_MIN..=NPI_MAX).contains(&n)
}

/// Tax Identification Number attached to a provider group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tin {
    /// "ein" or "npi"
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

/// A group of providers within a provider_references entry or inline in a
/// negotiated rate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderGroup {
    #[serde(default)]
    pub npi: Vec<u64>,
    #[serde(default)]
    pub tin: Tin,
}

/// One `provider_references` array element.
///
/// `provider_group_id` stays a raw [`serde_json::Number`] so fractional ids
/// keep full precision until canonicalized into a [`GroupId`].
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderReference {
    pub provider_group_id: serde_json::Number,
    #[serde(default)]
    pub provider_groups: Vec<ProviderGroup>,
}

/// A single negotiated price entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NegotiatedPrice {
    #[serde(default)]
    pub negotiated_rate: f64,
    #[serde(default)]
    pub negotiated_type: String,
    #[serde(default)]
    pub billing_class: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub expiration_date: String,
    #[serde(default)]
    pub service_code: Vec<String>,
    #[serde(default)]
    pub billing_code_modifier: Vec<String>,
}

/// A rate entry within an in_network item. Provider linkage may be by
/// reference id, inline group, or both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NegotiatedRate {
    #[serde(default)]
    pub provider_references: Vec<serde_json::Number>,
    #[serde(default)]
    pub provider_groups: Vec<ProviderGroup>,
    #[serde(default)]
    pub negotiated_prices: Vec<NegotiatedPrice>,
}

/// One `in_network` array element.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InNetworkItem {
    #[serde(default)]
    pub billing_code_type: String,
    #[serde(default)]
    pub billing_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub negotiation_arrangement: String,
    #[serde(default)]
    pub negotiated_rates: Vec<NegotiatedRate>,
}

/// A single output record for a matched (provider, billing code, price).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateResult {
    pub source_file: String,
    pub npi: u64,
    pub tin: Tin,
    pub billing_code_type: String,
    pub billing_code: String,
    pub billing_code_description: String,
    pub negotiation_arrangement: String,
    pub negotiated_rate: f64,
    pub negotiated_type: String,
    pub billing_class: String,
    pub setting: String,
    pub expiration_date: String,
    pub service_code: Vec<String>,
    pub billing_code_modifier: Vec<String>,
}

/// Metadata about a completed search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub npis: Vec<u64>,
    pub searched_files: usize,
    pub matched_files: usize,
    pub duration_seconds: f64,
}

/// Top-level output JSON document.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchOutput {
    pub search_params: SearchParams,
    pub results: Vec<RateResult>,
}

/// Canonical key for a provider_group_id numeric token.
///
/// Group ids are numbers in the source and fractional values occur in
/// practice; two ids sharing an integer part must stay distinct, so the key
/// is the canonicalized decimal text of the token, never a truncated
/// integer. `1` and `1.0` canonicalize to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId(Box<str>);

impl GroupId {
    pub fn from_number(n: &serde_json::Number) -> Self {
        Self::from_raw(&n.to_string())
    }

    /// Canonicalize a JSON number token: drop trailing fractional zeros and
    /// a bare trailing dot, fold `-0` into `0`. Exponent forms pass through
    /// verbatim (unobserved in MRFs; treating distinct spellings as distinct
    /// keys is the conservative direction).
    pub fn from_raw(raw: &str) -> Self {
        let mut s = raw;
        if s.contains('.') && !s.contains(['e', 'E']) {
            s = s.trim_end_matches('0').trim_end_matches('.');
        }
        if s == "-0" {
            s = "0";
        }
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider details recorded for a matched NPI.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedProvider {
    pub npi: u64,
    pub tin: Tin,
}

/// provider_group_id → matched providers, built while walking
/// `provider_references` and read-only during `in_network` processing.
#[derive(Debug, Default)]
pub struct ProviderIndex {
    by_group: FxHashMap<GroupId, Vec<MatchedProvider>>,
}

impl ProviderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: GroupId, provider: MatchedProvider) {
        self.by_group.entry(id).or_default().push(provider);
    }

    pub fn get(&self, id: &GroupId) -> Option<&[MatchedProvider]> {
        self.by_group.get(id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: &GroupId) -> bool {
        self.by_group.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.by_group.is_empty()
    }

    /// Number of distinct group ids with at least one matched provider.
    pub fn len(&self) -> usize {
        self.by_group.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npi_range() {
        assert!(is_valid_npi(1_000_000_000));
        assert!(is_valid_npi(9_999_999_999));
        assert!(!is_valid_npi(999_999_999));
        assert!(!is_valid_npi(10_000_000_000));
    }

    #[test]
    fn group_id_trailing_zeros_fold() {
        assert_eq!(GroupId::from_raw("1.0"), GroupId::from_raw("1"));
        assert_eq!(GroupId::from_raw("42.1230"), GroupId::from_raw("42.123"));
        assert_eq!(GroupId::from_raw("-0"), GroupId::from_raw("0"));
    }

    #[test]
    fn group_id_fractional_ids_stay_distinct() {
        let a = GroupId::from_raw("42.123456789");
        let b = GroupId::from_raw("42.987654321");
        let c = GroupId::from_raw("42");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn group_id_full_precision_preserved() {
        // More fractional digits than an f32 could hold
        let id = GroupId::from_raw("302.257054942");
        assert_eq!(id.as_str(), "302.257054942");
    }

    #[test]
    fn group_id_from_wire_number() {
        let v: serde_json::Value = serde_json::from_str("{\"id\": 302.257054942}").unwrap();
        let n = v["id"].as_number().unwrap();
        assert_eq!(GroupId::from_number(n).as_str(), "302.257054942");
    }

    #[test]
    fn provider_index_routes_by_canonical_id() {
        let mut idx = ProviderIndex::new();
        let tin = Tin {
            kind: "ein".to_string(),
            value: "12-3456789".to_string(),
        };
        idx.insert(
            GroupId::from_raw("42.123456789"),
            MatchedProvider {
                npi: 1234567890,
                tin: tin.clone(),
            },
        );
        idx.insert(
            GroupId::from_raw("42.987654321"),
            MatchedProvider {
                npi: 1234567890,
                tin,
            },
        );
        assert_eq!(idx.len(), 2);
        assert!(idx.contains(&GroupId::from_raw("42.1234567890"))); // canonical match
        assert!(!idx.contains(&GroupId::from_raw("42")));
    }

    #[test]
    fn rate_result_json_field_names() {
        let r = RateResult {
            source_file: "f.json.gz".to_string(),
            npi: 1234567890,
            tin: Tin {
                kind: "ein".to_string(),
                value: "12-3456789".to_string(),
            },
            billing_code_type: "CPT".to_string(),
            billing_code: "99213".to_string(),
            billing_code_description: "Office visit".to_string(),
            negotiation_arrangement: "ffs".to_string(),
            negotiated_rate: 125.5,
            negotiated_type: "negotiated".to_string(),
            billing_class: "professional".to_string(),
            setting: "outpatient".to_string(),
            expiration_date: "2025-12-31".to_string(),
            service_code: vec!["11".to_string()],
            billing_code_modifier: vec![],
        };
        let v: serde_json::Value = serde_json::to_value(&r).unwrap();
        let obj = v.as_object().unwrap();
        for key in [
            "source_file",
            "npi",
            "tin",
            "billing_code_type",
            "billing_code",
            "billing_code_description",
            "negotiation_arrangement",
            "negotiated_rate",
            "negotiated_type",
            "billing_class",
            "setting",
            "expiration_date",
            "service_code",
            "billing_code_modifier",
        ] {
            assert!(obj.contains_key(key), "missing field {key}");
        }
        assert_eq!(v["tin"]["type"], "ein");
        assert_eq!(v["tin"]["value"], "12-3456789");
    }

    #[test]
    fn in_network_item_tolerates_sparse_elements() {
        let item: InNetworkItem = serde_json::from_str("{\"billing_code\": \"X\"}").unwrap();
        assert_eq!(item.billing_code, "X");
        assert!(item.negotiated_rates.is_empty());
    }
}
