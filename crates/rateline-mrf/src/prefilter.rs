//! Byte-level prefilter for raw array elements.
//!
//! A provider_references element can only name a target NPI if the NPI's
//! decimal form appears somewhere in its raw bytes. Scanning for that
//! substring rejects the overwhelming majority of elements without paying
//! for JSON parsing; false positives (the digits appearing in an unrelated
//! field) are caught by the post-parse membership check.

use crate::types::NpiSet;

/// Precomputed decimal byte patterns for each target NPI.
#[derive(Debug, Clone)]
pub struct NpiPatterns {
    patterns: Vec<Box<[u8]>>,
}

impl NpiPatterns {
    pub fn new(npis: &NpiSet) -> Self {
        let patterns = npis
            .iter()
            .map(|n| n.to_string().into_bytes().into_boxed_slice())
            .collect();
        Self { patterns }
    }

    /// True if `raw` contains any target NPI's decimal form as a substring.
    pub fn matches_any(&self, raw: &[u8]) -> bool {
        self.patterns.iter().any(|p| contains(raw, p))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == &needle[..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    fn patterns(npis: &[u64]) -> NpiPatterns {
        let set: NpiSet = npis.iter().copied().collect::<FxHashSet<_>>();
        NpiPatterns::new(&set)
    }

    #[test]
    fn matches_npi_in_array() {
        let p = patterns(&[1234567890]);
        assert!(p.matches_any(br#"{"provider_group_id":1,"provider_groups":[{"npi":[1234567890]}]}"#));
    }

    #[test]
    fn rejects_element_without_target() {
        let p = patterns(&[1234567890]);
        assert!(!p.matches_any(br#"{"provider_group_id":1,"provider_groups":[{"npi":[9999999999]}]}"#));
    }

    #[test]
    fn any_of_multiple_targets_matches() {
        let p = patterns(&[1111111111, 2222222222]);
        assert!(p.matches_any(br#"{"npi":[2222222222]}"#));
    }

    #[test]
    fn substring_false_positive_is_allowed() {
        // The prefilter is a throughput gate, not a correctness gate: digits
        // inside a longer number still pass, and the parse-side check decides.
        let p = patterns(&[1234567890]);
        assert!(p.matches_any(br#"{"other_id": 91234567890}"#));
    }

    #[test]
    fn short_element_never_matches() {
        let p = patterns(&[1234567890]);
        assert!(!p.matches_any(b"{}"));
    }
}
