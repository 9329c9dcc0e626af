//! NPPES NPI Registry lookups.
//!
//! Before burning hours of bandwidth on a search, resolve each target NPI
//! against the public registry so the user can confirm they typed the right
//! provider.

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::Context;
use rateline_core::stream::{http_client, SHARED_RUNTIME};
use serde::Deserialize;

const REGISTRY_URL: &str = "https://npiregistry.cms.hhs.gov/api/?version=2.1";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Key details returned by the NPPES NPI Registry.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub npi: u64,
    /// "LAST, FIRST MIDDLE" for individuals, org name for organizations
    pub name: String,
    pub credential: String,
    pub primary_taxonomy: String,
    /// city, state
    pub practice_address: String,
    pub practice_phone: String,
    /// "A" = active
    pub status: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    result_count: i64,
    #[serde(default)]
    results: Vec<ApiResult>,
}

#[derive(Deserialize)]
struct ApiResult {
    #[serde(default)]
    number: String,
    #[serde(default)]
    basic: ApiBasic,
    #[serde(default)]
    addresses: Vec<ApiAddress>,
    #[serde(default)]
    taxonomies: Vec<ApiTaxonomy>,
}

#[derive(Deserialize, Default)]
struct ApiBasic {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    middle_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    credential: String,
    #[serde(default)]
    organization_name: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize, Default)]
struct ApiAddress {
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    address_purpose: String,
    #[serde(default, rename = "telephone_number")]
    phone: String,
}

#[derive(Deserialize, Default)]
struct ApiTaxonomy {
    #[serde(default)]
    desc: String,
    #[serde(default)]
    primary: bool,
}

/// Look up a single NPI. Returns None when the registry has no record.
pub fn lookup(npi: u64) -> anyhow::Result<Option<ProviderInfo>> {
    let url = format!("{REGISTRY_URL}&number={npi}");
    let body = SHARED_RUNTIME
        .handle()
        .block_on(async {
            http_client()
                .get(&url)
                .timeout(LOOKUP_TIMEOUT)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        })
        .context("querying NPI registry")?;

    let resp: ApiResponse =
        serde_json::from_str(&body).context("parsing NPI registry response")?;
    if resp.result_count == 0 {
        return Ok(None);
    }
    Ok(resp.results.into_iter().next().map(|r| to_provider_info(npi, r)))
}

fn to_provider_info(npi: u64, r: ApiResult) -> ProviderInfo {
    let npi = r.number.parse().unwrap_or(npi);

    let name = if r.basic.organization_name.is_empty() {
        let mut name = format!("{}, {}", r.basic.last_name, r.basic.first_name);
        if !r.basic.middle_name.is_empty() {
            name.push(' ');
            name.push_str(&r.basic.middle_name);
        }
        name
    } else {
        r.basic.organization_name.clone()
    };

    let location = r
        .addresses
        .iter()
        .find(|a| a.address_purpose == "LOCATION")
        .or_else(|| r.addresses.first());
    let practice_address = location
        .map(|a| format!("{}, {}", a.city, a.state))
        .unwrap_or_default();
    let practice_phone = location.map(|a| a.phone.clone()).unwrap_or_default();

    let primary_taxonomy = r
        .taxonomies
        .iter()
        .find(|t| t.primary)
        .or_else(|| r.taxonomies.first())
        .map(|t| t.desc.clone())
        .unwrap_or_default();

    ProviderInfo {
        npi,
        name,
        credential: r.basic.credential,
        primary_taxonomy,
        practice_address,
        practice_phone,
        status: r.basic.status,
    }
}

/// Look up and display each target NPI. Returns the NPIs the registry does
/// not know about.
pub fn print_provider_info(npis: &[u64]) -> Vec<u64> {
    let mut not_found = Vec::new();
    for &npi in npis {
        match lookup(npi) {
            Err(e) => eprintln!("NPI {npi}: lookup failed ({e:#})"),
            Ok(None) => {
                eprintln!("NPI {npi}: not found in NPPES registry");
                not_found.push(npi);
            }
            Ok(Some(info)) => {
                if info.credential.is_empty() {
                    eprintln!("NPI {}: {}", info.npi, info.name);
                } else {
                    eprintln!("NPI {}: {}, {}", info.npi, info.name, info.credential);
                }
                if !info.primary_taxonomy.is_empty() {
                    eprintln!("  Specialty: {}", info.primary_taxonomy);
                }
                if !info.practice_address.is_empty() {
                    if info.practice_phone.is_empty() {
                        eprintln!("  Location:  {}", info.practice_address);
                    } else {
                        eprintln!(
                            "  Location:  {}  |  {}",
                            info.practice_address, info.practice_phone
                        );
                    }
                }
                if info.status != "A" {
                    eprintln!("  WARNING:   NPI status is {:?} (not active)", info.status);
                }
            }
        }
    }
    eprintln!();
    not_found
}

/// Ask whether to continue despite unknown NPIs. Non-interactive runs
/// proceed with a warning rather than block on stdin.
pub fn confirm_continue(not_found: &[u64]) -> bool {
    if !std::io::stdin().is_terminal() {
        log::warn!("{} NPI(s) not found in NPPES registry; continuing", not_found.len());
        return true;
    }
    let list = not_found
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    eprint!("NPI(s) {list} not found. Continue anyway? [y/N]: ");
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(json: &str) -> ApiResult {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn individual_name_formats_last_first_middle() {
        let r = sample_result(
            r#"{"number": "1234567890",
                "basic": {"first_name": "JANE", "middle_name": "Q", "last_name": "DOE", "credential": "MD", "status": "A"},
                "addresses": [{"city": "NEW YORK", "state": "NY", "address_purpose": "LOCATION", "telephone_number": "212-555-0100"}],
                "taxonomies": [{"desc": "Internal Medicine", "primary": true}]}"#,
        );
        let info = to_provider_info(1234567890, r);
        assert_eq!(info.name, "DOE, JANE Q");
        assert_eq!(info.credential, "MD");
        assert_eq!(info.primary_taxonomy, "Internal Medicine");
        assert_eq!(info.practice_address, "NEW YORK, NY");
        assert_eq!(info.status, "A");
    }

    #[test]
    fn organization_name_wins_when_present() {
        let r = sample_result(
            r#"{"number": "9876543210", "basic": {"organization_name": "ACME HEALTH LLC", "status": "A"}}"#,
        );
        let info = to_provider_info(9876543210, r);
        assert_eq!(info.name, "ACME HEALTH LLC");
        assert!(info.practice_address.is_empty());
    }

    #[test]
    fn location_address_preferred_over_mailing() {
        let r = sample_result(
            r#"{"number": "1234567890", "basic": {"last_name": "DOE", "first_name": "J"},
                "addresses": [
                    {"city": "BOSTON", "state": "MA", "address_purpose": "MAILING"},
                    {"city": "CAMBRIDGE", "state": "MA", "address_purpose": "LOCATION"}
                ]}"#,
        );
        let info = to_provider_info(1234567890, r);
        assert_eq!(info.practice_address, "CAMBRIDGE, MA");
    }

    #[test]
    fn empty_response_maps_to_none_result_count() {
        let resp: ApiResponse = serde_json::from_str(r#"{"result_count": 0, "results": []}"#).unwrap();
        assert_eq!(resp.result_count, 0);
        assert!(resp.results.is_empty());
    }
}
