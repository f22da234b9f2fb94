//! Check crates.io for a newer release.

use std::time::Duration;

use serde::Deserialize;
use ureq::Agent;

const TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
}

#[derive(Deserialize)]
struct CrateInfo {
    max_stable_version: Option<String>,
    max_version: String,
}

/// Result of comparing the running version to the latest release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The running version is the latest one.
    UpToDate,
    /// A different version has been published.
    Available(String),
}

/// Ask crates.io for the latest published version of `name`.
///
/// Returns `None` whenever the answer cannot be obtained; callers are
/// expected to stay silent about it.
pub fn check_for_update(name: &str, current: &str) -> Option<UpdateStatus> {
    let agent: Agent = Agent::config_builder()
        .timeout_global(Some(TIMEOUT))
        .build()
        .into();

    let response: CrateResponse = agent
        .get(&format!("https://crates.io/api/v1/crates/{name}"))
        .header("User-Agent", concat!("livehttpd/", env!("CARGO_PKG_VERSION")))
        .call()
        .ok()?
        .body_mut()
        .read_json()
        .ok()?;

    Some(compare(current, response.krate))
}

fn compare(current: &str, info: CrateInfo) -> UpdateStatus {
    let latest = info.max_stable_version.unwrap_or(info.max_version);
    if latest == current {
        UpdateStatus::UpToDate
    } else {
        UpdateStatus::Available(latest)
    }
}
