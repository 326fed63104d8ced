// src/classify.rs
//
// Pure accept/reject decision for one candidate. No I/O, no side effects;
// the first failing check decides the reject reason.

use serde::Serialize;

use crate::config::FilterConfig;
use crate::feed::envelope::EarthquakeCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    InvalidData,
    OutOfRegion,
    UntrustedAuthority,
    MagnitudeFilter,
}

impl RejectReason {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidData => "invalid-data",
            RejectReason::OutOfRegion => "out-of-region",
            RejectReason::UntrustedAuthority => "untrusted-authority",
            RejectReason::MagnitudeFilter => "magnitude-filter",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate that survived classification. All required fields are present
/// and finite from here on.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedEvent {
    pub magnitude: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub region: String,
    pub authority: String,
    pub source_id: String,
    pub time: Option<String>,
    pub depth: Option<f64>,
}

/// Check order is short-circuit: required fields, numeric sanity, region,
/// authority, magnitude.
pub fn classify(
    candidate: &EarthquakeCandidate,
    filter: &FilterConfig,
) -> Result<AcceptedEvent, RejectReason> {
    let (Some(magnitude), Some(latitude), Some(longitude)) = (
        candidate.magnitude,
        candidate.latitude,
        candidate.longitude,
    ) else {
        return Err(RejectReason::InvalidData);
    };

    if !(magnitude.is_finite() && latitude.is_finite() && longitude.is_finite()) {
        return Err(RejectReason::InvalidData);
    }

    let Some(region) = non_empty(candidate.region.as_deref()) else {
        return Err(RejectReason::InvalidData);
    };
    let Some(authority) = non_empty(candidate.authority.as_deref()) else {
        return Err(RejectReason::InvalidData);
    };
    let Some(source_id) = non_empty(candidate.source_id.as_deref()) else {
        return Err(RejectReason::InvalidData);
    };

    if !region
        .to_ascii_lowercase()
        .contains(&filter.region_token.to_ascii_lowercase())
    {
        return Err(RejectReason::OutOfRegion);
    }

    if authority != filter.trusted_authority {
        return Err(RejectReason::UntrustedAuthority);
    }

    // TODO: confirm the intended threshold policy. The check keeps only
    // quakes at or below the limit, which contradicts the written intent of
    // filtering out small ones; it is kept as-is until the policy is settled.
    if magnitude > filter.magnitude_threshold {
        return Err(RejectReason::MagnitudeFilter);
    }

    Ok(AcceptedEvent {
        magnitude,
        latitude,
        longitude,
        region: region.to_string(),
        authority: authority.to_string(),
        source_id: source_id.to_string(),
        time: candidate.time.clone(),
        depth: candidate.depth,
    })
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
