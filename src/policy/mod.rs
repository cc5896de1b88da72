//! Per-device policy documents: canonical shape, defaults, and team
//! overrides. The document is immutable once issued; a new issuance
//! supersedes but never mutates a prior one.

pub mod signer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::GateConfig;
pub use signer::{PolicyIssuance, PolicySigner, SignedPolicyEnvelope};

/// Days a window applies to. `BTreeSet` keeps the serialized order stable.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    #[must_use]
    pub fn all() -> BTreeSet<Self> {
        [
            Self::Mon,
            Self::Tue,
            Self::Wed,
            Self::Thu,
            Self::Fri,
            Self::Sat,
            Self::Sun,
        ]
        .into_iter()
        .collect()
    }
}

/// An allowed usage window. Start/end are local wall-clock "HH:MM" strings
/// interpreted in the document's timezone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub days: BTreeSet<DayOfWeek>,
    pub start: String,
    pub end: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    Numeric,
    Alphanumeric,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinPolicy {
    pub mode: PinMode,
    pub min_length: u32,
    pub retry_limit: u32,
    pub cooldown_seconds: i64,
}

/// Server-time block so verifiers can bound clock drift and staleness
/// without a separate configuration channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAnchor {
    pub server_time: String,
    pub max_clock_skew_seconds: i64,
    pub max_policy_age_seconds: i64,
}

/// The canonical policy document. Serde serializes struct fields in
/// declaration order, so this declaration IS the canonical field order —
/// clients reproduce the signed bytes from the same shape. Do not reorder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: u32,
    pub device_id: String,
    pub team_id: String,
    pub timezone: String,
    pub time_anchor: TimeAnchor,
    pub allowed_windows: Vec<TimeWindow>,
    pub grace_minutes: i64,
    pub supervisor_override_minutes: i64,
    pub pin: PinPolicy,
    pub gps_interval_seconds: i64,
    pub telemetry_interval_seconds: i64,
    pub telemetry_batch_max: u32,
    pub issued_at: String,
    pub expires_at: String,
}

/// Team-level overrides; `None` fields fall through to the fleet defaults.
#[derive(Clone, Debug, Default)]
pub struct TeamPolicy {
    pub timezone: Option<String>,
    pub allowed_windows: Option<Vec<TimeWindow>>,
    pub grace_minutes: Option<i64>,
    pub supervisor_override_minutes: Option<i64>,
    pub pin: Option<PinPolicy>,
    pub gps_interval_seconds: Option<i64>,
    pub telemetry_interval_seconds: Option<i64>,
    pub telemetry_batch_max: Option<u32>,
}

/// Deterministic byte encoding of a document. Stable field order plus sorted
/// sets make independently computed signatures agree byte-for-byte.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn canonical_bytes(document: &PolicyDocument) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(document)
}

/// Parse canonical bytes back into a document.
///
/// # Errors
///
/// Returns an error on malformed input.
pub fn from_canonical(bytes: &[u8]) -> Result<PolicyDocument, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Merge team overrides over fleet defaults into a concrete document body.
/// Timestamps and version are stamped by the signer at issuance.
#[must_use]
pub fn merge_policy(config: &GateConfig, team: &TeamPolicy) -> PolicyBody {
    PolicyBody {
        timezone: team
            .timezone
            .clone()
            .unwrap_or_else(|| config.timezone().to_string()),
        allowed_windows: team.allowed_windows.clone().unwrap_or_else(|| {
            vec![TimeWindow {
                days: DayOfWeek::all(),
                start: "00:00".to_string(),
                end: "24:00".to_string(),
            }]
        }),
        grace_minutes: team.grace_minutes.unwrap_or_else(|| config.grace_minutes()),
        supervisor_override_minutes: team
            .supervisor_override_minutes
            .unwrap_or_else(|| config.supervisor_override_minutes()),
        pin: team.pin.clone().unwrap_or(PinPolicy {
            mode: PinMode::Numeric,
            min_length: config.pin_min_length(),
            retry_limit: config.retry_limit(),
            cooldown_seconds: config.cooldown_seconds(),
        }),
        gps_interval_seconds: team
            .gps_interval_seconds
            .unwrap_or_else(|| config.gps_interval_seconds()),
        telemetry_interval_seconds: team
            .telemetry_interval_seconds
            .unwrap_or_else(|| config.telemetry_interval_seconds()),
        telemetry_batch_max: team
            .telemetry_batch_max
            .unwrap_or(config.batch_max() as u32),
    }
}

/// The policy fields that come from configuration, before the signer stamps
/// identity, anchor, and validity.
#[derive(Clone, Debug)]
pub struct PolicyBody {
    pub timezone: String,
    pub allowed_windows: Vec<TimeWindow>,
    pub grace_minutes: i64,
    pub supervisor_override_minutes: i64,
    pub pin: PinPolicy,
    pub gps_interval_seconds: i64,
    pub telemetry_interval_seconds: i64,
    pub telemetry_batch_max: u32,
}
