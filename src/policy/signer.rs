//! Signs canonical policy documents with the fleet Ed25519 key and keeps the
//! issuance receipts. Devices verify the detached signature offline.

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{PolicyDocument, TeamPolicy, TimeAnchor, canonical_bytes, from_canonical, merge_policy};
use crate::clock::Clock;
use crate::config::GateConfig;
use crate::directory::Directory;
use crate::error::GateError;
use crate::token::envelope::key_id;

/// Detached-signature envelope: the canonical JSON payload, its Ed25519
/// signature, and the signing key id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPolicyEnvelope {
    pub payload: String,
    pub signature: String,
    pub key_id: String,
}

/// Durable receipt of one issuance. Prior receipts are never mutated; a new
/// issuance appends.
#[derive(Clone, Debug)]
pub struct PolicyIssuance {
    pub device_id: Uuid,
    pub version: u32,
    pub issued_at: String,
    pub expires_at: String,
    pub key_id: String,
    pub payload: String,
    pub source_ip: Option<String>,
}

pub struct PolicySigner {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_id: String,
    clock: Arc<dyn Clock>,
    config: GateConfig,
    directory: Arc<Directory>,
    // team -> (current version, overrides)
    teams: Mutex<HashMap<Uuid, (u32, TeamPolicy)>>,
    issuances: Mutex<Vec<PolicyIssuance>>,
}

impl PolicySigner {
    #[must_use]
    pub fn new(
        signing_key: SigningKey,
        clock: Arc<dyn Clock>,
        config: GateConfig,
        directory: Arc<Directory>,
    ) -> Self {
        let verifying_key = signing_key.verifying_key();
        let key_id = key_id(&verifying_key);
        Self {
            signing_key,
            verifying_key,
            key_id,
            clock,
            config,
            directory,
            teams: Mutex::new(HashMap::new()),
            issuances: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Replace a team's overrides and bump its policy version. Defaults count
    /// as version 1, so the first override lands at 2.
    pub async fn set_team_policy(&self, team_id: Uuid, policy: TeamPolicy) -> u32 {
        let mut teams = self.teams.lock().await;
        let entry = teams.entry(team_id).or_insert((1, TeamPolicy::default()));
        entry.0 += 1;
        entry.1 = policy;
        entry.0
    }

    /// Current policy version for a team; 1 when only defaults apply.
    pub async fn current_version(&self, team_id: Uuid) -> u32 {
        let teams = self.teams.lock().await;
        teams.get(&team_id).map_or(1, |(version, _)| *version)
    }

    /// Build, canonicalize, and sign the policy document for a device.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND` for unknown or deactivated devices;
    /// `INTERNAL_ERROR` if encoding fails.
    pub async fn issue_policy(
        &self,
        device_id: Uuid,
        source_ip: Option<String>,
    ) -> Result<SignedPolicyEnvelope, GateError> {
        let device = match self.directory.device(device_id).await {
            Some(device) if device.active => device,
            _ => return Err(GateError::device_not_found()),
        };

        let now = self.clock.now();
        let issued_at = rfc3339(now)?;
        let expires_at = rfc3339(now + time::Duration::seconds(self.config.policy_ttl_seconds()))?;
        let version = self.current_version(device.team_id).await;
        let body = {
            let teams = self.teams.lock().await;
            let overrides = teams
                .get(&device.team_id)
                .map(|(_, policy)| policy.clone())
                .unwrap_or_default();
            merge_policy(&self.config, &overrides)
        };

        let document = PolicyDocument {
            version,
            device_id: device.id.to_string(),
            team_id: device.team_id.to_string(),
            timezone: body.timezone,
            time_anchor: TimeAnchor {
                server_time: issued_at.clone(),
                max_clock_skew_seconds: self.config.max_clock_skew_seconds(),
                max_policy_age_seconds: self.config.policy_ttl_seconds(),
            },
            allowed_windows: body.allowed_windows,
            grace_minutes: body.grace_minutes,
            supervisor_override_minutes: body.supervisor_override_minutes,
            pin: body.pin,
            gps_interval_seconds: body.gps_interval_seconds,
            telemetry_interval_seconds: body.telemetry_interval_seconds,
            telemetry_batch_max: body.telemetry_batch_max,
            issued_at: issued_at.clone(),
            expires_at: expires_at.clone(),
        };

        let bytes = canonical_bytes(&document)
            .map_err(|err| GateError::internal(format!("policy encoding failed: {err}")))?;
        let signature = self.signing_key.sign(&bytes);
        let payload = String::from_utf8(bytes)
            .map_err(|err| GateError::internal(format!("policy encoding failed: {err}")))?;
        let envelope = SignedPolicyEnvelope {
            payload: payload.clone(),
            signature: Base64UrlUnpadded::encode_string(&signature.to_bytes()),
            key_id: self.key_id.clone(),
        };

        let mut issuances = self.issuances.lock().await;
        issuances.push(PolicyIssuance {
            device_id: device.id,
            version,
            issued_at,
            expires_at,
            key_id: self.key_id.clone(),
            payload,
            source_ip,
        });
        info!(device = %device.id, version, "issued signed policy");
        Ok(envelope)
    }

    /// Receipts recorded so far, oldest first.
    pub async fn issuances(&self) -> Vec<PolicyIssuance> {
        let issuances = self.issuances.lock().await;
        issuances.clone()
    }
}

/// Client-side dual of [`PolicySigner::issue_policy`]: signature must verify
/// over the exact payload bytes AND the document must not be expired (skew
/// tolerance comes from the payload itself). Kept in-crate so the
/// canonicalization contract has an executable definition.
#[must_use]
pub fn verify_policy(
    envelope: &SignedPolicyEnvelope,
    verifying_key: &VerifyingKey,
    now: OffsetDateTime,
) -> bool {
    let Ok(signature_bytes) = Base64UrlUnpadded::decode_vec(&envelope.signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&signature_bytes) else {
        return false;
    };
    if verifying_key
        .verify(envelope.payload.as_bytes(), &signature)
        .is_err()
    {
        return false;
    }
    let Ok(document) = from_canonical(envelope.payload.as_bytes()) else {
        return false;
    };
    let Ok(expires_at) = OffsetDateTime::parse(&document.expires_at, &Rfc3339) else {
        return false;
    };
    let skew = time::Duration::seconds(document.time_anchor.max_clock_skew_seconds);
    // An expired policy is invalid regardless of signature validity.
    now < expires_at + skew
}

fn rfc3339(at: OffsetDateTime) -> Result<String, GateError> {
    at.format(&Rfc3339)
        .map_err(|err| GateError::internal(format!("time formatting failed: {err}")))
}
