//! Token issuance and revocation-aware verification.
//!
//! Tokens are Ed25519-signed envelopes (see [`envelope`]); validity is
//! signature AND expiry AND kind AND absence from the revocation set. The
//! internal failure detail stays in the logs; externally everything collapses
//! to `INVALID_TOKEN`.

pub mod envelope;
pub mod revocation;

use ed25519_dalek::{SigningKey, VerifyingKey};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::GateConfig;
pub use envelope::{TokenClaims, TokenFooter, TokenKind};
pub use revocation::{RevocationEntry, RevocationSet};

/// Internal token failure detail. Distinguishable for logging; merged into a
/// single generic class at the external boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json,
    #[error("invalid signature")]
    BadSignature,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    #[error("wrong token kind")]
    WrongKind,
    #[error("time format error")]
    Time,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Lost the rotation race: another refresh already consumed this token.
    #[error("refresh token superseded")]
    Superseded,
}

/// Who a token speaks for. `sub` is the session id for access/refresh tokens
/// and the supervisor principal id for override tokens.
#[derive(Clone, Debug)]
pub struct TokenSubject {
    pub sub: String,
    pub role: String,
    pub team: String,
    pub device: String,
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: OffsetDateTime,
}

/// Result of redeeming a refresh token.
#[derive(Clone, Debug)]
pub struct RefreshGrant {
    pub session_id: String,
    pub access: IssuedToken,
    /// Present only when rotation-on-use is enabled.
    pub rotated_refresh: Option<IssuedToken>,
}

pub struct TokenService {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_id: String,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    override_ttl: Duration,
    rotation_on_use: bool,
    revocations: Arc<RevocationSet>,
    // session sub -> (active refresh jti, its expiry)
    active_refresh: Mutex<HashMap<String, (String, OffsetDateTime)>>,
}

impl TokenService {
    #[must_use]
    pub fn new(
        signing_key: SigningKey,
        clock: Arc<dyn Clock>,
        config: &GateConfig,
        revocations: Arc<RevocationSet>,
    ) -> Self {
        let verifying_key = signing_key.verifying_key();
        let key_id = envelope::key_id(&verifying_key);
        Self {
            signing_key,
            verifying_key,
            key_id,
            clock,
            access_ttl: Duration::seconds(config.access_ttl_seconds()),
            refresh_ttl: Duration::seconds(config.refresh_ttl_seconds()),
            override_ttl: Duration::minutes(config.supervisor_override_minutes()),
            rotation_on_use: config.refresh_rotation_on_use(),
            revocations,
            active_refresh: Mutex::new(HashMap::new()),
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

    /// Issue a short-lived access token bound to a session.
    ///
    /// # Errors
    ///
    /// Returns an error if claim encoding fails.
    pub fn issue_access(&self, subject: &TokenSubject) -> Result<IssuedToken, TokenError> {
        self.issue(subject, TokenKind::Access, self.access_ttl)
    }

    /// Issue a refresh token. A session has a single active refresh token:
    /// issuing a new one revokes its predecessor.
    ///
    /// # Errors
    ///
    /// Returns an error if claim encoding fails.
    pub async fn issue_refresh(&self, subject: &TokenSubject) -> Result<IssuedToken, TokenError> {
        let issued = self.issue(subject, TokenKind::Refresh, self.refresh_ttl)?;
        let mut active = self.active_refresh.lock().await;
        if let Some((previous_jti, previous_exp)) =
            active.insert(subject.sub.clone(), (issued.jti.clone(), issued.expires_at))
        {
            self.revocations
                .revoke(RevocationEntry {
                    jti: previous_jti,
                    revoked_at: self.clock.now(),
                    expires_at: previous_exp,
                    reason: "superseded".to_string(),
                    revoked_by: "token-service".to_string(),
                })
                .await;
        }
        Ok(issued)
    }

    /// Issue a short-purpose override token for a supervisor grant.
    ///
    /// # Errors
    ///
    /// Returns an error if claim encoding fails.
    pub fn issue_override(&self, subject: &TokenSubject) -> Result<IssuedToken, TokenError> {
        self.issue(subject, TokenKind::Override, self.override_ttl)
    }

    fn issue(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        let jti = Uuid::new_v4().to_string();
        let claims = TokenClaims {
            jti: jti.clone(),
            sub: subject.sub.clone(),
            kind,
            role: subject.role.clone(),
            team: subject.team.clone(),
            device: subject.device.clone(),
            iat: envelope::rfc3339_from_unix(now.unix_timestamp())?,
            exp: envelope::rfc3339_from_unix(expires_at.unix_timestamp())?,
        };
        let footer = TokenFooter {
            kid: self.key_id.clone(),
        };
        let token = envelope::sign(&claims, &footer, &self.signing_key)?;
        Ok(IssuedToken {
            token,
            jti,
            expires_at: OffsetDateTime::from_unix_timestamp(expires_at.unix_timestamp())
                .map_err(|_| TokenError::Time)?,
        })
    }

    /// Full validity check: signature, expiry, kind, revocation — in that
    /// order, each failing independently.
    ///
    /// # Errors
    ///
    /// Returns the specific failure for internal logging.
    pub async fn verify(
        &self,
        token: &str,
        expected_kind: TokenKind,
    ) -> Result<TokenClaims, TokenError> {
        let claims = envelope::verify(token, &self.verifying_key, &self.key_id)?;
        let exp = envelope::unix_from_rfc3339(&claims.exp)?;
        if self.clock.now().unix_timestamp() >= exp {
            return Err(TokenError::Expired);
        }
        if claims.kind != expected_kind {
            return Err(TokenError::WrongKind);
        }
        if self.revocations.contains(&claims.jti).await {
            return Err(TokenError::Revoked);
        }
        Ok(claims)
    }

    /// Idempotent revocation; the entry expiry mirrors the token's own expiry
    /// so deferred cleanup is always safe.
    pub async fn revoke(
        &self,
        jti: &str,
        expires_at: OffsetDateTime,
        reason: &str,
        revoked_by: &str,
    ) {
        self.revocations
            .revoke(RevocationEntry {
                jti: jti.to_string(),
                revoked_at: self.clock.now(),
                expires_at,
                reason: reason.to_string(),
                revoked_by: revoked_by.to_string(),
            })
            .await;
    }

    /// Redeem a refresh token for a new access token. With rotation-on-use
    /// enabled, the active-jti slot is compare-and-swapped under the lock so
    /// two concurrent refreshes cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns `Superseded` when losing a rotation race, or the underlying
    /// token failure otherwise.
    pub async fn refresh_access(&self, refresh_token: &str) -> Result<RefreshGrant, RefreshError> {
        let claims = self.verify(refresh_token, TokenKind::Refresh).await?;
        let subject = TokenSubject {
            sub: claims.sub.clone(),
            role: claims.role.clone(),
            team: claims.team.clone(),
            device: claims.device.clone(),
        };

        let rotated_refresh = if self.rotation_on_use {
            let mut active = self.active_refresh.lock().await;
            match active.get(&claims.sub) {
                Some((jti, _)) if *jti == claims.jti => {}
                _ => return Err(RefreshError::Superseded),
            }
            let replacement = self.issue(&subject, TokenKind::Refresh, self.refresh_ttl)?;
            let previous = active.insert(
                claims.sub.clone(),
                (replacement.jti.clone(), replacement.expires_at),
            );
            drop(active);
            if let Some((previous_jti, previous_exp)) = previous {
                self.revocations
                    .revoke(RevocationEntry {
                        jti: previous_jti,
                        revoked_at: self.clock.now(),
                        expires_at: previous_exp,
                        reason: "rotated".to_string(),
                        revoked_by: "token-service".to_string(),
                    })
                    .await;
            }
            Some(replacement)
        } else {
            None
        };

        let access = self.issue(&subject, TokenKind::Access, self.access_ttl)?;
        Ok(RefreshGrant {
            session_id: claims.sub,
            access,
            rotated_refresh,
        })
    }

    /// Best-effort garbage collection of expired revocation entries.
    pub async fn purge_expired(&self) -> usize {
        self.revocations.purge_expired(self.clock.now()).await
    }
}
