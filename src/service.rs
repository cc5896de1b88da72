//! Orchestrates the externally visible operations: login, refresh, logout,
//! whoami, supervisor override, and policy fetch. Every operation emits one
//! audit event; internal failure detail stays in the logs and only generic
//! codes cross the boundary.

use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::time::timeout;
use tracing::{error, warn};
use uuid::Uuid;

use crate::attempts::{AttemptKey, AttemptKind, AttemptTracker};
use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::clock::Clock;
use crate::config::GateConfig;
use crate::credentials::CredentialStore;
use crate::directory::{Device, Directory, Principal, PrincipalKind};
use crate::error::GateError;
use crate::policy::PolicySigner;
use crate::policy::signer::SignedPolicyEnvelope;
use crate::session::{Session, SessionManager, SessionStatus};
use crate::token::{RefreshError, TokenKind, TokenService, TokenSubject, envelope};

/// Correlation data supplied by the transport boundary; the core never
/// generates request ids itself.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub ip: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub id: Uuid,
    pub status: SessionStatus,
    pub started_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub override_until: Option<OffsetDateTime>,
    pub last_activity_at: OffsetDateTime,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            status: session.status,
            started_at: session.started_at,
            expires_at: session.expires_at,
            override_until: session.override_until,
            last_activity_at: session.last_activity_at,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoginResponse {
    pub session: SessionSummary,
    pub access_token: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_token: String,
    pub refresh_expires_at: OffsetDateTime,
    pub policy_version: u32,
}

#[derive(Clone, Debug)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_at: OffsetDateTime,
    /// Present only when rotation-on-use is enabled.
    pub rotated_refresh_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PrincipalSummary {
    pub id: Uuid,
    pub code: String,
    pub kind: PrincipalKind,
}

#[derive(Clone, Debug)]
pub struct WhoAmIResponse {
    pub principal: Option<PrincipalSummary>,
    pub session: SessionSummary,
    pub policy_version: u32,
}

#[derive(Clone, Debug)]
pub struct OverrideResponse {
    pub override_until: OffsetDateTime,
    pub override_token: String,
}

pub struct AuthService {
    directory: Arc<Directory>,
    credentials: CredentialStore,
    attempts: Arc<AttemptTracker>,
    tokens: Arc<TokenService>,
    sessions: Arc<SessionManager>,
    policy: Arc<PolicySigner>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: GateConfig,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        directory: Arc<Directory>,
        attempts: Arc<AttemptTracker>,
        tokens: Arc<TokenService>,
        sessions: Arc<SessionManager>,
        policy: Arc<PolicySigner>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: GateConfig,
    ) -> Self {
        Self {
            credentials: CredentialStore::new(directory.clone()),
            directory,
            attempts,
            tokens,
            sessions,
            policy,
            audit,
            clock,
            config,
        }
    }

    /// Authenticate a device+user+PIN triple and open a session.
    ///
    /// # Errors
    ///
    /// `VALIDATION` on malformed input, `RATE_LIMITED` while locked out,
    /// `LOGIN_FAILED` on any credential mismatch (never distinguishing
    /// unknown principals), `INTERNAL_ERROR` on dependency failure.
    pub async fn login(
        &self,
        device_id: Uuid,
        user_code: &str,
        pin: &str,
        ctx: &RequestContext,
    ) -> Result<LoginResponse, GateError> {
        if user_code.trim().is_empty() {
            self.deny(ctx, "login", None, Some(device_id), "validation");
            return Err(GateError::validation("user code must not be empty"));
        }
        if (pin.len() as u32) < self.config.pin_min_length() {
            self.deny(ctx, "login", None, Some(device_id), "validation");
            return Err(GateError::validation("pin is too short"));
        }

        let Some(device) = self.active_device(device_id).await else {
            self.burn_verification(pin).await;
            self.deny(ctx, "login", None, Some(device_id), "unknown_device");
            return Err(GateError::login_failed());
        };
        let principal = self
            .directory
            .find_principal_by_code(device.team_id, user_code.trim(), PrincipalKind::User)
            .await;
        let Some(principal) = principal else {
            self.burn_verification(pin).await;
            self.deny(ctx, "login", None, Some(device_id), "unknown_principal");
            return Err(GateError::login_failed());
        };

        let key = AttemptKey {
            principal_id: principal.id,
            device_id,
            kind: AttemptKind::User,
        };
        let _guard = self.attempts.guard(&key).await;

        let lock = self.attempts.is_locked(&key).await;
        if lock.locked {
            self.deny(ctx, "login", Some(principal.id), Some(device_id), "rate_limited");
            return Err(GateError::rate_limited(lock.retry_after_seconds));
        }

        let verified = self.verify_with_timeout(&principal, pin, ctx, "login").await?;
        self.attempts
            .record_attempt(&key, ctx.ip.clone(), verified)
            .await;
        if !verified {
            self.deny(ctx, "login", Some(principal.id), Some(device_id), "invalid_pin");
            return Err(GateError::login_failed());
        }

        let session = self
            .sessions
            .create(
                Some(principal.id),
                device.team_id,
                device_id,
                Duration::seconds(self.config.access_ttl_seconds()),
            )
            .await;
        let subject = TokenSubject {
            sub: session.id.to_string(),
            role: "user".to_string(),
            team: device.team_id.to_string(),
            device: device_id.to_string(),
        };
        let access = self
            .tokens
            .issue_access(&subject)
            .map_err(|err| self.token_internal(ctx, "login", err))?;
        let refresh = self
            .tokens
            .issue_refresh(&subject)
            .await
            .map_err(|err| self.token_internal(ctx, "login", err))?;
        self.sessions
            .set_refresh(session.id, refresh.jti.clone(), refresh.expires_at)
            .await;
        self.directory.touch_seen(device_id).await;

        let policy_version = self.policy.current_version(device.team_id).await;
        self.emit_audit(ctx, "login", Some(principal.id), Some(device_id), AuditOutcome::Success, None);
        Ok(LoginResponse {
            session: SessionSummary::from(&session),
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
            policy_version,
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// `INVALID_TOKEN` for any verification failure; `CONFLICT` when losing
    /// a rotation race.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &RequestContext,
    ) -> Result<RefreshResponse, GateError> {
        let grant = match self.tokens.refresh_access(refresh_token).await {
            Ok(grant) => grant,
            Err(RefreshError::Superseded) => {
                self.deny(ctx, "refresh", None, None, "rotation_race_lost");
                return Err(GateError::conflict("refresh token already rotated"));
            }
            Err(RefreshError::Token(err)) => {
                warn!(request_id = %ctx.request_id, %err, "refresh token rejected");
                self.deny(ctx, "refresh", None, None, "invalid_token");
                return Err(GateError::invalid_token());
            }
        };

        let session_id = Uuid::parse_str(&grant.session_id)
            .map_err(|_| GateError::internal("malformed session id in refresh claims"))?;
        self.sessions.touch(session_id).await;
        if let Some(rotated) = &grant.rotated_refresh {
            self.sessions
                .set_refresh(session_id, rotated.jti.clone(), rotated.expires_at)
                .await;
        }

        self.emit_audit(ctx, "refresh", None, None, AuditOutcome::Success, None);
        Ok(RefreshResponse {
            access_token: grant.access.token,
            expires_at: grant.access.expires_at,
            rotated_refresh_token: grant.rotated_refresh.map(|token| token.token),
        })
    }

    /// End the session behind an access token and revoke both of its tokens.
    ///
    /// # Errors
    ///
    /// `INVALID_TOKEN` when the access token does not verify.
    pub async fn logout(&self, access_token: &str, ctx: &RequestContext) -> Result<(), GateError> {
        let claims = self.verify_access(access_token, ctx, "logout").await?;
        let session_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| GateError::internal("malformed session id in access claims"))?;

        let session = self.sessions.end(session_id, "logout").await;
        let revoked_by = session
            .as_ref()
            .and_then(|s| s.user_id)
            .map_or_else(|| "gate".to_string(), |id| id.to_string());

        let access_exp = envelope::unix_from_rfc3339(&claims.exp)
            .ok()
            .and_then(|unix| OffsetDateTime::from_unix_timestamp(unix).ok())
            .unwrap_or_else(|| self.clock.now());
        self.tokens
            .revoke(&claims.jti, access_exp, "logout", &revoked_by)
            .await;
        if let Some(session) = &session {
            if let (Some(jti), Some(expires_at)) =
                (session.refresh_jti.as_ref(), session.refresh_expires_at)
            {
                self.tokens.revoke(jti, expires_at, "logout", &revoked_by).await;
            }
        }

        let principal_id = session.as_ref().and_then(|s| s.user_id);
        let device_id = session.as_ref().map(|s| s.device_id);
        self.emit_audit(ctx, "logout", principal_id, device_id, AuditOutcome::Success, None);
        Ok(())
    }

    /// Resolve an access token to its principal and session snapshot. Side
    /// effect is limited to touching the session.
    ///
    /// # Errors
    ///
    /// `INVALID_TOKEN` when the access token does not verify.
    pub async fn whoami(
        &self,
        access_token: &str,
        ctx: &RequestContext,
    ) -> Result<WhoAmIResponse, GateError> {
        let claims = self.verify_access(access_token, ctx, "whoami").await?;
        let session_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| GateError::internal("malformed session id in access claims"))?;
        let Some(session) = self.sessions.touch(session_id).await else {
            self.deny(ctx, "whoami", None, None, "session_missing");
            return Err(GateError::invalid_token());
        };

        let principal = match session.user_id {
            Some(user_id) => self.directory.principal(user_id).await.map(|p| PrincipalSummary {
                id: p.id,
                code: p.code,
                kind: p.kind,
            }),
            None => None,
        };
        let policy_version = self.policy.current_version(session.team_id).await;
        self.emit_audit(
            ctx,
            "whoami",
            session.user_id,
            Some(session.device_id),
            AuditOutcome::Success,
            None,
        );
        Ok(WhoAmIResponse {
            principal,
            session: SessionSummary::from(&session),
            policy_version,
        })
    }

    /// Verify the team supervisor's PIN and open an override window on the
    /// device's session, if one is open. The response carries the full grant
    /// window; the session stores it capped at its own expiry.
    ///
    /// # Errors
    ///
    /// `RATE_LIMITED` while the supervisor is locked out, `LOGIN_FAILED` on
    /// mismatch, `INTERNAL_ERROR` on dependency failure.
    pub async fn supervisor_override(
        &self,
        device_id: Uuid,
        supervisor_pin: &str,
        ctx: &RequestContext,
    ) -> Result<OverrideResponse, GateError> {
        if (supervisor_pin.len() as u32) < self.config.pin_min_length() {
            self.deny(ctx, "supervisor_override", None, Some(device_id), "validation");
            return Err(GateError::validation("pin is too short"));
        }
        let Some(device) = self.active_device(device_id).await else {
            self.burn_verification(supervisor_pin).await;
            self.deny(ctx, "supervisor_override", None, Some(device_id), "unknown_device");
            return Err(GateError::login_failed());
        };
        let Some(supervisor) = self.directory.find_supervisor(device.team_id).await else {
            self.burn_verification(supervisor_pin).await;
            self.deny(ctx, "supervisor_override", None, Some(device_id), "no_supervisor");
            return Err(GateError::login_failed());
        };

        let key = AttemptKey {
            principal_id: supervisor.id,
            device_id,
            kind: AttemptKind::Supervisor,
        };
        let _guard = self.attempts.guard(&key).await;

        let lock = self.attempts.is_locked(&key).await;
        if lock.locked {
            self.deny(
                ctx,
                "supervisor_override",
                Some(supervisor.id),
                Some(device_id),
                "rate_limited",
            );
            return Err(GateError::rate_limited(lock.retry_after_seconds));
        }

        let verified = self
            .verify_with_timeout(&supervisor, supervisor_pin, ctx, "supervisor_override")
            .await?;
        self.attempts
            .record_attempt(&key, ctx.ip.clone(), verified)
            .await;
        if !verified {
            self.deny(
                ctx,
                "supervisor_override",
                Some(supervisor.id),
                Some(device_id),
                "invalid_pin",
            );
            return Err(GateError::login_failed());
        }

        let minutes = self.config.supervisor_override_minutes();
        let override_until = self.clock.now() + Duration::minutes(minutes);
        let subject = TokenSubject {
            sub: supervisor.id.to_string(),
            role: "supervisor".to_string(),
            team: device.team_id.to_string(),
            device: device_id.to_string(),
        };
        let token = self
            .tokens
            .issue_override(&subject)
            .map_err(|err| self.token_internal(ctx, "supervisor_override", err))?;

        if let Some(session) = self.sessions.open_session_for_device(device_id).await {
            self.sessions.grant_override(session.id, minutes).await;
        }

        self.emit_audit(
            ctx,
            "supervisor_override",
            Some(supervisor.id),
            Some(device_id),
            AuditOutcome::Success,
            None,
        );
        Ok(OverrideResponse {
            override_until,
            override_token: token.token,
        })
    }

    /// Fetch the signed policy envelope for a device.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND` for unknown or deactivated devices.
    pub async fn get_policy(
        &self,
        device_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<SignedPolicyEnvelope, GateError> {
        match self.policy.issue_policy(device_id, ctx.ip.clone()).await {
            Ok(envelope) => {
                self.emit_audit(ctx, "get_policy", None, Some(device_id), AuditOutcome::Success, None);
                Ok(envelope)
            }
            Err(err) => {
                self.deny(ctx, "get_policy", None, Some(device_id), err.code().as_str());
                Err(err)
            }
        }
    }

    async fn active_device(&self, device_id: Uuid) -> Option<Device> {
        self.directory
            .device(device_id)
            .await
            .filter(|device| device.active)
    }

    /// Equalize work on the unknown-principal path so response timing does
    /// not reveal existence.
    async fn burn_verification(&self, pin: &str) {
        let _ = timeout(
            self.config.verify_timeout(),
            self.credentials.verify_pin(Uuid::nil(), pin),
        )
        .await;
    }

    async fn verify_with_timeout(
        &self,
        principal: &Principal,
        pin: &str,
        ctx: &RequestContext,
        operation: &'static str,
    ) -> Result<bool, GateError> {
        match timeout(
            self.config.verify_timeout(),
            self.credentials.verify_pin(principal.id, pin),
        )
        .await
        {
            Ok(Ok(verified)) => Ok(verified),
            Ok(Err(err)) => {
                error!(request_id = %ctx.request_id, %err, "credential verification failed");
                self.emit_audit(
                    ctx,
                    operation,
                    Some(principal.id),
                    None,
                    AuditOutcome::Error,
                    Some("credential_store_failure".to_string()),
                );
                Err(GateError::internal("credential verification failed"))
            }
            // A timeout must never look like an authentication decision.
            Err(_) => {
                error!(request_id = %ctx.request_id, "credential verification timed out");
                self.emit_audit(
                    ctx,
                    operation,
                    Some(principal.id),
                    None,
                    AuditOutcome::Error,
                    Some("credential_store_timeout".to_string()),
                );
                Err(GateError::internal("credential verification timed out"))
            }
        }
    }

    async fn verify_access(
        &self,
        access_token: &str,
        ctx: &RequestContext,
        operation: &'static str,
    ) -> Result<envelope::TokenClaims, GateError> {
        match self.tokens.verify(access_token, TokenKind::Access).await {
            Ok(claims) => Ok(claims),
            Err(err) => {
                warn!(request_id = %ctx.request_id, %err, "access token rejected");
                self.deny(ctx, operation, None, None, "invalid_token");
                Err(GateError::invalid_token())
            }
        }
    }

    fn deny(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        principal_id: Option<Uuid>,
        device_id: Option<Uuid>,
        reason: &str,
    ) {
        self.emit_audit(
            ctx,
            operation,
            principal_id,
            device_id,
            AuditOutcome::Denied,
            Some(reason.to_string()),
        );
    }

    fn token_internal(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        err: crate::token::TokenError,
    ) -> GateError {
        error!(request_id = %ctx.request_id, %err, "token issuance failed");
        self.emit_audit(
            ctx,
            operation,
            None,
            None,
            AuditOutcome::Error,
            Some("token_issuance_failure".to_string()),
        );
        GateError::internal("token issuance failed")
    }

    fn emit_audit(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        principal_id: Option<Uuid>,
        device_id: Option<Uuid>,
        outcome: AuditOutcome,
        reason: Option<String>,
    ) {
        self.audit.record(AuditEvent {
            request_id: ctx.request_id.clone(),
            operation,
            principal_id,
            device_id,
            outcome,
            reason,
        });
    }
}
