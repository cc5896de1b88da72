//! End-to-end flows across the whole gate core: login, refresh, override,
//! logout, policy fetch, and telemetry, with a manual clock driving expiry.

use anyhow::{Context, Result};
use std::sync::Arc;
use time::Duration;
use uuid::Uuid;

use fieldgate::{
    AttemptTracker, AuthService, Clock, Device, Directory, ErrorCode, GateConfig, ManualClock,
    Principal,
    PrincipalKind, RawTelemetryEvent, RecordingAuditSink, RequestContext, RevocationSet,
    SessionManager, SessionStatus, TelemetryIngestor, TokenKind, TokenService,
    credentials::hash_pin, policy::PolicySigner, verify_policy,
};

const USER_CODE: &str = "4711";
const USER_PIN: &str = "123456";
const SUPERVISOR_PIN: &str = "789012";

struct Gate {
    clock: Arc<ManualClock>,
    directory: Arc<Directory>,
    tokens: Arc<TokenService>,
    sessions: Arc<SessionManager>,
    policy: Arc<PolicySigner>,
    audit: Arc<RecordingAuditSink>,
    telemetry: TelemetryIngestor,
    service: AuthService,
    device_id: Uuid,
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

impl Gate {
    async fn new(config: GateConfig) -> Result<Self> {
        init_tracing();
        let clock = Arc::new(ManualClock::default_start());
        let directory = Arc::new(Directory::new(clock.clone()));

        let team_id = Uuid::new_v4();
        let device_id = Uuid::new_v4();
        directory
            .insert_device(Device {
                id: device_id,
                team_id,
                active: true,
                last_seen_at: None,
                last_gps_at: None,
            })
            .await;
        directory
            .insert_principal(Principal {
                id: Uuid::new_v4(),
                team_id,
                kind: PrincipalKind::User,
                code: USER_CODE.to_string(),
                pin_hash: hash_pin(USER_PIN).context("hash user pin")?,
                active: true,
                pin_rotated_at: clock.now(),
            })
            .await;
        directory
            .insert_principal(Principal {
                id: Uuid::new_v4(),
                team_id,
                kind: PrincipalKind::Supervisor,
                code: "9001".to_string(),
                pin_hash: hash_pin(SUPERVISOR_PIN).context("hash supervisor pin")?,
                active: true,
                pin_rotated_at: clock.now(),
            })
            .await;

        let revocations = Arc::new(RevocationSet::new());
        let tokens = Arc::new(TokenService::new(
            fieldgate::generate_signing_key(),
            clock.clone(),
            &config,
            revocations,
        ));
        let sessions = Arc::new(SessionManager::new(clock.clone()));
        let policy = Arc::new(PolicySigner::new(
            fieldgate::generate_signing_key(),
            clock.clone(),
            config.clone(),
            directory.clone(),
        ));
        let audit = Arc::new(RecordingAuditSink::new());
        let attempts = Arc::new(AttemptTracker::new(
            clock.clone(),
            config.retry_limit(),
            config.cooldown_seconds(),
        ));
        let telemetry =
            TelemetryIngestor::new(clock.clone(), directory.clone(), config.batch_max());
        let service = AuthService::new(
            directory.clone(),
            attempts,
            tokens.clone(),
            sessions.clone(),
            policy.clone(),
            audit.clone(),
            clock.clone(),
            config,
        );

        Ok(Self {
            clock,
            directory,
            tokens,
            sessions,
            policy,
            audit,
            telemetry,
            service,
            device_id,
        })
    }

    fn ctx(&self, request_id: &str) -> RequestContext {
        RequestContext {
            request_id: request_id.to_string(),
            ip: Some("10.20.0.7".to_string()),
        }
    }
}

#[tokio::test]
async fn login_opens_session_with_policy_version() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let response = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-login"))
        .await
        .context("login should succeed")?;

    assert_eq!(response.session.status, SessionStatus::Open);
    assert_eq!(
        response.session.expires_at,
        gate.clock.now() + Duration::hours(1)
    );
    assert_eq!(response.access_expires_at, gate.clock.now() + Duration::hours(1));
    assert_eq!(response.policy_version, 1);

    // The access token verifies against the token service.
    let claims = gate
        .tokens
        .verify(&response.access_token, TokenKind::Access)
        .await
        .context("access token must verify")?;
    assert_eq!(claims.sub, response.session.id.to_string());

    // Login counts as device activity.
    let device = gate
        .directory
        .device(gate.device_id)
        .await
        .context("device present")?;
    assert_eq!(device.last_seen_at, Some(gate.clock.now()));
    Ok(())
}

#[tokio::test]
async fn wrong_pin_is_generic_and_locks_after_five() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let ctx = gate.ctx("req-lockout");

    for _ in 0..5 {
        let err = gate
            .service
            .login(gate.device_id, USER_CODE, "999999", &ctx)
            .await
            .expect_err("wrong pin must fail");
        assert_eq!(err.code(), ErrorCode::LoginFailed);
        assert_eq!(err.message(), "Invalid credentials");
    }

    // Sixth attempt is refused before any verification happens.
    let err = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &ctx)
        .await
        .expect_err("locked out");
    assert_eq!(err.code(), ErrorCode::RateLimited);
    let retry_after = err.retry_after_seconds().context("retry after present")?;
    assert!(retry_after > 0 && retry_after <= 300);

    // The lock self-heals once the cooldown elapses.
    gate.clock.advance(Duration::seconds(300));
    gate.service
        .login(gate.device_id, USER_CODE, USER_PIN, &ctx)
        .await
        .context("login works again after cooldown")?;
    Ok(())
}

#[tokio::test]
async fn unknown_user_and_wrong_pin_are_indistinguishable() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let ctx = gate.ctx("req-enum");

    let unknown = gate
        .service
        .login(gate.device_id, "0000", USER_PIN, &ctx)
        .await
        .expect_err("unknown user fails");
    let wrong_pin = gate
        .service
        .login(gate.device_id, USER_CODE, "999999", &ctx)
        .await
        .expect_err("wrong pin fails");

    assert_eq!(unknown.code(), wrong_pin.code());
    assert_eq!(unknown.message(), wrong_pin.message());
    Ok(())
}

#[tokio::test]
async fn refresh_returns_new_access_token() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let login = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-login"))
        .await?;

    gate.clock.advance(Duration::minutes(30));
    let refreshed = gate
        .service
        .refresh(&login.refresh_token, &gate.ctx("req-refresh"))
        .await
        .context("refresh should succeed")?;
    assert!(refreshed.rotated_refresh_token.is_none());
    assert_ne!(refreshed.access_token, login.access_token);

    let session = gate
        .sessions
        .get(login.session.id)
        .await
        .context("session present")?;
    assert_eq!(session.last_activity_at, gate.clock.now());
    Ok(())
}

#[tokio::test]
async fn logout_then_whoami_is_invalid_token() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let login = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-login"))
        .await?;

    let whoami = gate
        .service
        .whoami(&login.access_token, &gate.ctx("req-whoami"))
        .await
        .context("whoami before logout")?;
    assert_eq!(
        whoami.principal.map(|p| p.code),
        Some(USER_CODE.to_string())
    );

    gate.service
        .logout(&login.access_token, &gate.ctx("req-logout"))
        .await
        .context("logout should succeed")?;

    let err = gate
        .service
        .whoami(&login.access_token, &gate.ctx("req-whoami-2"))
        .await
        .expect_err("revoked token rejected");
    assert_eq!(err.code(), ErrorCode::InvalidToken);

    // The refresh token dies with the session.
    let err = gate
        .service
        .refresh(&login.refresh_token, &gate.ctx("req-refresh"))
        .await
        .expect_err("refresh revoked on logout");
    assert_eq!(err.code(), ErrorCode::InvalidToken);

    let session = gate
        .sessions
        .get(login.session.id)
        .await
        .context("session present")?;
    assert_eq!(session.status, SessionStatus::Ended);
    Ok(())
}

#[tokio::test]
async fn supervisor_override_grants_capped_window() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let login = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-login"))
        .await?;

    let response = gate
        .service
        .supervisor_override(gate.device_id, SUPERVISOR_PIN, &gate.ctx("req-override"))
        .await
        .context("override should succeed")?;
    assert_eq!(
        response.override_until,
        gate.clock.now() + Duration::minutes(120)
    );
    gate.tokens
        .verify(&response.override_token, TokenKind::Override)
        .await
        .context("override token must verify")?;

    // The session window is capped at its own expiry (60 min < 120 min).
    let session = gate
        .sessions
        .get(login.session.id)
        .await
        .context("session present")?;
    assert_eq!(session.override_until, Some(session.expires_at));
    assert!(session.override_active(gate.clock.now()));
    Ok(())
}

#[tokio::test]
async fn supervisor_lockout_uses_supervisor_streak() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let ctx = gate.ctx("req-sup");

    for _ in 0..5 {
        let err = gate
            .service
            .supervisor_override(gate.device_id, "111111", &ctx)
            .await
            .expect_err("wrong supervisor pin");
        assert_eq!(err.code(), ErrorCode::LoginFailed);
    }
    let err = gate
        .service
        .supervisor_override(gate.device_id, SUPERVISOR_PIN, &ctx)
        .await
        .expect_err("supervisor locked");
    assert_eq!(err.code(), ErrorCode::RateLimited);

    // The user's streak is untouched.
    gate.service
        .login(gate.device_id, USER_CODE, USER_PIN, &ctx)
        .await
        .context("user login unaffected")?;
    Ok(())
}

#[tokio::test]
async fn policy_fetch_verifies_offline() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let envelope = gate
        .service
        .get_policy(gate.device_id, &gate.ctx("req-policy"))
        .await
        .context("policy issuance")?;

    assert!(verify_policy(
        &envelope,
        gate.policy.verifying_key(),
        gate.clock.now()
    ));
    let receipts = gate.policy.issuances().await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].device_id, gate.device_id);

    let err = gate
        .service
        .get_policy(Uuid::new_v4(), &gate.ctx("req-policy-2"))
        .await
        .expect_err("unknown device");
    assert_eq!(err.code(), ErrorCode::DeviceNotFound);
    Ok(())
}

#[tokio::test]
async fn telemetry_batch_is_capped_not_rejected() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let events = (0..60)
        .map(|i| RawTelemetryEvent {
            kind: if i % 2 == 0 { "heartbeat" } else { "gps" }.to_string(),
            session_id: None,
            payload: serde_json::json!({"seq": i}),
            recorded_at: "2026-01-01T00:00:00Z".to_string(),
        })
        .collect();
    let outcome = gate
        .telemetry
        .ingest_batch(gate.device_id, events)
        .await
        .context("ingest")?;
    assert_eq!(outcome.accepted, 50);
    assert_eq!(outcome.dropped, 10);

    let device = gate
        .directory
        .device(gate.device_id)
        .await
        .context("device present")?;
    assert_eq!(device.last_gps_at, Some(gate.clock.now()));
    Ok(())
}

#[tokio::test]
async fn every_operation_leaves_an_audit_event() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let login = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-1"))
        .await?;
    gate.service
        .whoami(&login.access_token, &gate.ctx("req-2"))
        .await?;
    let _ = gate
        .service
        .login(gate.device_id, USER_CODE, "999999", &gate.ctx("req-3"))
        .await;
    gate.service
        .logout(&login.access_token, &gate.ctx("req-4"))
        .await?;

    let events = gate.audit.events();
    let ids: Vec<&str> = events.iter().map(|e| e.request_id.as_str()).collect();
    assert_eq!(ids, vec!["req-1", "req-2", "req-3", "req-4"]);
    assert_eq!(events[2].reason.as_deref(), Some("invalid_pin"));
    assert_eq!(events[2].outcome, fieldgate::AuditOutcome::Denied);
    Ok(())
}

#[tokio::test]
async fn validation_failures_still_leave_an_audit_event() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;

    let err = gate
        .service
        .login(gate.device_id, "", USER_PIN, &gate.ctx("req-v1"))
        .await
        .expect_err("empty user code");
    assert_eq!(err.code(), ErrorCode::Validation);

    let err = gate
        .service
        .supervisor_override(gate.device_id, "12", &gate.ctx("req-v2"))
        .await
        .expect_err("short pin");
    assert_eq!(err.code(), ErrorCode::Validation);

    let events = gate.audit.events();
    let ids: Vec<&str> = events.iter().map(|e| e.request_id.as_str()).collect();
    assert_eq!(ids, vec!["req-v1", "req-v2"]);
    for event in &events {
        assert_eq!(event.outcome, fieldgate::AuditOutcome::Denied);
        assert_eq!(event.reason.as_deref(), Some("validation"));
        assert_eq!(event.device_id, Some(gate.device_id));
    }
    Ok(())
}

#[tokio::test]
async fn verification_timeout_is_internal_error_not_a_decision() -> Result<()> {
    let config =
        GateConfig::default().with_verify_timeout(std::time::Duration::from_nanos(1));
    let gate = Gate::new(config).await?;

    let err = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-timeout"))
        .await
        .expect_err("verification cannot finish in time");
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.is_retryable());

    let events = gate.audit.events();
    let last = events.last().context("audit event present")?;
    assert_eq!(last.outcome, fieldgate::AuditOutcome::Error);
    assert_eq!(last.reason.as_deref(), Some("credential_store_timeout"));
    Ok(())
}

#[tokio::test]
async fn expired_session_reads_as_expired() -> Result<()> {
    let gate = Gate::new(GateConfig::default()).await?;
    let login = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-login"))
        .await?;

    gate.clock.advance(Duration::hours(1));
    let session = gate
        .sessions
        .get(login.session.id)
        .await
        .context("session present")?;
    assert_eq!(session.status, SessionStatus::Expired);

    // The access token expired with the same TTL.
    let err = gate
        .service
        .whoami(&login.access_token, &gate.ctx("req-whoami"))
        .await
        .expect_err("expired token");
    assert_eq!(err.code(), ErrorCode::InvalidToken);
    Ok(())
}

#[tokio::test]
async fn rotation_on_use_rejects_replayed_refresh() -> Result<()> {
    let config = GateConfig::default().with_refresh_rotation_on_use(true);
    let gate = Gate::new(config).await?;
    let login = gate
        .service
        .login(gate.device_id, USER_CODE, USER_PIN, &gate.ctx("req-login"))
        .await?;

    let first = gate
        .service
        .refresh(&login.refresh_token, &gate.ctx("req-refresh-1"))
        .await
        .context("first refresh")?;
    let rotated = first
        .rotated_refresh_token
        .context("rotation must produce a new refresh token")?;

    let err = gate
        .service
        .refresh(&login.refresh_token, &gate.ctx("req-refresh-2"))
        .await
        .expect_err("replay must fail");
    assert!(matches!(
        err.code(),
        ErrorCode::InvalidToken | ErrorCode::Conflict
    ));

    gate.service
        .refresh(&rotated, &gate.ctx("req-refresh-3"))
        .await
        .context("rotated token still redeems")?;
    Ok(())
}
