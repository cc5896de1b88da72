//! Authentication and policy-issuance core for a fleet of managed field
//! devices.
//!
//! The crate authenticates device+user+PIN triples, tracks attempt streaks
//! with lockout/cooldown, issues and verifies signed access/refresh tokens
//! with revocation, signs per-device policy documents devices can verify
//! offline, manages session lifecycle including supervisor overrides, and
//! ingests bounded telemetry batches. Transport and persistence live outside;
//! everything here is constructed with explicit dependencies and an
//! injectable clock.

pub mod attempts;
pub mod audit;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod policy;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod token;

pub use attempts::{AttemptKey, AttemptKind, AttemptTracker, LockState};
pub use audit::{AuditEvent, AuditOutcome, AuditSink, RecordingAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GateConfig;
pub use credentials::{CredentialStore, hash_pin};
pub use directory::{Device, Directory, Principal, PrincipalKind};
pub use error::{ErrorCode, GateError};
pub use policy::{
    PolicyDocument, PolicyIssuance, PolicySigner, SignedPolicyEnvelope, TeamPolicy,
    signer::verify_policy,
};
pub use service::{
    AuthService, LoginResponse, OverrideResponse, RefreshResponse, RequestContext, SessionSummary,
    WhoAmIResponse,
};
pub use session::{Session, SessionManager, SessionStatus};
pub use telemetry::{BatchOutcome, RawTelemetryEvent, TelemetryEvent, TelemetryIngestor};
pub use token::{
    IssuedToken, RevocationSet, TokenClaims, TokenKind, TokenService, TokenSubject,
    envelope::generate_signing_key,
};
