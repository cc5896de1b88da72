//! Session lifecycle: open → expired (detected passively at read time) or
//! open → ended (explicit). Nothing transitions out of a terminal state, and
//! a session never mutates once `ended_at` is set.

use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Expired,
    Ended,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub team_id: Uuid,
    pub device_id: Uuid,
    pub started_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub status: SessionStatus,
    pub override_until: Option<OffsetDateTime>,
    pub refresh_jti: Option<String>,
    pub refresh_expires_at: Option<OffsetDateTime>,
    pub last_activity_at: OffsetDateTime,
}

impl Session {
    /// Override-active means the override window is still running, capped at
    /// the session's own expiry.
    #[must_use]
    pub fn override_active(&self, now: OffsetDateTime) -> bool {
        self.override_until
            .is_some_and(|until| now < until.min(self.expires_at))
    }
}

pub struct SessionManager {
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(
        &self,
        user_id: Option<Uuid>,
        team_id: Uuid,
        device_id: Uuid,
        ttl: Duration,
    ) -> Session {
        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            team_id,
            device_id,
            started_at: now,
            expires_at: now + ttl,
            ended_at: None,
            status: SessionStatus::Open,
            override_until: None,
            refresh_jti: None,
            refresh_expires_at: None,
            last_activity_at: now,
        };
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id, session.clone());
        session
    }

    /// Read a session, applying passive expiry first.
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&id)?;
        apply_expiry(session, now);
        Some(session.clone())
    }

    /// Record the refresh token currently bound to the session so logout can
    /// revoke it with the right expiry.
    pub async fn set_refresh(&self, id: Uuid, jti: String, expires_at: OffsetDateTime) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&id) {
            if session.ended_at.is_none() {
                session.refresh_jti = Some(jti);
                session.refresh_expires_at = Some(expires_at);
            }
        }
    }

    /// Grant a supervisor override window. The stored window is capped at the
    /// session's own expiry; the grant itself does not extend the session.
    pub async fn grant_override(&self, id: Uuid, duration_minutes: i64) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&id)?;
        apply_expiry(session, now);
        if session.ended_at.is_none() && session.status == SessionStatus::Open {
            let until = (now + Duration::minutes(duration_minutes)).min(session.expires_at);
            session.override_until = Some(until);
            info!(session = %session.id, until = %until, "override window granted");
        }
        Some(session.clone())
    }

    /// Explicit end. Idempotent on already-terminal sessions: no field moves
    /// once `ended_at` is set or the session has expired.
    pub async fn end(&self, id: Uuid, reason: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&id)?;
        apply_expiry(session, now);
        if session.status == SessionStatus::Open {
            session.status = SessionStatus::Ended;
            session.ended_at = Some(now);
            info!(session = %session.id, reason, "session ended");
        }
        Some(session.clone())
    }

    /// Refresh `last_activity_at`; used by whoami and token refresh.
    pub async fn touch(&self, id: Uuid) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&id)?;
        apply_expiry(session, now);
        if session.status == SessionStatus::Open {
            session.last_activity_at = now;
        }
        Some(session.clone())
    }

    /// The open session for a device, if any. Supervisor override attaches
    /// its window here.
    pub async fn open_session_for_device(&self, device_id: Uuid) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        sessions
            .values_mut()
            .filter(|session| session.device_id == device_id)
            .map(|session| {
                apply_expiry(session, now);
                session.clone()
            })
            .find(|session| session.status == SessionStatus::Open)
    }
}

// A session past its expiry is logically expired even before anyone marks it.
fn apply_expiry(session: &mut Session, now: OffsetDateTime) {
    if session.status == SessionStatus::Open && now >= session.expires_at {
        session.status = SessionStatus::Expired;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const TTL: Duration = Duration::hours(1);

    fn manager() -> (Arc<ManualClock>, SessionManager) {
        let clock = Arc::new(ManualClock::default_start());
        let manager = SessionManager::new(clock.clone());
        (clock, manager)
    }

    async fn open_session(manager: &SessionManager) -> Session {
        manager
            .create(Some(Uuid::new_v4()), Uuid::new_v4(), Uuid::new_v4(), TTL)
            .await
    }

    #[tokio::test]
    async fn create_opens_with_expected_expiry() {
        let (clock, manager) = manager();
        let session = open_session(&manager).await;
        assert_eq!(session.status, SessionStatus::Open);
        assert_eq!(session.expires_at, clock.now() + TTL);
        assert!(session.ended_at.is_none());
    }

    #[tokio::test]
    async fn passive_expiry_detected_at_read() {
        let (clock, manager) = manager();
        let session = open_session(&manager).await;
        clock.advance(TTL);
        let read = manager.get(session.id).await.expect("session");
        assert_eq!(read.status, SessionStatus::Expired);
        assert!(read.ended_at.is_none());
    }

    #[tokio::test]
    async fn end_is_terminal_and_idempotent() {
        let (clock, manager) = manager();
        let session = open_session(&manager).await;
        let ended = manager.end(session.id, "logout").await.expect("session");
        assert_eq!(ended.status, SessionStatus::Ended);
        let ended_at = ended.ended_at.expect("ended_at");

        clock.advance(Duration::minutes(5));
        let again = manager.end(session.id, "logout").await.expect("session");
        assert_eq!(again.ended_at, Some(ended_at));
        assert_eq!(again.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn expired_session_cannot_be_ended() {
        let (clock, manager) = manager();
        let session = open_session(&manager).await;
        clock.advance(TTL);
        let read = manager.end(session.id, "logout").await.expect("session");
        assert_eq!(read.status, SessionStatus::Expired);
        assert!(read.ended_at.is_none());
    }

    #[tokio::test]
    async fn touch_updates_last_activity_only_while_open() {
        let (clock, manager) = manager();
        let session = open_session(&manager).await;
        clock.advance(Duration::minutes(10));
        let touched = manager.touch(session.id).await.expect("session");
        assert_eq!(touched.last_activity_at, clock.now());

        manager.end(session.id, "logout").await;
        clock.advance(Duration::minutes(1));
        let after_end = manager.touch(session.id).await.expect("session");
        assert_ne!(after_end.last_activity_at, clock.now());
    }

    #[tokio::test]
    async fn override_is_capped_at_session_expiry() {
        let (clock, manager) = manager();
        let session = open_session(&manager).await;
        // 120 minutes requested, but the session expires in 60.
        let granted = manager
            .grant_override(session.id, 120)
            .await
            .expect("session");
        assert_eq!(granted.override_until, Some(session.expires_at));
        assert!(granted.override_active(clock.now()));

        clock.advance(TTL);
        assert!(!granted.override_active(clock.now()));
    }

    #[tokio::test]
    async fn short_override_keeps_its_own_window() {
        let (clock, manager) = manager();
        let session = open_session(&manager).await;
        let granted = manager
            .grant_override(session.id, 30)
            .await
            .expect("session");
        assert_eq!(
            granted.override_until,
            Some(clock.now() + Duration::minutes(30))
        );
        // The grant does not extend the session.
        assert_eq!(granted.expires_at, session.expires_at);
    }

    #[tokio::test]
    async fn ended_session_rejects_override_mutation() {
        let (_, manager) = manager();
        let session = open_session(&manager).await;
        manager.end(session.id, "logout").await;
        let after = manager
            .grant_override(session.id, 30)
            .await
            .expect("session");
        assert!(after.override_until.is_none());
    }

    #[tokio::test]
    async fn open_session_lookup_skips_terminal_sessions() {
        let (clock, manager) = manager();
        let device_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();
        let first = manager.create(None, team_id, device_id, TTL).await;
        manager.end(first.id, "logout").await;
        assert!(manager.open_session_for_device(device_id).await.is_none());

        let second = manager.create(None, team_id, device_id, TTL).await;
        let found = manager
            .open_session_for_device(device_id)
            .await
            .expect("open session");
        assert_eq!(found.id, second.id);

        clock.advance(TTL);
        assert!(manager.open_session_for_device(device_id).await.is_none());
    }
}
