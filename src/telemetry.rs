//! Bounded telemetry intake. Batches are capped, never rejected wholesale:
//! partial acceptance over all-or-nothing. Unknown event types are rejected
//! and count toward `dropped`, so `accepted + dropped` always equals the
//! submitted length. Any accepted event counts as device contact and
//! freshens `last_seen_at`; an accepted gps event additionally freshens
//! `last_gps_at`.

use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::directory::Directory;
use crate::error::GateError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryKind {
    Gps,
    Heartbeat,
    Battery,
    AppUsage,
    ScreenTime,
    Network,
    Error,
    GateBlocked,
    PinVerify,
}

impl TelemetryKind {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "gps" => Some(Self::Gps),
            "heartbeat" => Some(Self::Heartbeat),
            "battery" => Some(Self::Battery),
            "app_usage" => Some(Self::AppUsage),
            "screen_time" => Some(Self::ScreenTime),
            "network" => Some(Self::Network),
            "error" => Some(Self::Error),
            "gate.blocked" => Some(Self::GateBlocked),
            "pin.verify" => Some(Self::PinVerify),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gps => "gps",
            Self::Heartbeat => "heartbeat",
            Self::Battery => "battery",
            Self::AppUsage => "app_usage",
            Self::ScreenTime => "screen_time",
            Self::Network => "network",
            Self::Error => "error",
            Self::GateBlocked => "gate.blocked",
            Self::PinVerify => "pin.verify",
        }
    }
}

/// An event as submitted by a device; the kind is still an untrusted string.
#[derive(Clone, Debug)]
pub struct RawTelemetryEvent {
    pub kind: String,
    pub session_id: Option<Uuid>,
    pub payload: Value,
    /// Client-supplied event time, taken as-is.
    pub recorded_at: String,
}

/// An accepted, typed event with the server-assigned receive time.
#[derive(Clone, Debug)]
pub struct TelemetryEvent {
    pub device_id: Uuid,
    pub session_id: Option<Uuid>,
    pub kind: TelemetryKind,
    pub payload: Value,
    pub recorded_at: String,
    pub received_at: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub dropped: usize,
}

pub struct TelemetryIngestor {
    clock: Arc<dyn Clock>,
    directory: Arc<Directory>,
    batch_max: usize,
    events: Mutex<Vec<TelemetryEvent>>,
}

impl TelemetryIngestor {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, directory: Arc<Directory>, batch_max: usize) -> Self {
        Self {
            clock,
            directory,
            batch_max,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Accept up to `batch_max` events in submission order, no reordering and
    /// no priority. Any accepted event freshens the device's last-seen
    /// timestamp; an accepted gps event freshens the gps timestamp too.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND` for unknown or deactivated devices.
    pub async fn ingest_batch(
        &self,
        device_id: Uuid,
        events: Vec<RawTelemetryEvent>,
    ) -> Result<BatchOutcome, GateError> {
        match self.directory.device(device_id).await {
            Some(device) if device.active => {}
            _ => return Err(GateError::device_not_found()),
        }

        let total = events.len();
        let received_at = self.clock.now();
        let mut accepted = Vec::new();
        let mut saw_gps = false;
        for event in events {
            if accepted.len() >= self.batch_max {
                break;
            }
            let Some(kind) = TelemetryKind::parse(&event.kind) else {
                debug!(device = %device_id, kind = %event.kind, "dropping unknown telemetry kind");
                continue;
            };
            saw_gps |= kind == TelemetryKind::Gps;
            accepted.push(TelemetryEvent {
                device_id,
                session_id: event.session_id,
                kind,
                payload: event.payload,
                recorded_at: event.recorded_at,
                received_at,
            });
        }

        let outcome = BatchOutcome {
            accepted: accepted.len(),
            dropped: total - accepted.len(),
        };
        if !accepted.is_empty() {
            if saw_gps {
                self.directory.touch_gps(device_id).await;
            } else {
                self.directory.touch_seen(device_id).await;
            }
            let mut events = self.events.lock().await;
            events.extend(accepted);
        }
        Ok(outcome)
    }

    /// Accepted events, oldest first. Append-only.
    pub async fn events(&self) -> Vec<TelemetryEvent> {
        let events = self.events.lock().await;
        events.clone()
    }
}
