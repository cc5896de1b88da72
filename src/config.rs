//! Gate configuration: token TTLs, lockout policy, and policy-document defaults.

use std::time::Duration;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_OVERRIDE_MINUTES: i64 = 120;
const DEFAULT_RETRY_LIMIT: u32 = 5;
const DEFAULT_COOLDOWN_SECONDS: i64 = 300;
const DEFAULT_BATCH_MAX: usize = 50;
const DEFAULT_POLICY_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_MAX_CLOCK_SKEW_SECONDS: i64 = 180;
const DEFAULT_PIN_MIN_LENGTH: u32 = 6;
const DEFAULT_GRACE_MINUTES: i64 = 10;
const DEFAULT_GPS_INTERVAL_SECONDS: i64 = 300;
const DEFAULT_TELEMETRY_INTERVAL_SECONDS: i64 = 600;
const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_TIMEZONE: &str = "UTC";

/// Tunable knobs for the gate core. Defaults match fleet policy; overrides are
/// applied with the builder methods at construction time.
#[derive(Clone, Debug)]
pub struct GateConfig {
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    supervisor_override_minutes: i64,
    retry_limit: u32,
    cooldown_seconds: i64,
    batch_max: usize,
    policy_ttl_seconds: i64,
    max_clock_skew_seconds: i64,
    pin_min_length: u32,
    grace_minutes: i64,
    gps_interval_seconds: i64,
    telemetry_interval_seconds: i64,
    timezone: String,
    refresh_rotation_on_use: bool,
    verify_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            supervisor_override_minutes: DEFAULT_OVERRIDE_MINUTES,
            retry_limit: DEFAULT_RETRY_LIMIT,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            batch_max: DEFAULT_BATCH_MAX,
            policy_ttl_seconds: DEFAULT_POLICY_TTL_SECONDS,
            max_clock_skew_seconds: DEFAULT_MAX_CLOCK_SKEW_SECONDS,
            pin_min_length: DEFAULT_PIN_MIN_LENGTH,
            grace_minutes: DEFAULT_GRACE_MINUTES,
            gps_interval_seconds: DEFAULT_GPS_INTERVAL_SECONDS,
            telemetry_interval_seconds: DEFAULT_TELEMETRY_INTERVAL_SECONDS,
            timezone: DEFAULT_TIMEZONE.to_string(),
            refresh_rotation_on_use: false,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_supervisor_override_minutes(mut self, minutes: i64) -> Self {
        self.supervisor_override_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    #[must_use]
    pub fn with_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_batch_max(mut self, batch_max: usize) -> Self {
        self.batch_max = batch_max;
        self
    }

    #[must_use]
    pub fn with_policy_ttl_seconds(mut self, seconds: i64) -> Self {
        self.policy_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_clock_skew_seconds(mut self, seconds: i64) -> Self {
        self.max_clock_skew_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_pin_min_length(mut self, length: u32) -> Self {
        self.pin_min_length = length;
        self
    }

    #[must_use]
    pub fn with_grace_minutes(mut self, minutes: i64) -> Self {
        self.grace_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_gps_interval_seconds(mut self, seconds: i64) -> Self {
        self.gps_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_telemetry_interval_seconds(mut self, seconds: i64) -> Self {
        self.telemetry_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, timezone: String) -> Self {
        self.timezone = timezone;
        self
    }

    /// Rotate the refresh token on every use. Off by default; when enabled two
    /// concurrent refreshes race on the active jti and the loser gets CONFLICT.
    #[must_use]
    pub fn with_refresh_rotation_on_use(mut self, enabled: bool) -> Self {
        self.refresh_rotation_on_use = enabled;
        self
    }

    #[must_use]
    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn supervisor_override_minutes(&self) -> i64 {
        self.supervisor_override_minutes
    }

    #[must_use]
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    #[must_use]
    pub fn cooldown_seconds(&self) -> i64 {
        self.cooldown_seconds
    }

    #[must_use]
    pub fn batch_max(&self) -> usize {
        self.batch_max
    }

    #[must_use]
    pub fn policy_ttl_seconds(&self) -> i64 {
        self.policy_ttl_seconds
    }

    #[must_use]
    pub fn max_clock_skew_seconds(&self) -> i64 {
        self.max_clock_skew_seconds
    }

    #[must_use]
    pub fn pin_min_length(&self) -> u32 {
        self.pin_min_length
    }

    #[must_use]
    pub fn grace_minutes(&self) -> i64 {
        self.grace_minutes
    }

    #[must_use]
    pub fn gps_interval_seconds(&self) -> i64 {
        self.gps_interval_seconds
    }

    #[must_use]
    pub fn telemetry_interval_seconds(&self) -> i64 {
        self.telemetry_interval_seconds
    }

    #[must_use]
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    #[must_use]
    pub fn refresh_rotation_on_use(&self) -> bool {
        self.refresh_rotation_on_use
    }

    #[must_use]
    pub fn verify_timeout(&self) -> Duration {
        self.verify_timeout
    }
}
