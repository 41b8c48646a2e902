//! Per-organization outbound rate limiting.
//!
//! Each organization gets three sliding windows (minute, hour, day) and a
//! concurrency cap. A window remembers the instant of every admission still
//! inside it, so "at most N in any window of length W" holds for every
//! window position, not just aligned buckets. A window never stores more
//! entries than its limit, so memory per organization is bounded by the
//! configured limits.
//!
//! [`RateLimiter::admit`] (or its boolean form [`RateLimiter::try_acquire`])
//! is the only way a send gets admitted. Every admission is paired with
//! either [`RateLimiter::release`] once the send attempt finishes, or
//! [`RateLimiter::refund`] when the send never reached the transport.

use std::collections::VecDeque;
use std::time::Duration;

use courier_types::organization::OrganizationId;
use courier_types::settings::RateLimitSettings;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// SlidingWindow
// ---------------------------------------------------------------------------

/// Admission log for one window length.
#[derive(Debug)]
struct SlidingWindow {
    length: Duration,
    limit: u32,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(length: Duration, limit: u32) -> Self {
        Self {
            length,
            limit,
            admitted: VecDeque::with_capacity(limit as usize),
        }
    }

    /// Drop admissions that have slid out of the window.
    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.length {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_capacity(&self) -> bool {
        self.admitted.len() < self.limit as usize
    }

    fn record(&mut self, now: Instant) {
        self.admitted.push_back(now);
    }

    /// Record an admission from the past, keeping the log ordered.
    fn record_at(&mut self, at: Instant) {
        let index = self.admitted.partition_point(|t| *t <= at);
        self.admitted.insert(index, at);
    }

    /// Forget one admission made at `at`, if it is still in the window.
    fn remove(&mut self, at: Instant) {
        if let Some(index) = self.admitted.iter().rposition(|t| *t == at) {
            self.admitted.remove(index);
        }
    }

    /// How long until one more admission fits, or `None` if it fits now.
    fn retry_after(&self, now: Instant) -> Option<Duration> {
        if self.has_capacity() {
            return None;
        }
        // A lowered limit can leave more entries than allowed; all of the
        // surplus has to expire before the next admission.
        let blocking = self.admitted.len() - self.limit as usize;
        self.admitted
            .get(blocking)
            .map(|at| (*at + self.length).saturating_duration_since(now))
    }

    fn count(&self) -> u32 {
        self.admitted.len() as u32
    }
}

// ---------------------------------------------------------------------------
// OrgLimits
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct OrgLimits {
    settings: RateLimitSettings,
    minute: SlidingWindow,
    hour: SlidingWindow,
    day: SlidingWindow,
    in_flight: u32,
}

impl OrgLimits {
    fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            minute: SlidingWindow::new(MINUTE, settings.messages_per_minute),
            hour: SlidingWindow::new(HOUR, settings.messages_per_hour),
            day: SlidingWindow::new(DAY, settings.messages_per_day),
            in_flight: 0,
        }
    }

    fn apply(&mut self, settings: RateLimitSettings) {
        self.settings = settings;
        self.minute.limit = settings.messages_per_minute;
        self.hour.limit = settings.messages_per_hour;
        self.day.limit = settings.messages_per_day;
    }

    fn expire(&mut self, now: Instant) {
        self.minute.expire(now);
        self.hour.expire(now);
        self.day.expire(now);
    }

    fn windows(&self) -> [&SlidingWindow; 3] {
        [&self.minute, &self.hour, &self.day]
    }

    fn windows_mut(&mut self) -> [&mut SlidingWindow; 3] {
        [&mut self.minute, &mut self.hour, &mut self.day]
    }
}

/// A granted admission: one entry in every window plus a concurrency slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub organization_id: OrganizationId,
    at: Instant,
}

/// Snapshot of an organization's limiter for status surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitUsage {
    pub settings: RateLimitSettings,
    pub sent_last_minute: u32,
    pub sent_last_hour: u32,
    pub sent_last_day: u32,
    pub in_flight: u32,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter keyed by organization.
///
/// Organizations never configured use `default_settings`.
pub struct RateLimiter {
    default_settings: RateLimitSettings,
    orgs: DashMap<OrganizationId, OrgLimits>,
}

impl RateLimiter {
    pub fn new(default_settings: RateLimitSettings) -> Self {
        Self {
            default_settings: default_settings.clamped(),
            orgs: DashMap::new(),
        }
    }

    /// Replace an organization's limits. Values are clamped into range.
    ///
    /// Admissions already recorded stay in their windows, so lowering a
    /// limit takes effect immediately and raising one frees capacity at once.
    pub fn configure(&self, organization_id: OrganizationId, settings: RateLimitSettings) {
        let settings = settings.clamped();
        let mut entry = self
            .orgs
            .entry(organization_id)
            .or_insert_with(|| OrgLimits::new(settings));
        if entry.settings != settings {
            tracing::debug!(
                %organization_id,
                per_minute = settings.messages_per_minute,
                per_hour = settings.messages_per_hour,
                per_day = settings.messages_per_day,
                concurrency = settings.concurrency,
                "rate limits updated"
            );
            entry.apply(settings);
        }
    }

    /// Atomically check every window and the concurrency cap; on success
    /// record the admission and take a concurrency slot.
    pub fn try_acquire(&self, organization_id: OrganizationId) -> bool {
        self.admit(organization_id).is_some()
    }

    /// [`RateLimiter::try_acquire`], returning the admission so it can be
    /// refunded.
    pub fn admit(&self, organization_id: OrganizationId) -> Option<Admission> {
        let now = Instant::now();
        let mut entry = self
            .orgs
            .entry(organization_id)
            .or_insert_with(|| OrgLimits::new(self.default_settings));
        let limits = entry.value_mut();
        limits.expire(now);

        if limits.in_flight >= limits.settings.concurrency {
            tracing::trace!(%organization_id, in_flight = limits.in_flight, "concurrency cap reached");
            return None;
        }
        if limits.windows().iter().any(|w| !w.has_capacity()) {
            tracing::trace!(%organization_id, "rate window saturated");
            return None;
        }

        limits.minute.record(now);
        limits.hour.record(now);
        limits.day.record(now);
        limits.in_flight += 1;
        Some(Admission { organization_id, at: now })
    }

    /// Return the concurrency slot taken by a successful `try_acquire`.
    /// Window admissions are not refunded.
    pub fn release(&self, organization_id: OrganizationId) {
        if let Some(mut limits) = self.orgs.get_mut(&organization_id) {
            limits.in_flight = limits.in_flight.saturating_sub(1);
        }
    }

    /// Undo an admission whose send never reached the transport: its window
    /// entries are removed and its concurrency slot returned.
    pub fn refund(&self, admission: Admission) {
        let organization_id = admission.organization_id;
        if let Some(mut limits) = self.orgs.get_mut(&organization_id) {
            for window in limits.windows_mut() {
                window.remove(admission.at);
            }
            limits.in_flight = limits.in_flight.saturating_sub(1);
            tracing::trace!(%organization_id, "admission refunded");
        }
    }

    /// Count a send made `age` ago, before this limiter existed, in every
    /// window it still falls inside. Takes no concurrency slot.
    pub fn restore_admission(&self, organization_id: OrganizationId, age: Duration) {
        let now = Instant::now();
        // Older than the monotonic clock's origin: count it as recent.
        let at = now.checked_sub(age).unwrap_or(now);
        let mut entry = self
            .orgs
            .entry(organization_id)
            .or_insert_with(|| OrgLimits::new(self.default_settings));
        for window in entry.windows_mut() {
            if age < window.length {
                window.record_at(at);
            }
        }
    }

    /// Time until every window has room again, or `None` if none is full.
    ///
    /// Concurrency is not considered: a slot frees when a send finishes,
    /// not at a predictable instant.
    pub fn retry_after(&self, organization_id: OrganizationId) -> Option<Duration> {
        let now = Instant::now();
        let mut limits = self.orgs.get_mut(&organization_id)?;
        limits.expire(now);
        limits
            .windows()
            .iter()
            .filter_map(|w| w.retry_after(now))
            .max()
    }

    pub fn settings(&self, organization_id: OrganizationId) -> RateLimitSettings {
        self.orgs
            .get(&organization_id)
            .map(|l| l.settings)
            .unwrap_or(self.default_settings)
    }

    pub fn usage(&self, organization_id: OrganizationId) -> RateLimitUsage {
        let now = Instant::now();
        match self.orgs.get_mut(&organization_id) {
            Some(mut limits) => {
                limits.expire(now);
                RateLimitUsage {
                    settings: limits.settings,
                    sent_last_minute: limits.minute.count(),
                    sent_last_hour: limits.hour.count(),
                    sent_last_day: limits.day.count(),
                    in_flight: limits.in_flight,
                }
            }
            None => RateLimitUsage {
                settings: self.default_settings,
                sent_last_minute: 0,
                sent_last_hour: 0,
                sent_last_day: 0,
                in_flight: 0,
            },
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitSettings::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_settings", &self.default_settings)
            .field("organizations", &self.orgs.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
