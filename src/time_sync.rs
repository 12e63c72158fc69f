use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};

use crate::config;
use crate::error::AttemptError;

const WEEKDAY_SHORT: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const SECS_PER_DAY: i64 = 24 * 3600;

/// One synchronization attempt against one time server.
pub trait TimeSource {
    fn sync(&mut self, server: &str, timeout: Duration) -> Result<(), AttemptError>;
}

/// Wall clock plus a monotonic uptime counter.
pub trait Clock {
    /// Seconds since the Unix epoch, UTC.
    fn now_utc(&self) -> i64;
    fn uptime_ms(&self) -> u64;
}

/// Host clock, for tools and tests running off-device.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Local calendar arithmetic for a fixed UTC offset (no DST).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    offset_secs: i64,
}

impl LocalTime {
    pub const fn new(offset_secs: i64) -> Self {
        Self { offset_secs }
    }

    pub const fn configured() -> Self {
        Self::new(config::UTC_OFFSET_SECS)
    }

    fn naive(&self, ts: i64) -> Option<NaiveDateTime> {
        DateTime::from_timestamp(ts.checked_add(self.offset_secs)?, 0).map(|dt| dt.naive_utc())
    }

    /// UTC instant of the local midnight that starts `ts`'s day.
    pub fn day_start(&self, ts: i64) -> i64 {
        ts.saturating_sub(ts.saturating_add(self.offset_secs).rem_euclid(SECS_PER_DAY))
    }

    /// Whether `ts` maps onto a calendar date in this zone.
    pub fn is_representable(&self, ts: i64) -> bool {
        self.naive(ts).is_some()
    }

    /// Zero-padded 24-hour `HH:MM`.
    pub fn hhmm(&self, ts: i64) -> heapless::String<5> {
        let mut out = heapless::String::new();
        if let Some(t) = self.naive(ts) {
            write!(out, "{:02}:{:02}", t.hour(), t.minute()).ok();
        }
        out
    }

    pub fn weekday_short(&self, ts: i64) -> &'static str {
        self.naive(ts)
            .map(|t| WEEKDAY_SHORT[t.weekday().num_days_from_sunday() as usize])
            .unwrap_or("")
    }

    /// `DD.MM.YYYY`
    pub fn date(&self, ts: i64) -> String {
        self.naive(ts)
            .map(|t| format!("{:02}.{:02}.{}", t.day(), t.month(), t.year()))
            .unwrap_or_default()
    }

    pub fn year(&self, ts: i64) -> i32 {
        self.naive(ts).map(|t| t.year()).unwrap_or(1970)
    }

    pub fn is_synchronized(&self, ts: i64) -> bool {
        self.year(ts) >= config::MIN_SYNCED_YEAR
    }
}

impl Default for LocalTime {
    fn default() -> Self {
        Self::configured()
    }
}
