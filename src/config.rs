//! Build-time tunables. Runtime configuration lives in the persisted
//! settings record only.

use std::time::Duration;

use crate::forecast::DailyWindow;
use crate::retry::RetryPolicy;

// ── Factory defaults (overridable through secrets.local.rs) ─────────

pub const DEFAULT_WIFI_SSID: &str = match option_env!("LOCAL_WIFI_SSID") {
    Some(v) => v,
    None => "YourWIFI",
};
pub const DEFAULT_WIFI_PASS: &str = match option_env!("LOCAL_WIFI_PASS") {
    Some(v) => v,
    None => "YourPassword",
};
pub const DEFAULT_API_KEY: &str = match option_env!("LOCAL_WEATHER_API_KEY") {
    Some(v) => v,
    None => "YourAPIKey",
};
pub const DEFAULT_LOCATION: &str = match option_env!("LOCAL_WEATHER_CITY") {
    Some(v) => v,
    None => "Moscow,ru",
};

// ── Connectivity ────────────────────────────────────────────────────

pub const PROVISIONING_AP_SSID: &str = "WeatherPanel-Setup";
pub const STATION_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const STATION_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const PORTAL_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const PROVISIONING_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// ── Time ────────────────────────────────────────────────────────────

pub const NTP_SERVERS: [&str; 4] = [
    "pool.ntp.org",
    "time.google.com",
    "time.cloudflare.com",
    "time.nist.gov",
];
pub const NTP_POLICY: RetryPolicy =
    RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(10));
/// Fixed local offset (UTC+5), no daylight saving.
pub const UTC_OFFSET_SECS: i64 = 5 * 3600;
/// Clocks reporting an earlier local year have never been synchronized.
pub const MIN_SYNCED_YEAR: i32 = 2022;

// ── Weather provider ────────────────────────────────────────────────

/// TLS first, plain HTTP as the fallback when the handshake cannot get memory.
pub const PROVIDER_BASE_URLS: [&str; 2] = [
    "https://api.openweathermap.org",
    "http://api.openweathermap.org",
];
pub const PROVIDER_UNITS: &str = "metric";
pub const PROVIDER_LANG: &str = "en";
pub const FORECAST_SAMPLE_COUNT: u32 = 40;
pub const WEATHER_POLICY: RetryPolicy =
    RetryPolicy::new(5, Duration::from_secs(15), Duration::from_secs(10));
pub const CURRENT_MIN_FREE_HEAP: usize = 8 * 1024;
pub const FORECAST_MIN_FREE_HEAP: usize = 32 * 1024;
pub const MAX_RESPONSE_BYTES: usize = 48 * 1024;

// ── Aggregation / layout ────────────────────────────────────────────

pub const HOURLY_SLOTS: usize = 4;
pub const DAILY_SLOTS: usize = 3;
pub const DAILY_WINDOW: DailyWindow = DailyWindow::AfterTomorrow;

// ── Main loop ───────────────────────────────────────────────────────

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const FAILED_CYCLE_RETRY: Duration = Duration::from_secs(10 * 60);
pub const IDLE_POLL: Duration = Duration::from_secs(5);
