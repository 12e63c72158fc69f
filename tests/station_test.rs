use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use epaper_weather::app::{CycleOutcome, Parts, Platform, Station, StationOptions};
use epaper_weather::config;
use epaper_weather::error::{AttemptError, FetchError};
use epaper_weather::fetcher::FetchPlans;
use epaper_weather::http_client::{HeapMonitor, HttpResponse, HttpTransport};
use epaper_weather::provisioning::{PortalServer, ProvisioningForm};
use epaper_weather::render::{Display, Line, LINE_CURRENT, LINE_DATE, LINE_HOURLY};
use epaper_weather::retry::Sleeper;
use epaper_weather::settings::{DeviceSettings, MemoryStorage, SettingsStore};
use epaper_weather::time_sync::{Clock, TimeSource};
use epaper_weather::wifi::WifiDriver;
use pretty_assertions::assert_eq;

// 2024-03-15 10:00 local (UTC+5).
const NOW: i64 = 1_710_478_800;

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&mut self, _duration: Duration) {}
}

struct FakeWifi {
    accepts: String,
    station: Option<String>,
    /// Link status checks that succeed before the link drops.
    drops_after: Option<usize>,
    checks: usize,
}

impl WifiDriver for FakeWifi {
    fn start_station(&mut self, ssid: &str, _password: &str) -> Result<()> {
        self.station = Some(ssid.to_string());
        Ok(())
    }
    fn is_connected(&mut self) -> bool {
        self.checks += 1;
        if self.drops_after.is_some_and(|n| self.checks > n) {
            return false;
        }
        self.station.as_deref() == Some(self.accepts.as_str())
    }
    fn start_access_point(&mut self, _ssid: &str) -> Result<()> {
        self.station = None;
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        self.station = None;
        Ok(())
    }
    fn ip_address(&mut self) -> Option<String> {
        Some("10.0.0.2".into())
    }
}

#[derive(Default)]
struct FakePortal {
    submission: Option<DeviceSettings>,
}

impl PortalServer for FakePortal {
    fn start(&mut self, _form: ProvisioningForm) -> Result<()> {
        Ok(())
    }
    fn take_submission(&mut self) -> Option<DeviceSettings> {
        self.submission.take()
    }
    fn stop(&mut self) {}
}

/// Serves canned provider payloads and logs every requested URL.
#[derive(Clone, Default)]
struct FakeProvider {
    current: Option<String>,
    forecast: Option<String>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl HttpTransport for FakeProvider {
    fn get(&mut self, url: &str, _timeout: Duration) -> Result<HttpResponse, AttemptError> {
        self.urls.lock().unwrap().push(url.to_string());
        let body = if url.contains("/data/2.5/forecast?") {
            self.forecast.clone()
        } else {
            self.current.clone()
        };
        match body {
            Some(body) => Ok(HttpResponse {
                status: 200,
                body: body.into_bytes(),
            }),
            None => Ok(HttpResponse {
                status: 503,
                body: Vec::new(),
            }),
        }
    }
}

struct PlentyOfHeap;

impl HeapMonitor for PlentyOfHeap {
    fn free_heap(&self) -> usize {
        200 * 1024
    }
}

struct FakeNtp;

impl TimeSource for FakeNtp {
    fn sync(&mut self, _server: &str, _timeout: Duration) -> Result<(), AttemptError> {
        Ok(())
    }
}

struct FixedClock;

impl Clock for FixedClock {
    fn now_utc(&self) -> i64 {
        NOW
    }
    fn uptime_ms(&self) -> u64 {
        0
    }
}

/// Keeps every painted page as plain lines.
#[derive(Default)]
struct PageLog {
    pages: Vec<Vec<Line>>,
    open: Option<Vec<Line>>,
}

impl PageLog {
    fn last(&self) -> &[Line] {
        self.pages.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Display for PageLog {
    fn begin_page(&mut self) -> Result<()> {
        self.open = Some(Vec::new());
        Ok(())
    }
    fn draw_line(&mut self, _index: usize, line: &Line) -> Result<()> {
        if let Some(page) = self.open.as_mut() {
            page.push(line.clone());
        }
        Ok(())
    }
    fn end_page(&mut self) -> Result<()> {
        if let Some(page) = self.open.take() {
            self.pages.push(page);
        }
        Ok(())
    }
}

struct TestPlatform;

impl Platform for TestPlatform {
    type Storage = MemoryStorage;
    type Wifi = FakeWifi;
    type Portal = FakePortal;
    type Transport = FakeProvider;
    type Heap = PlentyOfHeap;
    type Time = FakeNtp;
    type Clock = FixedClock;
    type Display = PageLog;
    type Sleeper = NoSleep;
}

// ── Fixtures ────────────────────────────────────────────────────────

const CURRENT: &str = r#"{"weather":[{"description":"overcast clouds"}],"main":{"temp":3.6,"feels_like":0.2,"pressure":1015},"wind":{"speed":5.1},"sys":{"sunrise":1710466800,"sunset":1710510000},"name":"TestCity"}"#;

/// Ten samples three hours apart, starting an hour before `NOW`.
fn forecast_json() -> String {
    let list: Vec<String> = (0..10)
        .map(|i| {
            format!(
                r#"{{"dt":{},"main":{{"temp":{}.0}}}}"#,
                NOW - 3600 + i * 3 * 3600,
                i
            )
        })
        .collect();
    format!(r#"{{"cnt":10,"list":[{}]}}"#, list.join(","))
}

fn station(wifi_accepts: &str, provider: FakeProvider, portal: FakePortal) -> Station<TestPlatform> {
    station_with_link(wifi_accepts, None, provider, portal)
}

fn station_with_link(
    wifi_accepts: &str,
    drops_after: Option<usize>,
    provider: FakeProvider,
    portal: FakePortal,
) -> Station<TestPlatform> {
    let parts = Parts {
        storage: MemoryStorage::default(),
        wifi: FakeWifi {
            accepts: wifi_accepts.to_string(),
            station: None,
            drops_after,
            checks: 0,
        },
        portal,
        transport: provider,
        heap: PlentyOfHeap,
        time: FakeNtp,
        clock: FixedClock,
        display: PageLog::default(),
        sleeper: NoSleep,
    };
    let options = StationOptions {
        plans: FetchPlans::default().with_backoff(Duration::ZERO),
        ..StationOptions::default()
    };
    Station::with_options(parts, options)
}

fn healthy_provider() -> FakeProvider {
    FakeProvider {
        current: Some(CURRENT.into()),
        forecast: Some(forecast_json()),
        ..FakeProvider::default()
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn test_complete_cycle_renders_all_lines() {
    let default_ssid = DeviceSettings::defaults().network_name;
    let mut station = station(&default_ssid, healthy_provider(), FakePortal::default());

    assert_eq!(station.run_cycle(), CycleOutcome::Complete);

    let ctx = station.context();
    let summary = ctx.forecast.summary.as_ref().expect("forecast summary");
    assert!(summary.hourly.iter().all(|slot| slot.is_filled()));
    let labels: Vec<&str> = summary.hourly.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, ["12:00", "15:00", "18:00", "21:00"]);

    let page = station.display().last();
    assert_eq!(page.len(), 6);
    assert_eq!(page[LINE_DATE].text(), "15.03.2024 Fri TestCity");
    assert_eq!(page[LINE_CURRENT].text(), "4 C overcast clouds");
    assert!(page[LINE_HOURLY].text().starts_with("12:00 1 15:00 2"));
}

#[test]
fn test_provisioned_settings_survive_reload() {
    let provisioned = DeviceSettings {
        network_name: "TestNet".into(),
        network_secret: "pw".into(),
        provider_api_key: "KEY".into(),
        location_query: "TestCity".into(),
    };
    let portal = FakePortal {
        submission: Some(provisioned.clone()),
    };
    let provider = healthy_provider();
    let urls = provider.urls.clone();
    let mut station = station("TestNet", provider, portal);

    assert_eq!(station.run_cycle(), CycleOutcome::Complete);
    assert_eq!(station.context().settings, provisioned);

    let mut reloaded = SettingsStore::new(station.storage().clone());
    assert_eq!(reloaded.load().location_query, "TestCity");

    let urls = urls.lock().unwrap();
    assert!(urls.iter().all(|u| u.contains("q=TestCity") && u.contains("appid=KEY")));
}

#[test]
fn test_connect_failure_skips_fetch_and_shows_error() {
    let provider = healthy_provider();
    let urls = provider.urls.clone();
    let portal = FakePortal {
        submission: Some(DeviceSettings {
            network_name: "Typo".into(),
            ..DeviceSettings::defaults()
        }),
    };
    let mut station = station("RealNet", provider, portal);

    let outcome = station.run_cycle();
    assert!(matches!(outcome, CycleOutcome::ConnectFailed(_)));
    assert!(urls.lock().unwrap().is_empty());
    assert!(station.display().last()[LINE_DATE].text().contains("No WiFi"));
    assert!(station.context().connect_error.is_some());
}

#[test]
fn test_failed_forecast_is_degraded_but_still_rendered() {
    let provider = FakeProvider {
        current: Some(CURRENT.into()),
        forecast: None,
        ..FakeProvider::default()
    };
    let urls = provider.urls.clone();
    let default_ssid = DeviceSettings::defaults().network_name;
    let mut station = station(&default_ssid, provider, FakePortal::default());

    assert_eq!(station.run_cycle(), CycleOutcome::Degraded);
    let ctx = station.context();
    assert!(ctx.weather.snapshot.is_some());
    assert_eq!(ctx.forecast.summary, None);
    assert_eq!(ctx.forecast.error.as_ref().map(|e| e.attempts()), Some(10));

    // One current-conditions request, then two hosts for five rounds.
    assert_eq!(urls.lock().unwrap().len(), 1 + 10);
    let page = station.display().last();
    assert!(page[LINE_HOURLY].has_accent("Forecast failed (10 tries)"));
}

#[test]
fn test_link_loss_cancels_remaining_fetches() {
    let provider = healthy_provider();
    let urls = provider.urls.clone();
    let default_ssid = DeviceSettings::defaults().network_name;
    // The association check succeeds, the first mid-cycle check does not.
    let mut station = station_with_link(&default_ssid, Some(1), provider, FakePortal::default());

    assert_eq!(station.run_cycle(), CycleOutcome::Degraded);
    assert!(urls.lock().unwrap().is_empty());

    let ctx = station.context();
    assert!(matches!(ctx.weather.error, Some(FetchError::Cancelled { attempts: 0, .. })));
    assert!(matches!(ctx.forecast.error, Some(FetchError::Cancelled { attempts: 0, .. })));
    assert!(matches!(ctx.time_error, Some(FetchError::Cancelled { .. })));
    let page = station.display().last();
    assert!(page[LINE_CURRENT].has_accent("Weather cancelled"));
    assert!(page[LINE_HOURLY].has_accent("Forecast cancelled"));
}

#[test]
fn test_poll_once_respects_schedule() {
    let default_ssid = DeviceSettings::defaults().network_name;
    let mut station = station(&default_ssid, healthy_provider(), FakePortal::default());
    assert_eq!(station.poll_once(), Some(CycleOutcome::Complete));
    // Uptime has not moved, so the hourly refresh is not due yet.
    assert_eq!(station.poll_once(), None);
    assert_eq!(station.display().pages.len(), 1);
    assert_eq!(config::REFRESH_INTERVAL, Duration::from_secs(3600));
}
