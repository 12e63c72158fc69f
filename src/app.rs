//! The control loop: one owner for every piece of state, one refresh cycle
//! at a time.

use std::time::Duration;

use log::{error, info, warn};

use crate::config;
use crate::error::{ConnectError, FetchError};
use crate::fetcher::{FetchPlans, NetworkFetcher};
use crate::forecast::{PanelAggregator, PanelForecast};
use crate::http_client::{HeapMonitor, HttpTransport};
use crate::provisioning::PortalServer;
use crate::render::{paint, Display, RenderCoordinator, Screen};
use crate::retry::{CancelFlag, Sleeper};
use crate::settings::{DeviceSettings, RecordStorage, SettingsStore};
use crate::time_sync::{Clock, TimeSource};
use crate::weather::WeatherSnapshot;
use crate::wifi::{ConnectTimings, ConnectivityManager, WifiDriver};

/// Last known conditions. A failed fetch keeps the stale snapshot and
/// records why next to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherState {
    pub snapshot: Option<WeatherSnapshot>,
    pub error: Option<FetchError>,
}

impl WeatherState {
    pub fn apply(&mut self, result: Result<WeatherSnapshot, FetchError>) {
        match result {
            Ok(snapshot) => {
                self.snapshot = Some(snapshot);
                self.error = None;
            }
            Err(e) => self.error = Some(e),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastState {
    pub summary: Option<PanelForecast>,
    pub error: Option<FetchError>,
}

impl ForecastState {
    pub fn apply(&mut self, result: Result<PanelForecast, FetchError>) {
        match result {
            Ok(summary) => {
                self.summary = Some(summary);
                self.error = None;
            }
            Err(e) => self.error = Some(e),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppContext {
    pub settings: DeviceSettings,
    pub weather: WeatherState,
    pub forecast: ForecastState,
    pub time_error: Option<FetchError>,
    pub connect_error: Option<ConnectError>,
}

impl AppContext {
    fn fully_fresh(&self) -> bool {
        self.weather.error.is_none() && self.forecast.error.is_none() && self.time_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Time, conditions and forecast all fetched.
    Complete,
    /// Online, but at least one fetch exhausted its retries.
    Degraded,
    /// Never got online; the error screen is showing.
    ConnectFailed(ConnectError),
}

impl CycleOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, CycleOutcome::Complete)
    }
}

/// When the next cycle is due, measured on the monotonic uptime clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    interval: Duration,
    failure_retry: Duration,
    last_attempt_ms: Option<u64>,
    last_ok: bool,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self::new(config::REFRESH_INTERVAL, config::FAILED_CYCLE_RETRY)
    }
}

impl RefreshSchedule {
    pub const fn new(interval: Duration, failure_retry: Duration) -> Self {
        Self {
            interval,
            failure_retry,
            last_attempt_ms: None,
            last_ok: false,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            None => true,
            Some(at) => now_ms.saturating_sub(at) >= self.wait().as_millis() as u64,
        }
    }

    pub fn record(&mut self, now_ms: u64, ok: bool) {
        self.last_attempt_ms = Some(now_ms);
        self.last_ok = ok;
    }

    pub fn wait(&self) -> Duration {
        if self.last_ok {
            self.interval
        } else {
            self.failure_retry
        }
    }
}

/// Concrete capability implementations for one target.
pub trait Platform {
    type Storage: RecordStorage;
    type Wifi: WifiDriver;
    type Portal: PortalServer;
    type Transport: HttpTransport;
    type Heap: HeapMonitor;
    type Time: TimeSource;
    type Clock: Clock;
    type Display: Display;
    type Sleeper: Sleeper + Clone;
}

pub struct Parts<P: Platform> {
    pub storage: P::Storage,
    pub wifi: P::Wifi,
    pub portal: P::Portal,
    pub transport: P::Transport,
    pub heap: P::Heap,
    pub time: P::Time,
    pub clock: P::Clock,
    pub display: P::Display,
    pub sleeper: P::Sleeper,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StationOptions {
    pub plans: FetchPlans,
    pub timings: ConnectTimings,
    pub aggregator: PanelAggregator,
    pub renderer: RenderCoordinator,
    pub schedule: RefreshSchedule,
}

pub struct Station<P: Platform> {
    store: SettingsStore<P::Storage>,
    connectivity: ConnectivityManager<P::Wifi, P::Sleeper>,
    portal: P::Portal,
    fetcher: NetworkFetcher<P::Transport, P::Heap, P::Sleeper>,
    cancel: CancelFlag,
    time: P::Time,
    clock: P::Clock,
    display: P::Display,
    idle: P::Sleeper,
    aggregator: PanelAggregator,
    renderer: RenderCoordinator,
    schedule: RefreshSchedule,
    ctx: AppContext,
}

impl<P: Platform> Station<P> {
    pub fn new(parts: Parts<P>) -> Self {
        Self::with_options(parts, StationOptions::default())
    }

    /// Loads the persisted settings (writing defaults on first boot).
    pub fn with_options(parts: Parts<P>, options: StationOptions) -> Self {
        let mut store = SettingsStore::new(parts.storage);
        let settings = store.load();
        let fetcher = NetworkFetcher::with_plans(parts.transport, parts.heap, parts.sleeper.clone(), options.plans);
        Self {
            cancel: fetcher.cancel_flag(),
            store,
            connectivity: ConnectivityManager::with_timings(parts.wifi, parts.sleeper.clone(), options.timings),
            portal: parts.portal,
            fetcher,
            time: parts.time,
            clock: parts.clock,
            display: parts.display,
            idle: parts.sleeper,
            aggregator: options.aggregator,
            renderer: options.renderer,
            schedule: options.schedule,
            ctx: AppContext {
                settings,
                ..AppContext::default()
            },
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn display(&self) -> &P::Display {
        &self.display
    }

    pub fn storage(&self) -> &P::Storage {
        self.store.storage()
    }

    /// Connect, sync, fetch, aggregate, render.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        info!("Cycle starting");
        self.cancel.reset();
        let outcome = match self
            .connectivity
            .establish(&mut self.store, &mut self.ctx.settings, &mut self.portal)
        {
            Err(e) => {
                error!("Cycle aborted: {}", e);
                self.ctx.connect_error = Some(e.clone());
                let screen = self
                    .renderer
                    .compose_connect_error(&e, &self.ctx.settings.network_name);
                self.present(&screen);
                CycleOutcome::ConnectFailed(e)
            }
            Ok(()) => {
                self.ctx.connect_error = None;
                self.refresh_data();
                let now = self.clock.now_utc();
                let screen = self.renderer.compose(&self.ctx, now);
                self.present(&screen);
                if self.ctx.fully_fresh() {
                    CycleOutcome::Complete
                } else {
                    CycleOutcome::Degraded
                }
            }
        };

        self.schedule
            .record(self.clock.uptime_ms(), outcome.is_complete());
        info!(
            "Cycle finished: {:?}, next in {} min",
            outcome,
            self.schedule.wait().as_secs() / 60
        );
        outcome
    }

    fn refresh_data(&mut self) {
        self.check_link();
        self.ctx.time_error = self.fetcher.sync_time(&mut self.time).err();
        if let Some(e) = &self.ctx.time_error {
            warn!("Time sync failed: {}", e);
        }

        self.check_link();
        let current = self.fetcher.fetch_current(&self.ctx.settings);
        self.ctx.weather.apply(current);

        self.check_link();
        let now = self.clock.now_utc();
        let forecast = self
            .fetcher
            .fetch_forecast(&self.ctx.settings)
            .map(|samples| self.aggregator.aggregate(&samples, now));
        self.ctx.forecast.apply(forecast);
    }

    /// A dropped link cancels the remaining fetches of this cycle.
    fn check_link(&mut self) {
        if !self.cancel.is_cancelled() && !self.connectivity.is_connected() {
            warn!("WiFi link lost mid-cycle, skipping remaining fetches");
            self.cancel.cancel();
        }
    }

    fn present(&mut self, screen: &Screen) {
        if let Err(e) = paint(&mut self.display, screen) {
            warn!("Display refresh failed: {:#}", e);
        }
    }

    /// Runs a cycle if one is due.
    pub fn poll_once(&mut self) -> Option<CycleOutcome> {
        if self.schedule.is_due(self.clock.uptime_ms()) {
            Some(self.run_cycle())
        } else {
            None
        }
    }

    pub fn run_forever(&mut self) -> ! {
        info!("Entering main loop");
        loop {
            self.poll_once();
            self.idle.sleep(config::IDLE_POLL);
        }
    }
}
