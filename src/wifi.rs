//! Station-mode connect with a provisioning fallback.
//!
//! `Disconnected -> Connecting -> Connected`, or on failure
//! `ProvisioningNeeded -> AccessPointMode -> AwaitingSubmission ->
//! Connecting` once more; a second failure ends in `ConnectFailed` for this
//! cycle.

use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use crate::config;
use crate::error::ConnectError;
use crate::provisioning::{PortalServer, ProvisioningForm};
use crate::retry::Sleeper;
use crate::settings::{DeviceSettings, RecordStorage, SettingsStore};

/// Radio control. Implementations return immediately; association is
/// observed by polling `is_connected`.
pub trait WifiDriver {
    fn start_station(&mut self, ssid: &str, password: &str) -> Result<()>;
    fn is_connected(&mut self) -> bool;
    /// Open (passwordless) access point.
    fn start_access_point(&mut self, ssid: &str) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn ip_address(&mut self) -> Option<String>;
}

impl<W: WifiDriver + ?Sized> WifiDriver for Box<W> {
    fn start_station(&mut self, ssid: &str, password: &str) -> Result<()> {
        (**self).start_station(ssid, password)
    }
    fn is_connected(&mut self) -> bool {
        (**self).is_connected()
    }
    fn start_access_point(&mut self, ssid: &str) -> Result<()> {
        (**self).start_access_point(ssid)
    }
    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
    fn ip_address(&mut self) -> Option<String> {
        (**self).ip_address()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
    ProvisioningNeeded,
    AccessPointMode,
    AwaitingSubmission,
    ConnectFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTimings {
    pub station_timeout: Duration,
    pub station_poll: Duration,
    pub provisioning_timeout: Duration,
    pub portal_poll: Duration,
}

impl Default for ConnectTimings {
    fn default() -> Self {
        Self {
            station_timeout: config::STATION_CONNECT_TIMEOUT,
            station_poll: config::STATION_POLL_INTERVAL,
            provisioning_timeout: config::PROVISIONING_TIMEOUT,
            portal_poll: config::PORTAL_POLL_INTERVAL,
        }
    }
}

pub struct ConnectivityManager<W, S> {
    wifi: W,
    sleeper: S,
    timings: ConnectTimings,
    state: ConnectivityState,
}

impl<W: WifiDriver, S: Sleeper> ConnectivityManager<W, S> {
    pub fn new(wifi: W, sleeper: S) -> Self {
        Self::with_timings(wifi, sleeper, ConnectTimings::default())
    }

    pub fn with_timings(wifi: W, sleeper: S, timings: ConnectTimings) -> Self {
        Self {
            wifi,
            sleeper,
            timings,
            state: ConnectivityState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Re-checks the link; a dropped connection moves back to `Disconnected`.
    pub fn is_connected(&mut self) -> bool {
        let up = self.wifi.is_connected();
        if !up && self.state == ConnectivityState::Connected {
            warn!("WiFi: link lost");
            self.state = ConnectivityState::Disconnected;
        }
        up
    }

    /// Join `settings.network_name`, polling until associated or `timeout`.
    pub fn connect_station(&mut self, settings: &DeviceSettings, timeout: Duration) -> bool {
        self.state = ConnectivityState::Connecting;
        info!("WiFi connecting to {:?}...", settings.network_name);
        if let Err(e) = self
            .wifi
            .start_station(&settings.network_name, &settings.network_secret)
        {
            warn!("WiFi station start failed: {}", e);
            self.state = ConnectivityState::Disconnected;
            return false;
        }

        let mut elapsed = Duration::ZERO;
        loop {
            if self.wifi.is_connected() {
                self.state = ConnectivityState::Connected;
                info!(
                    "WiFi connected after ~{}ms, IP {}",
                    elapsed.as_millis(),
                    self.wifi.ip_address().unwrap_or_else(|| "?".into())
                );
                return true;
            }
            if elapsed >= timeout {
                break;
            }
            self.sleeper.sleep(self.timings.station_poll);
            elapsed += self.timings.station_poll;
        }

        warn!("WiFi: no association within {:?}", timeout);
        self.wifi.stop().ok();
        self.state = ConnectivityState::Disconnected;
        false
    }

    /// Bring up the setup AP and portal, and block until a valid submission
    /// arrives or the provisioning timeout passes.
    pub fn run_provisioning<P: PortalServer + ?Sized>(
        &mut self,
        portal: &mut P,
        current: &DeviceSettings,
    ) -> Result<DeviceSettings, ConnectError> {
        self.state = ConnectivityState::AccessPointMode;
        self.wifi.stop().ok();
        if let Err(e) = self.wifi.start_access_point(config::PROVISIONING_AP_SSID) {
            self.state = ConnectivityState::ConnectFailed;
            return Err(ConnectError::Driver(e.to_string()));
        }
        if let Err(e) = portal.start(ProvisioningForm::new(current)) {
            self.wifi.stop().ok();
            self.state = ConnectivityState::ConnectFailed;
            return Err(ConnectError::Driver(e.to_string()));
        }
        info!(
            "Provisioning: join {:?} and open http://{}/",
            config::PROVISIONING_AP_SSID,
            self.wifi.ip_address().unwrap_or_else(|| "192.168.71.1".into())
        );

        self.state = ConnectivityState::AwaitingSubmission;
        let mut elapsed = Duration::ZERO;
        let outcome = loop {
            if let Some(settings) = portal.take_submission() {
                break Ok(settings);
            }
            if elapsed >= self.timings.provisioning_timeout {
                break Err(ConnectError::ProvisioningTimedOut(self.timings.provisioning_timeout));
            }
            self.sleeper.sleep(self.timings.portal_poll);
            elapsed += self.timings.portal_poll;
        };

        portal.stop();
        self.wifi.stop().ok();
        match &outcome {
            Ok(_) => info!("Provisioning: submission received"),
            Err(e) => {
                warn!("Provisioning: {}", e);
                self.state = ConnectivityState::ConnectFailed;
            }
        }
        outcome
    }

    /// Whole connectivity sequence for one cycle. Accepted settings are
    /// persisted before the retry and replace `settings` in place.
    pub fn establish<R, P>(
        &mut self,
        store: &mut SettingsStore<R>,
        settings: &mut DeviceSettings,
        portal: &mut P,
    ) -> Result<(), ConnectError>
    where
        R: RecordStorage,
        P: PortalServer + ?Sized,
    {
        if self.state == ConnectivityState::Connected && self.is_connected() {
            return Ok(());
        }
        if self.connect_station(settings, self.timings.station_timeout) {
            return Ok(());
        }

        self.state = ConnectivityState::ProvisioningNeeded;
        let submitted = self.run_provisioning(portal, settings)?;
        *settings = match store.save(&submitted) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Provisioning: could not persist settings: {}", e);
                submitted.truncated()
            }
        };

        if self.connect_station(settings, self.timings.station_timeout) {
            return Ok(());
        }
        self.state = ConnectivityState::ConnectFailed;
        Err(ConnectError::ConnectivityFailure {
            ssid: settings.network_name.clone(),
        })
    }
}
