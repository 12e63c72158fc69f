use anyhow::Result;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use log::{info, warn};

use crate::wifi::WifiDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Off,
    Station,
    AccessPoint,
}

/// Non-blocking wrapper over `EspWifi`: starts association and lets the
/// connectivity manager poll for the result.
pub struct EspWifiDriver {
    wifi: Box<EspWifi<'static>>,
    mode: Mode,
}

impl EspWifiDriver {
    pub fn new(wifi: EspWifi<'static>) -> Self {
        Self {
            wifi: Box::new(wifi),
            mode: Mode::Off,
        }
    }

    /// Log the driver's view of the link.
    fn log_diag(&self, label: &str) {
        let mut ap_info: esp_idf_sys::wifi_ap_record_t = unsafe { core::mem::zeroed() };
        let rc = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        if rc == esp_idf_sys::ESP_OK {
            info!(
                "WiFi [{}]: {:?} assoc=YES rssi={} ch={}",
                label, self.mode, ap_info.rssi, ap_info.primary
            );
        } else {
            info!("WiFi [{}]: {:?} assoc=NO (err={})", label, self.mode, rc);
        }
    }
}

impl WifiDriver for EspWifiDriver {
    fn start_station(&mut self, ssid: &str, password: &str) -> Result<()> {
        let auth = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let mut wifi_ssid = heapless::String::<32>::new();
        let mut wifi_pass = heapless::String::<64>::new();
        wifi_ssid.push_str(ssid).ok();
        wifi_pass.push_str(password).ok();

        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: wifi_ssid,
            password: wifi_pass,
            auth_method: auth,
            ..Default::default()
        }))?;
        self.wifi.start()?;
        self.wifi.connect()?;
        self.mode = Mode::Station;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if self.mode != Mode::Station {
            return false;
        }
        let associated = self.wifi.is_connected().unwrap_or(false);
        let netif_up = self.wifi.sta_netif().is_up().unwrap_or(false);
        if associated && !netif_up {
            self.log_diag("waiting for IP");
        }
        associated && netif_up
    }

    fn start_access_point(&mut self, ssid: &str) -> Result<()> {
        let mut ap_ssid = heapless::String::<32>::new();
        ap_ssid.push_str(ssid).ok();

        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ap_ssid,
                auth_method: AuthMethod::None,
                channel: 1,
                max_connections: 4,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        self.mode = Mode::AccessPoint;
        info!("WiFi AP {:?} up", ssid);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.mode == Mode::Off {
            return Ok(());
        }
        if self.mode == Mode::Station {
            if let Err(e) = self.wifi.disconnect() {
                warn!("WiFi disconnect: {}", e);
            }
        }
        self.wifi.stop()?;
        self.mode = Mode::Off;
        Ok(())
    }

    fn ip_address(&mut self) -> Option<String> {
        let netif = match self.mode {
            Mode::Station => self.wifi.sta_netif(),
            Mode::AccessPoint => self.wifi.ap_netif(),
            Mode::Off => return None,
        };
        netif.get_ip_info().ok().map(|info| info.ip.to_string())
    }
}
