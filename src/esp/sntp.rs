use std::thread;
use std::time::Duration;

use esp_idf_svc::sntp::{EspSntp, OperatingMode, SntpConf, SyncMode, SyncStatus};
use log::info;

use crate::error::AttemptError;
use crate::time_sync::{Clock, LocalTime, TimeSource};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// SNTP against one server per attempt. The client of the last successful
/// attempt stays alive and keeps the RTC disciplined in the background.
#[derive(Default)]
pub struct EspSntpSource {
    active: Option<EspSntp<'static>>,
}

impl TimeSource for EspSntpSource {
    fn sync(&mut self, server: &str, timeout: Duration) -> Result<(), AttemptError> {
        // Only one SNTP client may exist at a time.
        self.active = None;

        let mut conf = SntpConf {
            sync_mode: SyncMode::Immediate,
            operating_mode: OperatingMode::Poll,
            ..Default::default()
        };
        for slot in conf.servers.iter_mut() {
            *slot = server;
        }

        info!("Starting SNTP sync with {}", server);
        let sntp = EspSntp::new(&conf)
            .map_err(|e| AttemptError::TransportInit(format!("sntp start: {}", e)))?;

        let mut elapsed = Duration::ZERO;
        while elapsed < timeout {
            if sntp.get_sync_status() == SyncStatus::Completed {
                let now = EspClock.now_utc();
                info!(
                    "SNTP time synchronized after {}ms: {} {}",
                    elapsed.as_millis(),
                    LocalTime::configured().date(now),
                    LocalTime::configured().hhmm(now)
                );
                self.active = Some(sntp);
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
            elapsed += POLL_INTERVAL;
        }

        Err(AttemptError::TransportInit(format!(
            "no SNTP reply from {} within {:?}",
            server, timeout
        )))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EspClock;

impl Clock for EspClock {
    fn now_utc(&self) -> i64 {
        let mut now: libc::time_t = 0;
        unsafe {
            libc::time(&mut now);
        }
        now as i64
    }

    fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000) as u64
    }
}
