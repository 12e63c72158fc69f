//! Persistent device settings: a fixed-layout record guarded by a magic
//! number, loaded at every boot and rewritten only by provisioning.

use anyhow::{bail, Result};
use log::{info, warn};

use crate::config;

pub const NETWORK_NAME_MAX: usize = 31;
pub const NETWORK_SECRET_MAX: usize = 63;
pub const API_KEY_MAX: usize = 63;
pub const LOCATION_MAX: usize = 31;

/// Validity marker stored after the four text slots ("WXP1", little endian).
pub const SETTINGS_MAGIC: u32 = 0x3150_5857;
pub const SETTINGS_OFFSET: usize = 0;

const NAME_SLOT: usize = NETWORK_NAME_MAX + 1;
const SECRET_SLOT: usize = NETWORK_SECRET_MAX + 1;
const KEY_SLOT: usize = API_KEY_MAX + 1;
const LOCATION_SLOT: usize = LOCATION_MAX + 1;
const MAGIC_AT: usize = NAME_SLOT + SECRET_SLOT + KEY_SLOT + LOCATION_SLOT;

pub const RECORD_LEN: usize = MAGIC_AT + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub network_name: String,
    pub network_secret: String,
    pub provider_api_key: String,
    pub location_query: String,
}

impl DeviceSettings {
    /// Factory defaults baked in at build time.
    pub fn defaults() -> Self {
        Self {
            network_name: config::DEFAULT_WIFI_SSID.to_string(),
            network_secret: config::DEFAULT_WIFI_PASS.to_string(),
            provider_api_key: config::DEFAULT_API_KEY.to_string(),
            location_query: config::DEFAULT_LOCATION.to_string(),
        }
    }

    /// Copy with every field cut to its maximum length.
    pub fn truncated(&self) -> Self {
        Self {
            network_name: truncate_utf8(&self.network_name, NETWORK_NAME_MAX).to_string(),
            network_secret: truncate_utf8(&self.network_secret, NETWORK_SECRET_MAX).to_string(),
            provider_api_key: truncate_utf8(&self.provider_api_key, API_KEY_MAX).to_string(),
            location_query: truncate_utf8(&self.location_query, LOCATION_MAX).to_string(),
        }
    }

    fn encode(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        let mut at = 0;
        for (value, slot) in [
            (&self.network_name, NAME_SLOT),
            (&self.network_secret, SECRET_SLOT),
            (&self.provider_api_key, KEY_SLOT),
            (&self.location_query, LOCATION_SLOT),
        ] {
            // Leave at least one trailing NUL in every slot.
            let bytes = truncate_utf8(value, slot - 1).as_bytes();
            record[at..at + bytes.len()].copy_from_slice(bytes);
            at += slot;
        }
        record[MAGIC_AT..].copy_from_slice(&SETTINGS_MAGIC.to_le_bytes());
        record
    }

    fn decode(record: &[u8; RECORD_LEN]) -> Option<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&record[MAGIC_AT..]);
        if u32::from_le_bytes(magic) != SETTINGS_MAGIC {
            return None;
        }
        let mut at = 0;
        let mut field = |slot: usize| {
            let text = read_slot(&record[at..at + slot]);
            at += slot;
            text
        };
        Some(Self {
            network_name: field(NAME_SLOT),
            network_secret: field(SECRET_SLOT),
            provider_api_key: field(KEY_SLOT),
            location_query: field(LOCATION_SLOT),
        })
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn read_slot(slot: &[u8]) -> String {
    // The last byte is always a terminator, even if a corrupt record says otherwise.
    let usable = &slot[..slot.len() - 1];
    let end = usable.iter().position(|&b| b == 0).unwrap_or(usable.len());
    String::from_utf8_lossy(&usable[..end]).into_owned()
}

/// Byte-addressed non-volatile storage (EEPROM emulation, NVS blob, ...).
pub trait RecordStorage {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
    /// Flush pending writes to durable media.
    fn commit(&mut self) -> Result<()>;
}

/// RAM-backed storage image. Starts erased (0xFF), like fresh flash.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
    commits: usize,
}

impl MemoryStorage {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0xFF; size],
            commits: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(SETTINGS_OFFSET + RECORD_LEN)
    }
}

impl RecordStorage for MemoryStorage {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let Some(src) = self.bytes.get(offset..offset + buf.len()) else {
            bail!("read of {} bytes at {} is out of range", buf.len(), offset);
        };
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let Some(dst) = self.bytes.get_mut(offset..offset + data.len()) else {
            bail!("write of {} bytes at {} is out of range", data.len(), offset);
        };
        dst.copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }
}

impl<S: RecordStorage + ?Sized> RecordStorage for Box<S> {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        (**self).write(offset, data)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }
}

pub struct SettingsStore<S> {
    storage: S,
}

impl<S: RecordStorage> SettingsStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Read the persisted record, falling back to (and persisting) the
    /// defaults when it is missing or corrupt. Never fails.
    pub fn load(&mut self) -> DeviceSettings {
        let mut record = [0u8; RECORD_LEN];
        let stored = match self.storage.read(SETTINGS_OFFSET, &mut record) {
            Ok(()) => DeviceSettings::decode(&record),
            Err(e) => {
                warn!("settings: read failed, treating as absent: {}", e);
                None
            }
        };

        let settings = match stored {
            Some(settings) => settings,
            None => {
                info!("settings: no valid record, writing defaults");
                let defaults = DeviceSettings::defaults();
                match self.save(&defaults) {
                    Ok(saved) => saved,
                    Err(e) => {
                        warn!("settings: could not persist defaults: {}", e);
                        defaults.truncated()
                    }
                }
            }
        };

        info!("settings: network_name = {:?}", settings.network_name);
        info!("settings: network_secret = <{} chars>", settings.network_secret.len());
        info!("settings: api_key = <{} chars>", settings.provider_api_key.len());
        info!("settings: location = {:?}", settings.location_query);
        settings
    }

    /// Truncate, stamp and commit `settings`; returns exactly what was stored.
    pub fn save(&mut self, settings: &DeviceSettings) -> Result<DeviceSettings> {
        let stored = settings.truncated();
        self.storage.write(SETTINGS_OFFSET, &stored.encode())?;
        self.storage.commit()?;
        info!(
            "settings: saved network_name={:?} location={:?}",
            stored.network_name, stored.location_query
        );
        Ok(stored)
    }
}
