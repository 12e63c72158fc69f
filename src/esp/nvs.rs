use anyhow::{bail, Result};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::info;

use crate::settings::{RecordStorage, RECORD_LEN, SETTINGS_OFFSET};

pub const NS: &str = "wx_panel";
const KEY_SETTINGS: &str = "settings";

/// EEPROM-style byte image persisted as a single NVS blob. Writes land in
/// RAM; `commit` stores the whole image.
pub struct NvsRecordStorage {
    nvs: EspNvs<NvsDefault>,
    image: Vec<u8>,
}

impl NvsRecordStorage {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, NS, true)?;
        let mut image = vec![0xFF; SETTINGS_OFFSET + RECORD_LEN];
        let mut buf = vec![0u8; image.len()];
        match nvs.get_blob(KEY_SETTINGS, &mut buf) {
            Ok(Some(stored)) => {
                let n = stored.len().min(image.len());
                image[..n].copy_from_slice(&stored[..n]);
                info!("NVS: loaded {} byte settings image", n);
            }
            Ok(None) => info!("NVS: no settings image yet"),
            Err(e) => log::warn!("NVS: settings image unreadable: {}", e),
        }
        Ok(Self { nvs, image })
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.image.len() => Ok(offset..end),
            _ => bail!("NVS image access {}+{} beyond {} bytes", offset, len, self.image.len()),
        }
    }
}

impl RecordStorage for NvsRecordStorage {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.image[range]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len())?;
        self.image[range].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.nvs.set_blob(KEY_SETTINGS, &self.image)?;
        Ok(())
    }
}
