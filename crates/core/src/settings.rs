//! Persistent board settings.
//!
//! The record lives in flash on the target, so writing it must not race
//! the emulation core. [`save`] encodes first, then hands the bytes to the
//! store inside [`PauseHandle::with_paused`].
//!
//! ## Record format
//!
//! ```text
//! +------------------+
//! | Magic "IKST"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Payload          |  bincode-encoded Settings
//! +------------------+
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::{InterruptGate, PauseHandle};
use crate::error::{CoreError, Result};

const MAGIC: &[u8; 4] = b"IKST";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Map the first physical pad to joystick 1 instead of joystick 0
    pub swap_joysticks: bool,
    /// Host mouse counts per quadrature step
    pub mouse_divisor: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Settings { swap_joysticks: false, mouse_divisor: 1 }
    }
}

impl Settings {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() < HEADER_LEN {
            return Err(CoreError::Settings(format!("record too small ({} bytes)", record.len())));
        }
        if &record[0..4] != MAGIC {
            return Err(CoreError::Settings("bad magic".into()));
        }
        let version = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
        if version != FORMAT_VERSION {
            return Err(CoreError::Settings(format!(
                "unsupported version {} (expected {})", version, FORMAT_VERSION
            )));
        }
        let settings: Settings = bincode::deserialize(&record[HEADER_LEN..])?;
        if settings.mouse_divisor == 0 {
            return Err(CoreError::Settings("mouse divisor must be non-zero".into()));
        }
        Ok(settings)
    }
}

/// Backing storage for the settings record.
pub trait SettingsStore {
    /// The stored record, or None if nothing has been written yet.
    fn read(&self) -> Result<Option<Vec<u8>>>;
    fn write(&mut self, record: &[u8]) -> Result<()>;
}

/// Store kept in memory.
#[derive(Debug, Default, Clone)]
pub struct RamStore {
    record: Option<Vec<u8>>,
    pub writes: usize,
}

impl RamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for RamStore {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.record.clone())
    }

    fn write(&mut self, record: &[u8]) -> Result<()> {
        self.record = Some(record.to_vec());
        self.writes += 1;
        Ok(())
    }
}

/// Load settings, falling back to defaults when the store is empty.
pub fn load<S: SettingsStore + ?Sized>(store: &S) -> Result<Settings> {
    match store.read()? {
        Some(record) => Settings::decode(&record),
        None => {
            tracing::info!("no stored settings, using defaults");
            Ok(Settings::default())
        }
    }
}

/// Write `settings` to `store` with the emulation core paused.
pub fn save<S, G>(
    store: &mut S,
    pause: &PauseHandle,
    timeout: Duration,
    gate: &G,
    settings: &Settings,
) -> Result<()>
where
    S: SettingsStore + ?Sized,
    G: InterruptGate + ?Sized,
{
    let record = settings.encode()?;
    pause.with_paused(timeout, gate, || store.write(&record))?;
    tracing::debug!(bytes = record.len(), "settings saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EngineMode};
    use crate::driver::cores;
    use crate::Ikbd;

    struct NoGate;

    impl InterruptGate for NoGate {
        fn without_interrupts<R, F: FnOnce() -> R>(&self, f: F) -> R {
            f()
        }
    }

    #[test]
    fn test_encode_header() {
        let record = Settings::default().encode().unwrap();
        assert_eq!(&record[0..4], b"IKST");
        assert_eq!(&record[4..8], &1u32.to_le_bytes());
        assert_eq!(Settings::decode(&record).unwrap(), Settings::default());
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        let mut record = Settings::default().encode().unwrap();
        assert!(matches!(Settings::decode(&record[..4]), Err(CoreError::Settings(_))));
        record[4] = 9;
        assert!(matches!(Settings::decode(&record), Err(CoreError::Settings(_))));
        record[0] = b'X';
        assert!(matches!(Settings::decode(&record), Err(CoreError::Settings(_))));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let record = Settings::default().encode().unwrap();
        assert!(Settings::decode(&record[..HEADER_LEN + 1]).is_err());
    }

    #[test]
    fn test_load_defaults_when_empty() {
        let store = RamStore::new();
        assert_eq!(load(&store).unwrap(), Settings::default());
    }

    #[test]
    fn test_save_through_pause() {
        let c = cores(Ikbd::new(EngineMode::Fast), &Config::default()).unwrap();
        let mut store = RamStore::new();
        let settings = Settings { swap_joysticks: true, mouse_divisor: 3 };
        // No emulation thread is running, so the gate path is taken
        save(&mut store, &c.io.pause_handle(), Duration::from_millis(1), &NoGate, &settings).unwrap();
        assert_eq!(store.writes, 1);
        assert_eq!(load(&store).unwrap(), settings);
        assert_eq!(c.io.shared().diagnostics.snapshot().pause_timeouts, 1);
    }
}
