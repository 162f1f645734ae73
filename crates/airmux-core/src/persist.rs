// ── Capability model persistence ──
//
// The concurrency matrix rarely changes, and reading it from the driver
// is only trustworthy once a mode configure has succeeded. The arbiter
// therefore persists the confirmed matrix through this collaborator and
// reuses it on later boots instead of re-interrogating hardware.

use std::io::Write as _;
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::model::StaticChipProfile;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence collaborator for the static capability model.
pub trait CapabilityStore: Send + Sync {
    /// Load the persisted profiles. An empty vec means nothing persisted.
    fn load(&self) -> Result<Vec<StaticChipProfile>, StoreError>;

    /// Replace the persisted profiles.
    fn save(&self, profiles: &[StaticChipProfile]) -> Result<(), StoreError>;
}

/// JSON file store. Writes go to a sibling temp file first and are
/// renamed into place so a crash never leaves a half-written model.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CapabilityStore for JsonFileStore {
    fn load(&self) -> Result<Vec<StaticChipProfile>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, profiles: &[StaticChipProfile]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(profiles)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), chips = profiles.len(), "capability model persisted");
        Ok(())
    }
}

/// In-memory store. Still round-trips through the JSON encoding so tests
/// exercise the same serialization path as the file store.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw persisted JSON, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().clone()
    }
}

impl CapabilityStore for MemoryStore {
    fn load(&self) -> Result<Vec<StaticChipProfile>, StoreError> {
        match self.slot.lock().as_ref() {
            None => Ok(Vec::new()),
            Some(json) => Ok(serde_json::from_str(json)?),
        }
    }

    fn save(&self, profiles: &[StaticChipProfile]) -> Result<(), StoreError> {
        *self.slot.lock() = Some(serde_json::to_string(profiles)?);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use airmux_hal::{ChipMode, ConcurrencyCombination, ConcurrencyLimit, InterfaceKind};

    use super::*;

    fn sample_profiles() -> Vec<StaticChipProfile> {
        vec![StaticChipProfile {
            chip_id: 0,
            capabilities: Some(0x5),
            modes: vec![ChipMode::new(
                2,
                vec![ConcurrencyCombination::new(vec![
                    ConcurrencyLimit::new(vec![InterfaceKind::Sta], 2),
                    ConcurrencyLimit::new(
                        vec![InterfaceKind::Ap, InterfaceKind::ApBridged],
                        1,
                    ),
                ])],
            )],
        }]
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("chip_profiles.json"));

        assert!(store.load().unwrap().is_empty());

        let profiles = sample_profiles();
        store.save(&profiles).unwrap();
        assert_eq!(store.load().unwrap(), profiles);

        // Overwrite works and leaves no temp file behind.
        store.save(&profiles).unwrap();
        assert!(!dir.path().join("chip_profiles.tmp").exists());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());

        let profiles = sample_profiles();
        store.save(&profiles).unwrap();
        assert_eq!(store.load().unwrap(), profiles);
    }
}
