// ── Interface cache ──
//
// The arbiter's persistent mirror of which interfaces exist, who owns
// them, and which destruction listeners are registered. The hardware
// snapshot is the source of truth for *existence*; the cache is the source
// of truth for *attribution* (the HAL does not know who asked for an
// interface). Validation runs against every fresh snapshot: a cache entry
// with no live counterpart means the mirror diverged from reality and the
// whole subsystem is restarted -- the mismatch is never patched in place.

use std::sync::Arc;

use indexmap::IndexMap;
use strum::IntoEnumIterator;
use tracing::{error, warn};

use airmux_hal::{Chip, ChipId, ChipIfaceType, InterfaceKind};

use crate::listener::Registration;
use crate::priority::WorkSource;
use crate::snapshot::ChipSnapshot;

/// Cache key: interface name plus wire type. Names are unique per type.
pub(crate) type CacheKey = (String, ChipIfaceType);

/// One live interface the arbiter created.
pub(crate) struct CacheEntry {
    pub chip: Arc<dyn Chip>,
    pub chip_id: ChipId,
    pub name: String,
    pub chip_type: ChipIfaceType,
    /// The kind that was created. Updated to `Ap` when a bridged AP is
    /// downgraded so destruction events describe what was actually lost.
    pub kind: InterfaceKind,
    pub creation_time_ms: u64,
    pub requestor: WorkSource,
    pub destroyed_listeners: Vec<Registration>,
}

impl CacheEntry {
    pub fn key(&self) -> CacheKey {
        (self.name.clone(), self.chip_type)
    }

    /// Add a destruction listener; duplicates (same allocation) warn and
    /// keep the original.
    pub fn add_destroyed_listener(&mut self, registration: Registration) {
        if self
            .destroyed_listeners
            .iter()
            .any(|existing| Arc::ptr_eq(&existing.listener, &registration.listener))
        {
            warn!(name = %self.name, "duplicate destruction listener ignored");
            return;
        }
        self.destroyed_listeners.push(registration);
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("chip_id", &self.chip_id)
            .field("name", &self.name)
            .field("chip_type", &self.chip_type)
            .field("creation_time_ms", &self.creation_time_ms)
            .field("listeners", &self.destroyed_listeners.len())
            .finish_non_exhaustive()
    }
}

/// Mirror of all live interfaces, keyed by (name, wire type). Iteration
/// order is insertion order, which keeps every teardown deterministic.
#[derive(Default)]
pub(crate) struct InterfaceCache {
    entries: IndexMap<CacheKey, CacheEntry>,
}

impl InterfaceCache {
    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key(), entry);
    }

    pub fn get(&self, name: &str, ty: ChipIfaceType) -> Option<&CacheEntry> {
        self.entries.get(&(name.to_owned(), ty))
    }

    pub fn get_mut(&mut self, name: &str, ty: ChipIfaceType) -> Option<&mut CacheEntry> {
        self.entries.get_mut(&(name.to_owned(), ty))
    }

    pub fn remove(&mut self, name: &str, ty: ChipIfaceType) -> Option<CacheEntry> {
        self.entries.shift_remove(&(name.to_owned(), ty))
    }

    /// Take every entry out, oldest first. Used by full teardown.
    pub fn drain(&mut self) -> Vec<CacheEntry> {
        self.entries.drain(..).map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the cache against a live snapshot and back-fill each matching
    /// snapshot record's requestor from the cache.
    ///
    /// Returns false on the first entry with no live counterpart -- the
    /// caller must treat that as fatal.
    pub fn validate_and_backfill(&self, snapshots: &mut [ChipSnapshot]) -> bool {
        for entry in self.entries.values() {
            let Some(snapshot) = snapshots
                .iter_mut()
                .find(|snap| snap.chip_id == entry.chip_id)
            else {
                error!(?entry, "cache validation: chip no longer present");
                return false;
            };

            let mut matched = false;
            for kind in InterfaceKind::iter().filter(|kind| kind.chip_type() == entry.chip_type)
            {
                if let Some(info) = snapshot
                    .ifaces_of_mut(kind)
                    .iter_mut()
                    .find(|info| info.name == entry.name)
                {
                    info.requestor = Some(entry.requestor.clone());
                    matched = true;
                    break;
                }
            }
            if !matched {
                error!(?entry, "cache validation: no live interface for entry");
                return false;
            }
        }
        true
    }
}
