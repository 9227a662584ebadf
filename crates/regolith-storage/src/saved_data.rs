//! Dirty-tracked, lazily saved, compressed-file-backed container for
//! world-scoped data such as id counters and scoreboards.

use crate::chunk_serializer::DATA_VERSION;
use crate::record::atomic_write_gzip;
use regolith_common::{RegolithError, Result};
use regolith_logger::{log, LogSeverity};
use regolith_nbt::{NbtFile, SizeTracker, Tag};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const SAVED_DATA_BUDGET: u64 = 4 * 1024 * 1024;

/// Conversion between a domain value and its tag representation. Each
/// concrete use supplies both directions.
pub trait PersistentState: Sized {
    fn to_tag(&self) -> Tag;
    fn from_tag(tag: &Tag) -> Result<Self>;
}

/// Wraps a [`PersistentState`] value with a dirty flag and a save operation
/// that only touches disk when something changed.
///
/// The flag is atomic so concurrent markers do not race `save`; the wrapped
/// value itself follows the single-writer discipline of its owner.
pub struct SavedState<T: PersistentState> {
    value: T,
    dirty: AtomicBool,
}

impl<T: PersistentState> SavedState<T> {
    pub fn new(value: T) -> Self {
        SavedState {
            value,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mutable access. Call [`SavedState::mark_dirty`] after changing
    /// anything, or the change will not be saved.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Loads a previously saved value. The file wraps the payload under a
    /// `data` key next to its schema version.
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut tracker = SizeTracker::new(SAVED_DATA_BUDGET);
        let nbt = NbtFile::read_gzip(&mut file, &mut tracker)?;
        let data = nbt.root.get_compound("data").ok_or_else(|| {
            RegolithError::CorruptData("saved state has no data compound".to_string())
        })?;
        Ok(SavedState {
            value: T::from_tag(data)?,
            dirty: AtomicBool::new(false),
        })
    }

    /// No-op when clean. On success the dirty flag clears; on failure the
    /// error is logged and the flag stays set so a later save retries.
    pub fn save(&self, path: &Path) {
        if !self.is_dirty() {
            return;
        }
        match self.write_file(path) {
            Ok(()) => self.dirty.store(false, Ordering::SeqCst),
            Err(err) => log(
                format!("failed to save {}: {}", path.display(), err),
                LogSeverity::Error,
            ),
        }
    }

    fn write_file(&self, path: &Path) -> Result<()> {
        let mut root = Tag::Compound(HashMap::new());
        root.insert("data", self.value.to_tag());
        root.insert("DataVersion", Tag::Int(DATA_VERSION));
        atomic_write_gzip(path, &NbtFile::new(String::new(), root))
    }
}
