//! Compaction filters: the reclamation half of lazy deletion.
//!
//! DEL only bumps the meta version; the orphaned data records stay on
//! disk until RocksDB compacts the range and consults these predicates.
//! The meta filter drops expired and tombstoned metas once they are at
//! least one version-clock second old (so concurrent readers still
//! observe NotFound), the data filter drops records whose parent meta is
//! gone, stale, or carries a different version.
//!
//! The data filter needs to read the meta column of its own database
//! while a compaction is running, which is exactly the circular handle
//! problem: factories are installed before the `DB` exists. Each engine
//! therefore shares a [`DbHandle`] cell with its factories and fills it
//! in right after open; the cell holds a `Weak` so the filter never keeps
//! the database alive past shutdown.

use crate::codec::{
    parse_base_data_key, parse_lists_data_key, strings_value_is_stale, BaseMetaValue,
    ListsMetaValue,
};
use crate::util::now_seconds;
use parking_lot::Mutex;
use rocksdb::compaction_filter::{CompactionFilter, Decision};
use rocksdb::compaction_filter_factory::{CompactionFilterContext, CompactionFilterFactory};
use rocksdb::DB;
use std::ffi::{CStr, CString};
use std::sync::{Arc, Weak};

/// Late-bound handle to the engine's own database.
pub struct DbHandle {
    inner: Mutex<Weak<DB>>,
}

impl DbHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Weak::new()),
        })
    }

    pub fn set(&self, db: &Arc<DB>) {
        *self.inner.lock() = Arc::downgrade(db);
    }

    fn get(&self) -> Option<Arc<DB>> {
        self.inner.lock().upgrade()
    }
}

/// Which meta-value layout an engine stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaLayout {
    /// count(4) | version(4) | timestamp(4): hashes, sets, zsets.
    Base,
    /// The 36-byte lists layout with head/tail indices.
    Lists,
}

fn decode_meta(layout: MetaLayout, value: &[u8]) -> Option<(u32, u64, u64)> {
    // (count-as-nonzero marker folded into count, version, timestamp)
    match layout {
        MetaLayout::Base => BaseMetaValue::decode(value)
            .ok()
            .map(|m| (m.count, u64::from(m.version), u64::from(m.timestamp))),
        MetaLayout::Lists => ListsMetaValue::decode(value)
            .ok()
            .map(|m| ((m.count != 0) as u32, m.version, u64::from(m.timestamp))),
    }
}

// ============================================================================
// Meta column filter
// ============================================================================

pub struct MetaFilter {
    name: CString,
    layout: MetaLayout,
}

impl CompactionFilter for MetaFilter {
    fn filter(&mut self, _level: u32, _key: &[u8], value: &[u8]) -> Decision {
        let now = now_seconds();
        let Some((count, version, timestamp)) = decode_meta(self.layout, value) else {
            return Decision::Keep;
        };
        // version < now leaves freshly written tombstones alone for one
        // more cycle so racing readers still resolve them to NotFound
        if timestamp != 0 && timestamp <= now && version < now {
            return Decision::Remove;
        }
        if count == 0 && version < now {
            return Decision::Remove;
        }
        Decision::Keep
    }

    fn name(&self) -> &CStr {
        &self.name
    }
}

pub struct MetaFilterFactory {
    name: CString,
    layout: MetaLayout,
}

impl MetaFilterFactory {
    pub fn new(engine: &str, layout: MetaLayout) -> Self {
        Self {
            name: CString::new(format!("{}.meta_filter_factory", engine)).unwrap(),
            layout,
        }
    }
}

impl CompactionFilterFactory for MetaFilterFactory {
    type Filter = MetaFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        MetaFilter {
            name: CString::new("meta_filter").unwrap(),
            layout: self.layout,
        }
    }

    fn name(&self) -> &CStr {
        &self.name
    }
}

// ============================================================================
// Data column filter
// ============================================================================

pub struct DataFilter {
    name: CString,
    layout: MetaLayout,
    db: Arc<DbHandle>,
    cached_key: Vec<u8>,
    /// None until the first lookup; Some(None) when the meta is absent.
    cached_meta: Option<Option<(u32, u64, u64)>>,
}

impl DataFilter {
    fn parse_entry(&self, key: &[u8]) -> Option<(Vec<u8>, u64)> {
        match self.layout {
            MetaLayout::Base => parse_base_data_key(key)
                .ok()
                .map(|p| (p.key.to_vec(), u64::from(p.version))),
            MetaLayout::Lists => parse_lists_data_key(key)
                .ok()
                .map(|p| (p.key.to_vec(), p.version)),
        }
    }

    fn meta_for(&mut self, user_key: &[u8]) -> Option<Option<(u32, u64, u64)>> {
        if self.cached_meta.is_some() && self.cached_key == user_key {
            return self.cached_meta.clone();
        }
        let db = self.db.get()?;
        let cf = db.cf_handle("default")?;
        let meta = match db.get_cf(cf, user_key) {
            Ok(Some(value)) => decode_meta(self.layout, &value),
            Ok(None) => None,
            Err(_) => return None,
        };
        self.cached_key = user_key.to_vec();
        self.cached_meta = Some(meta);
        self.cached_meta.clone()
    }
}

impl CompactionFilter for DataFilter {
    fn filter(&mut self, _level: u32, key: &[u8], _value: &[u8]) -> Decision {
        let Some((user_key, entry_version)) = self.parse_entry(key) else {
            return Decision::Keep;
        };
        let Some(meta) = self.meta_for(&user_key) else {
            // database already gone or unreadable: err on the side of keeping
            return Decision::Keep;
        };
        match meta {
            // parent meta reclaimed: the record is an orphan
            None => Decision::Remove,
            Some((_count, meta_version, timestamp)) => {
                if entry_version != meta_version {
                    return Decision::Remove;
                }
                if timestamp != 0 && timestamp <= now_seconds() {
                    return Decision::Remove;
                }
                Decision::Keep
            }
        }
    }

    fn name(&self) -> &CStr {
        &self.name
    }
}

pub struct DataFilterFactory {
    name: CString,
    layout: MetaLayout,
    db: Arc<DbHandle>,
}

impl DataFilterFactory {
    pub fn new(engine: &str, layout: MetaLayout, db: Arc<DbHandle>) -> Self {
        Self {
            name: CString::new(format!("{}.data_filter_factory", engine)).unwrap(),
            layout,
            db,
        }
    }
}

impl CompactionFilterFactory for DataFilterFactory {
    type Filter = DataFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        DataFilter {
            name: CString::new("data_filter").unwrap(),
            layout: self.layout,
            db: Arc::clone(&self.db),
            cached_key: Vec::new(),
            cached_meta: None,
        }
    }

    fn name(&self) -> &CStr {
        &self.name
    }
}

// ============================================================================
// Strings filter (value and meta share one column)
// ============================================================================

pub struct StringsFilter {
    name: CString,
}

impl CompactionFilter for StringsFilter {
    fn filter(&mut self, _level: u32, _key: &[u8], value: &[u8]) -> Decision {
        if strings_value_is_stale(value) {
            Decision::Remove
        } else {
            Decision::Keep
        }
    }

    fn name(&self) -> &CStr {
        &self.name
    }
}

pub struct StringsFilterFactory {
    name: CString,
}

impl StringsFilterFactory {
    pub fn new() -> Self {
        Self {
            name: CString::new("strings.filter_factory").unwrap(),
        }
    }
}

impl Default for StringsFilterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionFilterFactory for StringsFilterFactory {
    type Filter = StringsFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        StringsFilter {
            name: CString::new("strings_filter").unwrap(),
        }
    }

    fn name(&self) -> &CStr {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringsValue;

    fn run_meta_filter(layout: MetaLayout, value: &[u8]) -> Decision {
        let mut f = MetaFilter {
            name: CString::new("t").unwrap(),
            layout,
        };
        f.filter(0, b"k", value)
    }

    #[test]
    fn test_meta_filter_keeps_live_meta() {
        let mut meta = BaseMetaValue::new(3);
        meta.update_version();
        assert!(matches!(
            run_meta_filter(MetaLayout::Base, &meta.encode()),
            Decision::Keep
        ));
    }

    #[test]
    fn test_meta_filter_drops_old_tombstone() {
        // version well in the past, count 0: reclaimable tombstone
        let meta = BaseMetaValue {
            count: 0,
            version: 10,
            timestamp: 0,
        };
        assert!(matches!(
            run_meta_filter(MetaLayout::Base, &meta.encode()),
            Decision::Remove
        ));
    }

    #[test]
    fn test_meta_filter_grace_for_fresh_tombstone() {
        // a tombstone written "now" survives one more cycle
        let mut meta = BaseMetaValue::new(0);
        meta.version = (now_seconds() + 100) as u32;
        assert!(matches!(
            run_meta_filter(MetaLayout::Base, &meta.encode()),
            Decision::Keep
        ));
    }

    #[test]
    fn test_meta_filter_drops_expired() {
        let meta = BaseMetaValue {
            count: 5,
            version: 10,
            timestamp: 20,
        };
        assert!(matches!(
            run_meta_filter(MetaLayout::Base, &meta.encode()),
            Decision::Remove
        ));
    }

    #[test]
    fn test_meta_filter_keeps_garbage() {
        assert!(matches!(
            run_meta_filter(MetaLayout::Base, b"not-a-meta"),
            Decision::Keep
        ));
    }

    #[test]
    fn test_strings_filter() {
        let mut f = StringsFilter {
            name: CString::new("t").unwrap(),
        };
        let live = StringsValue::new(b"v".to_vec());
        assert!(matches!(f.filter(0, b"k", &live.encode()), Decision::Keep));
        let mut dead = StringsValue::new(b"v".to_vec());
        dead.timestamp = 1;
        assert!(matches!(f.filter(0, b"k", &dead.encode()), Decision::Remove));
    }
}
