//! Plumbing shared by all five engines: database open with per-column
//! table options, the per-engine scan-cursor store and the per-key write
//! statistics that feed the small-compaction heuristic.

use crate::bgtask::{BgTask, BgTaskOp, BgTaskQueue};
use crate::error::{StoreError, StoreResult};
use crate::lock::LockMgr;
use crate::lru::LruCache;
use crate::options::StoreOptions;
use crate::types::DataType;
use parking_lot::Mutex;
use rocksdb::{BlockBasedOptions, Cache, ColumnFamilyDescriptor, Options, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Which column families a compaction should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFamilyType {
    Meta,
    Data,
    MetaAndData,
}

const SCAN_POINT_CAPACITY: usize = 5000;

/// Open one engine's database with the given column families.
///
/// Every column gets a block-based table with a 10-bit bloom filter;
/// the block cache is either the store-wide shared cache or a fresh one
/// per column, mirroring the share_block_cache switch.
pub(crate) fn open_engine_db(
    store_opts: &StoreOptions,
    shared_cache: Option<&Cache>,
    path: &Path,
    cf_specs: Vec<(&str, Options)>,
) -> StoreResult<Arc<DB>> {
    let descriptors: Vec<ColumnFamilyDescriptor> = cf_specs
        .into_iter()
        .map(|(name, mut cf_opts)| {
            let mut table_opts = BlockBasedOptions::default();
            table_opts.set_bloom_filter(10.0, true);
            if let Some(cache) = shared_cache {
                table_opts.set_block_cache(cache);
            } else if store_opts.block_cache_size > 0 {
                table_opts.set_block_cache(&Cache::new_lru_cache(store_opts.block_cache_size));
            }
            cf_opts.set_block_based_table_factory(&table_opts);
            ColumnFamilyDescriptor::new(name, cf_opts)
        })
        .collect();

    let db = DB::open_cf_descriptors(&store_opts.db_options(), path, descriptors)
        .map_err(|e| StoreError::Corruption(e.to_string()))?;
    info!(path = %path.display(), "opened engine database");
    Ok(Arc::new(db))
}

/// Fresh column-family options inheriting the store-wide tuning.
pub(crate) fn cf_options(store_opts: &StoreOptions) -> Options {
    store_opts.db_options()
}

/// State every engine carries besides its DB handle.
pub(crate) struct EngineShared {
    pub dtype: DataType,
    pub lock_mgr: LockMgr,
    scan_cursors: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
    statistics: Mutex<LruCache<Vec<u8>, u64>>,
    small_compaction_threshold: u64,
    bg: Arc<BgTaskQueue>,
}

impl EngineShared {
    pub fn new(dtype: DataType, store_opts: &StoreOptions, bg: Arc<BgTaskQueue>) -> Self {
        Self {
            dtype,
            lock_mgr: LockMgr::new(),
            scan_cursors: Mutex::new(LruCache::new(SCAN_POINT_CAPACITY)),
            statistics: Mutex::new(LruCache::new(store_opts.statistics_max_size.max(1))),
            small_compaction_threshold: store_opts.small_compaction_threshold,
            bg,
        }
    }

    fn scan_point_key(key: &[u8], pattern: &[u8], cursor: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity(key.len() + pattern.len() + 24);
        out.extend_from_slice(key);
        out.push(b'_');
        out.extend_from_slice(pattern);
        out.push(b'_');
        out.extend_from_slice(cursor.to_string().as_bytes());
        out
    }

    /// Resolve a per-collection scan cursor back to its start element.
    pub fn get_scan_start_point(&self, key: &[u8], pattern: &[u8], cursor: i64) -> Option<Vec<u8>> {
        self.scan_cursors
            .lock()
            .lookup(&Self::scan_point_key(key, pattern, cursor))
    }

    pub fn store_scan_next_point(&self, key: &[u8], pattern: &[u8], cursor: i64, next: Vec<u8>) {
        self.scan_cursors
            .lock()
            .insert(Self::scan_point_key(key, pattern, cursor), next);
    }

    /// Account `count` overwritten/removed data records against `key`;
    /// past the threshold the key's range is queued for compaction.
    pub fn update_key_statistics(&self, key: &[u8], count: u64) {
        if self.small_compaction_threshold == 0 || count == 0 {
            return;
        }
        let schedule = {
            let mut stats = self.statistics.lock();
            let total = stats.lookup(&key.to_vec()).unwrap_or(0) + count;
            if total >= self.small_compaction_threshold {
                stats.remove(&key.to_vec());
                true
            } else {
                stats.insert(key.to_vec(), total);
                false
            }
        };
        if schedule {
            self.bg.add_task(BgTask {
                dtype: self.dtype,
                op: BgTaskOp::CompactKey,
                arg: key.to_vec(),
            });
        }
    }

    /// Queue a key compaction unconditionally (SPOP heuristic).
    pub fn schedule_key_compaction(&self, key: &[u8]) {
        self.bg.add_task(BgTask {
            dtype: self.dtype,
            op: BgTaskOp::CompactKey,
            arg: key.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_threshold_schedules_task() {
        let bg = Arc::new(BgTaskQueue::new());
        let opts = StoreOptions {
            statistics_max_size: 16,
            small_compaction_threshold: 10,
            ..Default::default()
        };
        let shared = EngineShared::new(DataType::Sets, &opts, Arc::clone(&bg));
        shared.update_key_statistics(b"k", 4);
        shared.update_key_statistics(b"k", 5);
        assert!(bg.is_empty());
        shared.update_key_statistics(b"k", 1);
        assert_eq!(bg.len(), 1);
        // counter was reset by the trigger
        shared.update_key_statistics(b"k", 4);
        assert_eq!(bg.len(), 1);
    }

    #[test]
    fn test_scan_point_round_trip() {
        let bg = Arc::new(BgTaskQueue::new());
        let shared = EngineShared::new(DataType::Hashes, &StoreOptions::default(), bg);
        assert_eq!(shared.get_scan_start_point(b"h", b"*", 10), None);
        shared.store_scan_next_point(b"h", b"*", 10, b"field5".to_vec());
        assert_eq!(
            shared.get_scan_start_point(b"h", b"*", 10),
            Some(b"field5".to_vec())
        );
    }
}
