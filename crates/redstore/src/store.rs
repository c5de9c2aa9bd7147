//! Top-level store: owns the five engines, fans cross-type commands out
//! in the canonical order (strings, hashes, sets, lists, zsets),
//! stitches per-engine keyspace scans into one logical SCAN and runs the
//! single background compaction worker.

use crate::bgtask::{BgTask, BgTaskOp, BgTaskQueue};
use crate::codec::{data_compact_range, meta_compact_range};
use crate::engine::ColumnFamilyType;
use crate::error::{StoreError, StoreResult};
use crate::hashes::HashesDb;
use crate::hyperloglog::HyperLogLog;
use crate::lists::ListsDb;
use crate::lru::LruCache;
use crate::options::StoreOptions;
use crate::sets::SetsDb;
use crate::strings::StringsDb;
use crate::types::{DataType, KeyInfo, KeyValue};
use crate::util::is_tail_wildcard;
use crate::zsets::ZSetsDb;
use parking_lot::Mutex;
use rocksdb::Cache;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

const CURSORS_CAPACITY: usize = 5000;
/// HLL commands refuse more keys/values than this.
const MAX_HLL_KEYS: usize = 255;

/// Fan-out order for cross-type commands and the stitched SCAN.
const SCAN_ORDER: [DataType; 5] = [
    DataType::Strings,
    DataType::Hashes,
    DataType::Sets,
    DataType::Lists,
    DataType::ZSets,
];

/// The five engines, cloneable into the background worker.
#[derive(Clone)]
struct EngineSet {
    strings: Arc<StringsDb>,
    hashes: Arc<HashesDb>,
    sets: Arc<SetsDb>,
    lists: Arc<ListsDb>,
    zsets: Arc<ZSetsDb>,
}

impl EngineSet {
    fn do_compact(&self, dtype: DataType) -> StoreResult<()> {
        match dtype {
            DataType::Strings => {
                self.strings
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)
            }
            DataType::Hashes => {
                self.hashes
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)
            }
            DataType::Sets => self.sets.compact_range(ColumnFamilyType::MetaAndData, None, None),
            DataType::Lists => {
                self.lists
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)
            }
            DataType::ZSets => {
                self.zsets
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)
            }
            DataType::All => {
                self.strings
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)?;
                self.hashes
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)?;
                self.sets
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)?;
                self.lists
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)?;
                self.zsets
                    .compact_range(ColumnFamilyType::MetaAndData, None, None)
            }
        }
    }

    /// Compact the meta and data ranges belonging to one user key.
    fn compact_key(&self, dtype: DataType, key: &[u8]) -> StoreResult<()> {
        let (meta_start, meta_end) = meta_compact_range(key);
        let (data_start, data_end) = data_compact_range(key);
        let meta = (Some(meta_start.as_slice()), Some(meta_end.as_slice()));
        let data = (Some(data_start.as_slice()), Some(data_end.as_slice()));
        match dtype {
            DataType::Hashes => {
                self.hashes.compact_range(ColumnFamilyType::Meta, meta.0, meta.1)?;
                self.hashes.compact_range(ColumnFamilyType::Data, data.0, data.1)
            }
            DataType::Sets => {
                self.sets.compact_range(ColumnFamilyType::Meta, meta.0, meta.1)?;
                self.sets.compact_range(ColumnFamilyType::Data, data.0, data.1)
            }
            DataType::Lists => {
                self.lists.compact_range(ColumnFamilyType::Meta, meta.0, meta.1)?;
                self.lists.compact_range(ColumnFamilyType::Data, data.0, data.1)
            }
            DataType::ZSets => {
                self.zsets.compact_range(ColumnFamilyType::Meta, meta.0, meta.1)?;
                self.zsets.compact_range(ColumnFamilyType::Data, data.0, data.1)
            }
            _ => Ok(()),
        }
    }
}

pub struct RedStore {
    engines: EngineSet,
    cursors: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
    bg: Arc<BgTaskQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
    current_task: Arc<Mutex<Option<BgTask>>>,
    scan_keynum_exit: AtomicBool,
}

impl RedStore {
    /// Open the five sub-engines under `path` and start the background
    /// worker. A failure names the sub-engine; treat it as fatal.
    pub fn open(opts: &StoreOptions, path: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| StoreError::Corruption(format!("create db path: {}", e)))?;
        let shared_cache = if opts.share_block_cache && opts.block_cache_size > 0 {
            Some(Cache::new_lru_cache(opts.block_cache_size))
        } else {
            None
        };
        let cache = shared_cache.as_ref();
        let bg = Arc::new(BgTaskQueue::new());

        fn open_one<T>(name: &str, result: StoreResult<T>) -> StoreResult<Arc<T>> {
            match result {
                Ok(db) => Ok(Arc::new(db)),
                Err(e) => {
                    error!(engine = name, error = %e, "failed to open sub-engine");
                    Err(StoreError::Corruption(format!("open {} db: {}", name, e)))
                }
            }
        }
        let strings = open_one(
            "strings",
            StringsDb::open(opts, cache, &path.join("strings"), Arc::clone(&bg)),
        )?;
        let hashes = open_one(
            "hashes",
            HashesDb::open(opts, cache, &path.join("hashes"), Arc::clone(&bg)),
        )?;
        let sets = open_one(
            "sets",
            SetsDb::open(opts, cache, &path.join("sets"), Arc::clone(&bg)),
        )?;
        let lists = open_one(
            "lists",
            ListsDb::open(opts, cache, &path.join("lists"), Arc::clone(&bg)),
        )?;
        let zsets = open_one(
            "zsets",
            ZSetsDb::open(opts, cache, &path.join("zsets"), Arc::clone(&bg)),
        )?;

        let engines = EngineSet {
            strings,
            hashes,
            sets,
            lists,
            zsets,
        };
        let current_task = Arc::new(Mutex::new(None));
        let worker = {
            let engines = engines.clone();
            let bg = Arc::clone(&bg);
            let current_task = Arc::clone(&current_task);
            std::thread::Builder::new()
                .name("redstore-bg".to_string())
                .spawn(move || {
                    while let Some(task) = bg.next_task() {
                        *current_task.lock() = Some(task.clone());
                        let result = match task.op {
                            BgTaskOp::CleanAll => engines.do_compact(task.dtype),
                            BgTaskOp::CompactKey => engines.compact_key(task.dtype, &task.arg),
                        };
                        if let Err(e) = result {
                            warn!(error = %e, "background compaction task failed");
                        }
                        *current_task.lock() = None;
                    }
                    info!("background worker exiting");
                })
                .map_err(|e| StoreError::Corruption(format!("spawn bg worker: {}", e)))?
        };
        info!(path = %path.display(), "store opened");

        Ok(Self {
            engines,
            cursors: Mutex::new(LruCache::new(CURSORS_CAPACITY)),
            bg,
            worker: Mutex::new(Some(worker)),
            current_task,
            scan_keynum_exit: AtomicBool::new(false),
        })
    }

    // ==================== engine accessors ====================

    pub fn strings(&self) -> &StringsDb {
        &self.engines.strings
    }

    pub fn hashes(&self) -> &HashesDb {
        &self.engines.hashes
    }

    pub fn sets(&self) -> &SetsDb {
        &self.engines.sets
    }

    pub fn lists(&self) -> &ListsDb {
        &self.engines.lists
    }

    pub fn zsets(&self) -> &ZSetsDb {
        &self.engines.zsets
    }

    // ==================== cross-type commands ====================

    fn fan_out<F>(&self, mut op: F) -> (i64, HashMap<DataType, StoreError>)
    where
        F: FnMut(DataType) -> StoreResult<()>,
    {
        let mut count = 0i64;
        let mut status = HashMap::new();
        let mut corrupted = false;
        for dtype in SCAN_ORDER {
            match op(dtype) {
                Ok(()) => count += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    corrupted = true;
                    status.insert(dtype, e);
                }
            }
        }
        (if corrupted { -1 } else { count }, status)
    }

    /// Delete `keys` across every type. Returns the number of deleted
    /// (typed) keys, or -1 when any engine failed; the map carries the
    /// per-type failures.
    pub fn del(&self, keys: &[Vec<u8>]) -> (i64, HashMap<DataType, StoreError>) {
        let mut total = 0i64;
        let mut status = HashMap::new();
        let mut corrupted = false;
        for key in keys {
            let (count, errs) = self.fan_out(|dtype| match dtype {
                DataType::Strings => self.engines.strings.del(key),
                DataType::Hashes => self.engines.hashes.del(key),
                DataType::Sets => self.engines.sets.del(key),
                DataType::Lists => self.engines.lists.del(key),
                DataType::ZSets => self.engines.zsets.del(key),
                DataType::All => Ok(()),
            });
            if count < 0 {
                corrupted = true;
            } else {
                total += count;
            }
            status.extend(errs);
        }
        (if corrupted { -1 } else { total }, status)
    }

    /// Delete `keys` within one type only.
    pub fn del_by_type(&self, keys: &[Vec<u8>], dtype: DataType) -> i64 {
        let mut count = 0i64;
        for key in keys {
            let result = match dtype {
                DataType::Strings => self.engines.strings.del(key),
                DataType::Hashes => self.engines.hashes.del(key),
                DataType::Sets => self.engines.sets.del(key),
                DataType::Lists => self.engines.lists.del(key),
                DataType::ZSets => self.engines.zsets.del(key),
                DataType::All => return -1,
            };
            match result {
                Ok(()) => count += 1,
                Err(e) if e.is_not_found() => {}
                Err(_) => return -1,
            }
        }
        count
    }

    /// Count how many typed keys exist across all types.
    pub fn exists(&self, keys: &[Vec<u8>]) -> (i64, HashMap<DataType, StoreError>) {
        let mut total = 0i64;
        let mut status = HashMap::new();
        let mut corrupted = false;
        for key in keys {
            let (count, errs) = self.fan_out(|dtype| match dtype {
                DataType::Strings => self.engines.strings.exists(key),
                DataType::Hashes => self.engines.hashes.hlen(key).map(|_| ()),
                DataType::Sets => self.engines.sets.scard(key).map(|_| ()),
                DataType::Lists => self.engines.lists.llen(key).map(|_| ()),
                DataType::ZSets => self.engines.zsets.zcard(key).map(|_| ()),
                DataType::All => Ok(()),
            });
            if count < 0 {
                corrupted = true;
            } else {
                total += count;
            }
            status.extend(errs);
        }
        (if corrupted { -1 } else { total }, status)
    }

    pub fn expire(&self, key: &[u8], ttl: i64) -> (i64, HashMap<DataType, StoreError>) {
        self.fan_out(|dtype| match dtype {
            DataType::Strings => self.engines.strings.expire(key, ttl),
            DataType::Hashes => self.engines.hashes.expire(key, ttl),
            DataType::Sets => self.engines.sets.expire(key, ttl),
            DataType::Lists => self.engines.lists.expire(key, ttl),
            DataType::ZSets => self.engines.zsets.expire(key, ttl),
            DataType::All => Ok(()),
        })
    }

    pub fn expireat(&self, key: &[u8], timestamp: i64) -> (i64, HashMap<DataType, StoreError>) {
        self.fan_out(|dtype| match dtype {
            DataType::Strings => self.engines.strings.expireat(key, timestamp),
            DataType::Hashes => self.engines.hashes.expireat(key, timestamp),
            DataType::Sets => self.engines.sets.expireat(key, timestamp),
            DataType::Lists => self.engines.lists.expireat(key, timestamp),
            DataType::ZSets => self.engines.zsets.expireat(key, timestamp),
            DataType::All => Ok(()),
        })
    }

    pub fn persist(&self, key: &[u8]) -> (i64, HashMap<DataType, StoreError>) {
        self.fan_out(|dtype| match dtype {
            DataType::Strings => self.engines.strings.persist(key),
            DataType::Hashes => self.engines.hashes.persist(key),
            DataType::Sets => self.engines.sets.persist(key),
            DataType::Lists => self.engines.lists.persist(key),
            DataType::ZSets => self.engines.zsets.persist(key),
            DataType::All => Ok(()),
        })
    }

    /// Remaining TTL per type: -1 no expiration, -2 absent, -3 error
    /// (with the error recorded in the status map).
    pub fn ttl(&self, key: &[u8]) -> (HashMap<DataType, i64>, HashMap<DataType, StoreError>) {
        let mut out = HashMap::new();
        let mut status = HashMap::new();
        for dtype in SCAN_ORDER {
            let result = match dtype {
                DataType::Strings => self.engines.strings.ttl(key),
                DataType::Hashes => self.engines.hashes.ttl(key),
                DataType::Sets => self.engines.sets.ttl(key),
                DataType::Lists => self.engines.lists.ttl(key),
                DataType::ZSets => self.engines.zsets.ttl(key),
                DataType::All => continue,
            };
            match result {
                Ok(ttl) => {
                    out.insert(dtype, ttl);
                }
                Err(e) if e.is_not_found() => {
                    out.insert(dtype, -2);
                }
                Err(e) => {
                    out.insert(dtype, -3);
                    status.insert(dtype, e);
                }
            }
        }
        (out, status)
    }

    /// First non-empty type in the order string, hash, list, zset, set;
    /// "none" when the key exists nowhere.
    pub fn type_of(&self, key: &[u8]) -> StoreResult<&'static str> {
        match self.engines.strings.exists(key) {
            Ok(()) => return Ok("string"),
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        match self.engines.hashes.hlen(key) {
            Ok(_) => return Ok("hash"),
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        match self.engines.lists.llen(key) {
            Ok(_) => return Ok("list"),
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        match self.engines.zsets.zcard(key) {
            Ok(_) => return Ok("zset"),
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        match self.engines.sets.scard(key) {
            Ok(_) => return Ok("set"),
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        Ok("none")
    }

    /// All keys matching `pattern` in one type, or every type.
    pub fn keys(&self, dtype: DataType, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        match dtype {
            DataType::Strings => self.engines.strings.scan_keys(pattern),
            DataType::Hashes => self.engines.hashes.scan_keys(pattern),
            DataType::ZSets => self.engines.zsets.scan_keys(pattern),
            DataType::Sets => self.engines.sets.scan_keys(pattern),
            DataType::Lists => self.engines.lists.scan_keys(pattern),
            DataType::All => {
                let mut keys = self.engines.strings.scan_keys(pattern)?;
                keys.extend(self.engines.hashes.scan_keys(pattern)?);
                keys.extend(self.engines.zsets.scan_keys(pattern)?);
                keys.extend(self.engines.sets.scan_keys(pattern)?);
                keys.extend(self.engines.lists.scan_keys(pattern)?);
                Ok(keys)
            }
        }
    }

    // ==================== stitched SCAN ====================

    fn cursor_index_key(dtype: DataType, cursor: i64) -> Vec<u8> {
        let mut out = vec![dtype.tag() as u8];
        out.extend_from_slice(cursor.to_string().as_bytes());
        out
    }

    fn load_cursor(&self, dtype: DataType, cursor: i64) -> Option<(DataType, Vec<u8>)> {
        let value = self.cursors.lock().lookup(&Self::cursor_index_key(dtype, cursor))?;
        let (&tag, start_key) = value.split_first()?;
        Some((DataType::from_tag(tag as char)?, start_key.to_vec()))
    }

    fn store_cursor(&self, dtype: DataType, cursor: i64, engine: DataType, next_key: &[u8]) {
        let mut value = vec![engine.tag() as u8];
        value.extend_from_slice(next_key);
        self.cursors
            .lock()
            .insert(Self::cursor_index_key(dtype, cursor), value);
    }

    /// One step of the logical keyspace scan. The cursor is opaque; 0
    /// starts a scan and 0 returned means the scan is complete. With
    /// `dtype == All` the walk crosses engine boundaries in the
    /// canonical order, resuming where the cursor's tag points.
    pub fn scan(
        &self,
        dtype: DataType,
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> StoreResult<(i64, Vec<Vec<u8>>)> {
        if cursor < 0 {
            return Ok((0, Vec::new()));
        }
        let count = count.max(1);
        let prefix: Vec<u8> = if is_tail_wildcard(pattern) {
            pattern[..pattern.len() - 1].to_vec()
        } else {
            Vec::new()
        };

        let first_engine = if dtype == DataType::All {
            DataType::Strings
        } else {
            dtype
        };
        let (engine, start_key, cursor) = match self.load_cursor(dtype, cursor) {
            Some((engine, start_key)) => (engine, start_key, cursor),
            // evicted or fresh cursor: restart at the type's beginning
            None => (first_engine, prefix.clone(), 0),
        };
        let mut engine_idx = SCAN_ORDER.iter().position(|d| *d == engine).unwrap_or(0);
        let mut start_key = start_key;
        let mut keys = Vec::new();
        let mut leftover = count;

        loop {
            let outcome = match SCAN_ORDER[engine_idx] {
                DataType::Strings => self.engines.strings.scan_meta_keys(&start_key, pattern, leftover)?,
                DataType::Hashes => self.engines.hashes.scan_meta_keys(&start_key, pattern, leftover)?,
                DataType::Sets => self.engines.sets.scan_meta_keys(&start_key, pattern, leftover)?,
                DataType::Lists => self.engines.lists.scan_meta_keys(&start_key, pattern, leftover)?,
                DataType::ZSets => self.engines.zsets.scan_meta_keys(&start_key, pattern, leftover)?,
                DataType::All => unreachable!(),
            };
            keys.extend(outcome.keys);
            leftover = outcome.leftover;

            if !outcome.finished {
                // budget exhausted inside this engine
                let next_cursor = cursor + count;
                self.store_cursor(dtype, next_cursor, SCAN_ORDER[engine_idx], &outcome.next_key);
                return Ok((next_cursor, keys));
            }
            // this engine's keyspace is done
            if dtype != DataType::All || engine_idx + 1 >= SCAN_ORDER.len() {
                return Ok((0, keys));
            }
            engine_idx += 1;
            if leftover <= 0 {
                // finished exactly on the budget: the cursor resumes at
                // the start of the next engine
                let next_cursor = cursor + count;
                self.store_cursor(dtype, next_cursor, SCAN_ORDER[engine_idx], &prefix);
                return Ok((next_cursor, keys));
            }
            start_key = prefix.clone();
        }
    }

    /// Stateless keyspace scan from an explicit start key.
    pub fn scanx(
        &self,
        dtype: DataType,
        start_key: &[u8],
        pattern: &[u8],
        count: i64,
    ) -> StoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
        let outcome = match dtype {
            DataType::Strings => self.engines.strings.scan_meta_keys(start_key, pattern, count)?,
            DataType::Hashes => self.engines.hashes.scan_meta_keys(start_key, pattern, count)?,
            DataType::Sets => self.engines.sets.scan_meta_keys(start_key, pattern, count)?,
            DataType::Lists => self.engines.lists.scan_meta_keys(start_key, pattern, count)?,
            DataType::ZSets => self.engines.zsets.scan_meta_keys(start_key, pattern, count)?,
            DataType::All => {
                return Err(StoreError::Corruption("unsupported data type".to_string()))
            }
        };
        Ok((outcome.keys, outcome.next_key))
    }

    /// Bounded forward meta-range scan; strings return key/value pairs,
    /// collection types return keys.
    #[allow(clippy::type_complexity)]
    pub fn pk_scan_range(
        &self,
        dtype: DataType,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<Vec<u8>>, Vec<KeyValue>, Vec<u8>)> {
        match dtype {
            DataType::Strings => {
                let (kvs, next) = self
                    .engines
                    .strings
                    .pk_scan_range(key_start, key_end, pattern, limit)?;
                Ok((Vec::new(), kvs, next))
            }
            DataType::Hashes => {
                let (keys, next) = self
                    .engines
                    .hashes
                    .pk_scan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::Lists => {
                let (keys, next) = self
                    .engines
                    .lists
                    .pk_scan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::ZSets => {
                let (keys, next) = self
                    .engines
                    .zsets
                    .pk_scan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::Sets => {
                let (keys, next) = self
                    .engines
                    .sets
                    .pk_scan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::All => Err(StoreError::Corruption("unsupported data type".to_string())),
        }
    }

    /// Reverse counterpart of `pk_scan_range`.
    #[allow(clippy::type_complexity)]
    pub fn pk_rscan_range(
        &self,
        dtype: DataType,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<Vec<u8>>, Vec<KeyValue>, Vec<u8>)> {
        match dtype {
            DataType::Strings => {
                let (kvs, next) = self
                    .engines
                    .strings
                    .pk_rscan_range(key_start, key_end, pattern, limit)?;
                Ok((Vec::new(), kvs, next))
            }
            DataType::Hashes => {
                let (keys, next) = self
                    .engines
                    .hashes
                    .pk_rscan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::Lists => {
                let (keys, next) = self
                    .engines
                    .lists
                    .pk_rscan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::ZSets => {
                let (keys, next) = self
                    .engines
                    .zsets
                    .pk_rscan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::Sets => {
                let (keys, next) = self
                    .engines
                    .sets
                    .pk_rscan_range(key_start, key_end, pattern, limit)?;
                Ok((keys, Vec::new(), next))
            }
            DataType::All => Err(StoreError::Corruption("unsupported data type".to_string())),
        }
    }

    /// Logically delete every key of one type matching `pattern`.
    pub fn pk_pattern_match_del(&self, dtype: DataType, pattern: &[u8]) -> StoreResult<i32> {
        match dtype {
            DataType::Strings => self.engines.strings.pk_pattern_match_del(pattern),
            DataType::Hashes => self.engines.hashes.pk_pattern_match_del(pattern),
            DataType::Lists => self.engines.lists.pk_pattern_match_del(pattern),
            DataType::ZSets => self.engines.zsets.pk_pattern_match_del(pattern),
            DataType::Sets => self.engines.sets.pk_pattern_match_del(pattern),
            DataType::All => Err(StoreError::Corruption("unsupported data type".to_string())),
        }
    }

    // ==================== background tasks ====================

    /// Compact one engine (or all). `sync` runs inline, otherwise the
    /// task is queued for the background worker.
    pub fn compact(&self, dtype: DataType, sync: bool) -> StoreResult<()> {
        if sync {
            self.engines.do_compact(dtype)
        } else {
            self.bg.add_task(BgTask {
                dtype,
                op: BgTaskOp::CleanAll,
                arg: Vec::new(),
            });
            Ok(())
        }
    }

    pub fn add_bg_task(&self, task: BgTask) {
        self.bg.add_task(task);
    }

    pub fn pending_bg_tasks(&self) -> usize {
        self.bg.len()
    }

    /// Human-readable name of the task the worker is currently running.
    pub fn current_task_type(&self) -> &'static str {
        match self.current_task.lock().as_ref() {
            Some(task) => match task.dtype {
                DataType::All => "All",
                DataType::Strings => "String",
                DataType::Hashes => "Hash",
                DataType::ZSets => "ZSet",
                DataType::Sets => "Set",
                DataType::Lists => "List",
            },
            None => "No",
        }
    }

    // ==================== statistics ====================

    /// Sum a RocksDB integer property over every engine.
    pub fn get_usage(&self, property: &str) -> StoreResult<u64> {
        let mut total = 0;
        total += self.engines.strings.get_property(property)?;
        total += self.engines.hashes.get_property(property)?;
        total += self.engines.lists.get_property(property)?;
        total += self.engines.zsets.get_property(property)?;
        total += self.engines.sets.get_property(property)?;
        Ok(total)
    }

    pub fn get_usage_by_type(&self, property: &str) -> StoreResult<HashMap<DataType, u64>> {
        let mut out = HashMap::new();
        out.insert(DataType::Strings, self.engines.strings.get_property(property)?);
        out.insert(DataType::Hashes, self.engines.hashes.get_property(property)?);
        out.insert(DataType::Lists, self.engines.lists.get_property(property)?);
        out.insert(DataType::ZSets, self.engines.zsets.get_property(property)?);
        out.insert(DataType::Sets, self.engines.sets.get_property(property)?);
        Ok(out)
    }

    /// Keyspace statistics per engine, in the order strings, hashes,
    /// lists, zsets, sets. `stop_scan_key_num` aborts from another
    /// thread; an aborted scan returns Incomplete.
    pub fn get_key_num(&self) -> StoreResult<Vec<KeyInfo>> {
        let stop = &self.scan_keynum_exit;
        let mut infos = Vec::with_capacity(5);
        for dtype in [
            DataType::Strings,
            DataType::Hashes,
            DataType::Lists,
            DataType::ZSets,
            DataType::Sets,
        ] {
            let result = match dtype {
                DataType::Strings => self.engines.strings.scan_key_num(stop),
                DataType::Hashes => self.engines.hashes.scan_key_num(stop),
                DataType::Lists => self.engines.lists.scan_key_num(stop),
                DataType::ZSets => self.engines.zsets.scan_key_num(stop),
                DataType::Sets => self.engines.sets.scan_key_num(stop),
                DataType::All => unreachable!(),
            };
            match result {
                Ok(info) => infos.push(info),
                Err(e) => {
                    self.scan_keynum_exit.store(false, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
        Ok(infos)
    }

    pub fn stop_scan_key_num(&self) {
        self.scan_keynum_exit.store(true, Ordering::Relaxed);
    }

    // ==================== hyperloglog ====================

    /// Fold `values` into the sketch stored at `key`. Returns true when
    /// the estimate changed.
    pub fn pf_add(&self, key: &[u8], values: &[Vec<u8>]) -> StoreResult<bool> {
        if values.len() >= MAX_HLL_KEYS {
            return Err(StoreError::InvalidArgument("invalid number of keys".to_string()));
        }
        let (registers, existed) = match self.engines.strings.get(key) {
            Ok(v) => (v, true),
            Err(e) if e.is_not_found() => (Vec::new(), false),
            Err(e) => return Err(e),
        };
        let mut log = HyperLogLog::new(&registers);
        let before = log.estimate() as i64;
        for value in values {
            log.add(value);
        }
        let after = log.estimate() as i64;
        let updated = before != after || (!existed && values.is_empty());
        self.engines.strings.set(key, &log.serialize())?;
        Ok(updated)
    }

    /// Estimate the union cardinality of the given sketches.
    pub fn pf_count(&self, keys: &[Vec<u8>]) -> StoreResult<i64> {
        if keys.is_empty() || keys.len() >= MAX_HLL_KEYS {
            return Err(StoreError::InvalidArgument("invalid number of keys".to_string()));
        }
        let mut merged: Option<HyperLogLog> = None;
        for key in keys {
            let registers = match self.engines.strings.get(key) {
                Ok(v) => v,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let log = HyperLogLog::new(&registers);
            match merged.as_mut() {
                Some(m) => m.merge(&log),
                None => merged = Some(log),
            }
        }
        Ok(merged.map(|m| m.estimate() as i64).unwrap_or(0))
    }

    /// Merge all sketches into the first key.
    pub fn pf_merge(&self, keys: &[Vec<u8>]) -> StoreResult<()> {
        if keys.is_empty() || keys.len() >= MAX_HLL_KEYS {
            return Err(StoreError::InvalidArgument("invalid number of keys".to_string()));
        }
        let mut merged = match self.engines.strings.get(&keys[0]) {
            Ok(v) => HyperLogLog::new(&v),
            Err(e) if e.is_not_found() => HyperLogLog::new(b""),
            Err(e) => return Err(e),
        };
        for key in &keys[1..] {
            match self.engines.strings.get(key) {
                Ok(v) => merged.merge(&HyperLogLog::new(&v)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        self.engines.strings.set(&keys[0], &merged.serialize())
    }
}

impl Drop for RedStore {
    fn drop(&mut self) {
        self.bg.shutdown();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("background worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_store() -> (RedStore, std::path::PathBuf) {
        let path = std::path::PathBuf::from(format!("/tmp/redstore_store_{}", rand::random::<u64>()));
        let store = RedStore::open(&StoreOptions::default(), &path).unwrap();
        (store, path)
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn test_cross_type_del_and_exists() {
        let (store, path) = create_temp_store();
        store.strings().set(b"k", b"v").unwrap();
        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();
        store.lists().rpush(b"other", &[b"x".to_vec()]).unwrap();

        let (count, status) = store.exists(&[b"k".to_vec(), b"other".to_vec()]);
        assert_eq!(count, 3);
        assert!(status.is_empty());

        let (deleted, status) = store.del(&[b"k".to_vec()]);
        assert_eq!(deleted, 2);
        assert!(status.is_empty());
        let (count, _) = store.exists(&[b"k".to_vec()]);
        assert_eq!(count, 0);
        cleanup(&path);
    }

    #[test]
    fn test_del_by_type() {
        let (store, path) = create_temp_store();
        store.strings().set(b"k", b"v").unwrap();
        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();
        assert_eq!(store.del_by_type(&[b"k".to_vec()], DataType::Sets), 1);
        assert!(store.strings().get(b"k").is_ok());
        assert_eq!(store.del_by_type(&[b"k".to_vec()], DataType::All), -1);
        cleanup(&path);
    }

    #[test]
    fn test_type_order() {
        let (store, path) = create_temp_store();
        assert_eq!(store.type_of(b"k").unwrap(), "none");
        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();
        assert_eq!(store.type_of(b"k").unwrap(), "set");
        store.lists().rpush(b"k", &[b"x".to_vec()]).unwrap();
        assert_eq!(store.type_of(b"k").unwrap(), "list");
        store.strings().set(b"k", b"v").unwrap();
        assert_eq!(store.type_of(b"k").unwrap(), "string");
        cleanup(&path);
    }

    #[test]
    fn test_cross_type_expire_and_ttl() {
        let (store, path) = create_temp_store();
        store.strings().set(b"k", b"v").unwrap();
        store.hashes().hset(b"k", b"f", b"v").unwrap();
        let (count, _) = store.expire(b"k", 100);
        assert_eq!(count, 2);
        let (ttls, status) = store.ttl(b"k");
        assert!(status.is_empty());
        assert!(ttls[&DataType::Strings] > 0);
        assert!(ttls[&DataType::Hashes] > 0);
        assert_eq!(ttls[&DataType::Sets], -2);
        let (count, _) = store.persist(b"k");
        assert_eq!(count, 2);
        let (ttls, _) = store.ttl(b"k");
        assert_eq!(ttls[&DataType::Strings], -1);
        cleanup(&path);
    }

    #[test]
    fn test_keys_across_types() {
        let (store, path) = create_temp_store();
        store.strings().set(b"user:1", b"v").unwrap();
        store.hashes().hset(b"user:2", b"f", b"v").unwrap();
        store.zsets().zadd(
            b"user:3",
            &[crate::types::ScoreMember { score: 1.0, member: b"m".to_vec() }],
        )
        .unwrap();
        let keys = store.keys(DataType::All, b"user:*").unwrap();
        assert_eq!(keys.len(), 3);
        let keys = store.keys(DataType::Strings, b"user:*").unwrap();
        assert_eq!(keys, vec![b"user:1".to_vec()]);
        cleanup(&path);
    }

    #[test]
    fn test_background_compact_queue() {
        let (store, path) = create_temp_store();
        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();
        store.compact(DataType::All, false).unwrap();
        store.compact(DataType::Sets, true).unwrap();
        // drain happens asynchronously; shutdown joins the worker
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_pf_commands() {
        let (store, path) = create_temp_store();
        assert!(store.pf_add(b"hll", &[b"a".to_vec(), b"b".to_vec()]).unwrap());
        assert!(!store.pf_add(b"hll", &[b"a".to_vec()]).unwrap());
        let count = store.pf_count(&[b"hll".to_vec()]).unwrap();
        assert_eq!(count, 2);

        store.pf_add(b"hll2", &[b"b".to_vec(), b"c".to_vec()]).unwrap();
        let union = store.pf_count(&[b"hll".to_vec(), b"hll2".to_vec()]).unwrap();
        assert_eq!(union, 3);

        store.pf_merge(&[b"merged".to_vec(), b"hll".to_vec(), b"hll2".to_vec()]).unwrap();
        assert_eq!(store.pf_count(&[b"merged".to_vec()]).unwrap(), 3);
        cleanup(&path);
    }
}
