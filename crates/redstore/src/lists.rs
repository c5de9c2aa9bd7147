//! Lists engine: a doubly-indexed sequence. The meta carries
//! `left_index`/`right_index` sitting just outside the live range; LPUSH
//! writes at `left_index` and moves it left, RPUSH mirrors on the right.
//! Pops and LREM leave gaps instead of renumbering, so rank-addressed
//! commands walk live records in index order. LINSERT bisects the gap
//! next to the pivot and falls back to a full rewrite under a fresh
//! version when the gap is exhausted.

use crate::bgtask::BgTaskQueue;
use crate::codec::{
    lists_data_key, lists_data_prefix, parse_lists_data_key, ListsMetaValue,
};
use crate::engine::{cf_options, open_engine_db, ColumnFamilyType, EngineShared};
use crate::error::{StoreError, StoreResult};
use crate::filters::{DataFilterFactory, DbHandle, MetaFilterFactory, MetaLayout};
use crate::options::StoreOptions;
use crate::scan::ScanOutcome;
use crate::types::{BeforeOrAfter, DataType, KeyInfo};
use crate::util::{is_tail_wildcard, now_seconds, prefix_successor, string_match};
use rocksdb::{ColumnFamily, Direction, IteratorMode, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const BATCH_DELETE_LIMIT: usize = 1000;
/// Index spacing used when a rewrite renumbers a list evenly.
const REWRITE_STEP: i64 = 1024;

pub struct ListsDb {
    db: Arc<DB>,
    shared: EngineShared,
}

impl ListsDb {
    pub fn open(
        store_opts: &StoreOptions,
        shared_cache: Option<&rocksdb::Cache>,
        path: &Path,
        bg: Arc<BgTaskQueue>,
    ) -> StoreResult<Self> {
        let db_handle = DbHandle::new();
        let mut meta_opts = cf_options(store_opts);
        meta_opts.set_compaction_filter_factory(MetaFilterFactory::new("lists", MetaLayout::Lists));
        let mut data_opts = cf_options(store_opts);
        data_opts.set_compaction_filter_factory(DataFilterFactory::new(
            "lists",
            MetaLayout::Lists,
            Arc::clone(&db_handle),
        ));
        let db = open_engine_db(
            store_opts,
            shared_cache,
            path,
            vec![("default", meta_opts), ("data_cf", data_opts)],
        )?;
        db_handle.set(&db);
        Ok(Self {
            db,
            shared: EngineShared::new(DataType::Lists, store_opts, bg),
        })
    }

    fn meta_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("default").expect("default cf")
    }

    fn data_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("data_cf").expect("data cf")
    }

    fn get_meta(&self, key: &[u8]) -> StoreResult<Option<ListsMetaValue>> {
        match self.db.get_cf(self.meta_cf(), key)? {
            Some(raw) => Ok(Some(ListsMetaValue::decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn live_meta(&self, key: &[u8]) -> StoreResult<ListsMetaValue> {
        match self.get_meta(key)? {
            Some(meta) if meta.is_stale() => Err(StoreError::NotFound("stale".to_string())),
            Some(meta) if meta.count == 0 => Err(StoreError::not_found()),
            Some(meta) => Ok(meta),
            None => Err(StoreError::not_found()),
        }
    }

    /// Walk live records of (key, version) in sequence order, calling
    /// `visit` with (rank, index, value); stop when it returns false.
    fn for_each_record<F>(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        key: &[u8],
        version: u64,
        mut visit: F,
    ) -> StoreResult<()>
    where
        F: FnMut(u64, i64, &[u8]) -> bool,
    {
        let prefix = lists_data_prefix(key, version);
        let mut rank = 0u64;
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let parsed = parse_lists_data_key(&data_key)?;
            if !visit(rank, parsed.index, &value) {
                break;
            }
            rank += 1;
        }
        Ok(())
    }

    /// Rank range [start, stop] clamped Redis-style; None selects nothing.
    fn normalize_range(start: i64, stop: i64, count: u64) -> Option<(u64, u64)> {
        let count = count as i64;
        let mut start = if start < 0 { count + start } else { start };
        let mut stop = if stop < 0 { count + stop } else { stop };
        start = start.max(0);
        stop = stop.min(count - 1);
        if start > stop || start >= count {
            None
        } else {
            Some((start as u64, stop as u64))
        }
    }

    // ==================== push / pop ====================

    pub fn lpush(&self, key: &[u8], values: &[Vec<u8>]) -> StoreResult<u64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut meta = match self.get_meta(key)? {
            Some(meta) if !meta.is_stale() && meta.count != 0 => meta,
            Some(mut meta) => {
                meta.initial_meta_value();
                meta
            }
            None => {
                let mut meta = ListsMetaValue::new();
                meta.update_version();
                meta
            }
        };
        for value in values {
            batch.put_cf(
                self.data_cf(),
                lists_data_key(key, meta.version, meta.left_index),
                value,
            );
            meta.left_index -= 1;
            meta.count += 1;
        }
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        Ok(meta.count)
    }

    pub fn rpush(&self, key: &[u8], values: &[Vec<u8>]) -> StoreResult<u64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut meta = match self.get_meta(key)? {
            Some(meta) if !meta.is_stale() && meta.count != 0 => meta,
            Some(mut meta) => {
                meta.initial_meta_value();
                meta
            }
            None => {
                let mut meta = ListsMetaValue::new();
                meta.update_version();
                meta
            }
        };
        for value in values {
            batch.put_cf(
                self.data_cf(),
                lists_data_key(key, meta.version, meta.right_index),
                value,
            );
            meta.right_index += 1;
            meta.count += 1;
        }
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        Ok(meta.count)
    }

    /// Push onto the head only when the list already exists.
    pub fn lpushx(&self, key: &[u8], value: &[u8]) -> StoreResult<u64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.data_cf(),
            lists_data_key(key, meta.version, meta.left_index),
            value,
        );
        meta.left_index -= 1;
        meta.count += 1;
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        Ok(meta.count)
    }

    pub fn rpushx(&self, key: &[u8], value: &[u8]) -> StoreResult<u64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.data_cf(),
            lists_data_key(key, meta.version, meta.right_index),
            value,
        );
        meta.right_index += 1;
        meta.count += 1;
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        Ok(meta.count)
    }

    /// First live record of (key, version): (index, value).
    fn head_record(&self, key: &[u8], version: u64) -> StoreResult<(i64, Vec<u8>)> {
        let prefix = lists_data_prefix(key, version);
        for item in self.db.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            return Ok((parse_lists_data_key(&data_key)?.index, value.to_vec()));
        }
        Err(StoreError::not_found())
    }

    /// Last live record of (key, version): (index, value).
    fn tail_record(&self, key: &[u8], version: u64) -> StoreResult<(i64, Vec<u8>)> {
        let prefix = lists_data_prefix(key, version);
        let succ = prefix_successor(&prefix);
        let mode = match &succ {
            Some(succ) => IteratorMode::From(succ, Direction::Reverse),
            None => IteratorMode::End,
        };
        for item in self.db.iterator_cf(self.data_cf(), mode) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                if data_key.as_ref() > prefix.as_slice() {
                    continue;
                }
                break;
            }
            return Ok((parse_lists_data_key(&data_key)?.index, value.to_vec()));
        }
        Err(StoreError::not_found())
    }

    pub fn lpop(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let (index, value) = self.head_record(key, meta.version)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.data_cf(), lists_data_key(key, meta.version, index));
        meta.left_index = index;
        meta.count -= 1;
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, 1);
        Ok(value)
    }

    pub fn rpop(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let (index, value) = self.tail_record(key, meta.version)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.data_cf(), lists_data_key(key, meta.version, index));
        meta.right_index = index;
        meta.count -= 1;
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, 1);
        Ok(value)
    }

    /// Atomically pop the source tail and push it onto the destination
    /// head, under both keys' locks.
    pub fn rpoplpush(&self, source: &[u8], destination: &[u8]) -> StoreResult<Vec<u8>> {
        let _l = self.shared.lock_mgr.lock_multi(&[source, destination]);
        let mut src_meta = self.live_meta(source)?;
        let (src_index, value) = self.tail_record(source, src_meta.version)?;
        let mut batch = WriteBatch::default();

        if source == destination {
            if src_meta.count == 1 {
                return Ok(value);
            }
            batch.delete_cf(self.data_cf(), lists_data_key(source, src_meta.version, src_index));
            batch.put_cf(
                self.data_cf(),
                lists_data_key(source, src_meta.version, src_meta.left_index),
                &value,
            );
            src_meta.right_index = src_index;
            src_meta.left_index -= 1;
            batch.put_cf(self.meta_cf(), source, src_meta.encode());
            self.db.write(batch)?;
            return Ok(value);
        }

        batch.delete_cf(self.data_cf(), lists_data_key(source, src_meta.version, src_index));
        src_meta.right_index = src_index;
        src_meta.count -= 1;
        batch.put_cf(self.meta_cf(), source, src_meta.encode());

        let mut dst_meta = match self.get_meta(destination)? {
            Some(meta) if !meta.is_stale() && meta.count != 0 => meta,
            Some(mut meta) => {
                meta.initial_meta_value();
                meta
            }
            None => {
                let mut meta = ListsMetaValue::new();
                meta.update_version();
                meta
            }
        };
        batch.put_cf(
            self.data_cf(),
            lists_data_key(destination, dst_meta.version, dst_meta.left_index),
            &value,
        );
        dst_meta.left_index -= 1;
        dst_meta.count += 1;
        batch.put_cf(self.meta_cf(), destination, dst_meta.encode());

        self.db.write(batch)?;
        self.shared.update_key_statistics(source, 1);
        Ok(value)
    }

    // ==================== positional commands ====================

    pub fn llen(&self, key: &[u8]) -> StoreResult<u64> {
        Ok(self.live_meta(key)?.count)
    }

    pub fn lindex(&self, key: &[u8], index: i64) -> StoreResult<Vec<u8>> {
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        let count = meta.count as i64;
        let rank = if index < 0 { count + index } else { index };
        if rank < 0 || rank >= count {
            return Err(StoreError::not_found());
        }
        let mut found = None;
        self.for_each_record(&snapshot, key, meta.version, |r, _i, value| {
            if r as i64 == rank {
                found = Some(value.to_vec());
                return false;
            }
            true
        })?;
        found.ok_or_else(StoreError::not_found)
    }

    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<Vec<u8>>> {
        let snapshot = self.db.snapshot();
        let meta = match self.snapshot_live_meta(&snapshot, key) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let Some((start, stop)) = Self::normalize_range(start, stop, meta.count) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity((stop - start + 1) as usize);
        self.for_each_record(&snapshot, key, meta.version, |rank, _index, value| {
            if rank > stop {
                return false;
            }
            if rank >= start {
                out.push(value.to_vec());
            }
            true
        })?;
        Ok(out)
    }

    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let meta = self.live_meta(key)?;
        let count = meta.count as i64;
        let rank = if index < 0 { count + index } else { index };
        if rank < 0 || rank >= count {
            return Err(StoreError::Corruption("index out of range".to_string()));
        }
        let snapshot = self.db.snapshot();
        let mut target = None;
        self.for_each_record(&snapshot, key, meta.version, |r, i, _value| {
            if r as i64 == rank {
                target = Some(i);
                return false;
            }
            true
        })?;
        let target = target.ok_or_else(|| StoreError::Corruption("index out of range".to_string()))?;
        self.db
            .put_cf(self.data_cf(), lists_data_key(key, meta.version, target), value)?;
        Ok(())
    }

    /// Insert `value` next to the first occurrence of `pivot`. Returns the
    /// new length, -1 when the pivot is absent, 0 when the key is absent.
    pub fn linsert(
        &self,
        key: &[u8],
        where_: BeforeOrAfter,
        pivot: &[u8],
        value: &[u8],
    ) -> StoreResult<i64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = match self.live_meta(key) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        let snapshot = self.db.snapshot();

        // locate the pivot and its neighbors in one walk
        let mut prev_index: Option<i64> = None;
        let mut pivot_index: Option<i64> = None;
        let mut next_index: Option<i64> = None;
        self.for_each_record(&snapshot, key, meta.version, |_rank, index, cur| {
            if pivot_index.is_some() {
                next_index = Some(index);
                return false;
            }
            if cur == pivot {
                pivot_index = Some(index);
                return true;
            }
            prev_index = Some(index);
            true
        })?;
        let Some(pivot_index) = pivot_index else {
            return Ok(-1);
        };

        let (lo, hi, boundary) = match where_ {
            BeforeOrAfter::Before => match prev_index {
                Some(prev) => (prev, pivot_index, false),
                None => (meta.left_index, pivot_index, true),
            },
            BeforeOrAfter::After => match next_index {
                Some(next) => (pivot_index, next, false),
                None => (pivot_index, meta.right_index, true),
            },
        };

        let new_index = if hi - lo >= 2 {
            Some(lo + (hi - lo) / 2)
        } else if boundary {
            // the outside slot is free
            Some(match where_ {
                BeforeOrAfter::Before => meta.left_index,
                BeforeOrAfter::After => meta.right_index,
            })
        } else {
            None
        };

        if let Some(new_index) = new_index {
            let mut batch = WriteBatch::default();
            batch.put_cf(self.data_cf(), lists_data_key(key, meta.version, new_index), value);
            if new_index <= meta.left_index {
                meta.left_index = new_index - 1;
            }
            if new_index >= meta.right_index {
                meta.right_index = new_index + 1;
            }
            meta.count += 1;
            batch.put_cf(self.meta_cf(), key, meta.encode());
            self.db.write(batch)?;
            return Ok(meta.count as i64);
        }

        // no gap left next to the pivot: rewrite the whole list evenly
        // under a fresh version
        let mut elements: Vec<Vec<u8>> = Vec::with_capacity(meta.count as usize + 1);
        let mut inserted = false;
        self.for_each_record(&snapshot, key, meta.version, |_rank, index, cur| {
            if !inserted && index == pivot_index {
                match where_ {
                    BeforeOrAfter::Before => {
                        elements.push(value.to_vec());
                        elements.push(cur.to_vec());
                    }
                    BeforeOrAfter::After => {
                        elements.push(cur.to_vec());
                        elements.push(value.to_vec());
                    }
                }
                inserted = true;
            } else {
                elements.push(cur.to_vec());
            }
            true
        })?;
        let old_count = meta.count;
        let version = meta.initial_meta_value();
        let mut batch = WriteBatch::default();
        let mut index = crate::codec::INITIAL_LEFT_INDEX
            - (elements.len() as i64 / 2) * REWRITE_STEP;
        for element in &elements {
            batch.put_cf(self.data_cf(), lists_data_key(key, version, index), element);
            index += REWRITE_STEP;
        }
        meta.count = elements.len() as u64;
        meta.left_index =
            crate::codec::INITIAL_LEFT_INDEX - (elements.len() as i64 / 2) * REWRITE_STEP - 1;
        meta.right_index = index - REWRITE_STEP + 1;
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, old_count);
        Ok(meta.count as i64)
    }

    /// Remove up to `count` occurrences of `value`: positive scans
    /// head-to-tail, negative tail-to-head, zero removes all.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> StoreResult<u64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let snapshot = self.db.snapshot();
        let mut matches: Vec<i64> = Vec::new();
        self.for_each_record(&snapshot, key, meta.version, |_rank, index, cur| {
            if cur == value {
                matches.push(index);
            }
            true
        })?;
        let victims: Vec<i64> = if count > 0 {
            matches.iter().copied().take(count as usize).collect()
        } else if count < 0 {
            let skip = matches.len().saturating_sub(count.unsigned_abs() as usize);
            matches.iter().copied().skip(skip).collect()
        } else {
            matches
        };
        if victims.is_empty() {
            return Ok(0);
        }
        let mut batch = WriteBatch::default();
        for index in &victims {
            batch.delete_cf(self.data_cf(), lists_data_key(key, meta.version, *index));
        }
        meta.count -= victims.len() as u64;
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, victims.len() as u64);
        Ok(victims.len() as u64)
    }

    /// Keep only ranks [start, stop], moving head/tail inward without
    /// renumbering the survivors.
    pub fn ltrim(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let snapshot = self.db.snapshot();
        let range = Self::normalize_range(start, stop, meta.count);
        let mut batch = WriteBatch::default();
        let Some((start, stop)) = range else {
            // empty result: the whole list is tombstoned
            let statistic = meta.count;
            meta.initial_meta_value();
            self.db.put_cf(self.meta_cf(), key, meta.encode())?;
            self.shared.update_key_statistics(key, statistic);
            return Ok(());
        };
        let mut removed = 0u64;
        let mut first_kept = None;
        let mut last_kept = None;
        self.for_each_record(&snapshot, key, meta.version, |rank, index, _value| {
            if rank < start || rank > stop {
                removed += 1;
                batch.delete_cf(self.data_cf(), lists_data_key(key, meta.version, index));
            } else {
                if first_kept.is_none() {
                    first_kept = Some(index);
                }
                last_kept = Some(index);
            }
            true
        })?;
        if removed == 0 {
            return Ok(());
        }
        meta.count -= removed;
        if let (Some(first), Some(last)) = (first_kept, last_kept) {
            meta.left_index = first - 1;
            meta.right_index = last + 1;
        }
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, removed);
        Ok(())
    }

    fn snapshot_live_meta(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        key: &[u8],
    ) -> StoreResult<ListsMetaValue> {
        match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => {
                let meta = ListsMetaValue::decode(&raw)?;
                if meta.is_stale() || meta.count == 0 {
                    Err(StoreError::not_found())
                } else {
                    Ok(meta)
                }
            }
            None => Err(StoreError::not_found()),
        }
    }

    // ==================== keyspace commands ====================

    pub fn del(&self, key: &[u8]) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let statistic = meta.count;
        meta.initial_meta_value();
        self.db.put_cf(self.meta_cf(), key, meta.encode())?;
        self.shared.update_key_statistics(key, statistic);
        Ok(())
    }

    pub fn expire(&self, key: &[u8], ttl: i64) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        if ttl > 0 {
            meta.set_relative_timestamp(ttl);
        } else {
            meta.initial_meta_value();
        }
        self.db.put_cf(self.meta_cf(), key, meta.encode())?;
        Ok(())
    }

    pub fn expireat(&self, key: &[u8], timestamp: i64) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        if timestamp > 0 {
            meta.timestamp = timestamp as u32;
        } else {
            meta.initial_meta_value();
        }
        self.db.put_cf(self.meta_cf(), key, meta.encode())?;
        Ok(())
    }

    pub fn persist(&self, key: &[u8]) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        if meta.timestamp == 0 {
            return Err(StoreError::NotFound("no associated timeout".to_string()));
        }
        meta.timestamp = 0;
        self.db.put_cf(self.meta_cf(), key, meta.encode())?;
        Ok(())
    }

    pub fn ttl(&self, key: &[u8]) -> StoreResult<i64> {
        let meta = self.live_meta(key)?;
        if meta.timestamp == 0 {
            return Ok(-1);
        }
        Ok((i64::from(meta.timestamp) - now_seconds() as i64).max(-2))
    }

    // ==================== scans / maintenance ====================

    fn meta_live(meta: &ListsMetaValue) -> bool {
        !meta.is_stale() && meta.count != 0
    }

    pub fn scan_meta_keys(
        &self,
        start_key: &[u8],
        pattern: &[u8],
        budget: i64,
    ) -> StoreResult<ScanOutcome> {
        let mut outcome = ScanOutcome::new(budget);
        let prefix: &[u8] = if is_tail_wildcard(pattern) {
            &pattern[..pattern.len() - 1]
        } else {
            &[]
        };
        let snapshot = self.db.snapshot();
        let iter = snapshot.iterator_cf(
            self.meta_cf(),
            IteratorMode::From(start_key, Direction::Forward),
        );
        for item in iter {
            let (key, raw) = item?;
            if outcome.leftover <= 0 {
                if prefix.is_empty() || key.starts_with(prefix) {
                    outcome.next_key = key.to_vec();
                    outcome.finished = false;
                }
                return Ok(outcome);
            }
            let meta = ListsMetaValue::decode(&raw)?;
            if !Self::meta_live(&meta) {
                continue;
            }
            if !prefix.is_empty() && !key.starts_with(prefix) {
                return Ok(outcome);
            }
            if string_match(pattern, &key) {
                outcome.keys.push(key.to_vec());
            }
            outcome.leftover -= 1;
        }
        Ok(outcome)
    }

    pub fn scan_keys(&self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let snapshot = self.db.snapshot();
        let mut keys = Vec::new();
        for item in snapshot.iterator_cf(self.meta_cf(), IteratorMode::Start) {
            let (key, raw) = item?;
            let meta = ListsMetaValue::decode(&raw)?;
            if Self::meta_live(&meta) && string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    pub fn pk_scan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
        if !key_start.is_empty() && !key_end.is_empty() && key_start > key_end {
            return Err(StoreError::InvalidArgument("error in given range".to_string()));
        }
        let snapshot = self.db.snapshot();
        let mode = if key_start.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(key_start, Direction::Forward)
        };
        let mut keys = Vec::new();
        let mut next_key = Vec::new();
        let mut remain = limit;
        for item in snapshot.iterator_cf(self.meta_cf(), mode) {
            let (key, raw) = item?;
            if !key_end.is_empty() && key.as_ref() > key_end {
                break;
            }
            let meta = ListsMetaValue::decode(&raw)?;
            if !Self::meta_live(&meta) {
                continue;
            }
            if remain <= 0 {
                next_key = key.to_vec();
                break;
            }
            if string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
            remain -= 1;
        }
        Ok((keys, next_key))
    }

    pub fn pk_rscan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
        if !key_start.is_empty() && !key_end.is_empty() && key_start < key_end {
            return Err(StoreError::InvalidArgument("error in given range".to_string()));
        }
        let snapshot = self.db.snapshot();
        let mode = if key_start.is_empty() {
            IteratorMode::End
        } else {
            IteratorMode::From(key_start, Direction::Reverse)
        };
        let mut keys = Vec::new();
        let mut next_key = Vec::new();
        let mut remain = limit;
        for item in snapshot.iterator_cf(self.meta_cf(), mode) {
            let (key, raw) = item?;
            if !key_end.is_empty() && key.as_ref() < key_end {
                break;
            }
            let meta = ListsMetaValue::decode(&raw)?;
            if !Self::meta_live(&meta) {
                continue;
            }
            if remain <= 0 {
                next_key = key.to_vec();
                break;
            }
            if string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
            remain -= 1;
        }
        Ok((keys, next_key))
    }

    pub fn pk_pattern_match_del(&self, pattern: &[u8]) -> StoreResult<i32> {
        let snapshot = self.db.snapshot();
        let mut batch = WriteBatch::default();
        let mut total = 0i32;
        for item in snapshot.iterator_cf(self.meta_cf(), IteratorMode::Start) {
            let (key, raw) = item?;
            let mut meta = ListsMetaValue::decode(&raw)?;
            if Self::meta_live(&meta) && string_match(pattern, &key) {
                meta.initial_meta_value();
                batch.put_cf(self.meta_cf(), &key, meta.encode());
            }
            if batch.len() >= BATCH_DELETE_LIMIT {
                total += batch.len() as i32;
                self.db.write(std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            total += batch.len() as i32;
            self.db.write(batch)?;
        }
        Ok(total)
    }

    pub fn scan_key_num(&self, stop: &AtomicBool) -> StoreResult<KeyInfo> {
        let snapshot = self.db.snapshot();
        let now = now_seconds();
        let mut info = KeyInfo::default();
        let mut ttl_sum = 0u64;
        for item in snapshot.iterator_cf(self.meta_cf(), IteratorMode::Start) {
            if stop.load(Ordering::Relaxed) {
                return Err(StoreError::Incomplete("key-count scan stopped".to_string()));
            }
            let (_key, raw) = item?;
            let meta = ListsMetaValue::decode(&raw)?;
            if !Self::meta_live(&meta) {
                info.invalid_keys += 1;
            } else {
                info.keys += 1;
                if meta.timestamp != 0 {
                    info.expires += 1;
                    ttl_sum += u64::from(meta.timestamp).saturating_sub(now);
                }
            }
        }
        if info.expires > 0 {
            info.avg_ttl = ttl_sum / info.expires;
        }
        Ok(info)
    }

    pub fn compact_range(
        &self,
        cf_type: ColumnFamilyType,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StoreResult<()> {
        if matches!(cf_type, ColumnFamilyType::Meta | ColumnFamilyType::MetaAndData) {
            self.db.compact_range_cf(self.meta_cf(), begin, end);
        }
        if matches!(cf_type, ColumnFamilyType::Data | ColumnFamilyType::MetaAndData) {
            self.db.compact_range_cf(self.data_cf(), begin, end);
        }
        Ok(())
    }

    pub fn get_property(&self, property: &str) -> StoreResult<u64> {
        let meta = self
            .db
            .property_int_value_cf(self.meta_cf(), property)?
            .unwrap_or(0);
        let data = self
            .db
            .property_int_value_cf(self.data_cf(), property)?
            .unwrap_or(0);
        Ok(meta + data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn create_temp_db() -> (ListsDb, std::path::PathBuf) {
        let path = std::path::PathBuf::from(format!("/tmp/redstore_lists_{}", rand::random::<u64>()));
        let db = ListsDb::open(
            &StoreOptions::default(),
            None,
            &path,
            Arc::new(BgTaskQueue::new()),
        )
        .unwrap();
        (db, path)
    }

    fn cleanup(path: &std::path::Path) {
        let _ = fs::remove_dir_all(path);
    }

    fn vecs(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_push_pop_order() {
        let (db, path) = create_temp_db();
        assert_eq!(db.rpush(b"L", &vecs(&["x", "y", "z"])).unwrap(), 3);
        assert_eq!(db.lpush(b"L", &vecs(&["a"])).unwrap(), 4);
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "y", "z"]));
        assert_eq!(db.lpop(b"L").unwrap(), b"a");
        assert_eq!(db.rpop(b"L").unwrap(), b"z");
        assert_eq!(db.llen(b"L").unwrap(), 2);
        cleanup(&path);
    }

    #[test]
    fn test_lpush_order_is_reversed() {
        let (db, path) = create_temp_db();
        db.lpush(b"L", &vecs(&["a", "b", "c"])).unwrap();
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["c", "b", "a"]));
        cleanup(&path);
    }

    #[test]
    fn test_lrange_bounds() {
        let (db, path) = create_temp_db();
        db.rpush(b"L", &vecs(&["a", "b", "c", "d", "e"])).unwrap();
        assert_eq!(db.lrange(b"L", 1, 3).unwrap(), vecs(&["b", "c", "d"]));
        assert_eq!(db.lrange(b"L", -2, -1).unwrap(), vecs(&["d", "e"]));
        assert!(db.lrange(b"L", 7, 9).unwrap().is_empty());
        assert!(db.lrange(b"missing", 0, -1).unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_linsert_scenario() {
        let (db, path) = create_temp_db();
        assert_eq!(db.rpush(b"L", &vecs(&["x", "y", "z"])).unwrap(), 3);
        assert_eq!(db.lpush(b"L", &vecs(&["a"])).unwrap(), 4);
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "y", "z"]));
        assert_eq!(
            db.linsert(b"L", BeforeOrAfter::Before, b"y", b"m").unwrap(),
            5
        );
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "m", "y", "z"]));
        assert_eq!(
            db.linsert(b"L", BeforeOrAfter::After, b"z", b"w").unwrap(),
            6
        );
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "m", "y", "z", "w"]));
        assert_eq!(
            db.linsert(b"L", BeforeOrAfter::Before, b"missing", b"q").unwrap(),
            -1
        );
        assert_eq!(db.linsert(b"nope", BeforeOrAfter::Before, b"y", b"q").unwrap(), 0);
        cleanup(&path);
    }

    #[test]
    fn test_linsert_repeated_bisection() {
        let (db, path) = create_temp_db();
        db.rpush(b"L", &vecs(&["a", "b"])).unwrap();
        // keep inserting right before "b"; the gap shrinks each time and
        // eventually forces the rewrite path
        for i in 0..20 {
            let val = format!("v{}", i);
            let len = db
                .linsert(b"L", BeforeOrAfter::Before, b"b", val.as_bytes())
                .unwrap();
            assert_eq!(len, i + 3);
        }
        let range = db.lrange(b"L", 0, -1).unwrap();
        assert_eq!(range.len(), 22);
        assert_eq!(range[0], b"a");
        assert_eq!(range[21], b"b");
        assert_eq!(range[20], b"v19");
        cleanup(&path);
    }

    #[test]
    fn test_lindex_lset() {
        let (db, path) = create_temp_db();
        db.rpush(b"L", &vecs(&["a", "b", "c"])).unwrap();
        assert_eq!(db.lindex(b"L", 0).unwrap(), b"a");
        assert_eq!(db.lindex(b"L", -1).unwrap(), b"c");
        assert!(db.lindex(b"L", 9).unwrap_err().is_not_found());
        db.lset(b"L", 1, b"B").unwrap();
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "B", "c"]));
        assert!(matches!(
            db.lset(b"L", 9, b"x").unwrap_err(),
            StoreError::Corruption(_)
        ));
        cleanup(&path);
    }

    #[test]
    fn test_lrem_directions() {
        let (db, path) = create_temp_db();
        db.rpush(b"L", &vecs(&["x", "a", "x", "b", "x"])).unwrap();
        assert_eq!(db.lrem(b"L", 1, b"x").unwrap(), 1);
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "b", "x"]));
        assert_eq!(db.lrem(b"L", -1, b"x").unwrap(), 1);
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "b"]));
        assert_eq!(db.lrem(b"L", 0, b"x").unwrap(), 1);
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "b"]));
        cleanup(&path);
    }

    #[test]
    fn test_ltrim() {
        let (db, path) = create_temp_db();
        db.rpush(b"L", &vecs(&["a", "b", "c", "d", "e"])).unwrap();
        db.ltrim(b"L", 1, 3).unwrap();
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["b", "c", "d"]));
        // pushes after a trim keep extending outward
        db.lpush(b"L", &vecs(&["front"])).unwrap();
        db.rpush(b"L", &vecs(&["back"])).unwrap();
        assert_eq!(
            db.lrange(b"L", 0, -1).unwrap(),
            vecs(&["front", "b", "c", "d", "back"])
        );
        // an empty range tombstones the list
        db.ltrim(b"L", 5, 2).unwrap();
        assert!(db.llen(b"L").unwrap_err().is_not_found());
        cleanup(&path);
    }

    #[test]
    fn test_pushx_requires_existing() {
        let (db, path) = create_temp_db();
        assert!(db.lpushx(b"L", b"a").unwrap_err().is_not_found());
        assert!(db.rpushx(b"L", b"a").unwrap_err().is_not_found());
        db.rpush(b"L", &vecs(&["x"])).unwrap();
        assert_eq!(db.lpushx(b"L", b"a").unwrap(), 2);
        assert_eq!(db.rpushx(b"L", b"z").unwrap(), 3);
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "z"]));
        cleanup(&path);
    }

    #[test]
    fn test_rpoplpush() {
        let (db, path) = create_temp_db();
        db.rpush(b"src", &vecs(&["a", "b", "c"])).unwrap();
        db.rpush(b"dst", &vecs(&["x"])).unwrap();
        assert_eq!(db.rpoplpush(b"src", b"dst").unwrap(), b"c");
        assert_eq!(db.lrange(b"src", 0, -1).unwrap(), vecs(&["a", "b"]));
        assert_eq!(db.lrange(b"dst", 0, -1).unwrap(), vecs(&["c", "x"]));
        // rotation within one list
        assert_eq!(db.rpoplpush(b"src", b"src").unwrap(), b"b");
        assert_eq!(db.lrange(b"src", 0, -1).unwrap(), vecs(&["b", "a"]));
        assert!(db.rpoplpush(b"missing", b"dst").unwrap_err().is_not_found());
        cleanup(&path);
    }

    #[test]
    fn test_del_and_recreate() {
        let (db, path) = create_temp_db();
        db.rpush(b"L", &vecs(&["a", "b"])).unwrap();
        db.del(b"L").unwrap();
        assert!(db.llen(b"L").unwrap_err().is_not_found());
        assert!(db.lrange(b"L", 0, -1).unwrap().is_empty());
        // old records are invisible under the new version
        db.rpush(b"L", &vecs(&["z"])).unwrap();
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), vecs(&["z"]));
        cleanup(&path);
    }

    #[test]
    fn test_expire_ttl() {
        let (db, path) = create_temp_db();
        db.rpush(b"L", &vecs(&["a"])).unwrap();
        assert_eq!(db.ttl(b"L").unwrap(), -1);
        db.expire(b"L", 40).unwrap();
        let t = db.ttl(b"L").unwrap();
        assert!(t > 0 && t <= 40);
        db.expire(b"L", 0).unwrap();
        assert!(db.llen(b"L").unwrap_err().is_not_found());
        cleanup(&path);
    }
}
