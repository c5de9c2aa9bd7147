//! Sets engine: meta plus one empty-valued member-index record per
//! member under `member_cf`. Algebraic commands walk the first set by
//! prefix iteration and probe the rest with point lookups; the store
//! variants overwrite the destination by bumping its version and
//! emitting the whole result in one batch.

use crate::base_meta;
use crate::bgtask::BgTaskQueue;
use crate::codec::{base_data_key, base_data_prefix, parse_base_data_key, BaseMetaValue};
use crate::engine::{cf_options, open_engine_db, ColumnFamilyType, EngineShared};
use crate::error::{StoreError, StoreResult};
use crate::filters::{DataFilterFactory, DbHandle, MetaFilterFactory, MetaLayout};
use crate::lru::LruCache;
use crate::options::StoreOptions;
use crate::scan::ScanOutcome;
use crate::types::{DataType, KeyInfo};
use crate::util::{is_tail_wildcard, now_micros, now_seconds, string_match};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use rocksdb::{ColumnFamily, Direction, IteratorMode, WriteBatch, DB};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const SPOP_COUNTS_CAPACITY: usize = 1000;
/// Pops of one key that trigger a background compaction of its range.
const SPOP_COMPACT_THRESHOLD_COUNT: u64 = 500;
/// A single pop slower than this (microseconds) triggers it immediately.
const SPOP_COMPACT_THRESHOLD_DURATION: u64 = 1_000_000;

pub struct SetsDb {
    db: Arc<DB>,
    shared: EngineShared,
    spop_counts: Mutex<LruCache<Vec<u8>, u64>>,
}

impl SetsDb {
    pub fn open(
        store_opts: &StoreOptions,
        shared_cache: Option<&rocksdb::Cache>,
        path: &Path,
        bg: Arc<BgTaskQueue>,
    ) -> StoreResult<Self> {
        let db_handle = DbHandle::new();
        let mut meta_opts = cf_options(store_opts);
        meta_opts.set_compaction_filter_factory(MetaFilterFactory::new("sets", MetaLayout::Base));
        let mut member_opts = cf_options(store_opts);
        member_opts.set_compaction_filter_factory(DataFilterFactory::new(
            "sets",
            MetaLayout::Base,
            Arc::clone(&db_handle),
        ));
        let db = open_engine_db(
            store_opts,
            shared_cache,
            path,
            vec![("default", meta_opts), ("member_cf", member_opts)],
        )?;
        db_handle.set(&db);
        Ok(Self {
            db,
            shared: EngineShared::new(DataType::Sets, store_opts, bg),
            spop_counts: Mutex::new(LruCache::new(SPOP_COUNTS_CAPACITY)),
        })
    }

    fn meta_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("default").expect("default cf")
    }

    fn member_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("member_cf").expect("member cf")
    }

    fn get_meta(&self, key: &[u8]) -> StoreResult<Option<BaseMetaValue>> {
        match self.db.get_cf(self.meta_cf(), key)? {
            Some(raw) => Ok(Some(BaseMetaValue::decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn live_meta(&self, key: &[u8]) -> StoreResult<BaseMetaValue> {
        match self.get_meta(key)? {
            Some(meta) if meta.is_stale() => Err(StoreError::NotFound("stale".to_string())),
            Some(meta) if meta.count == 0 => Err(StoreError::not_found()),
            Some(meta) => Ok(meta),
            None => Err(StoreError::not_found()),
        }
    }

    /// Members of every live input set, as (key, version) pairs the
    /// algebra walks; stale and deleted sets are just absent.
    fn live_versions(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        keys: &[Vec<u8>],
    ) -> StoreResult<Vec<(Vec<u8>, u32)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = snapshot.get_cf(self.meta_cf(), key)? {
                let meta = BaseMetaValue::decode(&raw)?;
                if !meta.is_stale() && meta.count != 0 {
                    out.push((key.clone(), meta.version));
                }
            }
        }
        Ok(out)
    }

    fn members_of(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        key: &[u8],
        version: u32,
    ) -> StoreResult<Vec<Vec<u8>>> {
        let prefix = base_data_prefix(key, version);
        let mut members = Vec::new();
        for item in snapshot.iterator_cf(
            self.member_cf(),
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            members.push(parse_base_data_key(&data_key)?.tail.to_vec());
        }
        Ok(members)
    }

    fn contains(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        key: &[u8],
        version: u32,
        member: &[u8],
    ) -> StoreResult<bool> {
        Ok(snapshot
            .get_cf(self.member_cf(), base_data_key(key, version, member))?
            .is_some())
    }

    /// Overwrite `destination` with `members` inside `batch`, bumping its
    /// version. Returns the old live count for the statistics ledger.
    fn store_members(
        &self,
        batch: &mut WriteBatch,
        destination: &[u8],
        members: &[Vec<u8>],
    ) -> StoreResult<u64> {
        let (mut meta, statistic) = match self.get_meta(destination)? {
            Some(mut meta) => {
                let old = u64::from(meta.count);
                meta.initial_meta_value();
                (meta, old)
            }
            None => {
                let mut meta = BaseMetaValue::new(0);
                meta.update_version();
                (meta, 0)
            }
        };
        meta.count = members.len() as u32;
        let version = meta.version;
        batch.put_cf(self.meta_cf(), destination, meta.encode());
        for member in members {
            batch.put_cf(self.member_cf(), base_data_key(destination, version, member), b"");
        }
        Ok(statistic)
    }

    // ==================== write commands ====================

    /// Returns the number of members actually added.
    pub fn sadd(&self, key: &[u8], members: &[Vec<u8>]) -> StoreResult<i32> {
        let mut unique = HashSet::new();
        let filtered: Vec<&Vec<u8>> = members
            .iter()
            .filter(|m| unique.insert(m.as_slice()))
            .collect();

        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let ret;
        match self.get_meta(key)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let version = meta.version;
                let mut added = 0i64;
                for member in &filtered {
                    let member_key = base_data_key(key, version, member);
                    if self.db.get_cf(self.member_cf(), &member_key)?.is_none() {
                        added += 1;
                        batch.put_cf(self.member_cf(), member_key, b"");
                    }
                }
                if added == 0 {
                    return Ok(0);
                }
                ret = added as i32;
                meta.modify_count(added);
                batch.put_cf(self.meta_cf(), key, meta.encode());
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = filtered.len() as u32;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                for member in &filtered {
                    batch.put_cf(self.member_cf(), base_data_key(key, version, member), b"");
                }
                ret = filtered.len() as i32;
            }
            None => {
                let mut meta = BaseMetaValue::new(filtered.len() as u32);
                let version = meta.update_version();
                batch.put_cf(self.meta_cf(), key, meta.encode());
                for member in &filtered {
                    batch.put_cf(self.member_cf(), base_data_key(key, version, member), b"");
                }
                ret = filtered.len() as i32;
            }
        }
        self.db.write(batch)?;
        Ok(ret)
    }

    /// Returns the number of members actually removed.
    pub fn srem(&self, key: &[u8], members: &[Vec<u8>]) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let version = meta.version;
        let mut batch = WriteBatch::default();
        let mut removed = 0i64;
        for member in members {
            let member_key = base_data_key(key, version, member);
            if self.db.get_cf(self.member_cf(), &member_key)?.is_some() {
                removed += 1;
                batch.delete_cf(self.member_cf(), member_key);
            }
        }
        if removed > 0 {
            meta.modify_count(-removed);
            batch.put_cf(self.meta_cf(), key, meta.encode());
            self.db.write(batch)?;
            self.shared.update_key_statistics(key, removed as u64);
        }
        Ok(removed as i32)
    }

    /// Move `member` between two sets atomically under both keys' locks.
    pub fn smove(&self, source: &[u8], destination: &[u8], member: &[u8]) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock_multi(&[source, destination]);
        if source == destination {
            return match self.live_meta(source) {
                Ok(meta) => {
                    let held = self
                        .db
                        .get_cf(self.member_cf(), base_data_key(source, meta.version, member))?
                        .is_some();
                    Ok(i32::from(held))
                }
                Err(e) if e.is_not_found() => Ok(0),
                Err(e) => Err(e),
            };
        }

        let mut batch = WriteBatch::default();
        let mut src_meta = self.live_meta(source)?;
        let src_member_key = base_data_key(source, src_meta.version, member);
        if self.db.get_cf(self.member_cf(), &src_member_key)?.is_none() {
            return Ok(0);
        }
        src_meta.modify_count(-1);
        batch.put_cf(self.meta_cf(), source, src_meta.encode());
        batch.delete_cf(self.member_cf(), src_member_key);

        match self.get_meta(destination)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let dst_member_key = base_data_key(destination, meta.version, member);
                if self.db.get_cf(self.member_cf(), &dst_member_key)?.is_none() {
                    meta.modify_count(1);
                    batch.put_cf(self.meta_cf(), destination, meta.encode());
                    batch.put_cf(self.member_cf(), dst_member_key, b"");
                }
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = 1;
                batch.put_cf(self.meta_cf(), destination, meta.encode());
                batch.put_cf(self.member_cf(), base_data_key(destination, version, member), b"");
            }
            None => {
                let mut meta = BaseMetaValue::new(1);
                let version = meta.update_version();
                batch.put_cf(self.meta_cf(), destination, meta.encode());
                batch.put_cf(self.member_cf(), base_data_key(destination, version, member), b"");
            }
        }
        self.db.write(batch)?;
        self.shared.update_key_statistics(source, 1);
        Ok(1)
    }

    /// Pop one member at a random offset (capped at 50 to bound the
    /// seek). Heavy pop traffic on a key schedules its compaction.
    pub fn spop(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        let _l = self.shared.lock_mgr.lock(key);
        let start_us = now_micros();
        let mut meta = self.live_meta(key)?;
        let size = meta.count;
        let target = rand::thread_rng().gen_range(0..size.min(50)) as usize;
        let version = meta.version;
        let prefix = base_data_prefix(key, version);

        let mut batch = WriteBatch::default();
        let mut popped = None;
        for (index, item) in self
            .db
            .iterator_cf(
                self.member_cf(),
                IteratorMode::From(&prefix, Direction::Forward),
            )
            .enumerate()
        {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            if index == target {
                popped = Some(parse_base_data_key(&data_key)?.tail.to_vec());
                batch.delete_cf(self.member_cf(), &data_key);
                meta.modify_count(-1);
                batch.put_cf(self.meta_cf(), key, meta.encode());
                break;
            }
        }
        let member = popped.ok_or_else(StoreError::not_found)?;
        self.db.write(batch)?;

        let duration = now_micros() - start_us;
        let pops = {
            let mut counts = self.spop_counts.lock();
            let total = counts.lookup(&key.to_vec()).unwrap_or(0) + 1;
            counts.insert(key.to_vec(), total);
            total
        };
        if duration >= SPOP_COMPACT_THRESHOLD_DURATION || pops >= SPOP_COMPACT_THRESHOLD_COUNT {
            self.spop_counts.lock().remove(&key.to_vec());
            self.shared.schedule_key_compaction(key);
        }
        Ok(member)
    }

    /// Positive count: up to `min(count, size)` distinct members.
    /// Negative count: `|count|` members with repetition.
    pub fn srandmember(&self, key: &[u8], count: i32) -> StoreResult<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let meta = self.live_meta(key)?;
        let size = meta.count as i64;
        let mut rng = rand::thread_rng();
        let mut targets: Vec<i64> = Vec::new();
        if count > 0 {
            let wanted = i64::from(count).min(size) as usize;
            let mut unique = HashSet::new();
            while targets.len() < wanted {
                let pos = rng.gen_range(0..size);
                if unique.insert(pos) {
                    targets.push(pos);
                }
            }
        } else {
            let wanted = i64::from(count).unsigned_abs() as usize;
            while targets.len() < wanted {
                targets.push(rng.gen_range(0..size));
            }
        }
        targets.sort_unstable();

        let prefix = base_data_prefix(key, meta.version);
        let mut members = Vec::with_capacity(targets.len());
        let mut idx = 0usize;
        for (cur_index, item) in self
            .db
            .iterator_cf(
                self.member_cf(),
                IteratorMode::From(&prefix, Direction::Forward),
            )
            .enumerate()
        {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) || idx >= targets.len() {
                break;
            }
            let member = parse_base_data_key(&data_key)?.tail;
            while idx < targets.len() && cur_index as i64 == targets[idx] {
                idx += 1;
                members.push(member.to_vec());
            }
        }
        members.shuffle(&mut rng);
        Ok(members)
    }

    // ==================== read commands ====================

    pub fn scard(&self, key: &[u8]) -> StoreResult<i32> {
        Ok(self.live_meta(key)?.count as i32)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> StoreResult<bool> {
        let snapshot = self.db.snapshot();
        match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => {
                let meta = BaseMetaValue::decode(&raw)?;
                if meta.is_stale() || meta.count == 0 {
                    return Ok(false);
                }
                self.contains(&snapshot, key, meta.version, member)
            }
            None => Ok(false),
        }
    }

    pub fn smembers(&self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => BaseMetaValue::decode(&raw)?,
            None => return Err(StoreError::not_found()),
        };
        if meta.is_stale() || meta.count == 0 {
            return Err(StoreError::not_found());
        }
        self.members_of(&snapshot, key, meta.version)
    }

    // ==================== set algebra ====================

    /// Members of the first set not present in any of the rest.
    pub fn sdiff(&self, keys: &[Vec<u8>]) -> StoreResult<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(StoreError::Corruption("SDiff invalid parameter, no keys".to_string()));
        }
        let snapshot = self.db.snapshot();
        let rest = self.live_versions(&snapshot, &keys[1..])?;
        let Some(raw) = snapshot.get_cf(self.meta_cf(), &keys[0])? else {
            return Ok(Vec::new());
        };
        let meta = BaseMetaValue::decode(&raw)?;
        if meta.is_stale() || meta.count == 0 {
            return Ok(Vec::new());
        }
        let mut members = Vec::new();
        for member in self.members_of(&snapshot, &keys[0], meta.version)? {
            let mut found = false;
            for (key, version) in &rest {
                if self.contains(&snapshot, key, *version, &member)? {
                    found = true;
                    break;
                }
            }
            if !found {
                members.push(member);
            }
        }
        Ok(members)
    }

    pub fn sdiffstore(&self, destination: &[u8], keys: &[Vec<u8>]) -> StoreResult<i32> {
        if keys.is_empty() {
            return Err(StoreError::Corruption(
                "SDiffstore invalid parameter, no keys".to_string(),
            ));
        }
        let mut lock_keys: Vec<&[u8]> = vec![destination];
        lock_keys.extend(keys.iter().map(|k| k.as_slice()));
        let _l = self.shared.lock_mgr.lock_multi(&lock_keys);

        let members = self.sdiff(keys)?;
        let mut batch = WriteBatch::default();
        let statistic = self.store_members(&mut batch, destination, &members)?;
        self.db.write(batch)?;
        self.shared.update_key_statistics(destination, statistic);
        Ok(members.len() as i32)
    }

    /// Members common to all sets; empty if any input is missing.
    pub fn sinter(&self, keys: &[Vec<u8>]) -> StoreResult<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(StoreError::Corruption("SInter invalid parameter, no keys".to_string()));
        }
        let snapshot = self.db.snapshot();
        let rest = self.live_versions(&snapshot, &keys[1..])?;
        if rest.len() != keys.len() - 1 {
            return Ok(Vec::new());
        }
        let Some(raw) = snapshot.get_cf(self.meta_cf(), &keys[0])? else {
            return Ok(Vec::new());
        };
        let meta = BaseMetaValue::decode(&raw)?;
        if meta.is_stale() || meta.count == 0 {
            return Ok(Vec::new());
        }
        let mut members = Vec::new();
        for member in self.members_of(&snapshot, &keys[0], meta.version)? {
            let mut in_all = true;
            for (key, version) in &rest {
                if !self.contains(&snapshot, key, *version, &member)? {
                    in_all = false;
                    break;
                }
            }
            if in_all {
                members.push(member);
            }
        }
        Ok(members)
    }

    pub fn sinterstore(&self, destination: &[u8], keys: &[Vec<u8>]) -> StoreResult<i32> {
        if keys.is_empty() {
            return Err(StoreError::Corruption(
                "SInterstore invalid parameter, no keys".to_string(),
            ));
        }
        let mut lock_keys: Vec<&[u8]> = vec![destination];
        lock_keys.extend(keys.iter().map(|k| k.as_slice()));
        let _l = self.shared.lock_mgr.lock_multi(&lock_keys);

        let members = self.sinter(keys)?;
        let mut batch = WriteBatch::default();
        let statistic = self.store_members(&mut batch, destination, &members)?;
        self.db.write(batch)?;
        self.shared.update_key_statistics(destination, statistic);
        Ok(members.len() as i32)
    }

    /// Members present in any set, first-seen order.
    pub fn sunion(&self, keys: &[Vec<u8>]) -> StoreResult<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(StoreError::Corruption("SUnion invalid parameter, no keys".to_string()));
        }
        let snapshot = self.db.snapshot();
        let sets = self.live_versions(&snapshot, keys)?;
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for (key, version) in &sets {
            for member in self.members_of(&snapshot, key, *version)? {
                if seen.insert(member.clone()) {
                    members.push(member);
                }
            }
        }
        Ok(members)
    }

    pub fn sunionstore(&self, destination: &[u8], keys: &[Vec<u8>]) -> StoreResult<i32> {
        if keys.is_empty() {
            return Err(StoreError::Corruption(
                "SUnionstore invalid parameter, no keys".to_string(),
            ));
        }
        let mut lock_keys: Vec<&[u8]> = vec![destination];
        lock_keys.extend(keys.iter().map(|k| k.as_slice()));
        let _l = self.shared.lock_mgr.lock_multi(&lock_keys);

        let members = self.sunion(keys)?;
        let mut batch = WriteBatch::default();
        let statistic = self.store_members(&mut batch, destination, &members)?;
        self.db.write(batch)?;
        self.shared.update_key_statistics(destination, statistic);
        Ok(members.len() as i32)
    }

    // ==================== member scan ====================

    pub fn sscan(
        &self,
        key: &[u8],
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> StoreResult<(Vec<Vec<u8>>, i64)> {
        if cursor < 0 {
            return Ok((Vec::new(), 0));
        }
        let count = count.max(1);
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => BaseMetaValue::decode(&raw)?,
            None => return Err(StoreError::not_found()),
        };
        if meta.is_stale() || meta.count == 0 {
            return Err(StoreError::not_found());
        }
        let version = meta.version;
        let sub_member: &[u8] = if is_tail_wildcard(pattern) {
            &pattern[..pattern.len() - 1]
        } else {
            &[]
        };
        let mut cursor = cursor;
        let start_member = match self.shared.get_scan_start_point(key, pattern, cursor) {
            Some(point) => point,
            None => {
                cursor = 0;
                sub_member.to_vec()
            }
        };

        let prefix = base_data_key(key, version, sub_member);
        let seek = base_data_key(key, version, &start_member);
        let mut members = Vec::new();
        let mut rest = count;
        let mut next_cursor = 0;
        for item in snapshot.iterator_cf(
            self.member_cf(),
            IteratorMode::From(&seek, Direction::Forward),
        ) {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            if rest <= 0 {
                next_cursor = cursor + count;
                let parsed = parse_base_data_key(&data_key)?;
                self.shared
                    .store_scan_next_point(key, pattern, next_cursor, parsed.tail.to_vec());
                break;
            }
            let parsed = parse_base_data_key(&data_key)?;
            if string_match(pattern, parsed.tail) {
                members.push(parsed.tail.to_vec());
            }
            rest -= 1;
        }
        Ok((members, next_cursor))
    }

    // ==================== keyspace commands ====================

    pub fn del(&self, key: &[u8]) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let statistic = u64::from(meta.count);
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

    pub fn scan_meta_keys(
        &self,
        start_key: &[u8],
        pattern: &[u8],
        budget: i64,
    ) -> StoreResult<ScanOutcome> {
        base_meta::scan_meta_keys(&self.db, self.meta_cf(), start_key, pattern, budget)
    }

    pub fn scan_keys(&self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        base_meta::scan_keys(&self.db, self.meta_cf(), pattern)
    }

    pub fn pk_scan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
        base_meta::pk_scan_range(&self.db, self.meta_cf(), key_start, key_end, pattern, limit)
    }

    pub fn pk_rscan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
        base_meta::pk_rscan_range(&self.db, self.meta_cf(), key_start, key_end, pattern, limit)
    }

    pub fn pk_pattern_match_del(&self, pattern: &[u8]) -> StoreResult<i32> {
        base_meta::pk_pattern_match_del(&self.db, self.meta_cf(), pattern)
    }

    pub fn scan_key_num(&self, stop: &AtomicBool) -> StoreResult<KeyInfo> {
        base_meta::scan_key_num(&self.db, self.meta_cf(), stop)
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
            self.db.compact_range_cf(self.member_cf(), begin, end);
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
            .property_int_value_cf(self.member_cf(), property)?
            .unwrap_or(0);
        Ok(meta + data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn create_temp_db() -> (SetsDb, std::path::PathBuf) {
        let path = std::path::PathBuf::from(format!("/tmp/redstore_sets_{}", rand::random::<u64>()));
        let db = SetsDb::open(
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
    fn test_sadd_scard_smembers() {
        let (db, path) = create_temp_db();
        assert_eq!(db.sadd(b"k", &vecs(&["a", "b", "c"])).unwrap(), 3);
        assert_eq!(db.sadd(b"k", &vecs(&["b", "d"])).unwrap(), 1);
        assert_eq!(db.scard(b"k").unwrap(), 4);
        assert_eq!(db.smembers(b"k").unwrap(), vecs(&["a", "b", "c", "d"]));
        // duplicated input is deduplicated before writing
        assert_eq!(db.sadd(b"k2", &vecs(&["x", "x", "x"])).unwrap(), 1);
        cleanup(&path);
    }

    #[test]
    fn test_sismember_srem() {
        let (db, path) = create_temp_db();
        db.sadd(b"k", &vecs(&["a", "b"])).unwrap();
        assert!(db.sismember(b"k", b"a").unwrap());
        assert!(!db.sismember(b"k", b"z").unwrap());
        assert!(!db.sismember(b"missing", b"a").unwrap());
        assert_eq!(db.srem(b"k", &vecs(&["a", "z"])).unwrap(), 1);
        assert_eq!(db.scard(b"k").unwrap(), 1);
        assert!(db.srem(b"missing", &vecs(&["a"])).unwrap_err().is_not_found());
        cleanup(&path);
    }

    #[test]
    fn test_set_algebra() {
        let (db, path) = create_temp_db();
        db.sadd(b"a", &vecs(&["1", "2", "3", "4"])).unwrap();
        db.sadd(b"b", &vecs(&["3", "4", "5"])).unwrap();
        db.sadd(b"c", &vecs(&["4", "6"])).unwrap();

        assert_eq!(
            db.sdiff(&vecs(&["a", "b", "c"])).unwrap(),
            vecs(&["1", "2"])
        );
        assert_eq!(db.sinter(&vecs(&["a", "b", "c"])).unwrap(), vecs(&["4"]));
        assert_eq!(
            db.sunion(&vecs(&["a", "b", "c"])).unwrap(),
            vecs(&["1", "2", "3", "4", "5", "6"])
        );
        // intersection with a missing set is empty
        assert!(db.sinter(&vecs(&["a", "nope"])).unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_store_variants_overwrite_destination() {
        let (db, path) = create_temp_db();
        db.sadd(b"a", &vecs(&["1", "2", "3"])).unwrap();
        db.sadd(b"b", &vecs(&["2"])).unwrap();
        db.sadd(b"dest", &vecs(&["old1", "old2"])).unwrap();

        assert_eq!(db.sdiffstore(b"dest", &vecs(&["a", "b"])).unwrap(), 2);
        assert_eq!(db.smembers(b"dest").unwrap(), vecs(&["1", "3"]));

        assert_eq!(db.sinterstore(b"dest", &vecs(&["a", "b"])).unwrap(), 1);
        assert_eq!(db.smembers(b"dest").unwrap(), vecs(&["2"]));

        assert_eq!(db.sunionstore(b"dest", &vecs(&["a", "b"])).unwrap(), 3);
        assert_eq!(db.smembers(b"dest").unwrap(), vecs(&["1", "2", "3"]));
        cleanup(&path);
    }

    #[test]
    fn test_smove() {
        let (db, path) = create_temp_db();
        db.sadd(b"src", &vecs(&["m", "n"])).unwrap();
        db.sadd(b"dst", &vecs(&["x"])).unwrap();
        assert_eq!(db.smove(b"src", b"dst", b"m").unwrap(), 1);
        assert_eq!(db.smembers(b"src").unwrap(), vecs(&["n"]));
        assert_eq!(db.smembers(b"dst").unwrap(), vecs(&["m", "x"]));
        assert_eq!(db.smove(b"src", b"dst", b"absent").unwrap(), 0);
        cleanup(&path);
    }

    #[test]
    fn test_spop_and_srandmember() {
        let (db, path) = create_temp_db();
        db.sadd(b"k", &vecs(&["a", "b", "c", "d", "e"])).unwrap();
        let popped = db.spop(b"k").unwrap();
        assert!(vecs(&["a", "b", "c", "d", "e"]).contains(&popped));
        assert_eq!(db.scard(b"k").unwrap(), 4);
        assert!(!db.sismember(b"k", &popped).unwrap());

        let distinct = db.srandmember(b"k", 10).unwrap();
        assert_eq!(distinct.len(), 4);
        let with_repeats = db.srandmember(b"k", -10).unwrap();
        assert_eq!(with_repeats.len(), 10);
        assert!(db.srandmember(b"k", 0).unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_sscan_pages() {
        let (db, path) = create_temp_db();
        let members: Vec<Vec<u8>> = (0..9).map(|i| format!("m{:02}", i).into_bytes()).collect();
        db.sadd(b"k", &members).unwrap();
        let (page1, cursor) = db.sscan(b"k", 0, b"*", 4).unwrap();
        assert_eq!(page1.len(), 4);
        assert!(cursor > 0);
        let (page2, cursor2) = db.sscan(b"k", cursor, b"*", 4).unwrap();
        assert_eq!(page2.len(), 4);
        let (page3, cursor3) = db.sscan(b"k", cursor2, b"*", 4).unwrap();
        assert_eq!(page3.len(), 1);
        assert_eq!(cursor3, 0);
        cleanup(&path);
    }

    #[test]
    fn test_del_tombstones() {
        let (db, path) = create_temp_db();
        db.sadd(b"k", &vecs(&["a"])).unwrap();
        db.del(b"k").unwrap();
        assert!(db.scard(b"k").unwrap_err().is_not_found());
        assert!(db.smembers(b"k").unwrap_err().is_not_found());
        // re-adding resurrects under a fresh version
        assert_eq!(db.sadd(b"k", &vecs(&["z"])).unwrap(), 1);
        assert_eq!(db.smembers(b"k").unwrap(), vecs(&["z"]));
        cleanup(&path);
    }
}
