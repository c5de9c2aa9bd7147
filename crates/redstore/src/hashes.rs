//! Hashes engine: a 12-byte meta per key plus one field-index record per
//! field under `data_cf`. Every read pins (key, current version) so
//! records from older versions are invisible; every mutation rewrites
//! the meta and the touched fields in one batch.

use crate::base_meta;
use crate::bgtask::BgTaskQueue;
use crate::codec::{base_data_key, base_data_prefix, parse_base_data_key, BaseMetaValue};
use crate::engine::{cf_options, open_engine_db, ColumnFamilyType, EngineShared};
use crate::error::{StoreError, StoreResult};
use crate::filters::{DataFilterFactory, DbHandle, MetaFilterFactory, MetaLayout};
use crate::options::StoreOptions;
use crate::scan::ScanOutcome;
use crate::types::{DataType, FieldValue, KeyInfo};
use crate::util::{
    checked_incr, format_f64, is_tail_wildcard, now_seconds, parse_f64_strict, parse_i64_strict,
    prefix_successor, string_match,
};
use rocksdb::{ColumnFamily, Direction, IteratorMode, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct HashesDb {
    db: Arc<DB>,
    shared: EngineShared,
}

impl HashesDb {
    pub fn open(
        store_opts: &StoreOptions,
        shared_cache: Option<&rocksdb::Cache>,
        path: &Path,
        bg: Arc<BgTaskQueue>,
    ) -> StoreResult<Self> {
        let db_handle = DbHandle::new();
        let mut meta_opts = cf_options(store_opts);
        meta_opts.set_compaction_filter_factory(MetaFilterFactory::new("hashes", MetaLayout::Base));
        let mut data_opts = cf_options(store_opts);
        data_opts.set_compaction_filter_factory(DataFilterFactory::new(
            "hashes",
            MetaLayout::Base,
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
            shared: EngineShared::new(DataType::Hashes, store_opts, bg),
        })
    }

    fn meta_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("default").expect("default cf")
    }

    fn data_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("data_cf").expect("data cf")
    }

    fn get_meta(&self, key: &[u8]) -> StoreResult<Option<BaseMetaValue>> {
        match self.db.get_cf(self.meta_cf(), key)? {
            Some(raw) => Ok(Some(BaseMetaValue::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Meta with live fields, or NotFound.
    fn live_meta(&self, key: &[u8]) -> StoreResult<BaseMetaValue> {
        match self.get_meta(key)? {
            Some(meta) if meta.is_stale() => Err(StoreError::NotFound("stale".to_string())),
            Some(meta) if meta.count == 0 => Err(StoreError::not_found()),
            Some(meta) => Ok(meta),
            None => Err(StoreError::not_found()),
        }
    }

    // ==================== write commands ====================

    /// Returns 1 iff the field did not exist before.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut statistic = 0u64;
        let ret;
        match self.get_meta(key)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let version = meta.version;
                let data_key = base_data_key(key, version, field);
                match self.db.get_cf(self.data_cf(), &data_key)? {
                    Some(old) => {
                        ret = 0;
                        if old == value {
                            return Ok(0);
                        }
                        statistic = 1;
                        batch.put_cf(self.data_cf(), data_key, value);
                    }
                    None => {
                        ret = 1;
                        meta.modify_count(1);
                        batch.put_cf(self.meta_cf(), key, meta.encode());
                        batch.put_cf(self.data_cf(), data_key, value);
                    }
                }
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = 1;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(self.data_cf(), base_data_key(key, version, field), value);
                ret = 1;
            }
            None => {
                let mut meta = BaseMetaValue::new(1);
                let version = meta.update_version();
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(self.data_cf(), base_data_key(key, version, field), value);
                ret = 1;
            }
        }
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, statistic);
        Ok(ret)
    }

    pub fn hsetnx(&self, key: &[u8], field: &[u8], value: &[u8]) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        match self.get_meta(key)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let data_key = base_data_key(key, meta.version, field);
                if self.db.get_cf(self.data_cf(), &data_key)?.is_some() {
                    return Ok(0);
                }
                meta.modify_count(1);
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(self.data_cf(), data_key, value);
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = 1;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(self.data_cf(), base_data_key(key, version, field), value);
            }
            None => {
                let mut meta = BaseMetaValue::new(1);
                let version = meta.update_version();
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(self.data_cf(), base_data_key(key, version, field), value);
            }
        }
        self.db.write(batch)?;
        Ok(1)
    }

    pub fn hmset(&self, key: &[u8], fvs: &[FieldValue]) -> StoreResult<()> {
        // last write wins among duplicate fields
        let mut filtered: Vec<FieldValue> = Vec::with_capacity(fvs.len());
        for fv in fvs.iter().rev() {
            if !filtered.iter().any(|f| f.field == fv.field) {
                filtered.push(fv.clone());
            }
        }
        filtered.reverse();

        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut statistic = 0u64;
        match self.get_meta(key)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let version = meta.version;
                let mut added = 0i64;
                for fv in &filtered {
                    let data_key = base_data_key(key, version, &fv.field);
                    if self.db.get_cf(self.data_cf(), &data_key)?.is_some() {
                        statistic += 1;
                    } else {
                        added += 1;
                    }
                    batch.put_cf(self.data_cf(), data_key, &fv.value);
                }
                if added > 0 {
                    meta.modify_count(added);
                    batch.put_cf(self.meta_cf(), key, meta.encode());
                }
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = filtered.len() as u32;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                for fv in &filtered {
                    batch.put_cf(self.data_cf(), base_data_key(key, version, &fv.field), &fv.value);
                }
            }
            None => {
                let mut meta = BaseMetaValue::new(filtered.len() as u32);
                let version = meta.update_version();
                batch.put_cf(self.meta_cf(), key, meta.encode());
                for fv in &filtered {
                    batch.put_cf(self.data_cf(), base_data_key(key, version, &fv.field), &fv.value);
                }
            }
        }
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, statistic);
        Ok(())
    }

    /// Returns the number of fields actually removed.
    pub fn hdel(&self, key: &[u8], fields: &[Vec<u8>]) -> StoreResult<i32> {
        let mut filtered: Vec<&Vec<u8>> = Vec::with_capacity(fields.len());
        for field in fields {
            if !filtered.contains(&field) {
                filtered.push(field);
            }
        }

        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut meta = match self.get_meta(key)? {
            Some(meta) if !meta.is_stale() && meta.count != 0 => meta,
            _ => return Ok(0),
        };
        let version = meta.version;
        let mut removed = 0i64;
        for field in &filtered {
            let data_key = base_data_key(key, version, field);
            if self.db.get_cf(self.data_cf(), &data_key)?.is_some() {
                removed += 1;
                batch.delete_cf(self.data_cf(), data_key);
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

    pub fn hincrby(&self, key: &[u8], field: &[u8], by: i64) -> StoreResult<i64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut statistic = 0u64;
        let new_value;
        match self.get_meta(key)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let version = meta.version;
                let data_key = base_data_key(key, version, field);
                match self.db.get_cf(self.data_cf(), &data_key)? {
                    Some(raw) => {
                        let old = parse_i64_strict(&raw).ok_or_else(|| {
                            StoreError::Corruption("hash value is not an integer".to_string())
                        })?;
                        new_value = checked_incr(old, by)?;
                        statistic = 1;
                        batch.put_cf(self.data_cf(), data_key, new_value.to_string().as_bytes());
                    }
                    None => {
                        new_value = by;
                        meta.modify_count(1);
                        batch.put_cf(self.meta_cf(), key, meta.encode());
                        batch.put_cf(self.data_cf(), data_key, new_value.to_string().as_bytes());
                    }
                }
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = 1;
                new_value = by;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(
                    self.data_cf(),
                    base_data_key(key, version, field),
                    new_value.to_string().as_bytes(),
                );
            }
            None => {
                let mut meta = BaseMetaValue::new(1);
                let version = meta.update_version();
                new_value = by;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(
                    self.data_cf(),
                    base_data_key(key, version, field),
                    new_value.to_string().as_bytes(),
                );
            }
        }
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, statistic);
        Ok(new_value)
    }

    pub fn hincrbyfloat(&self, key: &[u8], field: &[u8], by: &[u8]) -> StoreResult<String> {
        let by = parse_f64_strict(by)
            .ok_or_else(|| StoreError::Corruption("hash value is not a float".to_string()))?;
        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut statistic = 0u64;
        let mut old = 0.0;
        let (mut meta, version, existed) = match self.get_meta(key)? {
            Some(meta) if !meta.is_stale() && meta.count != 0 => {
                let data_key = base_data_key(key, meta.version, field);
                let existed = match self.db.get_cf(self.data_cf(), &data_key)? {
                    Some(raw) => {
                        old = parse_f64_strict(&raw).ok_or_else(|| {
                            StoreError::Corruption("hash value is not a float".to_string())
                        })?;
                        true
                    }
                    None => false,
                };
                let version = meta.version;
                (meta, version, existed)
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                (meta, version, false)
            }
            None => {
                let mut meta = BaseMetaValue::new(0);
                let version = meta.update_version();
                (meta, version, false)
            }
        };
        let sum = old + by;
        if sum.is_nan() || sum.is_infinite() {
            return Err(StoreError::InvalidArgument(
                "increment would produce NaN or Infinity".to_string(),
            ));
        }
        let formatted = format_f64(sum);
        if existed {
            statistic = 1;
        } else {
            meta.modify_count(1);
        }
        batch.put_cf(self.meta_cf(), key, meta.encode());
        batch.put_cf(
            self.data_cf(),
            base_data_key(key, version, field),
            formatted.as_bytes(),
        );
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, statistic);
        Ok(formatted)
    }

    // ==================== read commands ====================

    pub fn hget(&self, key: &[u8], field: &[u8]) -> StoreResult<Vec<u8>> {
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => BaseMetaValue::decode(&raw)?,
            None => return Err(StoreError::not_found()),
        };
        if meta.is_stale() || meta.count == 0 {
            return Err(StoreError::not_found());
        }
        match snapshot.get_cf(self.data_cf(), base_data_key(key, meta.version, field))? {
            Some(value) => Ok(value),
            None => Err(StoreError::not_found()),
        }
    }

    pub fn hmget(&self, key: &[u8], fields: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => {
                let meta = BaseMetaValue::decode(&raw)?;
                if meta.is_stale() || meta.count == 0 {
                    None
                } else {
                    Some(meta)
                }
            }
            None => None,
        };
        let Some(meta) = meta else {
            return Ok(vec![None; fields.len()]);
        };
        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            out.push(snapshot.get_cf(self.data_cf(), base_data_key(key, meta.version, field))?);
        }
        Ok(out)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        match self.hget(key, field) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn hgetall(&self, key: &[u8]) -> StoreResult<Vec<FieldValue>> {
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => BaseMetaValue::decode(&raw)?,
            None => return Err(StoreError::not_found()),
        };
        if meta.is_stale() || meta.count == 0 {
            return Err(StoreError::not_found());
        }
        let prefix = base_data_prefix(key, meta.version);
        let mut fvs = Vec::new();
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let parsed = parse_base_data_key(&data_key)?;
            fvs.push(FieldValue {
                field: parsed.tail.to_vec(),
                value: value.to_vec(),
            });
        }
        Ok(fvs)
    }

    pub fn hkeys(&self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|fv| fv.field).collect())
    }

    pub fn hvals(&self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|fv| fv.value).collect())
    }

    pub fn hlen(&self, key: &[u8]) -> StoreResult<i32> {
        Ok(self.live_meta(key)?.count as i32)
    }

    pub fn hstrlen(&self, key: &[u8], field: &[u8]) -> StoreResult<i32> {
        Ok(self.hget(key, field)?.len() as i32)
    }

    // ==================== field scans ====================

    /// Cursor-based field scan; the cursor resolves through the engine's
    /// scan-point LRU and restarts from the pattern prefix on a miss.
    pub fn hscan(
        &self,
        key: &[u8],
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> StoreResult<(Vec<FieldValue>, i64)> {
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
        let sub_field: &[u8] = if is_tail_wildcard(pattern) {
            &pattern[..pattern.len() - 1]
        } else {
            &[]
        };
        let mut cursor = cursor;
        let start_field = match self.shared.get_scan_start_point(key, pattern, cursor) {
            Some(point) => point,
            None => {
                cursor = 0;
                sub_field.to_vec()
            }
        };

        let prefix = base_data_key(key, version, sub_field);
        let seek = base_data_key(key, version, &start_field);
        let mut fvs = Vec::new();
        let mut rest = count;
        let mut next_cursor = 0;
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&seek, Direction::Forward),
        ) {
            let (data_key, value) = item?;
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
                fvs.push(FieldValue {
                    field: parsed.tail.to_vec(),
                    value: value.to_vec(),
                });
            }
            rest -= 1;
        }
        Ok((fvs, next_cursor))
    }

    /// Stateless field scan from an explicit start field; returns the
    /// field to resume from (empty when done).
    pub fn hscanx(
        &self,
        key: &[u8],
        start_field: &[u8],
        pattern: &[u8],
        count: i64,
    ) -> StoreResult<(Vec<FieldValue>, Vec<u8>)> {
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => BaseMetaValue::decode(&raw)?,
            None => return Err(StoreError::not_found()),
        };
        if meta.is_stale() || meta.count == 0 {
            return Err(StoreError::not_found());
        }
        let prefix = base_data_prefix(key, meta.version);
        let seek = base_data_key(key, meta.version, start_field);
        let mut fvs = Vec::new();
        let mut next_field = Vec::new();
        let mut rest = count.max(1);
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&seek, Direction::Forward),
        ) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let parsed = parse_base_data_key(&data_key)?;
            if rest <= 0 {
                next_field = parsed.tail.to_vec();
                break;
            }
            if string_match(pattern, parsed.tail) {
                fvs.push(FieldValue {
                    field: parsed.tail.to_vec(),
                    value: value.to_vec(),
                });
            }
            rest -= 1;
        }
        Ok((fvs, next_field))
    }

    /// Bounded field-range scan `[field_start, field_end]`.
    pub fn pkh_scan_range(
        &self,
        key: &[u8],
        field_start: &[u8],
        field_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<FieldValue>, Vec<u8>)> {
        let start_no_limit = field_start.is_empty();
        let end_no_limit = field_end.is_empty();
        if !start_no_limit && !end_no_limit && field_start > field_end {
            return Err(StoreError::InvalidArgument("error in given range".to_string()));
        }
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => BaseMetaValue::decode(&raw)?,
            None => return Err(StoreError::not_found()),
        };
        if meta.is_stale() || meta.count == 0 {
            return Err(StoreError::not_found());
        }
        let prefix = base_data_prefix(key, meta.version);
        let seek = base_data_key(key, meta.version, field_start);
        let mut fvs = Vec::new();
        let mut next_field = Vec::new();
        let mut remain = limit;
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&seek, Direction::Forward),
        ) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let parsed = parse_base_data_key(&data_key)?;
            if !end_no_limit && parsed.tail > field_end {
                break;
            }
            if remain <= 0 {
                next_field = parsed.tail.to_vec();
                break;
            }
            if string_match(pattern, parsed.tail) {
                fvs.push(FieldValue {
                    field: parsed.tail.to_vec(),
                    value: value.to_vec(),
                });
            }
            remain -= 1;
        }
        Ok((fvs, next_field))
    }

    /// Reverse bounded field-range scan `[field_start, field_end]` with
    /// `field_start >= field_end`.
    pub fn pkh_rscan_range(
        &self,
        key: &[u8],
        field_start: &[u8],
        field_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<FieldValue>, Vec<u8>)> {
        let start_no_limit = field_start.is_empty();
        let end_no_limit = field_end.is_empty();
        if !start_no_limit && !end_no_limit && field_start < field_end {
            return Err(StoreError::InvalidArgument("error in given range".to_string()));
        }
        let snapshot = self.db.snapshot();
        let meta = match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => BaseMetaValue::decode(&raw)?,
            None => return Err(StoreError::not_found()),
        };
        if meta.is_stale() || meta.count == 0 {
            return Err(StoreError::not_found());
        }
        let prefix = base_data_prefix(key, meta.version);
        // position just past the last field of this version
        let seek = if start_no_limit {
            prefix_successor(&prefix)
        } else {
            Some(base_data_key(key, meta.version, field_start))
        };
        let mode = match &seek {
            Some(seek) => IteratorMode::From(seek, Direction::Reverse),
            None => IteratorMode::End,
        };
        let mut fvs = Vec::new();
        let mut next_field = Vec::new();
        let mut remain = limit;
        for item in snapshot.iterator_cf(self.data_cf(), mode) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                // the reverse seek can land past the prefix region
                if data_key.as_ref() > prefix.as_slice() {
                    continue;
                }
                break;
            }
            let parsed = parse_base_data_key(&data_key)?;
            if !end_no_limit && parsed.tail < field_end {
                break;
            }
            if remain <= 0 {
                next_field = parsed.tail.to_vec();
                break;
            }
            if string_match(pattern, parsed.tail) {
                fvs.push(FieldValue {
                    field: parsed.tail.to_vec(),
                    value: value.to_vec(),
                });
            }
            remain -= 1;
        }
        Ok((fvs, next_field))
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

    fn create_temp_db() -> (HashesDb, std::path::PathBuf) {
        let path = std::path::PathBuf::from(format!("/tmp/redstore_hashes_{}", rand::random::<u64>()));
        let db = HashesDb::open(
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

    #[test]
    fn test_hset_hget_hdel() {
        let (db, path) = create_temp_db();
        assert_eq!(db.hset(b"h", b"f1", b"v1").unwrap(), 1);
        assert_eq!(db.hset(b"h", b"f2", b"v2").unwrap(), 1);
        assert_eq!(db.hset(b"h", b"f1", b"v1").unwrap(), 0);
        assert_eq!(db.hget(b"h", b"f1").unwrap(), b"v1");
        assert_eq!(db.hlen(b"h").unwrap(), 2);

        let got = db
            .hmget(b"h", &[b"f1".to_vec(), b"f3".to_vec(), b"f2".to_vec()])
            .unwrap();
        assert_eq!(got, vec![Some(b"v1".to_vec()), None, Some(b"v2".to_vec())]);

        assert_eq!(db.hdel(b"h", &[b"f1".to_vec(), b"f3".to_vec()]).unwrap(), 1);
        assert_eq!(db.hlen(b"h").unwrap(), 1);
        cleanup(&path);
    }

    #[test]
    fn test_hsetnx_and_hexists() {
        let (db, path) = create_temp_db();
        assert_eq!(db.hsetnx(b"h", b"f", b"v").unwrap(), 1);
        assert_eq!(db.hsetnx(b"h", b"f", b"other").unwrap(), 0);
        assert!(db.hexists(b"h", b"f").unwrap());
        assert!(!db.hexists(b"h", b"nope").unwrap());
        assert!(!db.hexists(b"missing", b"f").unwrap());
        cleanup(&path);
    }

    #[test]
    fn test_hmset_and_hgetall_sorted_by_field() {
        let (db, path) = create_temp_db();
        db.hmset(
            b"h",
            &[
                FieldValue { field: b"b".to_vec(), value: b"2".to_vec() },
                FieldValue { field: b"a".to_vec(), value: b"1".to_vec() },
                FieldValue { field: b"b".to_vec(), value: b"3".to_vec() },
            ],
        )
        .unwrap();
        let all = db.hgetall(b"h").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].field, b"a");
        assert_eq!(all[1].field, b"b");
        // last duplicate wins
        assert_eq!(all[1].value, b"3");
        assert_eq!(db.hkeys(b"h").unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(db.hvals(b"h").unwrap(), vec![b"1".to_vec(), b"3".to_vec()]);
        cleanup(&path);
    }

    #[test]
    fn test_hincrby() {
        let (db, path) = create_temp_db();
        assert_eq!(db.hincrby(b"h", b"n", 5).unwrap(), 5);
        assert_eq!(db.hincrby(b"h", b"n", -2).unwrap(), 3);
        db.hset(b"h", b"s", b"abc").unwrap();
        assert!(matches!(
            db.hincrby(b"h", b"s", 1).unwrap_err(),
            StoreError::Corruption(_)
        ));
        cleanup(&path);
    }

    #[test]
    fn test_hincrbyfloat() {
        let (db, path) = create_temp_db();
        assert_eq!(db.hincrbyfloat(b"h", b"f", b"10.5").unwrap(), "10.5");
        assert_eq!(db.hincrbyfloat(b"h", b"f", b"0.5").unwrap(), "11");
        cleanup(&path);
    }

    #[test]
    fn test_del_hides_then_recreate() {
        let (db, path) = create_temp_db();
        db.hset(b"h", b"f", b"v").unwrap();
        db.del(b"h").unwrap();
        assert!(db.hget(b"h", b"f").unwrap_err().is_not_found());
        assert!(db.hgetall(b"h").unwrap_err().is_not_found());
        // recreate under a newer version: old record invisible
        assert_eq!(db.hset(b"h", b"g", b"w").unwrap(), 1);
        assert_eq!(db.hlen(b"h").unwrap(), 1);
        assert!(db.hget(b"h", b"f").unwrap_err().is_not_found());
        cleanup(&path);
    }

    #[test]
    fn test_hscan_pages_through() {
        let (db, path) = create_temp_db();
        for i in 0..10 {
            db.hset(b"h", format!("f{:02}", i).as_bytes(), b"v").unwrap();
        }
        let (fvs, cursor) = db.hscan(b"h", 0, b"*", 4).unwrap();
        assert_eq!(fvs.len(), 4);
        assert!(cursor > 0);
        let (fvs2, cursor2) = db.hscan(b"h", cursor, b"*", 4).unwrap();
        assert_eq!(fvs2.len(), 4);
        let (fvs3, cursor3) = db.hscan(b"h", cursor2, b"*", 4).unwrap();
        assert_eq!(fvs3.len(), 2);
        assert_eq!(cursor3, 0);
        cleanup(&path);
    }

    #[test]
    fn test_hscanx_and_range_scans() {
        let (db, path) = create_temp_db();
        for f in [b"apple", b"apric", b"peach"] {
            db.hset(b"h", f, b"v").unwrap();
        }
        let (fvs, next) = db.hscanx(b"h", b"", b"ap*", 2).unwrap();
        assert_eq!(fvs.len(), 2);
        assert_eq!(next, b"peach");

        let (fvs, next) = db.pkh_scan_range(b"h", b"apple", b"peach", b"*", 10).unwrap();
        assert_eq!(fvs.len(), 3);
        assert!(next.is_empty());

        let (fvs, _next) = db.pkh_rscan_range(b"h", b"peach", b"apple", b"*", 2).unwrap();
        assert_eq!(fvs.len(), 2);
        assert_eq!(fvs[0].field, b"peach");
        cleanup(&path);
    }

    #[test]
    fn test_expire_ttl_persist() {
        let (db, path) = create_temp_db();
        db.hset(b"h", b"f", b"v").unwrap();
        assert_eq!(db.ttl(b"h").unwrap(), -1);
        db.expire(b"h", 50).unwrap();
        let t = db.ttl(b"h").unwrap();
        assert!(t > 0 && t <= 50);
        db.persist(b"h").unwrap();
        assert_eq!(db.ttl(b"h").unwrap(), -1);
        assert!(db.persist(b"h").unwrap_err().is_not_found());
        cleanup(&path);
    }
}
