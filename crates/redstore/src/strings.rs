//! Strings engine: flat values with inline TTL, bit operations and the
//! numeric INCR family. Single column family; the value itself is the
//! meta record (`value | version | timestamp`), so there is nothing to
//! reclaim beyond expired values.

use crate::codec::StringsValue;
use crate::engine::{open_engine_db, cf_options, ColumnFamilyType, EngineShared};
use crate::error::{StoreError, StoreResult};
use crate::filters::StringsFilterFactory;
use crate::options::StoreOptions;
use crate::types::{BitOp, DataType, KeyInfo, KeyValue};
use crate::util::{
    checked_incr, format_f64, is_tail_wildcard, now_seconds, parse_f64_strict, parse_i64_strict,
    string_match,
};
use crate::bgtask::BgTaskQueue;
use crate::scan::ScanOutcome;
use rocksdb::{ColumnFamily, Direction, IteratorMode, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

const BATCH_DELETE_LIMIT: usize = 1000;
/// SETBIT/SETRANGE may not grow a value past 512 MB.
const STRING_MAX_LENGTH: u64 = 512 * 1024 * 1024;

pub struct StringsDb {
    db: Arc<DB>,
    shared: EngineShared,
}

impl StringsDb {
    pub fn open(
        store_opts: &StoreOptions,
        shared_cache: Option<&rocksdb::Cache>,
        path: &Path,
        bg: Arc<BgTaskQueue>,
    ) -> StoreResult<Self> {
        let mut default_opts = cf_options(store_opts);
        default_opts.set_compaction_filter_factory(StringsFilterFactory::new());
        let db = open_engine_db(store_opts, shared_cache, path, vec![("default", default_opts)])?;
        Ok(Self {
            db,
            shared: EngineShared::new(DataType::Strings, store_opts, bg),
        })
    }

    fn cf(&self) -> &ColumnFamily {
        self.db.cf_handle("default").expect("default cf")
    }

    /// Current live value; stale or missing keys are NotFound.
    fn read_live(&self, key: &[u8]) -> StoreResult<StringsValue> {
        match self.db.get_cf(self.cf(), key)? {
            Some(raw) => {
                let value = StringsValue::decode(&raw)?;
                if value.is_stale() {
                    Err(StoreError::NotFound("stale".to_string()))
                } else {
                    Ok(value)
                }
            }
            None => Err(StoreError::not_found()),
        }
    }

    /// Live value or a fresh empty slot (missing and stale collapse).
    fn read_or_empty(&self, key: &[u8]) -> StoreResult<StringsValue> {
        match self.read_live(key) {
            Ok(v) => Ok(v),
            Err(e) if e.is_not_found() => Ok(StringsValue::new(Vec::new())),
            Err(e) => Err(e),
        }
    }

    // ==================== write commands ====================

    pub fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let strings_value = StringsValue::new(value.to_vec());
        self.db.put_cf(self.cf(), key, strings_value.encode())?;
        Ok(())
    }

    /// Set only if the key already holds a live value. Returns 1 on write.
    pub fn setxx(&self, key: &[u8], value: &[u8], ttl: i64) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        match self.read_live(key) {
            Ok(_) => {
                let mut strings_value = StringsValue::new(value.to_vec());
                if ttl > 0 {
                    strings_value.set_relative_timestamp(ttl);
                }
                self.db.put_cf(self.cf(), key, strings_value.encode())?;
                Ok(1)
            }
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn setnx(&self, key: &[u8], value: &[u8], ttl: i64) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        match self.read_live(key) {
            Ok(_) => Ok(0),
            Err(e) if e.is_not_found() => {
                let mut strings_value = StringsValue::new(value.to_vec());
                if ttl > 0 {
                    strings_value.set_relative_timestamp(ttl);
                }
                self.db.put_cf(self.cf(), key, strings_value.encode())?;
                Ok(1)
            }
            Err(e) => Err(e),
        }
    }

    pub fn setex(&self, key: &[u8], value: &[u8], ttl: i64) -> StoreResult<()> {
        if ttl <= 0 {
            return Err(StoreError::InvalidArgument("invalid expire time".to_string()));
        }
        let _l = self.shared.lock_mgr.lock(key);
        let mut strings_value = StringsValue::new(value.to_vec());
        strings_value.set_relative_timestamp(ttl);
        self.db.put_cf(self.cf(), key, strings_value.encode())?;
        Ok(())
    }

    /// Set with an absolute expiration timestamp.
    pub fn pksetexat(&self, key: &[u8], value: &[u8], timestamp: i64) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut strings_value = StringsValue::new(value.to_vec());
        strings_value.timestamp = timestamp.max(1) as u32;
        self.db.put_cf(self.cf(), key, strings_value.encode())?;
        Ok(())
    }

    /// Compare-and-set: 1 written, -1 value mismatch, NotFound when absent.
    pub fn setvx(&self, key: &[u8], expected: &[u8], value: &[u8], ttl: i64) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        match self.read_live(key) {
            Ok(current) => {
                if current.value == expected {
                    let mut strings_value = StringsValue::new(value.to_vec());
                    if ttl > 0 {
                        strings_value.set_relative_timestamp(ttl);
                    }
                    self.db.put_cf(self.cf(), key, strings_value.encode())?;
                    Ok(1)
                } else {
                    Ok(-1)
                }
            }
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Compare-and-delete: 1 deleted, -1 value mismatch.
    pub fn delvx(&self, key: &[u8], expected: &[u8]) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        let current = self.read_live(key)?;
        if current.value == expected {
            self.db.delete_cf(self.cf(), key)?;
            Ok(1)
        } else {
            Ok(-1)
        }
    }

    pub fn mset(&self, kvs: &[KeyValue]) -> StoreResult<()> {
        let keys: Vec<&[u8]> = kvs.iter().map(|kv| kv.key.as_slice()).collect();
        let _l = self.shared.lock_mgr.lock_multi(&keys);
        let mut batch = WriteBatch::default();
        for kv in kvs {
            batch.put_cf(self.cf(), &kv.key, StringsValue::new(kv.value.clone()).encode());
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// All-or-nothing MSET: writes only when none of the keys is live.
    pub fn msetnx(&self, kvs: &[KeyValue]) -> StoreResult<i32> {
        let keys: Vec<&[u8]> = kvs.iter().map(|kv| kv.key.as_slice()).collect();
        let _l = self.shared.lock_mgr.lock_multi(&keys);
        for kv in kvs {
            match self.read_live(&kv.key) {
                Ok(_) => return Ok(0),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        let mut batch = WriteBatch::default();
        for kv in kvs {
            batch.put_cf(self.cf(), &kv.key, StringsValue::new(kv.value.clone()).encode());
        }
        self.db.write(batch)?;
        Ok(1)
    }

    pub fn getset(&self, key: &[u8], value: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let _l = self.shared.lock_mgr.lock(key);
        let old = match self.read_live(key) {
            Ok(v) => Some(v.value),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        self.db
            .put_cf(self.cf(), key, StringsValue::new(value.to_vec()).encode())?;
        Ok(old)
    }

    pub fn append(&self, key: &[u8], value: &[u8]) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut current = self.read_or_empty(key)?;
        current.value.extend_from_slice(value);
        let len = current.value.len() as i32;
        self.db.put_cf(self.cf(), key, current.encode())?;
        Ok(len)
    }

    /// Overwrite bytes at `offset`, zero-padding any gap past the end.
    pub fn setrange(&self, key: &[u8], offset: i64, value: &[u8]) -> StoreResult<i32> {
        if offset < 0 {
            return Err(StoreError::InvalidArgument("offset < 0".to_string()));
        }
        let offset = offset as usize;
        if offset as u64 + value.len() as u64 > STRING_MAX_LENGTH {
            return Err(StoreError::InvalidArgument(
                "string exceeds maximum allowed size".to_string(),
            ));
        }
        let _l = self.shared.lock_mgr.lock(key);
        let mut current = self.read_or_empty(key)?;
        if current.value.len() < offset + value.len() {
            current.value.resize(offset + value.len(), 0);
        }
        current.value[offset..offset + value.len()].copy_from_slice(value);
        let len = current.value.len() as i32;
        self.db.put_cf(self.cf(), key, current.encode())?;
        Ok(len)
    }

    pub fn setbit(&self, key: &[u8], offset: i64, bit: i32) -> StoreResult<i32> {
        if offset < 0 || offset as u64 >= STRING_MAX_LENGTH * 8 {
            return Err(StoreError::InvalidArgument(
                "bit offset is not an integer or out of range".to_string(),
            ));
        }
        if bit != 0 && bit != 1 {
            return Err(StoreError::InvalidArgument(
                "bit is not an integer or out of range".to_string(),
            ));
        }
        let _l = self.shared.lock_mgr.lock(key);
        let mut current = self.read_or_empty(key)?;
        let byte = (offset >> 3) as usize;
        if current.value.len() <= byte {
            current.value.resize(byte + 1, 0);
        }
        let mask = 0x80u8 >> (offset & 7);
        let old = i32::from(current.value[byte] & mask != 0);
        if bit == 1 {
            current.value[byte] |= mask;
        } else {
            current.value[byte] &= !mask;
        }
        self.db.put_cf(self.cf(), key, current.encode())?;
        Ok(old)
    }

    pub fn incrby(&self, key: &[u8], by: i64) -> StoreResult<i64> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut current = self.read_or_empty(key)?;
        let old = if current.value.is_empty() {
            0
        } else {
            parse_i64_strict(&current.value)
                .ok_or_else(|| StoreError::Corruption("value is not an integer".to_string()))?
        };
        let new_value = checked_incr(old, by)?;
        current.value = new_value.to_string().into_bytes();
        self.db.put_cf(self.cf(), key, current.encode())?;
        Ok(new_value)
    }

    pub fn decrby(&self, key: &[u8], by: i64) -> StoreResult<i64> {
        let by = by
            .checked_neg()
            .ok_or_else(|| StoreError::InvalidArgument("increment or decrement would overflow".to_string()))?;
        self.incrby(key, by)
    }

    pub fn incrbyfloat(&self, key: &[u8], by: &[u8]) -> StoreResult<String> {
        let by = parse_f64_strict(by)
            .ok_or_else(|| StoreError::Corruption("value is not a valid float".to_string()))?;
        let _l = self.shared.lock_mgr.lock(key);
        let mut current = self.read_or_empty(key)?;
        let old = if current.value.is_empty() {
            0.0
        } else {
            parse_f64_strict(&current.value)
                .ok_or_else(|| StoreError::Corruption("value is not a valid float".to_string()))?
        };
        let sum = old + by;
        if sum.is_nan() || sum.is_infinite() {
            return Err(StoreError::InvalidArgument(
                "increment would produce NaN or Infinity".to_string(),
            ));
        }
        let formatted = format_f64(sum);
        current.value = formatted.clone().into_bytes();
        self.db.put_cf(self.cf(), key, current.encode())?;
        Ok(formatted)
    }

    /// Compute `op` over the sources into `dest_key`; shorter sources are
    /// zero-padded on the right, the result length is the longest source.
    pub fn bitop(&self, op: BitOp, dest_key: &[u8], src_keys: &[Vec<u8>]) -> StoreResult<i64> {
        if src_keys.is_empty() || (op == BitOp::Not && src_keys.len() != 1) {
            return Err(StoreError::InvalidArgument(
                "BITOP NOT must be called with a single source key".to_string(),
            ));
        }
        let mut sources: Vec<Vec<u8>> = Vec::with_capacity(src_keys.len());
        for key in src_keys {
            match self.read_live(key) {
                Ok(v) => sources.push(v.value),
                Err(e) if e.is_not_found() => sources.push(Vec::new()),
                Err(e) => return Err(e),
            }
        }
        let max_len = sources.iter().map(Vec::len).max().unwrap_or(0);
        let mut result = vec![0u8; max_len];
        match op {
            BitOp::Not => {
                for (i, out) in result.iter_mut().enumerate() {
                    *out = !sources[0].get(i).copied().unwrap_or(0);
                }
            }
            BitOp::And | BitOp::Or | BitOp::Xor => {
                for (i, out) in result.iter_mut().enumerate() {
                    let mut acc = sources[0].get(i).copied().unwrap_or(0);
                    for src in &sources[1..] {
                        let b = src.get(i).copied().unwrap_or(0);
                        acc = match op {
                            BitOp::And => acc & b,
                            BitOp::Or => acc | b,
                            _ => acc ^ b,
                        };
                    }
                    *out = acc;
                }
            }
        }
        let _l = self.shared.lock_mgr.lock(dest_key);
        self.db
            .put_cf(self.cf(), dest_key, StringsValue::new(result).encode())?;
        Ok(max_len as i64)
    }

    // ==================== read commands ====================

    pub fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        Ok(self.read_live(key)?.value)
    }

    pub fn mget(&self, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let snapshot = self.db.snapshot();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match snapshot.get_cf(self.cf(), key)? {
                Some(raw) => {
                    let v = StringsValue::decode(&raw)?;
                    if v.is_stale() {
                        None
                    } else {
                        Some(v.value)
                    }
                }
                None => None,
            };
            out.push(value);
        }
        Ok(out)
    }

    pub fn strlen(&self, key: &[u8]) -> StoreResult<i32> {
        Ok(self.read_live(key)?.value.len() as i32)
    }

    pub fn getrange(&self, key: &[u8], start: i64, end: i64) -> StoreResult<Vec<u8>> {
        let value = self.read_live(key)?.value;
        let len = value.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut end = if end < 0 { len + end } else { end };
        start = start.max(0);
        end = end.min(len - 1);
        if start > end || len == 0 {
            return Ok(Vec::new());
        }
        Ok(value[start as usize..=end as usize].to_vec())
    }

    pub fn getbit(&self, key: &[u8], offset: i64) -> StoreResult<i32> {
        if offset < 0 {
            return Err(StoreError::InvalidArgument(
                "bit offset is not an integer or out of range".to_string(),
            ));
        }
        let value = match self.read_live(key) {
            Ok(v) => v.value,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        let byte = (offset >> 3) as usize;
        if byte >= value.len() {
            return Ok(0);
        }
        Ok(i32::from(value[byte] & (0x80 >> (offset & 7)) != 0))
    }

    pub fn bitcount(
        &self,
        key: &[u8],
        start: i64,
        end: i64,
        have_range: bool,
    ) -> StoreResult<i32> {
        let value = match self.read_live(key) {
            Ok(v) => v.value,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        let len = value.len() as i64;
        let (mut start, mut end) = if have_range { (start, end) } else { (0, len - 1) };
        if start < 0 {
            start += len;
        }
        if end < 0 {
            end += len;
        }
        start = start.max(0);
        end = end.min(len - 1);
        if start > end || len == 0 {
            return Ok(0);
        }
        let ones: u32 = value[start as usize..=end as usize]
            .iter()
            .map(|b| b.count_ones())
            .sum();
        Ok(ones as i32)
    }

    /// Position of the first bit equal to `bit`, scanning the byte range
    /// `[start, end]` (whole value when absent).
    pub fn bitpos(
        &self,
        key: &[u8],
        bit: i32,
        start: Option<i64>,
        end: Option<i64>,
    ) -> StoreResult<i64> {
        if bit != 0 && bit != 1 {
            return Err(StoreError::InvalidArgument(
                "bit is not an integer or out of range".to_string(),
            ));
        }
        let value = match self.read_live(key) {
            Ok(v) => v.value,
            Err(e) if e.is_not_found() => {
                return Ok(if bit == 1 { -1 } else { 0 });
            }
            Err(e) => return Err(e),
        };
        let len = value.len() as i64;
        let had_end = end.is_some();
        let mut s = start.unwrap_or(0);
        let mut e = end.unwrap_or(len - 1);
        if s < 0 {
            s += len;
        }
        if e < 0 {
            e += len;
        }
        s = s.max(0);
        e = e.min(len - 1);
        if s > e || len == 0 {
            return Ok(-1);
        }
        for byte_idx in s..=e {
            let byte = value[byte_idx as usize];
            for bit_idx in 0..8 {
                let cur = i32::from(byte & (0x80 >> bit_idx) != 0);
                if cur == bit {
                    return Ok(byte_idx * 8 + bit_idx);
                }
            }
        }
        // all ones up to the true end of the value: the first clear bit
        // is the one right past it
        if bit == 0 && !had_end && e == len - 1 {
            return Ok(len * 8);
        }
        Ok(-1)
    }

    // ==================== keyspace commands ====================

    pub fn del(&self, key: &[u8]) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        self.read_live(key)?;
        self.db.delete_cf(self.cf(), key)?;
        Ok(())
    }

    pub fn exists(&self, key: &[u8]) -> StoreResult<()> {
        self.read_live(key).map(|_| ())
    }

    pub fn expire(&self, key: &[u8], ttl: i64) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut value = self.read_live(key)?;
        if ttl > 0 {
            value.set_relative_timestamp(ttl);
            self.db.put_cf(self.cf(), key, value.encode())?;
        } else {
            self.db.delete_cf(self.cf(), key)?;
        }
        Ok(())
    }

    pub fn expireat(&self, key: &[u8], timestamp: i64) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut value = self.read_live(key)?;
        if timestamp > 0 {
            value.timestamp = timestamp as u32;
            self.db.put_cf(self.cf(), key, value.encode())?;
        } else {
            self.db.delete_cf(self.cf(), key)?;
        }
        Ok(())
    }

    pub fn persist(&self, key: &[u8]) -> StoreResult<()> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut value = self.read_live(key)?;
        if value.timestamp == 0 {
            return Err(StoreError::NotFound("no associated timeout".to_string()));
        }
        value.timestamp = 0;
        self.db.put_cf(self.cf(), key, value.encode())?;
        Ok(())
    }

    /// Remaining TTL in seconds; -1 when no expiration is set.
    pub fn ttl(&self, key: &[u8]) -> StoreResult<i64> {
        let value = self.read_live(key)?;
        if value.timestamp == 0 {
            return Ok(-1);
        }
        let now = now_seconds() as i64;
        Ok((i64::from(value.timestamp) - now).max(-2))
    }

    // ==================== scans ====================

    /// One SCAN step over the meta keyspace, bounded by `budget` visits.
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
            self.cf(),
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
            let value = StringsValue::decode(&raw)?;
            if value.is_stale() {
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

    /// List every live key matching `pattern`.
    pub fn scan_keys(&self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let snapshot = self.db.snapshot();
        let mut keys = Vec::new();
        for item in snapshot.iterator_cf(self.cf(), IteratorMode::Start) {
            let (key, raw) = item?;
            let value = StringsValue::decode(&raw)?;
            if !value.is_stale() && string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    /// Bounded forward range scan over live keys with values.
    pub fn pk_scan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<KeyValue>, Vec<u8>)> {
        if !key_start.is_empty() && !key_end.is_empty() && key_start > key_end {
            return Err(StoreError::InvalidArgument("error in given range".to_string()));
        }
        let snapshot = self.db.snapshot();
        let mode = if key_start.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(key_start, Direction::Forward)
        };
        let mut kvs = Vec::new();
        let mut next_key = Vec::new();
        let mut remain = limit;
        for item in snapshot.iterator_cf(self.cf(), mode) {
            let (key, raw) = item?;
            if !key_end.is_empty() && key.as_ref() > key_end {
                break;
            }
            let value = StringsValue::decode(&raw)?;
            if value.is_stale() {
                continue;
            }
            if remain <= 0 {
                next_key = key.to_vec();
                break;
            }
            if string_match(pattern, &key) {
                kvs.push(KeyValue {
                    key: key.to_vec(),
                    value: value.value,
                });
            }
            remain -= 1;
        }
        Ok((kvs, next_key))
    }

    /// Bounded reverse range scan over live keys with values.
    pub fn pk_rscan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i32,
    ) -> StoreResult<(Vec<KeyValue>, Vec<u8>)> {
        if !key_start.is_empty() && !key_end.is_empty() && key_start < key_end {
            return Err(StoreError::InvalidArgument("error in given range".to_string()));
        }
        let snapshot = self.db.snapshot();
        let mode = if key_start.is_empty() {
            IteratorMode::End
        } else {
            IteratorMode::From(key_start, Direction::Reverse)
        };
        let mut kvs = Vec::new();
        let mut next_key = Vec::new();
        let mut remain = limit;
        for item in snapshot.iterator_cf(self.cf(), mode) {
            let (key, raw) = item?;
            if !key_end.is_empty() && key.as_ref() < key_end {
                break;
            }
            let value = StringsValue::decode(&raw)?;
            if value.is_stale() {
                continue;
            }
            if remain <= 0 {
                next_key = key.to_vec();
                break;
            }
            if string_match(pattern, &key) {
                kvs.push(KeyValue {
                    key: key.to_vec(),
                    value: value.value,
                });
            }
            remain -= 1;
        }
        Ok((kvs, next_key))
    }

    /// Physically delete every live key matching `pattern`, in batches.
    pub fn pk_pattern_match_del(&self, pattern: &[u8]) -> StoreResult<i32> {
        let snapshot = self.db.snapshot();
        let mut batch = WriteBatch::default();
        let mut total = 0i32;
        for item in snapshot.iterator_cf(self.cf(), IteratorMode::Start) {
            let (key, raw) = item?;
            let value = StringsValue::decode(&raw)?;
            if !value.is_stale() && string_match(pattern, &key) {
                batch.delete_cf(self.cf(), &key);
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

    /// Keyspace statistics over a snapshot, honoring the cooperative
    /// stop flag checked between keys.
    pub fn scan_key_num(
        &self,
        stop: &std::sync::atomic::AtomicBool,
    ) -> StoreResult<KeyInfo> {
        let snapshot = self.db.snapshot();
        let now = now_seconds();
        let mut info = KeyInfo::default();
        let mut ttl_sum = 0u64;
        for item in snapshot.iterator_cf(self.cf(), IteratorMode::Start) {
            if stop.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(StoreError::Incomplete("key-count scan stopped".to_string()));
            }
            let (_key, raw) = item?;
            let value = StringsValue::decode(&raw)?;
            if value.is_stale() {
                info.invalid_keys += 1;
            } else {
                info.keys += 1;
                if value.timestamp != 0 {
                    info.expires += 1;
                    ttl_sum += u64::from(value.timestamp).saturating_sub(now);
                }
            }
        }
        if info.expires > 0 {
            info.avg_ttl = ttl_sum / info.expires;
        }
        Ok(info)
    }

    // ==================== maintenance ====================

    pub fn compact_range(
        &self,
        _cf_type: ColumnFamilyType,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StoreResult<()> {
        self.db.compact_range_cf(self.cf(), begin, end);
        Ok(())
    }

    pub fn get_property(&self, property: &str) -> StoreResult<u64> {
        Ok(self
            .db
            .property_int_value_cf(self.cf(), property)?
            .unwrap_or(0))
    }
}
