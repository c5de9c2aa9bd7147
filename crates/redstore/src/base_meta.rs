//! Meta-keyspace walks shared by the three engines that store the
//! 12-byte base meta value (hashes, sets, sorted sets). Stale and
//! zero-count metas are invisible to every walk here; reclaiming them is
//! the compaction filters' job.

use crate::codec::BaseMetaValue;
use crate::error::{StoreError, StoreResult};
use crate::scan::ScanOutcome;
use crate::types::KeyInfo;
use crate::util::{is_tail_wildcard, now_seconds, string_match};
use rocksdb::{ColumnFamily, Direction, IteratorMode, WriteBatch, DB};
use std::sync::atomic::{AtomicBool, Ordering};

const BATCH_DELETE_LIMIT: usize = 1000;

fn live(meta: &BaseMetaValue) -> bool {
    !meta.is_stale() && meta.count != 0
}

/// One SCAN step: visit up to `budget` live keys starting at `start_key`.
pub(crate) fn scan_meta_keys(
    db: &DB,
    cf: &ColumnFamily,
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
    let snapshot = db.snapshot();
    let iter = snapshot.iterator_cf(cf, IteratorMode::From(start_key, Direction::Forward));
    for item in iter {
        let (key, raw) = item?;
        if outcome.leftover <= 0 {
            if prefix.is_empty() || key.starts_with(prefix) {
                outcome.next_key = key.to_vec();
                outcome.finished = false;
            }
            return Ok(outcome);
        }
        let meta = BaseMetaValue::decode(&raw)?;
        if !live(&meta) {
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

/// All live keys matching `pattern`.
pub(crate) fn scan_keys(db: &DB, cf: &ColumnFamily, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
    let snapshot = db.snapshot();
    let mut keys = Vec::new();
    for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
        let (key, raw) = item?;
        let meta = BaseMetaValue::decode(&raw)?;
        if live(&meta) && string_match(pattern, &key) {
            keys.push(key.to_vec());
        }
    }
    Ok(keys)
}

/// Bounded forward range scan; returns matched keys plus the resume key.
pub(crate) fn pk_scan_range(
    db: &DB,
    cf: &ColumnFamily,
    key_start: &[u8],
    key_end: &[u8],
    pattern: &[u8],
    limit: i32,
) -> StoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
    if !key_start.is_empty() && !key_end.is_empty() && key_start > key_end {
        return Err(StoreError::InvalidArgument("error in given range".to_string()));
    }
    let snapshot = db.snapshot();
    let mode = if key_start.is_empty() {
        IteratorMode::Start
    } else {
        IteratorMode::From(key_start, Direction::Forward)
    };
    let mut keys = Vec::new();
    let mut next_key = Vec::new();
    let mut remain = limit;
    for item in snapshot.iterator_cf(cf, mode) {
        let (key, raw) = item?;
        if !key_end.is_empty() && key.as_ref() > key_end {
            break;
        }
        let meta = BaseMetaValue::decode(&raw)?;
        if !live(&meta) {
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

/// Bounded reverse range scan.
pub(crate) fn pk_rscan_range(
    db: &DB,
    cf: &ColumnFamily,
    key_start: &[u8],
    key_end: &[u8],
    pattern: &[u8],
    limit: i32,
) -> StoreResult<(Vec<Vec<u8>>, Vec<u8>)> {
    if !key_start.is_empty() && !key_end.is_empty() && key_start < key_end {
        return Err(StoreError::InvalidArgument("error in given range".to_string()));
    }
    let snapshot = db.snapshot();
    let mode = if key_start.is_empty() {
        IteratorMode::End
    } else {
        IteratorMode::From(key_start, Direction::Reverse)
    };
    let mut keys = Vec::new();
    let mut next_key = Vec::new();
    let mut remain = limit;
    for item in snapshot.iterator_cf(cf, mode) {
        let (key, raw) = item?;
        if !key_end.is_empty() && key.as_ref() < key_end {
            break;
        }
        let meta = BaseMetaValue::decode(&raw)?;
        if !live(&meta) {
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

/// Tombstone every live key matching `pattern`, flushing the batch every
/// `BATCH_DELETE_LIMIT` updates. Returns the number tombstoned.
pub(crate) fn pk_pattern_match_del(
    db: &DB,
    cf: &ColumnFamily,
    pattern: &[u8],
) -> StoreResult<i32> {
    let snapshot = db.snapshot();
    let mut batch = WriteBatch::default();
    let mut total = 0i32;
    for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
        let (key, raw) = item?;
        let mut meta = BaseMetaValue::decode(&raw)?;
        if live(&meta) && string_match(pattern, &key) {
            meta.initial_meta_value();
            batch.put_cf(cf, &key, meta.encode());
        }
        if batch.len() >= BATCH_DELETE_LIMIT {
            total += batch.len() as i32;
            db.write(std::mem::take(&mut batch))?;
        }
    }
    if !batch.is_empty() {
        total += batch.len() as i32;
        db.write(batch)?;
    }
    Ok(total)
}

/// Keyspace statistics, checking the cooperative stop flag between keys.
pub(crate) fn scan_key_num(db: &DB, cf: &ColumnFamily, stop: &AtomicBool) -> StoreResult<KeyInfo> {
    let snapshot = db.snapshot();
    let now = now_seconds();
    let mut info = KeyInfo::default();
    let mut ttl_sum = 0u64;
    for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
        if stop.load(Ordering::Relaxed) {
            return Err(StoreError::Incomplete("key-count scan stopped".to_string()));
        }
        let (_key, raw) = item?;
        let meta = BaseMetaValue::decode(&raw)?;
        if !live(&meta) {
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
