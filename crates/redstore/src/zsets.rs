//! Sorted-sets engine with a dual index: `data_cf` maps
//! (key, version, member) to the raw little-endian score, `score_cf`
//! keys (key, version, encoded-score, member) with an empty value. The
//! score region is order-preserving, so iterating `score_cf` yields
//! (score, member) order and equal scores fall back to member order.
//! Every mutation touches both indices in one write batch.

use crate::base_meta;
use crate::bgtask::BgTaskQueue;
use crate::codec::{
    base_data_key, base_data_prefix, parse_base_data_key, parse_zsets_score_key, zsets_score_key,
    BaseMetaValue,
};
use crate::engine::{cf_options, open_engine_db, ColumnFamilyType, EngineShared};
use crate::error::{StoreError, StoreResult};
use crate::filters::{DataFilterFactory, DbHandle, MetaFilterFactory, MetaLayout};
use crate::options::StoreOptions;
use crate::scan::ScanOutcome;
use crate::types::{Aggregate, DataType, KeyInfo, ScoreMember};
use crate::util::{is_tail_wildcard, now_seconds, prefix_successor, string_match};
use rocksdb::{ColumnFamily, Direction, IteratorMode, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct ZSetsDb {
    db: Arc<DB>,
    shared: EngineShared,
}

fn check_score(score: f64) -> StoreResult<f64> {
    if score.is_nan() {
        return Err(StoreError::InvalidArgument(
            "score is not a number (NaN)".to_string(),
        ));
    }
    Ok(score)
}

fn decode_member_score(raw: &[u8]) -> StoreResult<f64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StoreError::Corruption("zset member value length != 8".to_string()))?;
    Ok(f64::from_le_bytes(bytes))
}

/// Clamp a Redis-style rank range against `count` live entries.
/// Returns None when the range selects nothing.
fn normalize_rank_range(start: i64, stop: i64, count: i64) -> Option<(i64, i64)> {
    let mut start = if start < 0 { count + start } else { start };
    let mut stop = if stop < 0 { count + stop } else { stop };
    start = start.max(0);
    stop = stop.min(count - 1);
    if start > stop || start >= count {
        None
    } else {
        Some((start, stop))
    }
}

impl ZSetsDb {
    pub fn open(
        store_opts: &StoreOptions,
        shared_cache: Option<&rocksdb::Cache>,
        path: &Path,
        bg: Arc<BgTaskQueue>,
    ) -> StoreResult<Self> {
        let db_handle = DbHandle::new();
        let mut meta_opts = cf_options(store_opts);
        meta_opts.set_compaction_filter_factory(MetaFilterFactory::new("zsets", MetaLayout::Base));
        let mut data_opts = cf_options(store_opts);
        data_opts.set_compaction_filter_factory(DataFilterFactory::new(
            "zsets",
            MetaLayout::Base,
            Arc::clone(&db_handle),
        ));
        let mut score_opts = cf_options(store_opts);
        score_opts.set_compaction_filter_factory(DataFilterFactory::new(
            "zsets.score",
            MetaLayout::Base,
            Arc::clone(&db_handle),
        ));
        let db = open_engine_db(
            store_opts,
            shared_cache,
            path,
            vec![
                ("default", meta_opts),
                ("data_cf", data_opts),
                ("score_cf", score_opts),
            ],
        )?;
        db_handle.set(&db);
        Ok(Self {
            db,
            shared: EngineShared::new(DataType::ZSets, store_opts, bg),
        })
    }

    fn meta_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("default").expect("default cf")
    }

    fn data_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("data_cf").expect("data cf")
    }

    fn score_cf(&self) -> &ColumnFamily {
        self.db.cf_handle("score_cf").expect("score cf")
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

    fn snapshot_live_meta(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        key: &[u8],
    ) -> StoreResult<BaseMetaValue> {
        match snapshot.get_cf(self.meta_cf(), key)? {
            Some(raw) => {
                let meta = BaseMetaValue::decode(&raw)?;
                if meta.is_stale() || meta.count == 0 {
                    Err(StoreError::not_found())
                } else {
                    Ok(meta)
                }
            }
            None => Err(StoreError::not_found()),
        }
    }

    /// Walk `score_cf` for (key, version) in score order, calling `visit`
    /// with (rank, score, member); stop when it returns false.
    fn for_each_by_score<F>(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        key: &[u8],
        version: u32,
        mut visit: F,
    ) -> StoreResult<()>
    where
        F: FnMut(i64, f64, &[u8]) -> bool,
    {
        let prefix = base_data_prefix(key, version);
        let mut rank = 0i64;
        for item in snapshot.iterator_cf(
            self.score_cf(),
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (score_key, _) = item?;
            if !score_key.starts_with(&prefix) {
                break;
            }
            let parsed = parse_zsets_score_key(&score_key)?;
            if !visit(rank, parsed.score, parsed.member) {
                break;
            }
            rank += 1;
        }
        Ok(())
    }

    /// Score range filter honoring open/closed endpoints.
    fn in_range(score: f64, min: f64, max: f64, left_close: bool, right_close: bool) -> bool {
        let above = if left_close { score >= min } else { score > min };
        let below = if right_close { score <= max } else { score < max };
        above && below
    }

    // ==================== write commands ====================

    /// Returns the number of members newly added (score updates of
    /// existing members do not count).
    pub fn zadd(&self, key: &[u8], score_members: &[ScoreMember]) -> StoreResult<i32> {
        if score_members.is_empty() {
            return Err(StoreError::InvalidArgument("empty score member list".to_string()));
        }
        // last write wins among duplicate members
        let mut filtered: Vec<ScoreMember> = Vec::with_capacity(score_members.len());
        for sm in score_members.iter().rev() {
            check_score(sm.score)?;
            if !filtered.iter().any(|f| f.member == sm.member) {
                filtered.push(sm.clone());
            }
        }
        filtered.reverse();

        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut statistic = 0u64;
        let ret;
        match self.get_meta(key)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let version = meta.version;
                let mut added = 0i64;
                for sm in &filtered {
                    let member_key = base_data_key(key, version, &sm.member);
                    match self.db.get_cf(self.data_cf(), &member_key)? {
                        Some(raw) => {
                            let old_score = decode_member_score(&raw)?;
                            if old_score == sm.score {
                                continue;
                            }
                            statistic += 1;
                            batch.delete_cf(
                                self.score_cf(),
                                zsets_score_key(key, version, old_score, &sm.member),
                            );
                        }
                        None => added += 1,
                    }
                    batch.put_cf(self.data_cf(), member_key, sm.score.to_le_bytes());
                    batch.put_cf(
                        self.score_cf(),
                        zsets_score_key(key, version, sm.score, &sm.member),
                        b"",
                    );
                }
                if added > 0 {
                    meta.modify_count(added);
                    batch.put_cf(self.meta_cf(), key, meta.encode());
                }
                ret = added as i32;
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = filtered.len() as u32;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                for sm in &filtered {
                    batch.put_cf(
                        self.data_cf(),
                        base_data_key(key, version, &sm.member),
                        sm.score.to_le_bytes(),
                    );
                    batch.put_cf(
                        self.score_cf(),
                        zsets_score_key(key, version, sm.score, &sm.member),
                        b"",
                    );
                }
                ret = filtered.len() as i32;
            }
            None => {
                let mut meta = BaseMetaValue::new(filtered.len() as u32);
                let version = meta.update_version();
                batch.put_cf(self.meta_cf(), key, meta.encode());
                for sm in &filtered {
                    batch.put_cf(
                        self.data_cf(),
                        base_data_key(key, version, &sm.member),
                        sm.score.to_le_bytes(),
                    );
                    batch.put_cf(
                        self.score_cf(),
                        zsets_score_key(key, version, sm.score, &sm.member),
                        b"",
                    );
                }
                ret = filtered.len() as i32;
            }
        }
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, statistic);
        Ok(ret)
    }

    pub fn zincrby(&self, key: &[u8], member: &[u8], by: f64) -> StoreResult<f64> {
        check_score(by)?;
        let _l = self.shared.lock_mgr.lock(key);
        let mut batch = WriteBatch::default();
        let mut statistic = 0u64;
        let score;
        match self.get_meta(key)? {
            Some(mut meta) if !meta.is_stale() && meta.count != 0 => {
                let version = meta.version;
                let member_key = base_data_key(key, version, member);
                match self.db.get_cf(self.data_cf(), &member_key)? {
                    Some(raw) => {
                        let old_score = decode_member_score(&raw)?;
                        score = old_score + by;
                        if score.is_nan() {
                            return Err(StoreError::InvalidArgument(
                                "resulting score is not a number (NaN)".to_string(),
                            ));
                        }
                        statistic = 1;
                        batch.delete_cf(
                            self.score_cf(),
                            zsets_score_key(key, version, old_score, member),
                        );
                    }
                    None => {
                        score = by;
                        meta.modify_count(1);
                        batch.put_cf(self.meta_cf(), key, meta.encode());
                    }
                }
                batch.put_cf(self.data_cf(), member_key, score.to_le_bytes());
                batch.put_cf(
                    self.score_cf(),
                    zsets_score_key(key, version, score, member),
                    b"",
                );
            }
            Some(mut meta) => {
                let version = meta.initial_meta_value();
                meta.count = 1;
                score = by;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(self.data_cf(), base_data_key(key, version, member), score.to_le_bytes());
                batch.put_cf(self.score_cf(), zsets_score_key(key, version, score, member), b"");
            }
            None => {
                let mut meta = BaseMetaValue::new(1);
                let version = meta.update_version();
                score = by;
                batch.put_cf(self.meta_cf(), key, meta.encode());
                batch.put_cf(self.data_cf(), base_data_key(key, version, member), score.to_le_bytes());
                batch.put_cf(self.score_cf(), zsets_score_key(key, version, score, member), b"");
            }
        }
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, statistic);
        Ok(score)
    }

    /// Returns the number of members actually removed.
    pub fn zrem(&self, key: &[u8], members: &[Vec<u8>]) -> StoreResult<i32> {
        let mut filtered: Vec<&Vec<u8>> = Vec::with_capacity(members.len());
        for member in members {
            if !filtered.contains(&member) {
                filtered.push(member);
            }
        }
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let version = meta.version;
        let mut batch = WriteBatch::default();
        let mut removed = 0i64;
        for member in &filtered {
            let member_key = base_data_key(key, version, member);
            if let Some(raw) = self.db.get_cf(self.data_cf(), &member_key)? {
                let score = decode_member_score(&raw)?;
                removed += 1;
                batch.delete_cf(self.data_cf(), member_key);
                batch.delete_cf(self.score_cf(), zsets_score_key(key, version, score, member));
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

    pub fn zremrangebyrank(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let Some((start, stop)) = normalize_rank_range(start, stop, i64::from(meta.count)) else {
            return Ok(0);
        };
        let version = meta.version;
        let snapshot = self.db.snapshot();
        let mut batch = WriteBatch::default();
        let mut removed = 0i64;
        self.for_each_by_score(&snapshot, key, version, |rank, score, member| {
            if rank > stop {
                return false;
            }
            if rank >= start {
                removed += 1;
                batch.delete_cf(self.data_cf(), base_data_key(key, version, member));
                batch.delete_cf(self.score_cf(), zsets_score_key(key, version, score, member));
            }
            true
        })?;
        if removed > 0 {
            meta.modify_count(-removed);
            batch.put_cf(self.meta_cf(), key, meta.encode());
            self.db.write(batch)?;
            self.shared.update_key_statistics(key, removed as u64);
        }
        Ok(removed as i32)
    }

    pub fn zremrangebyscore(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<i32> {
        check_score(min)?;
        check_score(max)?;
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let version = meta.version;
        let snapshot = self.db.snapshot();
        let mut batch = WriteBatch::default();
        let mut removed = 0i64;
        self.for_each_by_score(&snapshot, key, version, |_rank, score, member| {
            if score > max || (!right_close && score == max) {
                return false;
            }
            if Self::in_range(score, min, max, left_close, right_close) {
                removed += 1;
                batch.delete_cf(self.data_cf(), base_data_key(key, version, member));
                batch.delete_cf(self.score_cf(), zsets_score_key(key, version, score, member));
            }
            true
        })?;
        if removed > 0 {
            meta.modify_count(-removed);
            batch.put_cf(self.meta_cf(), key, meta.encode());
            self.db.write(batch)?;
            self.shared.update_key_statistics(key, removed as u64);
        }
        Ok(removed as i32)
    }

    pub fn zremrangebylex(
        &self,
        key: &[u8],
        min: &[u8],
        max: &[u8],
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<i32> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let version = meta.version;
        let victims = self.collect_by_lex(key, version, min, max, left_close, right_close)?;
        if victims.is_empty() {
            return Ok(0);
        }
        let mut batch = WriteBatch::default();
        for member in &victims {
            let member_key = base_data_key(key, version, member);
            if let Some(raw) = self.db.get_cf(self.data_cf(), &member_key)? {
                let score = decode_member_score(&raw)?;
                batch.delete_cf(self.data_cf(), member_key);
                batch.delete_cf(self.score_cf(), zsets_score_key(key, version, score, member));
            }
        }
        meta.modify_count(-(victims.len() as i64));
        batch.put_cf(self.meta_cf(), key, meta.encode());
        self.db.write(batch)?;
        self.shared.update_key_statistics(key, victims.len() as u64);
        Ok(victims.len() as i32)
    }

    /// Pop the `count` highest-scoring members.
    pub fn zpopmax(&self, key: &[u8], count: i64) -> StoreResult<Vec<ScoreMember>> {
        self.zpop(key, count, true)
    }

    /// Pop the `count` lowest-scoring members.
    pub fn zpopmin(&self, key: &[u8], count: i64) -> StoreResult<Vec<ScoreMember>> {
        self.zpop(key, count, false)
    }

    fn zpop(&self, key: &[u8], count: i64, from_max: bool) -> StoreResult<Vec<ScoreMember>> {
        let _l = self.shared.lock_mgr.lock(key);
        let mut meta = self.live_meta(key)?;
        let version = meta.version;
        let wanted = count.max(0).min(i64::from(meta.count));
        let prefix = base_data_prefix(key, version);
        let succ = prefix_successor(&prefix);
        let iter = if from_max {
            let mode = match &succ {
                Some(succ) => IteratorMode::From(succ, Direction::Reverse),
                None => IteratorMode::End,
            };
            self.db.iterator_cf(self.score_cf(), mode)
        } else {
            self.db.iterator_cf(
                self.score_cf(),
                IteratorMode::From(&prefix, Direction::Forward),
            )
        };

        let mut popped = Vec::new();
        let mut batch = WriteBatch::default();
        for item in iter {
            if popped.len() as i64 >= wanted {
                break;
            }
            let (score_key, _) = item?;
            if !score_key.starts_with(&prefix) {
                if from_max && score_key.as_ref() > prefix.as_slice() {
                    continue;
                }
                break;
            }
            let parsed = parse_zsets_score_key(&score_key)?;
            popped.push(ScoreMember {
                score: parsed.score,
                member: parsed.member.to_vec(),
            });
            batch.delete_cf(self.score_cf(), &score_key);
            batch.delete_cf(self.data_cf(), base_data_key(key, version, parsed.member));
        }
        if !popped.is_empty() {
            meta.modify_count(-(popped.len() as i64));
            batch.put_cf(self.meta_cf(), key, meta.encode());
            self.db.write(batch)?;
            self.shared.update_key_statistics(key, popped.len() as u64);
        }
        Ok(popped)
    }

    // ==================== aggregation stores ====================

    fn collect_weighted(
        &self,
        snapshot: &rocksdb::Snapshot<'_>,
        key: &[u8],
        version: u32,
        weight: f64,
    ) -> StoreResult<Vec<(Vec<u8>, f64)>> {
        let prefix = base_data_prefix(key, version);
        let mut out = Vec::new();
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (member_key, raw) = item?;
            if !member_key.starts_with(&prefix) {
                break;
            }
            let member = parse_base_data_key(&member_key)?.tail.to_vec();
            let mut score = decode_member_score(&raw)? * weight;
            if score.is_nan() {
                score = 0.0;
            }
            out.push((member, score));
        }
        Ok(out)
    }

    fn apply_aggregate(agg: Aggregate, current: f64, incoming: f64) -> f64 {
        let value = match agg {
            Aggregate::Sum => current + incoming,
            Aggregate::Min => current.min(incoming),
            Aggregate::Max => current.max(incoming),
        };
        if value.is_nan() {
            0.0
        } else {
            value
        }
    }

    /// Overwrite `destination` with the member->score map in one batch.
    fn store_score_map(
        &self,
        destination: &[u8],
        map: &BTreeMap<Vec<u8>, f64>,
    ) -> StoreResult<()> {
        let mut batch = WriteBatch::default();
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
        meta.count = map.len() as u32;
        let version = meta.version;
        batch.put_cf(self.meta_cf(), destination, meta.encode());
        for (member, score) in map {
            batch.put_cf(
                self.data_cf(),
                base_data_key(destination, version, member),
                score.to_le_bytes(),
            );
            batch.put_cf(
                self.score_cf(),
                zsets_score_key(destination, version, *score, member),
                b"",
            );
        }
        self.db.write(batch)?;
        self.shared.update_key_statistics(destination, statistic);
        Ok(())
    }

    fn weights_for(keys_len: usize, weights: &[f64]) -> Vec<f64> {
        (0..keys_len)
            .map(|i| weights.get(i).copied().unwrap_or(1.0))
            .collect()
    }

    /// Union of the inputs into `destination`; members missing from a set
    /// simply contribute nothing (0 after weighting, under Sum).
    pub fn zunionstore(
        &self,
        destination: &[u8],
        keys: &[Vec<u8>],
        weights: &[f64],
        agg: Aggregate,
    ) -> StoreResult<i32> {
        if keys.is_empty() {
            return Err(StoreError::Corruption(
                "ZUnionstore invalid parameter, no keys".to_string(),
            ));
        }
        let mut lock_keys: Vec<&[u8]> = vec![destination];
        lock_keys.extend(keys.iter().map(|k| k.as_slice()));
        let _l = self.shared.lock_mgr.lock_multi(&lock_keys);

        let weights = Self::weights_for(keys.len(), weights);
        let snapshot = self.db.snapshot();
        let mut map: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
        for (key, weight) in keys.iter().zip(weights.iter()) {
            let meta = match self.snapshot_live_meta(&snapshot, key) {
                Ok(meta) => meta,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            for (member, score) in self.collect_weighted(&snapshot, key, meta.version, *weight)? {
                map.entry(member)
                    .and_modify(|cur| *cur = Self::apply_aggregate(agg, *cur, score))
                    .or_insert(score);
            }
        }
        self.store_score_map(destination, &map)?;
        Ok(map.len() as i32)
    }

    pub fn zinterstore(
        &self,
        destination: &[u8],
        keys: &[Vec<u8>],
        weights: &[f64],
        agg: Aggregate,
    ) -> StoreResult<i32> {
        if keys.is_empty() {
            return Err(StoreError::Corruption(
                "ZInterstore invalid parameter, no keys".to_string(),
            ));
        }
        let mut lock_keys: Vec<&[u8]> = vec![destination];
        lock_keys.extend(keys.iter().map(|k| k.as_slice()));
        let _l = self.shared.lock_mgr.lock_multi(&lock_keys);

        let weights = Self::weights_for(keys.len(), weights);
        let snapshot = self.db.snapshot();

        let mut versions = Vec::with_capacity(keys.len());
        for key in keys {
            match self.snapshot_live_meta(&snapshot, key) {
                Ok(meta) => versions.push(meta.version),
                Err(e) if e.is_not_found() => {
                    self.store_score_map(destination, &BTreeMap::new())?;
                    return Ok(0);
                }
                Err(e) => return Err(e),
            }
        }

        let mut map: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
        for (member, score) in
            self.collect_weighted(&snapshot, &keys[0], versions[0], weights[0])?
        {
            let mut in_all = true;
            let mut acc = score;
            for idx in 1..keys.len() {
                let member_key = base_data_key(&keys[idx], versions[idx], &member);
                match snapshot.get_cf(self.data_cf(), &member_key)? {
                    Some(raw) => {
                        let mut other = decode_member_score(&raw)? * weights[idx];
                        if other.is_nan() {
                            other = 0.0;
                        }
                        acc = Self::apply_aggregate(agg, acc, other);
                    }
                    None => {
                        in_all = false;
                        break;
                    }
                }
            }
            if in_all {
                map.insert(member, acc);
            }
        }
        self.store_score_map(destination, &map)?;
        Ok(map.len() as i32)
    }

    // ==================== read commands ====================

    pub fn zcard(&self, key: &[u8]) -> StoreResult<i32> {
        Ok(self.live_meta(key)?.count as i32)
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> StoreResult<f64> {
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        match snapshot.get_cf(self.data_cf(), base_data_key(key, meta.version, member))? {
            Some(raw) => decode_member_score(&raw),
            None => Err(StoreError::not_found()),
        }
    }

    pub fn zcount(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<i32> {
        check_score(min)?;
        check_score(max)?;
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        let mut count = 0i32;
        self.for_each_by_score(&snapshot, key, meta.version, |_rank, score, _member| {
            if score > max || (!right_close && score == max) {
                return false;
            }
            if Self::in_range(score, min, max, left_close, right_close) {
                count += 1;
            }
            true
        })?;
        Ok(count)
    }

    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<ScoreMember>> {
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        let Some((start, stop)) = normalize_rank_range(start, stop, i64::from(meta.count)) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity((stop - start + 1) as usize);
        self.for_each_by_score(&snapshot, key, meta.version, |rank, score, member| {
            if rank > stop {
                return false;
            }
            if rank >= start {
                out.push(ScoreMember {
                    score,
                    member: member.to_vec(),
                });
            }
            true
        })?;
        Ok(out)
    }

    pub fn zrevrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<ScoreMember>> {
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        let count = i64::from(meta.count);
        let Some((start, stop)) = normalize_rank_range(start, stop, count) else {
            return Ok(Vec::new());
        };
        // rank r seen from the top is rank count-1-r from the bottom
        let (fwd_start, fwd_stop) = (count - 1 - stop, count - 1 - start);
        let mut out = Vec::with_capacity((fwd_stop - fwd_start + 1) as usize);
        self.for_each_by_score(&snapshot, key, meta.version, |rank, score, member| {
            if rank > fwd_stop {
                return false;
            }
            if rank >= fwd_start {
                out.push(ScoreMember {
                    score,
                    member: member.to_vec(),
                });
            }
            true
        })?;
        out.reverse();
        Ok(out)
    }

    pub fn zrangebyscore(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<Vec<ScoreMember>> {
        check_score(min)?;
        check_score(max)?;
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        let mut out = Vec::new();
        self.for_each_by_score(&snapshot, key, meta.version, |_rank, score, member| {
            if score > max || (!right_close && score == max) {
                return false;
            }
            if Self::in_range(score, min, max, left_close, right_close) {
                out.push(ScoreMember {
                    score,
                    member: member.to_vec(),
                });
            }
            true
        })?;
        Ok(out)
    }

    pub fn zrevrangebyscore(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<Vec<ScoreMember>> {
        let mut out = self.zrangebyscore(key, min, max, left_close, right_close)?;
        out.reverse();
        Ok(out)
    }

    pub fn zrank(&self, key: &[u8], member: &[u8]) -> StoreResult<i32> {
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        let mut found = None;
        self.for_each_by_score(&snapshot, key, meta.version, |rank, _score, cur| {
            if cur == member {
                found = Some(rank);
                return false;
            }
            true
        })?;
        match found {
            Some(rank) => Ok(rank as i32),
            None => Err(StoreError::not_found()),
        }
    }

    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> StoreResult<i32> {
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
        let count = i64::from(meta.count);
        let mut found = None;
        self.for_each_by_score(&snapshot, key, meta.version, |rank, _score, cur| {
            if cur == member {
                found = Some(rank);
                return false;
            }
            true
        })?;
        match found {
            Some(rank) => Ok((count - 1 - rank) as i32),
            None => Err(StoreError::not_found()),
        }
    }

    // ==================== lex ranges ====================

    /// Members in `[min, max]` by member bytes. `-` and `+` denote the
    /// infinite endpoints, matching how callers encode ZRANGEBYLEX.
    fn collect_by_lex(
        &self,
        key: &[u8],
        version: u32,
        min: &[u8],
        max: &[u8],
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<Vec<Vec<u8>>> {
        let min_infinite = min == b"-";
        let max_infinite = max == b"+";
        let prefix = base_data_prefix(key, version);
        let mut out = Vec::new();
        let snapshot = self.db.snapshot();
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (member_key, _) = item?;
            if !member_key.starts_with(&prefix) {
                break;
            }
            let member = parse_base_data_key(&member_key)?.tail;
            if !min_infinite {
                if member < min || (!left_close && member == min) {
                    continue;
                }
            }
            if !max_infinite {
                if member > max || (!right_close && member == max) {
                    break;
                }
            }
            out.push(member.to_vec());
        }
        Ok(out)
    }

    pub fn zrangebylex(
        &self,
        key: &[u8],
        min: &[u8],
        max: &[u8],
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<Vec<Vec<u8>>> {
        let meta = self.live_meta(key)?;
        self.collect_by_lex(key, meta.version, min, max, left_close, right_close)
    }

    pub fn zlexcount(
        &self,
        key: &[u8],
        min: &[u8],
        max: &[u8],
        left_close: bool,
        right_close: bool,
    ) -> StoreResult<i32> {
        Ok(self.zrangebylex(key, min, max, left_close, right_close)?.len() as i32)
    }

    // ==================== member scan ====================

    pub fn zscan(
        &self,
        key: &[u8],
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> StoreResult<(Vec<ScoreMember>, i64)> {
        if cursor < 0 {
            return Ok((Vec::new(), 0));
        }
        let count = count.max(1);
        let snapshot = self.db.snapshot();
        let meta = self.snapshot_live_meta(&snapshot, key)?;
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
        let mut score_members = Vec::new();
        let mut rest = count;
        let mut next_cursor = 0;
        for item in snapshot.iterator_cf(
            self.data_cf(),
            IteratorMode::From(&seek, Direction::Forward),
        ) {
            let (member_key, raw) = item?;
            if !member_key.starts_with(&prefix) {
                break;
            }
            if rest <= 0 {
                next_cursor = cursor + count;
                let parsed = parse_base_data_key(&member_key)?;
                self.shared
                    .store_scan_next_point(key, pattern, next_cursor, parsed.tail.to_vec());
                break;
            }
            let parsed = parse_base_data_key(&member_key)?;
            if string_match(pattern, parsed.tail) {
                score_members.push(ScoreMember {
                    score: decode_member_score(&raw)?,
                    member: parsed.tail.to_vec(),
                });
            }
            rest -= 1;
        }
        Ok((score_members, next_cursor))
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
            self.db.compact_range_cf(self.score_cf(), begin, end);
        }
        Ok(())
    }

    pub fn get_property(&self, property: &str) -> StoreResult<u64> {
        let mut total = 0;
        for cf in [self.meta_cf(), self.data_cf(), self.score_cf()] {
            total += self.db.property_int_value_cf(cf, property)?.unwrap_or(0);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn create_temp_db() -> (ZSetsDb, std::path::PathBuf) {
        let path = std::path::PathBuf::from(format!("/tmp/redstore_zsets_{}", rand::random::<u64>()));
        let db = ZSetsDb::open(
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

    fn sm(score: f64, member: &str) -> ScoreMember {
        ScoreMember {
            score,
            member: member.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_zadd_zcard_zscore() {
        let (db, path) = create_temp_db();
        assert_eq!(db.zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap(), 3);
        // score update of an existing member is not a new add
        assert_eq!(db.zadd(b"z", &[sm(2.0, "a")]).unwrap(), 0);
        // identical (member, score) pair is a no-op
        assert_eq!(db.zadd(b"z", &[sm(2.0, "b")]).unwrap(), 0);
        assert_eq!(db.zcard(b"z").unwrap(), 3);
        assert_eq!(db.zscore(b"z", b"a").unwrap(), 2.0);
        assert!(db.zscore(b"z", b"nope").unwrap_err().is_not_found());
        assert!(db.zadd(b"z", &[sm(f64::NAN, "x")]).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_zrange_ties_break_lexicographically() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap();
        db.zadd(b"z", &[sm(2.0, "a")]).unwrap();
        let range = db.zrange(b"z", 0, -1).unwrap();
        assert_eq!(range, vec![sm(2.0, "a"), sm(2.0, "b"), sm(3.0, "c")]);
        assert_eq!(db.zrank(b"z", b"a").unwrap(), 0);
        assert_eq!(db.zrank(b"z", b"b").unwrap(), 1);
        assert_eq!(db.zrevrank(b"z", b"a").unwrap(), 2);
        cleanup(&path);
    }

    #[test]
    fn test_zrange_negative_indices() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c"), sm(4.0, "d")]).unwrap();
        assert_eq!(db.zrange(b"z", -2, -1).unwrap(), vec![sm(3.0, "c"), sm(4.0, "d")]);
        assert_eq!(db.zrevrange(b"z", 0, 1).unwrap(), vec![sm(4.0, "d"), sm(3.0, "c")]);
        assert!(db.zrange(b"z", 5, 9).unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_zrangebyscore_and_bounds() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap();
        let all = db
            .zrangebyscore(b"z", f64::NEG_INFINITY, f64::INFINITY, true, true)
            .unwrap();
        assert_eq!(all.len(), 3);
        let open = db.zrangebyscore(b"z", 1.0, 3.0, false, false).unwrap();
        assert_eq!(open, vec![sm(2.0, "b")]);
        assert_eq!(db.zcount(b"z", 1.0, 2.0, true, true).unwrap(), 2);
        assert_eq!(db.zcount(b"z", 1.0, 2.0, false, true).unwrap(), 1);
        let rev = db.zrevrangebyscore(b"z", 1.0, 3.0, true, true).unwrap();
        assert_eq!(rev[0], sm(3.0, "c"));
        cleanup(&path);
    }

    #[test]
    fn test_zincrby() {
        let (db, path) = create_temp_db();
        assert_eq!(db.zincrby(b"z", b"m", 2.5).unwrap(), 2.5);
        assert_eq!(db.zincrby(b"z", b"m", 1.5).unwrap(), 4.0);
        assert_eq!(db.zscore(b"z", b"m").unwrap(), 4.0);
        // the by-score index followed the update
        assert_eq!(db.zrange(b"z", 0, -1).unwrap(), vec![sm(4.0, "m")]);
        cleanup(&path);
    }

    #[test]
    fn test_zrem_and_remrange() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap();
        assert_eq!(db.zrem(b"z", &[b"a".to_vec(), b"nope".to_vec()]).unwrap(), 1);
        assert_eq!(db.zcard(b"z").unwrap(), 2);

        db.zadd(b"z2", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap();
        assert_eq!(db.zremrangebyscore(b"z2", 1.0, 2.0, true, true).unwrap(), 2);
        assert_eq!(db.zrange(b"z2", 0, -1).unwrap(), vec![sm(3.0, "c")]);

        db.zadd(b"z3", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap();
        assert_eq!(db.zremrangebyrank(b"z3", 0, 1).unwrap(), 2);
        assert_eq!(db.zrange(b"z3", 0, -1).unwrap(), vec![sm(3.0, "c")]);
        cleanup(&path);
    }

    #[test]
    fn test_zpopmax_zpopmin() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap();
        assert_eq!(db.zpopmax(b"z", 1).unwrap(), vec![sm(3.0, "c")]);
        assert_eq!(db.zpopmin(b"z", 1).unwrap(), vec![sm(1.0, "a")]);
        assert_eq!(db.zcard(b"z").unwrap(), 1);
        assert_eq!(db.zpopmax(b"z", 5).unwrap(), vec![sm(2.0, "b")]);
        assert!(db.zcard(b"z").unwrap_err().is_not_found());
        cleanup(&path);
    }

    #[test]
    fn test_zrangebylex() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(0.0, "a"), sm(0.0, "b"), sm(0.0, "c"), sm(0.0, "d")]).unwrap();
        let all = db.zrangebylex(b"z", b"-", b"+", true, true).unwrap();
        assert_eq!(all.len(), 4);
        let mid = db.zrangebylex(b"z", b"a", b"c", false, true).unwrap();
        assert_eq!(mid, vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(db.zlexcount(b"z", b"a", b"c", true, false).unwrap(), 2);
        assert_eq!(db.zremrangebylex(b"z", b"b", b"c", true, true).unwrap(), 2);
        assert_eq!(db.zcard(b"z").unwrap(), 2);
        cleanup(&path);
    }

    #[test]
    fn test_zunionstore_weights_and_aggregates() {
        let (db, path) = create_temp_db();
        db.zadd(b"a", &[sm(1.0, "x"), sm(2.0, "y")]).unwrap();
        db.zadd(b"b", &[sm(3.0, "y"), sm(4.0, "z")]).unwrap();

        let n = db
            .zunionstore(b"dest", &[b"a".to_vec(), b"b".to_vec()], &[2.0, 1.0], Aggregate::Sum)
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(db.zscore(b"dest", b"x").unwrap(), 2.0);
        assert_eq!(db.zscore(b"dest", b"y").unwrap(), 7.0);
        assert_eq!(db.zscore(b"dest", b"z").unwrap(), 4.0);

        db.zunionstore(b"dest", &[b"a".to_vec(), b"b".to_vec()], &[], Aggregate::Max)
            .unwrap();
        assert_eq!(db.zscore(b"dest", b"y").unwrap(), 3.0);
        cleanup(&path);
    }

    #[test]
    fn test_zinterstore() {
        let (db, path) = create_temp_db();
        db.zadd(b"a", &[sm(1.0, "x"), sm(2.0, "y")]).unwrap();
        db.zadd(b"b", &[sm(3.0, "y"), sm(4.0, "z")]).unwrap();
        let n = db
            .zinterstore(b"dest", &[b"a".to_vec(), b"b".to_vec()], &[], Aggregate::Min)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(db.zscore(b"dest", b"y").unwrap(), 2.0);
        // intersecting with a missing key clears the destination
        let n = db
            .zinterstore(b"dest", &[b"a".to_vec(), b"nope".to_vec()], &[], Aggregate::Sum)
            .unwrap();
        assert_eq!(n, 0);
        assert!(db.zcard(b"dest").unwrap_err().is_not_found());
        cleanup(&path);
    }

    #[test]
    fn test_zscan_pages() {
        let (db, path) = create_temp_db();
        let members: Vec<ScoreMember> = (0..9)
            .map(|i| ScoreMember {
                score: i as f64,
                member: format!("m{:02}", i).into_bytes(),
            })
            .collect();
        db.zadd(b"z", &members).unwrap();
        let (page1, cursor) = db.zscan(b"z", 0, b"*", 4).unwrap();
        assert_eq!(page1.len(), 4);
        assert!(cursor > 0);
        let (page2, cursor2) = db.zscan(b"z", cursor, b"*", 4).unwrap();
        assert_eq!(page2.len(), 4);
        let (page3, cursor3) = db.zscan(b"z", cursor2, b"*", 4).unwrap();
        assert_eq!(page3.len(), 1);
        assert_eq!(cursor3, 0);
        cleanup(&path);
    }

    #[test]
    fn test_del_and_dual_index_consistency() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(1.5, "a"), sm(-2.0, "b")]).unwrap();
        // member index and score index agree
        let by_rank = db.zrange(b"z", 0, -1).unwrap();
        assert_eq!(by_rank, vec![sm(-2.0, "b"), sm(1.5, "a")]);
        for entry in &by_rank {
            assert_eq!(db.zscore(b"z", &entry.member).unwrap(), entry.score);
        }
        db.del(b"z").unwrap();
        assert!(db.zrange(b"z", 0, -1).unwrap_err().is_not_found());
        cleanup(&path);
    }

    #[test]
    fn test_expire_ttl() {
        let (db, path) = create_temp_db();
        db.zadd(b"z", &[sm(1.0, "a")]).unwrap();
        assert_eq!(db.ttl(b"z").unwrap(), -1);
        db.expire(b"z", 30).unwrap();
        let t = db.ttl(b"z").unwrap();
        assert!(t > 0 && t <= 30);
        cleanup(&path);
    }
}
