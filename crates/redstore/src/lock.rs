//! Striped per-key record locks.
//!
//! Each engine owns one `LockMgr`; a mutation takes the stripe its key
//! hashes to for the whole read-modify-commit sequence, giving the
//! single-writer-per-key guarantee. Multi-key commands deduplicate and
//! sort their keys, then take the distinct stripes in ascending index
//! order so two overlapping acquisitions can never deadlock.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const DEFAULT_STRIPES: usize = 1024;

pub struct LockMgr {
    stripes: Vec<Mutex<()>>,
}

impl LockMgr {
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    pub fn with_stripes(n: usize) -> Self {
        let n = n.max(1);
        Self {
            stripes: (0..n).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_of(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Block until the stripe owning `key` is held.
    pub fn lock(&self, key: &[u8]) -> RecordLock<'_> {
        RecordLock {
            _guard: self.stripes[self.stripe_of(key)].lock(),
        }
    }

    /// Lock several keys at once. Keys are deduplicated and ordered
    /// lexicographically, then their distinct stripes are taken in
    /// ascending order.
    pub fn lock_multi(&self, keys: &[&[u8]]) -> MultiRecordLock<'_> {
        let mut sorted: Vec<&[u8]> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut stripe_ids: Vec<usize> = sorted.iter().map(|k| self.stripe_of(k)).collect();
        stripe_ids.sort_unstable();
        stripe_ids.dedup();
        MultiRecordLock {
            _guards: stripe_ids
                .into_iter()
                .map(|i| self.stripes[i].lock())
                .collect(),
        }
    }
}

impl Default for LockMgr {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped single-key lock; released on drop.
pub struct RecordLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Scoped multi-key lock; all stripes released on drop.
pub struct MultiRecordLock<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_same_key_excludes() {
        let mgr = Arc::new(LockMgr::new());
        let counter = Arc::new(Mutex::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = Arc::clone(&mgr);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _l = mgr.lock(b"hotkey");
                    let mut c = counter.lock();
                    *c += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 800);
    }

    #[test]
    fn test_multi_lock_duplicate_keys() {
        let mgr = LockMgr::with_stripes(4);
        // duplicates and aliasing stripes must not self-deadlock
        let keys: [&[u8]; 6] = [b"a", b"b", b"a", b"c", b"d", b"e"];
        let _l = mgr.lock_multi(&keys);
    }

    #[test]
    fn test_multi_lock_opposite_order() {
        let mgr = Arc::new(LockMgr::with_stripes(2));
        let m1 = Arc::clone(&mgr);
        let m2 = Arc::clone(&mgr);
        let t1 = thread::spawn(move || {
            for _ in 0..200 {
                let keys: [&[u8]; 2] = [b"x", b"y"];
                let _l = m1.lock_multi(&keys);
            }
        });
        let t2 = thread::spawn(move || {
            for _ in 0..200 {
                let keys: [&[u8]; 2] = [b"y", b"x"];
                let _l = m2.lock_multi(&keys);
            }
        });
        t1.join().unwrap();
        t2.join().unwrap();
    }
}
