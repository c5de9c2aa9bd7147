//! Cross-engine scenarios exercised through the top-level store.

use redstore::{BeforeOrAfter, DataType, FieldValue, RedStore, ScoreMember, StoreOptions};
use std::path::PathBuf;
use std::time::Duration;

struct TestStore {
    store: Option<RedStore>,
    path: PathBuf,
}

impl TestStore {
    fn new() -> Self {
        let path = PathBuf::from(format!("/tmp/redstore_e2e_{}", rand::random::<u64>()));
        let store = RedStore::open(&StoreOptions::default(), &path).unwrap();
        Self {
            store: Some(store),
            path,
        }
    }

    fn get(&self) -> &RedStore {
        self.store.as_ref().unwrap()
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        self.store.take();
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn vecs(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn sm(score: f64, member: &str) -> ScoreMember {
    ScoreMember {
        score,
        member: member.as_bytes().to_vec(),
    }
}

#[test]
fn scenario_sets_add_and_members() {
    let ts = TestStore::new();
    let store = ts.get();
    assert_eq!(store.sets().sadd(b"k", &vecs(&["a", "b", "c"])).unwrap(), 3);
    assert_eq!(store.sets().sadd(b"k", &vecs(&["b", "d"])).unwrap(), 1);
    assert_eq!(store.sets().scard(b"k").unwrap(), 4);
    assert_eq!(store.sets().smembers(b"k").unwrap(), vecs(&["a", "b", "c", "d"]));
}

#[test]
fn scenario_zset_update_and_rank() {
    let ts = TestStore::new();
    let store = ts.get();
    assert_eq!(
        store.zsets().zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap(),
        3
    );
    assert_eq!(store.zsets().zadd(b"z", &[sm(2.0, "a")]).unwrap(), 0);
    let range = store.zsets().zrange(b"z", 0, -1).unwrap();
    assert_eq!(range, vec![sm(2.0, "a"), sm(2.0, "b"), sm(3.0, "c")]);
    assert_eq!(store.zsets().zrank(b"z", b"a").unwrap(), 0);
}

#[test]
fn scenario_list_push_insert() {
    let ts = TestStore::new();
    let store = ts.get();
    assert_eq!(store.lists().rpush(b"L", &vecs(&["x", "y", "z"])).unwrap(), 3);
    assert_eq!(store.lists().lpush(b"L", &vecs(&["a"])).unwrap(), 4);
    assert_eq!(store.lists().lrange(b"L", 0, -1).unwrap(), vecs(&["a", "x", "y", "z"]));
    assert_eq!(
        store.lists().linsert(b"L", BeforeOrAfter::Before, b"y", b"m").unwrap(),
        5
    );
    assert_eq!(
        store.lists().lrange(b"L", 0, -1).unwrap(),
        vecs(&["a", "x", "m", "y", "z"])
    );
}

#[test]
fn scenario_hash_set_get_del() {
    let ts = TestStore::new();
    let store = ts.get();
    assert_eq!(store.hashes().hset(b"h", b"f1", b"v1").unwrap(), 1);
    assert_eq!(store.hashes().hset(b"h", b"f2", b"v2").unwrap(), 1);
    let got = store
        .hashes()
        .hmget(b"h", &vecs(&["f1", "f3", "f2"]))
        .unwrap();
    assert_eq!(got, vec![Some(b"v1".to_vec()), None, Some(b"v2".to_vec())]);
    assert_eq!(store.hashes().hdel(b"h", &vecs(&["f1", "f3"])).unwrap(), 1);
}

#[test]
fn scenario_expire_hides_key_and_type() {
    let ts = TestStore::new();
    let store = ts.get();
    store.strings().set(b"k", b"v").unwrap();
    let (count, _) = store.expire(b"k", 1);
    assert_eq!(count, 1);
    std::thread::sleep(Duration::from_secs(2));
    assert!(store.strings().get(b"k").unwrap_err().is_not_found());
    assert_eq!(store.type_of(b"k").unwrap(), "none");
}

#[test]
fn scenario_zremrangebyscore() {
    let ts = TestStore::new();
    let store = ts.get();
    assert_eq!(
        store.zsets().zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b"), sm(3.0, "c")]).unwrap(),
        3
    );
    assert_eq!(
        store.zsets().zremrangebyscore(b"z", 1.0, 2.0, true, true).unwrap(),
        2
    );
    assert_eq!(store.zsets().zrange(b"z", 0, -1).unwrap(), vec![sm(3.0, "c")]);
}

// ==================== stitched SCAN ====================

fn seed_all_types(store: &RedStore, per_type: usize) {
    for i in 0..per_type {
        store
            .strings()
            .set(format!("str{:02}", i).as_bytes(), b"v")
            .unwrap();
        store
            .hashes()
            .hset(format!("hash{:02}", i).as_bytes(), b"f", b"v")
            .unwrap();
        store
            .sets()
            .sadd(format!("set{:02}", i).as_bytes(), &vecs(&["m"]))
            .unwrap();
        store
            .lists()
            .rpush(format!("list{:02}", i).as_bytes(), &vecs(&["x"]))
            .unwrap();
        store
            .zsets()
            .zadd(format!("zset{:02}", i).as_bytes(), &[sm(1.0, "m")])
            .unwrap();
    }
}

#[test]
fn scan_all_walks_every_type() {
    let ts = TestStore::new();
    let store = ts.get();
    seed_all_types(store, 3);

    let mut cursor = 0;
    let mut seen = Vec::new();
    loop {
        let (next, keys) = store.scan(DataType::All, cursor, b"*", 4).unwrap();
        seen.extend(keys);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    assert_eq!(seen.len(), 15);
    // engines are stitched in the canonical order
    assert_eq!(seen[0], b"str00");
    assert_eq!(seen[3], b"hash00");
    assert_eq!(seen[14], b"zset02");
}

#[test]
fn scan_boundary_exact_type_end() {
    let ts = TestStore::new();
    let store = ts.get();
    seed_all_types(store, 3);

    // budget 3 consumes exactly the strings keyspace; the cursor must
    // resume at the start of the hashes keyspace
    let (cursor, keys) = store.scan(DataType::All, 0, b"*", 3).unwrap();
    assert_eq!(keys, vecs(&["str00", "str01", "str02"]));
    assert_ne!(cursor, 0);
    let (_, keys) = store.scan(DataType::All, cursor, b"*", 3).unwrap();
    assert_eq!(keys, vecs(&["hash00", "hash01", "hash02"]));
}

#[test]
fn scan_single_type_ends_with_zero() {
    let ts = TestStore::new();
    let store = ts.get();
    seed_all_types(store, 3);

    let (cursor, keys) = store.scan(DataType::Sets, 0, b"*", 2).unwrap();
    assert_eq!(keys.len(), 2);
    assert_ne!(cursor, 0);
    let (cursor, keys) = store.scan(DataType::Sets, cursor, b"*", 2).unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(cursor, 0);
}

#[test]
fn scan_with_tail_wildcard_prefix() {
    let ts = TestStore::new();
    let store = ts.get();
    seed_all_types(store, 3);

    let (cursor, keys) = store.scan(DataType::All, 0, b"list*", 100).unwrap();
    assert_eq!(cursor, 0);
    assert_eq!(keys, vecs(&["list00", "list01", "list02"]));
}

#[test]
fn scan_unknown_cursor_restarts() {
    let ts = TestStore::new();
    let store = ts.get();
    seed_all_types(store, 2);
    // a cursor nobody handed out restarts from the beginning
    let (_, keys) = store.scan(DataType::Strings, 12345, b"*", 10).unwrap();
    assert_eq!(keys, vecs(&["str00", "str01"]));
}

// ==================== invariants ====================

#[test]
fn del_is_type_local() {
    let ts = TestStore::new();
    let store = ts.get();
    store.strings().set(b"k", b"v").unwrap();
    store.sets().sadd(b"k", &vecs(&["m"])).unwrap();
    store.sets().del(b"k").unwrap();
    // the strings copy is untouched
    assert_eq!(store.strings().get(b"k").unwrap(), b"v");
    assert!(store.sets().smembers(b"k").unwrap_err().is_not_found());
}

#[test]
fn counts_track_live_records() {
    let ts = TestStore::new();
    let store = ts.get();
    store.sets().sadd(b"k", &vecs(&["a", "b", "c"])).unwrap();
    store.sets().srem(b"k", &vecs(&["a"])).unwrap();
    assert_eq!(store.sets().scard(b"k").unwrap() as usize, store.sets().smembers(b"k").unwrap().len());

    store.zsets().zadd(b"z", &[sm(1.0, "a"), sm(2.0, "b")]).unwrap();
    store.zsets().zrem(b"z", &vecs(&["a"])).unwrap();
    assert_eq!(
        store.zsets().zcard(b"z").unwrap() as usize,
        store.zsets().zrange(b"z", 0, -1).unwrap().len()
    );
}

#[test]
fn mset_mget_round_trip_in_order() {
    let ts = TestStore::new();
    let store = ts.get();
    let kvs: Vec<redstore::KeyValue> = [("a", "1"), ("b", "2"), ("c", "3")]
        .iter()
        .map(|(k, v)| redstore::KeyValue {
            key: k.as_bytes().to_vec(),
            value: v.as_bytes().to_vec(),
        })
        .collect();
    store.strings().mset(&kvs).unwrap();
    let got = store.strings().mget(&vecs(&["a", "b", "c"])).unwrap();
    assert_eq!(
        got,
        vec![Some(b"1".to_vec()), Some(b"2".to_vec()), Some(b"3".to_vec())]
    );

    store
        .hashes()
        .hmset(
            b"h",
            &[
                FieldValue { field: b"f1".to_vec(), value: b"v1".to_vec() },
                FieldValue { field: b"f2".to_vec(), value: b"v2".to_vec() },
            ],
        )
        .unwrap();
    let got = store.hashes().hmget(b"h", &vecs(&["f1", "f2"])).unwrap();
    assert_eq!(got, vec![Some(b"v1".to_vec()), Some(b"v2".to_vec())]);
}

#[test]
fn duplicate_adds_are_idempotent() {
    let ts = TestStore::new();
    let store = ts.get();
    store.sets().sadd(b"s", &vecs(&["m"])).unwrap();
    assert_eq!(store.sets().sadd(b"s", &vecs(&["m"])).unwrap(), 0);

    store.zsets().zadd(b"z", &[sm(1.0, "m")]).unwrap();
    assert_eq!(store.zsets().zadd(b"z", &[sm(1.0, "m")]).unwrap(), 0);

    store.hashes().hset(b"h", b"f", b"v").unwrap();
    assert_eq!(store.hashes().hset(b"h", b"f", b"v").unwrap(), 0);
}

#[test]
fn ttl_is_monotone_until_expiry() {
    let ts = TestStore::new();
    let store = ts.get();
    store.sets().sadd(b"k", &vecs(&["m"])).unwrap();
    let (count, _) = store.expire(b"k", 100);
    assert_eq!(count, 1);
    let (ttls, _) = store.ttl(b"k");
    let ttl = ttls[&DataType::Sets];
    assert!(ttl > 0 && ttl <= 100);
}

#[test]
fn concurrent_mixed_writers() {
    let ts = TestStore::new();
    let store = ts.get();
    std::thread::scope(|scope| {
        for t in 0..4 {
            let store = &store;
            scope.spawn(move || {
                for i in 0..50 {
                    store.strings().incrby(b"cnt", 1).unwrap();
                    let member = format!("m-{}-{}", t, i);
                    store.sets().sadd(b"shared", &[member.into_bytes()]).unwrap();
                }
            });
        }
    });
    assert_eq!(store.strings().get(b"cnt").unwrap(), b"200");
    assert_eq!(store.sets().scard(b"shared").unwrap(), 200);
}
