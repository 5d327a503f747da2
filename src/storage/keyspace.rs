use super::hash::str_hash;
use super::hash_index::{HashIndex, HashLink, Hashed, IndexPolicy};
use super::zset::SortedSet;
use crate::error::{Error, Result};
use crate::io::WorkerPool;
use bytes::Bytes;
use slab::Slab;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// A value stored under a top-level key
#[derive(Debug)]
pub enum Value {
    Str(Bytes),
    ZSet(Box<SortedSet>),
}

/// Time-to-live of a key as seen by a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Remaining(Duration),
}

#[derive(Debug)]
struct Entry {
    link: HashLink,
    key: Box<[u8]>,
    value: Value,
    expire_at: Option<Instant>,
}

impl Hashed for Entry {
    fn hash_link(&self) -> &HashLink {
        &self.link
    }

    fn hash_link_mut(&mut self) -> &mut HashLink {
        &mut self.link
    }
}

/// Top-level key space: every key of the server, indexed by a [`HashIndex`].
///
/// Owned by the event-loop thread. Large sorted sets that get overwritten or
/// deleted are freed on the worker pool when one is attached.
///
/// Keys past their deadline are invisible to readers at once. Writers
/// reclaim them when they touch the key, and [`Keyspace::expire_due`]
/// reclaims the rest in bounded batches.
pub struct Keyspace {
    entries: Slab<Entry>,
    index: HashIndex,
    // (deadline, entry id) for every entry with a deadline
    expiries: BTreeSet<(Instant, usize)>,
    policy: IndexPolicy,
    pool: Option<WorkerPool>,
    large_value_threshold: usize,
}

impl Keyspace {
    /// Key space that frees every value inline
    pub fn new(policy: IndexPolicy) -> Self {
        Self {
            entries: Slab::new(),
            index: HashIndex::with_policy(policy),
            expiries: BTreeSet::new(),
            policy,
            pool: None,
            large_value_threshold: usize::MAX,
        }
    }

    /// Key space that hands sorted sets with more than `large_value_threshold`
    /// members to `pool` for destruction
    pub fn with_pool(policy: IndexPolicy, pool: WorkerPool, large_value_threshold: usize) -> Self {
        Self {
            pool: Some(pool),
            large_value_threshold,
            ..Self::new(policy)
        }
    }

    /// Stored keys, counting expired ones not yet reclaimed
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup_id(&self, key: &[u8]) -> Option<usize> {
        self.index
            .lookup(&self.entries, str_hash(key), |entry| &*entry.key == key)
    }

    fn is_expired(&self, id: usize, now: Instant) -> bool {
        matches!(self.entries[id].expire_at, Some(deadline) if deadline <= now)
    }

    /// Live entry for `key`, ignoring one past its deadline
    fn find(&self, key: &[u8]) -> Option<usize> {
        let now = Instant::now();
        self.lookup_id(key).filter(|&id| !self.is_expired(id, now))
    }

    /// Live entry for `key`, reclaiming it first if it has expired
    fn find_live(&mut self, key: &[u8]) -> Option<usize> {
        let id = self.lookup_id(key)?;
        if self.is_expired(id, Instant::now()) {
            self.remove_entry(id);
            return None;
        }
        Some(id)
    }

    fn insert_entry(&mut self, key: &[u8], value: Value) -> usize {
        let id = self.entries.insert(Entry {
            link: HashLink::new(str_hash(key)),
            key: key.into(),
            value,
            expire_at: None,
        });
        self.index.insert(&mut self.entries, id);
        id
    }

    fn remove_entry(&mut self, id: usize) {
        self.index.remove_node(&mut self.entries, id);
        let entry = self.entries.remove(id);
        if let Some(deadline) = entry.expire_at {
            self.expiries.remove(&(deadline, id));
        }
        self.dispose(entry.value);
    }

    fn set_deadline(&mut self, id: usize, deadline: Option<Instant>) {
        let entry = &mut self.entries[id];
        if let Some(old) = std::mem::replace(&mut entry.expire_at, deadline) {
            self.expiries.remove(&(old, id));
        }
        if let Some(new) = deadline {
            self.expiries.insert((new, id));
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.find(key).map(|id| &self.entries[id].value)
    }

    /// Store a string, swapping the value in place when the key exists.
    ///
    /// Any deadline on the key is cleared.
    pub fn set(&mut self, key: &[u8], value: Bytes) {
        match self.find_live(key) {
            Some(id) => {
                let old = std::mem::replace(&mut self.entries[id].value, Value::Str(value));
                self.set_deadline(id, None);
                self.dispose(old);
            }
            None => {
                self.insert_entry(key, Value::Str(value));
            }
        }
    }

    /// Remove a key of any type. Returns whether a live key was removed.
    pub fn del(&mut self, key: &[u8]) -> bool {
        match self.find_live(key) {
            Some(id) => {
                self.remove_entry(id);
                true
            }
            None => false,
        }
    }

    /// Give `key` a deadline. Returns false when the key does not exist.
    pub fn expire_at(&mut self, key: &[u8], deadline: Instant) -> bool {
        match self.find_live(key) {
            Some(id) => {
                self.set_deadline(id, Some(deadline));
                true
            }
            None => false,
        }
    }

    pub fn ttl(&self, key: &[u8]) -> KeyTtl {
        match self.find(key) {
            None => KeyTtl::Missing,
            Some(id) => match self.entries[id].expire_at {
                None => KeyTtl::Persistent,
                Some(deadline) => {
                    KeyTtl::Remaining(deadline.saturating_duration_since(Instant::now()))
                }
            },
        }
    }

    /// Reclaim at most `limit` keys whose deadline is not after `now`.
    pub fn expire_due(&mut self, now: Instant, limit: usize) -> usize {
        let mut expired = 0;
        while expired < limit {
            let Some(&(deadline, id)) = self.expiries.first() else {
                break;
            };
            if deadline > now {
                break;
            }
            self.remove_entry(id);
            expired += 1;
        }
        expired
    }

    /// Sorted set stored at `key`, if any.
    pub fn zset(&self, key: &[u8]) -> Result<Option<&SortedSet>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::ZSet(set)) => Ok(Some(&**set)),
            Some(Value::Str(_)) => Err(Error::WrongType("zset")),
        }
    }

    /// Mutable sorted set stored at `key`, if any.
    pub fn zset_existing_mut(&mut self, key: &[u8]) -> Result<Option<&mut SortedSet>> {
        let Some(id) = self.find_live(key) else {
            return Ok(None);
        };
        match &mut self.entries[id].value {
            Value::ZSet(set) => Ok(Some(&mut **set)),
            Value::Str(_) => Err(Error::WrongType("zset")),
        }
    }

    /// Sorted set stored at `key`, created empty when the key is missing.
    pub fn zset_mut(&mut self, key: &[u8]) -> Result<&mut SortedSet> {
        let id = match self.find_live(key) {
            Some(id) => id,
            None => {
                let set = SortedSet::with_policy(self.policy);
                self.insert_entry(key, Value::ZSet(Box::new(set)))
            }
        };
        match &mut self.entries[id].value {
            Value::ZSet(set) => Ok(&mut **set),
            Value::Str(_) => Err(Error::WrongType("zset")),
        }
    }

    /// Every live key, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let now = Instant::now();
        self.index
            .iter(&self.entries)
            .filter(move |&id| !self.is_expired(id, now))
            .map(move |id| &*self.entries[id].key)
    }

    fn dispose(&self, value: Value) {
        let Value::ZSet(set) = value else {
            return;
        };
        match &self.pool {
            Some(pool) if set.len() > self.large_value_threshold => {
                debug!("Deferring drop of sorted set with {} members", set.len());
                pool.submit(move || drop(set));
            }
            _ => drop(set),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn keyspace() -> Keyspace {
        Keyspace::new(IndexPolicy::default())
    }

    fn get_str<'a>(ks: &'a Keyspace, key: &[u8]) -> Option<&'a [u8]> {
        match ks.get(key) {
            Some(Value::Str(v)) => Some(&v[..]),
            _ => None,
        }
    }

    #[test]
    fn test_set_get_del() {
        let mut ks = keyspace();
        ks.set(b"foo", Bytes::from_static(b"bar"));
        assert_eq!(get_str(&ks, b"foo"), Some(&b"bar"[..]));

        ks.set(b"foo", Bytes::from_static(b"baz"));
        assert_eq!(get_str(&ks, b"foo"), Some(&b"baz"[..]));
        assert_eq!(ks.len(), 1);

        assert!(ks.del(b"foo"));
        assert!(!ks.del(b"foo"));
        assert!(ks.get(b"foo").is_none());
        assert!(ks.is_empty());
    }

    #[test]
    fn test_zset_type_checks() {
        let mut ks = keyspace();
        ks.set(b"s", Bytes::from_static(b"v"));
        assert!(matches!(ks.zset_mut(b"s"), Err(Error::WrongType("zset"))));
        assert!(matches!(ks.zset(b"s"), Err(Error::WrongType("zset"))));

        ks.zset_mut(b"z").unwrap().insert(b"m", 1.0);
        assert_eq!(ks.zset(b"z").unwrap().unwrap().len(), 1);
        assert!(ks.zset(b"missing").unwrap().is_none());
        assert!(ks.zset_existing_mut(b"missing").unwrap().is_none());
        assert!(ks.get(b"missing").is_none());
    }

    #[test]
    fn test_set_overwrites_zset() {
        let mut ks = keyspace();
        ks.zset_mut(b"k").unwrap().insert(b"m", 1.0);
        ks.set(b"k", Bytes::from_static(b"plain"));
        assert_eq!(get_str(&ks, b"k"), Some(&b"plain"[..]));
    }

    #[test]
    fn test_keys_lists_everything() {
        let mut ks = keyspace();
        for i in 0..100 {
            ks.set(format!("key{}", i).as_bytes(), Bytes::from(i.to_string()));
        }
        ks.zset_mut(b"zkey").unwrap();

        let mut keys: Vec<Vec<u8>> = ks.keys().map(|k| k.to_vec()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 101);
    }

    #[test]
    fn test_ttl_states() {
        let mut ks = keyspace();
        assert_eq!(ks.ttl(b"k"), KeyTtl::Missing);
        assert!(!ks.expire_at(b"k", Instant::now() + Duration::from_secs(10)));

        ks.set(b"k", Bytes::from_static(b"v"));
        assert_eq!(ks.ttl(b"k"), KeyTtl::Persistent);

        assert!(ks.expire_at(b"k", Instant::now() + Duration::from_secs(10)));
        match ks.ttl(b"k") {
            KeyTtl::Remaining(left) => {
                assert!(left <= Duration::from_secs(10));
                assert!(left > Duration::from_secs(5));
            }
            other => panic!("unexpected ttl {:?}", other),
        }

        // Overwriting a string drops its deadline
        ks.set(b"k", Bytes::from_static(b"w"));
        assert_eq!(ks.ttl(b"k"), KeyTtl::Persistent);
        assert_eq!(ks.expire_due(Instant::now() + Duration::from_secs(60), 10), 0);
    }

    #[test]
    fn test_expired_key_is_invisible_then_reclaimed() {
        let mut ks = keyspace();
        ks.set(b"gone", Bytes::from_static(b"v"));
        ks.zset_mut(b"zgone").unwrap().insert(b"m", 1.0);
        ks.set(b"kept", Bytes::from_static(b"v"));
        assert!(ks.expire_at(b"gone", Instant::now()));
        assert!(ks.expire_at(b"zgone", Instant::now()));

        assert!(ks.get(b"gone").is_none());
        assert!(ks.zset(b"zgone").unwrap().is_none());
        assert_eq!(ks.ttl(b"gone"), KeyTtl::Missing);
        assert_eq!(ks.keys().collect::<Vec<_>>(), vec![&b"kept"[..]]);
        assert_eq!(ks.len(), 3);

        // A writer touching the key reclaims it and starts fresh
        assert!(ks.zset_mut(b"gone").unwrap().is_empty());
        assert_eq!(ks.ttl(b"gone"), KeyTtl::Persistent);
        assert!(!ks.del(b"zgone"));
        assert_eq!(ks.len(), 2);
    }

    #[test]
    fn test_expire_due_is_bounded() {
        let mut ks = keyspace();
        let now = Instant::now();
        for i in 0..10u32 {
            let key = i.to_le_bytes();
            ks.set(&key, Bytes::from_static(b"v"));
            ks.expire_at(&key, now);
        }
        ks.set(b"later", Bytes::from_static(b"v"));
        ks.expire_at(b"later", now + Duration::from_secs(60));

        assert_eq!(ks.expire_due(now, 4), 4);
        assert_eq!(ks.len(), 7);
        assert_eq!(ks.expire_due(now, 100), 6);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks.expire_due(now, 100), 0);
        assert!(matches!(ks.ttl(b"later"), KeyTtl::Remaining(_)));
    }

    /// Pool with its only worker parked until the returned sender fires
    fn parked_pool() -> (WorkerPool, crossbeam_channel::Sender<()>) {
        let pool = WorkerPool::new(1).unwrap();
        let (parked_tx, parked_rx) = crossbeam_channel::bounded(0);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        pool.submit(move || {
            let _ = parked_tx.send(());
            let _ = gate_rx.recv();
        });
        parked_rx.recv().unwrap();
        (pool, gate_tx)
    }

    fn fill(ks: &mut Keyspace, key: &[u8], members: u32) {
        let set = ks.zset_mut(key).unwrap();
        for i in 0..members {
            set.insert(&i.to_le_bytes(), i as f64);
        }
    }

    #[test]
    fn test_large_zset_dropped_on_pool() {
        let (pool, gate) = parked_pool();
        let mut ks = Keyspace::with_pool(IndexPolicy::default(), pool, 10);
        fill(&mut ks, b"big", 100);
        fill(&mut ks, b"small", 5);
        let pool = ks.pool.as_ref().unwrap();
        assert_eq!(pool.queued(), 0);

        assert!(ks.del(b"big"));
        assert!(ks.get(b"big").is_none());
        let pool = ks.pool.as_ref().unwrap();
        assert_eq!(pool.queued(), 1);

        // Small sets are freed inline
        assert!(ks.del(b"small"));
        let pool = ks.pool.as_ref().unwrap();
        assert_eq!(pool.queued(), 1);

        // Jobs run in order on the single worker, so this one runs after the drop
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        });
        gate.send(()).unwrap();
        drop(ks);

        assert_eq!(rx.recv().unwrap().as_deref(), Some("pollkv-worker-0"));
    }

    #[test]
    fn test_overwritten_and_expired_zsets_use_pool() {
        let (pool, gate) = parked_pool();
        let mut ks = Keyspace::with_pool(IndexPolicy::default(), pool, 10);
        fill(&mut ks, b"a", 50);
        fill(&mut ks, b"b", 50);

        ks.set(b"a", Bytes::from_static(b"now a string"));
        assert!(ks.expire_at(b"b", Instant::now()));
        assert_eq!(ks.expire_due(Instant::now(), 10), 1);
        assert_eq!(ks.pool.as_ref().unwrap().queued(), 2);

        gate.send(()).unwrap();
    }
}
