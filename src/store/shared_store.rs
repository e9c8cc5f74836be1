use moka::ops::compute::Op;
use moka::sync::Cache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::keys;

/// A single stored value. Collections are copy-on-write behind an `Arc` so a
/// read never observes a half-applied update.
#[derive(Clone, Debug)]
enum Value {
    Str(Arc<str>),
    Int(i64),
    Hash(Arc<HashMap<String, String>>),
    Set(Arc<HashSet<String>>),
    ZSet(Arc<BTreeSet<(i64, String)>>),
}

/// Per-key lifetime: every write re-arms the store TTL, except for the
/// persistent keys which never expire.
struct KeyExpiry {
    ttl: Duration,
}

impl KeyExpiry {
    fn lifetime(&self, key: &str) -> Option<Duration> {
        if keys::is_persistent(key) {
            None
        } else {
            Some(self.ttl)
        }
    }
}

impl Expiry<String, Value> for KeyExpiry {
    fn expire_after_create(&self, key: &String, _value: &Value, _created_at: Instant) -> Option<Duration> {
        self.lifetime(key)
    }

    fn expire_after_update(
        &self,
        key: &String,
        _value: &Value,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.lifetime(key)
    }
}

/// TTL-bounded key space with Redis-like string, hash, set and sorted-set
/// operations.
///
/// Every operation touches exactly one key and is atomic for that key: all
/// writes go through moka's per-key `and_compute_with`, so two handlers racing
/// on the same set or hash never lose each other's update. Sequences of
/// operations are *not* transactional. Every write re-arms the key's TTL;
/// keys listed in [`keys::is_persistent`] never expire.
///
/// Collections are copy-on-write, so a write to a hash, set or sorted set
/// costs O(n) in its size. Class rosters and per-class chat logs stay small
/// enough for that.
#[derive(Clone)]
pub struct SharedStore {
    cache: Cache<String, Value>,
}

impl SharedStore {
    pub fn new(ttl: Duration) -> Self {
        // Bounded by the TTL only; a size bound would evict live state
        let cache = Cache::builder()
            .expire_after(KeyExpiry { ttl })
            .build();
        info!("Shared store initialized (ttl {}s)", ttl.as_secs());
        Self { cache }
    }

    /// Atomically transform the value under `key`.
    fn compute<R: Default>(&self, key: &str, f: impl FnOnce(Option<Value>) -> (Op<Value>, R)) -> R {
        let mut out = None;
        let _ = self.cache.entry(key.to_string()).and_compute_with(|current| {
            let (op, r) = f(current.map(|entry| entry.into_value()));
            out = Some(r);
            op
        });
        out.unwrap_or_default()
    }

    // ==================== strings ====================

    pub fn set(&self, key: &str, value: impl Into<String>) {
        let value: Arc<str> = Arc::from(value.into());
        self.compute(key, |_| (Op::Put(Value::Str(value)), ()));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.cache.get(key) {
            Some(Value::Str(s)) => Some(s.to_string()),
            Some(Value::Int(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Multi-get preserving the order of `keys`
    pub fn get_many(&self, keys: &[String]) -> Vec<Option<String>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    /// Delete `key` only while it still holds `expected`
    pub fn delete_if_eq(&self, key: &str, expected: &str) -> bool {
        self.compute(key, |current| match current {
            Some(Value::Str(s)) if &*s == expected => (Op::Remove, true),
            _ => (Op::Nop, false),
        })
    }

    /// Store `value` and return what was there before, in one step
    pub fn getset(&self, key: &str, value: impl Into<String>) -> Option<String> {
        let value: Arc<str> = Arc::from(value.into());
        self.compute(key, |current| {
            let previous = match current {
                Some(Value::Str(s)) => Some(s.to_string()),
                Some(Value::Int(n)) => Some(n.to_string()),
                _ => None,
            };
            (Op::Put(Value::Str(value)), previous)
        })
    }

    pub fn incr(&self, key: &str) -> i64 {
        self.compute(key, |current| {
            let next = match current {
                Some(Value::Int(n)) => n + 1,
                Some(Value::Str(s)) => s.parse::<i64>().unwrap_or(0) + 1,
                _ => 1,
            };
            (Op::Put(Value::Int(next)), next)
        })
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(value)?;
        self.set(key, json);
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        parse_json(key, &raw)
    }

    /// Atomic read-modify-write of a JSON value. Returns `None` when the key is
    /// absent (nothing is written) or the stored value cannot be decoded.
    pub fn update_json<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Serialize + DeserializeOwned,
    {
        self.compute(key, |current| {
            let raw = match current {
                Some(Value::Str(s)) => s,
                _ => return (Op::Nop, None),
            };
            let mut value: T = match parse_json(key, &raw) {
                Some(v) => v,
                None => return (Op::Nop, None),
            };
            let r = f(&mut value);
            match serde_json::to_string(&value) {
                Ok(json) => (Op::Put(Value::Str(Arc::from(json))), Some(r)),
                Err(e) => {
                    error!("Failed to encode value for key {}: {}", key, e);
                    (Op::Nop, None)
                }
            }
        })
    }

    // ==================== hashes ====================

    /// Set one field. Copies the hash, O(n) in its size.
    pub fn hset(&self, key: &str, field: &str, value: impl Into<String>) {
        let value = value.into();
        self.compute(key, |current| {
            let mut map = match current {
                Some(Value::Hash(h)) => (*h).clone(),
                _ => HashMap::new(),
            };
            map.insert(field.to_string(), value);
            (Op::Put(Value::Hash(Arc::new(map))), ())
        })
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        match self.cache.get(key) {
            Some(Value::Hash(h)) => h.get(field).cloned(),
            _ => None,
        }
    }

    pub fn hdel(&self, key: &str, field: &str) -> bool {
        self.compute(key, |current| match current {
            Some(Value::Hash(h)) if h.contains_key(field) => {
                let mut map = (*h).clone();
                map.remove(field);
                if map.is_empty() {
                    (Op::Remove, true)
                } else {
                    (Op::Put(Value::Hash(Arc::new(map))), true)
                }
            }
            _ => (Op::Nop, false),
        })
    }

    pub fn hgetall(&self, key: &str) -> HashMap<String, String> {
        match self.cache.get(key) {
            Some(Value::Hash(h)) => (*h).clone(),
            _ => HashMap::new(),
        }
    }

    pub fn hlen(&self, key: &str) -> usize {
        match self.cache.get(key) {
            Some(Value::Hash(h)) => h.len(),
            _ => 0,
        }
    }

    pub fn hexists(&self, key: &str, field: &str) -> bool {
        matches!(self.cache.get(key), Some(Value::Hash(h)) if h.contains_key(field))
    }

    // ==================== sets ====================

    /// Returns `true` when the member was newly added
    pub fn sadd(&self, key: &str, member: &str) -> bool {
        self.compute(key, |current| {
            let mut set = match current {
                Some(Value::Set(s)) => (*s).clone(),
                _ => HashSet::new(),
            };
            let added = set.insert(member.to_string());
            (Op::Put(Value::Set(Arc::new(set))), added)
        })
    }

    /// Returns `true` when the member was present
    pub fn srem(&self, key: &str, member: &str) -> bool {
        self.compute(key, |current| match current {
            Some(Value::Set(s)) if s.contains(member) => {
                let mut set = (*s).clone();
                set.remove(member);
                if set.is_empty() {
                    (Op::Remove, true)
                } else {
                    (Op::Put(Value::Set(Arc::new(set))), true)
                }
            }
            _ => (Op::Nop, false),
        })
    }

    /// Flip membership of `member`. Returns whether it is present afterwards and
    /// the resulting cardinality, both observed inside the same atomic step.
    pub fn stoggle(&self, key: &str, member: &str) -> (bool, usize) {
        self.compute(key, |current| {
            let mut set = match current {
                Some(Value::Set(s)) => (*s).clone(),
                _ => HashSet::new(),
            };
            let present = if set.remove(member) {
                false
            } else {
                set.insert(member.to_string());
                true
            };
            let count = set.len();
            if set.is_empty() {
                (Op::Remove, (present, count))
            } else {
                (Op::Put(Value::Set(Arc::new(set))), (present, count))
            }
        })
    }

    /// Members in ascending lexical order
    pub fn smembers(&self, key: &str) -> Vec<String> {
        let mut members: Vec<String> = match self.cache.get(key) {
            Some(Value::Set(s)) => s.iter().cloned().collect(),
            _ => Vec::new(),
        };
        members.sort();
        members
    }

    pub fn scard(&self, key: &str) -> usize {
        match self.cache.get(key) {
            Some(Value::Set(s)) => s.len(),
            _ => 0,
        }
    }

    /// Cardinalities of several sets, in the order of `keys`
    pub fn scard_many(&self, keys: &[String]) -> Vec<usize> {
        keys.iter().map(|k| self.scard(k)).collect()
    }

    pub fn sismember(&self, key: &str, member: &str) -> bool {
        matches!(self.cache.get(key), Some(Value::Set(s)) if s.contains(member))
    }

    // ==================== sorted sets ====================

    /// Add or re-score `member`. Copies the set and scans it for an old
    /// score of `member`, O(n) in its size.
    pub fn zadd(&self, key: &str, score: i64, member: &str) {
        self.compute(key, |current| {
            let mut zset = match current {
                Some(Value::ZSet(z)) => (*z).clone(),
                _ => BTreeSet::new(),
            };
            zset.retain(|(_, m)| m != member);
            zset.insert((score, member.to_string()));
            (Op::Put(Value::ZSet(Arc::new(zset))), ())
        })
    }

    /// All members in ascending score order
    pub fn zrange_all(&self, key: &str) -> Vec<String> {
        match self.cache.get(key) {
            Some(Value::ZSet(z)) => z.iter().map(|(_, m)| m.clone()).collect(),
            _ => Vec::new(),
        }
    }

    // ==================== key space ====================

    /// Count keys starting with `prefix`. Linear in the key space.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.cache.iter().filter(|(k, _)| k.starts_with(prefix)).count()
    }
}

fn parse_json<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            error!("Failed to parse stored value for key {}: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn store() -> SharedStore {
        SharedStore::new(Duration::from_secs(60))
    }

    #[test]
    fn incr_starts_at_one_and_is_monotonic() {
        let s = store();
        assert_eq!(s.incr("seq"), 1);
        assert_eq!(s.incr("seq"), 2);
        assert_eq!(s.get("seq").as_deref(), Some("2"));
    }

    #[test]
    fn persistent_keys_outlive_the_ttl() {
        let s = SharedStore::new(Duration::from_millis(100));
        assert_eq!(s.incr(keys::CHAT_SEQ), 1);
        s.set("chat:message:1", "x");
        std::thread::sleep(Duration::from_millis(250));

        assert_eq!(s.get("chat:message:1"), None);
        assert_eq!(s.incr(keys::CHAT_SEQ), 2);
    }

    #[test]
    fn delete_if_eq_only_removes_matching_value() {
        let s = store();
        s.set("k", "a");
        assert!(!s.delete_if_eq("k", "b"));
        assert_eq!(s.get("k").as_deref(), Some("a"));
        assert!(s.delete_if_eq("k", "a"));
        assert_eq!(s.get("k"), None);
    }

    #[test]
    fn getset_returns_the_previous_value() {
        let s = store();
        assert_eq!(s.getset("k", "a"), None);
        assert_eq!(s.getset("k", "b"), Some("a".to_string()));
        assert_eq!(s.get("k").as_deref(), Some("b"));
    }

    #[test]
    fn toggle_flips_membership_and_reports_count() {
        let s = store();
        s.sadd("r", "1");
        assert_eq!(s.stoggle("r", "2"), (true, 2));
        assert_eq!(s.stoggle("r", "2"), (false, 1));
        assert_eq!(s.stoggle("r", "1"), (false, 0));
        assert_eq!(s.scard("r"), 0);
    }

    #[test]
    fn srem_of_last_member_deletes_the_set() {
        let s = store();
        assert!(s.sadd("m", "7"));
        assert!(!s.sadd("m", "7"));
        assert!(s.srem("m", "7"));
        assert!(!s.srem("m", "7"));
        assert_eq!(s.count_prefix("m"), 0);
    }

    #[test]
    fn zrange_is_score_ordered() {
        let s = store();
        s.zadd("z", 3, "c");
        s.zadd("z", 1, "a");
        s.zadd("z", 2, "b");
        s.zadd("z", 10, "a");
        assert_eq!(s.zrange_all("z"), vec!["b", "c", "a"]);
    }

    #[test]
    fn hash_fields_round_trip() {
        let s = store();
        s.hset("h", "1", "x");
        s.hset("h", "2", "y");
        assert_eq!(s.hlen("h"), 2);
        assert!(s.hexists("h", "1"));
        assert!(s.hdel("h", "1"));
        assert_eq!(s.hget("h", "2").as_deref(), Some("y"));
        assert!(s.hdel("h", "2"));
        assert!(s.hgetall("h").is_empty());
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Counter {
        n: u32,
    }

    #[test]
    fn update_json_is_a_noop_on_missing_keys() {
        let s = store();
        assert_eq!(s.update_json::<Counter, _>("c", |c| c.n += 1), None);
        s.set_json("c", &Counter { n: 1 }).unwrap();
        assert_eq!(s.update_json::<Counter, _>("c", |c| { c.n += 1; c.n }), Some(2));
        assert_eq!(s.get_json::<Counter>("c"), Some(Counter { n: 2 }));
    }

    #[test]
    fn concurrent_sadd_loses_nothing() {
        let s = store();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let s = s.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        s.sadd("members", &format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.scard("members"), 800);
    }
}
