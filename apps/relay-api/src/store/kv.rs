use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

/// Store-layer failure. Callers in the notification path degrade to empty
/// results rather than surfacing these to sockets.
#[derive(Debug)]
pub enum StoreError {
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

/// Abstraction over the durable key-value store used for the notification
/// inbox and push subscriptions.
///
/// Backed by Redis in production and an in-memory map in tests.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;
    /// Decrement, clamped at zero.
    async fn decr_floor(&self, key: &str) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Add a member with the given score, replacing any previous score.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn zcard(&self, key: &str) -> Result<usize, StoreError>;
    /// Members in descending score order, paginated.
    async fn zrevrange(
        &self,
        key: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError>;
    /// All members with scores, ascending score order.
    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError>;
    /// Remove the `n` lowest-scored members.
    async fn zremrange_lowest(&self, key: &str, n: usize) -> Result<(), StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;
    async fn hlen(&self, key: &str) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests and bus-less deployments)
// ---------------------------------------------------------------------------

enum Value {
    Str(String),
    Zset(Vec<(String, i64)>),
    Hash(Vec<(String, String)>),
}

/// In-memory [`Store`]. TTLs are ignored, matching its test-only lifetime.
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(match data.get(key) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut data = self.data.lock().unwrap();
        let current = match data.get(key) {
            Some(Value::Str(s)) => s.parse().unwrap_or(0),
            _ => 0,
        };
        let next = current + 1;
        data.insert(key.to_string(), Value::Str(next.to_string()));
        Ok(next)
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, StoreError> {
        let mut data = self.data.lock().unwrap();
        let current: i64 = match data.get(key) {
            Some(Value::Str(s)) => s.parse().unwrap_or(0),
            _ => 0,
        };
        let next = (current - 1).max(0);
        data.insert(key.to_string(), Value::Str(next.to_string()));
        Ok(next)
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), StoreError> {
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        let set = match data
            .entry(key.to_string())
            .or_insert_with(|| Value::Zset(Vec::new()))
        {
            Value::Zset(set) => set,
            _ => return Err(StoreError::Backend("wrong value kind".to_string())),
        };
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock().unwrap();
        if let Some(Value::Zset(set)) = data.get_mut(key) {
            let before = set.len();
            set.retain(|(m, _)| m != member);
            return Ok(set.len() < before);
        }
        Ok(false)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(match data.get(key) {
            Some(Value::Zset(set)) => set.len(),
            _ => 0,
        })
    }

    async fn zrevrange(
        &self,
        key: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().unwrap();
        let mut members = match data.get(key) {
            Some(Value::Zset(set)) => set.clone(),
            _ => return Ok(Vec::new()),
        };
        members.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        Ok(members
            .into_iter()
            .skip(offset)
            .take(count)
            .map(|(m, _)| m)
            .collect())
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let data = self.data.lock().unwrap();
        let mut members = match data.get(key) {
            Some(Value::Zset(set)) => set.clone(),
            _ => return Ok(Vec::new()),
        };
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    async fn zremrange_lowest(&self, key: &str, n: usize) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        if let Some(Value::Zset(set)) = data.get_mut(key) {
            set.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            set.drain(..n.min(set.len()));
        }
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        let hash = match data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(Vec::new()))
        {
            Value::Hash(hash) => hash,
            _ => return Err(StoreError::Backend("wrong value kind".to_string())),
        };
        if let Some(entry) = hash.iter_mut().find(|(f, _)| f == field) {
            entry.1 = value.to_string();
        } else {
            hash.push((field.to_string(), value.to_string()));
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(match data.get(key) {
            Some(Value::Hash(hash)) => hash
                .iter()
                .find(|(f, _)| f == field)
                .map(|(_, v)| v.clone()),
            _ => None,
        })
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(match data.get(key) {
            Some(Value::Hash(hash)) => hash.clone(),
            _ => Vec::new(),
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock().unwrap();
        if let Some(Value::Hash(hash)) = data.get_mut(key) {
            let before = hash.len();
            hash.retain(|(f, _)| f != field);
            return Ok(hash.len() < before);
        }
        Ok(false)
    }

    async fn hlen(&self, key: &str) -> Result<usize, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(match data.get(key) {
            Some(Value::Hash(hash)) => hash.len(),
            _ => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn string_roundtrip_and_delete() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.del("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counter_increments_and_floors_at_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.decr_floor("c").await.unwrap(), 1);
        assert_eq!(store.decr_floor("c").await.unwrap(), 0);
        assert_eq!(store.decr_floor("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zset_orders_by_score() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 10).await.unwrap();
        store.zadd("z", "b", 30).await.unwrap();
        store.zadd("z", "c", 20).await.unwrap();

        assert_eq!(store.zcard("z").await.unwrap(), 3);
        assert_eq!(
            store.zrevrange("z", 0, 10).await.unwrap(),
            vec!["b", "c", "a"]
        );
        assert_eq!(store.zrevrange("z", 1, 1).await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn zadd_replaces_existing_member() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 10).await.unwrap();
        store.zadd("z", "a", 50).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 1);
        assert_eq!(store.zrange_withscores("z").await.unwrap(), vec![("a".to_string(), 50)]);
    }

    #[tokio::test]
    async fn zremrange_lowest_drops_oldest() {
        let store = MemoryStore::new();
        for (m, s) in [("a", 1), ("b", 2), ("c", 3)] {
            store.zadd("z", m, s).await.unwrap();
        }
        store.zremrange_lowest("z", 2).await.unwrap();
        assert_eq!(store.zrevrange("z", 0, 10).await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn hash_set_get_delete() {
        let store = MemoryStore::new();
        store.hset("h", "f1", "v1").await.unwrap();
        store.hset("h", "f2", "v2").await.unwrap();
        store.hset("h", "f1", "v1b").await.unwrap();

        assert_eq!(store.hlen("h").await.unwrap(), 2);
        assert_eq!(store.hget("h", "f1").await.unwrap().as_deref(), Some("v1b"));
        assert!(store.hdel("h", "f1").await.unwrap());
        assert!(!store.hdel("h", "f1").await.unwrap());
        assert_eq!(store.hlen("h").await.unwrap(), 1);
    }
}
