use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreResult;

use super::{Store, StoreOp};

/// In-process backend used in tests and for running the engine without a
/// live Redis instance. A single mutex is enough: every write already goes
/// through the engine's own single-writer dispatcher.
#[derive(Default)]
pub struct MemoryStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.hashes.lock().unwrap().get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<()> {
        if let Some(h) = self.hashes.lock().unwrap().get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hash_mget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        let hashes = self.hashes.lock().unwrap();
        let h = hashes.get(key);
        Ok(fields.iter().map(|f| h.and_then(|h| h.get(f).cloned())).collect())
    }

    async fn hash_incr_float(&self, key: &str, field: &str, delta: f64) -> StoreResult<f64> {
        let mut hashes = self.hashes.lock().unwrap();
        let h = hashes.entry(key.to_string()).or_default();
        let current: f64 = h.get(field).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let next = current + delta;
        h.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.sets.lock().unwrap().entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn set_rem(&self, key: &str, member: &str) -> StoreResult<()> {
        if let Some(s) = self.sets.lock().unwrap().get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.sets.lock().unwrap().get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let hashes = self.hashes.lock().unwrap();
        let sets = self.sets.lock().unwrap();
        let mut found: Vec<String> = hashes.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        found.extend(sets.keys().filter(|k| k.starts_with(prefix)).cloned());
        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.hashes.lock().unwrap().remove(key);
        self.sets.lock().unwrap().remove(key);
        Ok(())
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        for op in ops {
            match op {
                StoreOp::HashSet { key, field, value } => self.hash_set(&key, &field, &value).await?,
                StoreOp::HashDel { key, field } => self.hash_del(&key, &field).await?,
                StoreOp::SetAdd { key, member } => self.set_add(&key, &member).await?,
                StoreOp::SetRem { key, member } => self.set_rem(&key, &member).await?,
                StoreOp::Delete { key } => self.delete(&key).await?,
            }
        }
        Ok(())
    }
}
