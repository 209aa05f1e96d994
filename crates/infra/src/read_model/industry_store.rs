use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use slabmarket_core::IndustryId;
use std::sync::Arc;

/// Industry-isolated key/value store abstraction for disposable read models.
pub trait IndustryStore<K, V>: Send + Sync {
    fn get(&self, industry_id: IndustryId, key: &K) -> Option<V>;
    fn upsert(&self, industry_id: IndustryId, key: K, value: V);
    fn remove(&self, industry_id: IndustryId, key: &K);
    fn list(&self, industry_id: IndustryId) -> Vec<V>;
    /// List records across all industries. The sweeper uses this to find
    /// overdue reservations platform-wide.
    fn list_all(&self) -> Vec<(IndustryId, V)>;
    /// Clear all read-model records for an industry (rebuild support).
    fn clear_industry(&self, industry_id: IndustryId);
}

impl<K, V, S> IndustryStore<K, V> for Arc<S>
where
    S: IndustryStore<K, V> + ?Sized,
{
    fn get(&self, industry_id: IndustryId, key: &K) -> Option<V> {
        (**self).get(industry_id, key)
    }

    fn upsert(&self, industry_id: IndustryId, key: K, value: V) {
        (**self).upsert(industry_id, key, value)
    }

    fn remove(&self, industry_id: IndustryId, key: &K) {
        (**self).remove(industry_id, key)
    }

    fn list(&self, industry_id: IndustryId) -> Vec<V> {
        (**self).list(industry_id)
    }

    fn list_all(&self) -> Vec<(IndustryId, V)> {
        (**self).list_all()
    }

    fn clear_industry(&self, industry_id: IndustryId) {
        (**self).clear_industry(industry_id)
    }
}

/// In-memory industry-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryIndustryStore<K, V> {
    inner: RwLock<HashMap<(IndustryId, K), V>>,
}

impl<K, V> InMemoryIndustryStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryIndustryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> IndustryStore<K, V> for InMemoryIndustryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, industry_id: IndustryId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(industry_id, key.clone())).cloned()
    }

    fn upsert(&self, industry_id: IndustryId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((industry_id, key), value);
        }
    }

    fn remove(&self, industry_id: IndustryId, key: &K) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&(industry_id, key.clone()));
        }
    }

    fn list(&self, industry_id: IndustryId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((i, _k), v)| (*i == industry_id).then(|| v.clone()))
            .collect()
    }

    fn list_all(&self) -> Vec<(IndustryId, V)> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter().map(|((i, _k), v)| (*i, v.clone())).collect()
    }

    fn clear_industry(&self, industry_id: IndustryId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(i, _k), _v| *i != industry_id);
        }
    }
}
