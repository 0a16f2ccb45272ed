//! Storage port
//!
//! Namespaced key/value with prefix-bounded queries. Writes are atomic per
//! key; access is serialized per namespace so plugins cannot race their own
//! data.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, VigilError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    Key,
    KeyDesc,
}

/// Prefix-bounded query. A non-empty prefix is mandatory; full scans are
/// rejected at the port boundary.
#[derive(Debug, Clone, Default)]
pub struct StorageQuery {
    pub prefix: String,
    /// Keep only objects whose `field` equals `value`
    pub filter: Option<(String, Value)>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by: OrderBy,
}

impl StorageQuery {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter = Some((field.into(), value));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;
    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>>;
    async fn query(&self, namespace: &str, query: StorageQuery) -> Result<Vec<(String, Value)>>;
}

fn apply_query(
    data: &BTreeMap<String, Value>,
    query: &StorageQuery,
) -> Result<Vec<(String, Value)>> {
    if query.prefix.is_empty() {
        return Err(VigilError::UnboundedQuery);
    }
    let mut rows: Vec<(String, Value)> = data
        .range(query.prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&query.prefix))
        .filter(|(_, v)| match &query.filter {
            None => true,
            Some((field, expected)) => v.get(field) == Some(expected),
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if query.order_by == OrderBy::KeyDesc {
        rows.reverse();
    }
    let rows = rows
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(rows)
}

/// In-memory backend for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStorage {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .namespaces
            .lock()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.namespaces
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .namespaces
            .lock()
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some()))
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .namespaces
            .lock()
            .get(namespace)
            .map(|ns| {
                ns.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query(&self, namespace: &str, query: StorageQuery) -> Result<Vec<(String, Value)>> {
        let namespaces = self.namespaces.lock();
        let Some(ns) = namespaces.get(namespace) else {
            if query.prefix.is_empty() {
                return Err(VigilError::UnboundedQuery);
            }
            return Ok(Vec::new());
        };
        apply_query(ns, &query)
    }
}

/// File-backed backend: one JSON document per namespace, written via
/// tmp+rename so each key write is atomic.
pub struct FileStorage {
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles per namespace
    namespace_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStorage {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            namespace_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.namespace_locks
            .lock()
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn path_for(&self, namespace: &str) -> Result<PathBuf> {
        if namespace.is_empty()
            || namespace.contains(['/', '\\', '.'])
        {
            return Err(VigilError::StorageError {
                message: format!("invalid namespace: {:?}", namespace),
            });
        }
        Ok(self.base_dir.join(format!("{}.json", namespace)))
    }

    fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, Value>> {
        let path = self.path_for(namespace)?;
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| VigilError::StorageError {
            message: format!("corrupt namespace {:?}: {}", namespace, e),
        })
    }

    fn write_namespace(&self, namespace: &str, data: &BTreeMap<String, Value>) -> Result<()> {
        let path = self.path_for(namespace)?;
        let content = serde_json::to_string_pretty(data)?;
        crate::schedule::store::atomic_write(&path, content.as_bytes()).map_err(|e| {
            VigilError::StorageError {
                message: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let lock = self.lock_for(namespace);
        let _guard = lock.lock();
        Ok(self.read_namespace(namespace)?.remove(key))
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let lock = self.lock_for(namespace);
        let _guard = lock.lock();
        let mut data = self.read_namespace(namespace)?;
        data.insert(key.to_string(), value);
        self.write_namespace(namespace, &data)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let lock = self.lock_for(namespace);
        let _guard = lock.lock();
        let mut data = self.read_namespace(namespace)?;
        let removed = data.remove(key).is_some();
        if removed {
            self.write_namespace(namespace, &data)?;
        }
        Ok(removed)
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        let lock = self.lock_for(namespace);
        let _guard = lock.lock();
        Ok(self
            .read_namespace(namespace)?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn query(&self, namespace: &str, query: StorageQuery) -> Result<Vec<(String, Value)>> {
        let lock = self.lock_for(namespace);
        let _guard = lock.lock();
        let data = self.read_namespace(namespace)?;
        apply_query(&data, &query)
    }
}

/// A storage handle pinned to one namespace, handed to plugins so they
/// cannot read each other's data.
#[derive(Clone)]
pub struct NamespacedStorage {
    inner: Arc<dyn Storage>,
    namespace: String,
}

impl NamespacedStorage {
    pub fn new(inner: Arc<dyn Storage>, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(&self.namespace, key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.set(&self.namespace, key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(&self.namespace, key).await
    }

    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys(&self.namespace, prefix).await
    }

    pub async fn query(&self, query: StorageQuery) -> Result<Vec<(String, Value)>> {
        self.inner.query(&self.namespace, query).await
    }
}
