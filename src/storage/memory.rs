use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CacheStorage, ResponseCache, validate_name};
use crate::error::CacheError;
use crate::net::Response;

/// 进程内缓存，插入顺序由 Vec 保持
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<Vec<(String, Response)>>,
}

impl MemoryCache {
    fn entries(&self) -> MutexGuard<'_, Vec<(String, Response)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn put(&self, key: &str, resp: &Response) -> Result<(), CacheError> {
        let mut entries = self.entries();
        entries.retain(|(k, _)| k != key);
        entries.push((key.to_owned(), resp.clone()));
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<Response>, CacheError> {
        Ok(self
            .entries()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, r)| r.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        Ok(entries.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.entries().iter().map(|(k, _)| k.clone()).collect())
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries().iter().any(|(k, _)| k == key))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    caches: Mutex<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn caches(&self) -> MutexGuard<'_, HashMap<String, Arc<MemoryCache>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ResponseCache>, CacheError> {
        validate_name(name)?;
        let cache = self.caches().entry(name.to_owned()).or_default().clone();
        Ok(cache)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches().remove(name).is_some())
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = self.caches().keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}
