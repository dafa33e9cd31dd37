//! 带文件夹二级索引的缓存装饰器
//!
//! 记录按解码后的 pathname 存放，并按父文件夹建立索引，
//! 这样“某文件夹下缓存了哪些文件”不必扫描全部 key 再逐个解析 URL。

use async_trait::async_trait;
use reqwest::Url;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CacheStorage, ResponseCache};
use crate::error::CacheError;
use crate::net::{Response, decoded_path, split_path};

/// 父文件夹 -> 该文件夹下已缓存文件的解码 pathname
#[derive(Debug, Default)]
struct FolderIndex {
    by_folder: BTreeMap<String, BTreeSet<String>>,
}

impl FolderIndex {
    fn insert(&mut self, key: &str) {
        let Ok(url) = Url::parse(key) else {
            return;
        };
        let path = decoded_path(&url);
        let folder = split_path(&path).0.unwrap_or_default().to_owned();
        self.by_folder.entry(folder).or_default().insert(path);
    }

    fn remove(&mut self, key: &str) {
        let Ok(url) = Url::parse(key) else {
            return;
        };
        let path = decoded_path(&url);
        let folder = split_path(&path).0.unwrap_or_default();
        if let Some(paths) = self.by_folder.get_mut(folder) {
            paths.remove(&path);
            if paths.is_empty() {
                self.by_folder.remove(folder);
            }
        }
    }
}

pub struct IndexedCache {
    inner: Arc<dyn ResponseCache>,
    index: Mutex<FolderIndex>,
}

impl IndexedCache {
    /// 包装已有缓存并从其 key 重建索引
    pub async fn open(inner: Arc<dyn ResponseCache>) -> Result<Self, CacheError> {
        let mut index = FolderIndex::default();
        for key in inner.keys().await? {
            index.insert(&key);
        }
        Ok(Self {
            inner,
            index: Mutex::new(index),
        })
    }

    fn index(&self) -> MutexGuard<'_, FolderIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResponseCache for IndexedCache {
    async fn put(&self, key: &str, resp: &Response) -> Result<(), CacheError> {
        self.inner.put(key, resp).await?;
        self.index().insert(key);
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<Response>, CacheError> {
        self.inner.lookup(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let deleted = self.inner.delete(key).await?;
        if deleted {
            self.index().remove(key);
        }
        Ok(deleted)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.contains(key).await
    }

    async fn paths_in_folder(&self, folder: &str) -> Option<Vec<String>> {
        let index = self.index();
        Some(
            index
                .by_folder
                .get(folder)
                .map(|paths| paths.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }
}

/// 对指定命名空间返回带索引的缓存句柄，同名共享同一个句柄
pub struct IndexedStorage {
    inner: Arc<dyn CacheStorage>,
    indexed: HashSet<String>,
    opened: tokio::sync::Mutex<HashMap<String, Arc<IndexedCache>>>,
}

impl IndexedStorage {
    pub fn new<I, S>(inner: Arc<dyn CacheStorage>, indexed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            indexed: indexed.into_iter().map(Into::into).collect(),
            opened: tokio::sync::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheStorage for IndexedStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ResponseCache>, CacheError> {
        if !self.indexed.contains(name) {
            return self.inner.open(name).await;
        }

        // 异步锁：重建索引期间不允许同名并发打开出两份索引
        let mut opened = self.opened.lock().await;
        if let Some(cache) = opened.get(name) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(IndexedCache::open(self.inner.open(name).await?).await?);
        opened.insert(name.to_owned(), cache.clone());
        Ok(cache)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.opened.lock().await.remove(name);
        self.inner.delete(name).await
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        self.inner.names().await
    }
}
