//! 持久缓存抽象
//!
//! `CacheStorage` 是命名空间注册表，`ResponseCache` 是单个命名空间。
//! 所有实现都必须按插入顺序枚举 key，淘汰策略依赖这一点。

mod disk;
mod evict;
mod indexed;
mod memory;

pub use disk::DiskStorage;
pub use evict::evict_cache;
pub use indexed::{IndexedCache, IndexedStorage};
pub use memory::{MemoryCache, MemoryStorage};

use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;

use crate::error::CacheError;
use crate::net::{Response, decoded_path, split_path};

#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// 写入（同 key 覆盖，并移动到插入顺序末尾）
    async fn put(&self, key: &str, resp: &Response) -> Result<(), CacheError>;

    async fn lookup(&self, key: &str) -> Result<Option<Response>, CacheError>;

    /// 返回是否真的删除了条目
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// 按插入顺序（最旧在前）
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lookup(key).await?.is_some())
    }

    /// 二级索引查询；`None` 表示该实现没有索引，调用方应退回全量扫描
    async fn paths_in_folder(&self, _folder: &str) -> Option<Vec<String>> {
        None
    }
}

#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn open(&self, name: &str) -> Result<Arc<dyn ResponseCache>, CacheError>;

    /// 删除整个命名空间，返回是否存在过
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    async fn names(&self) -> Result<Vec<String>, CacheError>;
}

/// 列出某个文件夹（解码后的 pathname）下已缓存文件的完整路径
///
/// 优先走二级索引，没有索引时全量扫描 key 并按路径过滤。
pub async fn cached_paths(
    cache: &dyn ResponseCache,
    folder: &str,
) -> Result<Vec<String>, CacheError> {
    let folder = folder.trim_end_matches('/');
    if let Some(paths) = cache.paths_in_folder(folder).await {
        return Ok(paths);
    }

    let mut out = cache
        .keys()
        .await?
        .into_iter()
        .filter_map(|key| Url::parse(&key).ok())
        .map(|url| decoded_path(&url))
        .filter(|path| split_path(path).0 == Some(folder))
        .collect::<Vec<_>>();
    out.sort();
    out.dedup();
    Ok(out)
}

pub(crate) fn validate_name(name: &str) -> Result<(), CacheError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(CacheError::InvalidName(name.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[tokio::test]
    async fn test_cached_paths_scan_fallback() {
        let cache = MemoryCache::default();
        let resp = Response::new(StatusCode::OK, "x");
        for key in [
            "http://h/1/audio/Book%20A/01.mp3",
            "http://h/1/audio/Book%20A/02.mp3",
            "http://h/1/audio/Book%20A/sub/03.mp3",
            "http://h/1/audio/Book%20B/01.mp3",
        ] {
            cache.put(key, &resp).await.unwrap();
        }

        let paths = cached_paths(&cache, "/1/audio/Book A/").await.unwrap();
        assert_eq!(
            paths,
            vec!["/1/audio/Book A/01.mp3", "/1/audio/Book A/02.mp3"]
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("audio").is_ok());
        assert!(validate_name("static-0.3.2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../x").is_err());
        assert!(validate_name("..").is_err());
    }
}
