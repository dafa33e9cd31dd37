//! 条目数上限淘汰
//!
//! 以插入顺序近似最近使用：最早写入的先被淘汰，读取不会刷新顺序。
//! 这是已知的近似，不是真正的 LRU。

use super::ResponseCache;
use crate::error::CacheError;

/// 把缓存条目数压回 `size_limit` 以内，返回被删除的 key
///
/// 溢出的最旧 key 按逆序删除；每个 key 独立处理，单个删除失败只记日志。
/// `on_delete` 只对真正删除成功的 key 调用。
pub async fn evict_cache<F>(
    cache: &dyn ResponseCache,
    size_limit: usize,
    mut on_delete: F,
) -> Result<Vec<String>, CacheError>
where
    F: FnMut(&str) + Send,
{
    let keys = cache.keys().await?;
    let overflow = keys.len().saturating_sub(size_limit);
    if overflow == 0 {
        return Ok(Vec::new());
    }

    tracing::debug!(count = keys.len(), size_limit, overflow, "缓存超限，开始淘汰");
    let mut evicted = Vec::with_capacity(overflow);
    for key in keys[..overflow].iter().rev() {
        match cache.delete(key).await {
            Ok(true) => {
                on_delete(key);
                evicted.push(key.clone());
            }
            Ok(false) => {
                tracing::debug!(key = %key, "淘汰时条目已不存在");
            }
            Err(e) => {
                tracing::warn!(key = %key, err = %e, "淘汰缓存条目失败");
            }
        }
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Response;
    use crate::storage::MemoryCache;
    use async_trait::async_trait;
    use reqwest::StatusCode;

    async fn filled(n: usize) -> MemoryCache {
        let cache = MemoryCache::default();
        let resp = Response::new(StatusCode::OK, "x");
        for i in 0..n {
            cache.put(&format!("k{i}"), &resp).await.unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn test_evicts_oldest_in_reverse_order() {
        let cache = filled(6).await;
        let mut notified = Vec::new();
        let evicted = evict_cache(&cache, 4, |k| notified.push(k.to_owned()))
            .await
            .unwrap();

        assert_eq!(evicted, vec!["k1", "k0"]);
        assert_eq!(notified, evicted);
        assert_eq!(cache.keys().await.unwrap(), vec!["k2", "k3", "k4", "k5"]);
    }

    #[tokio::test]
    async fn test_under_limit_is_noop() {
        let cache = filled(3).await;
        let evicted = evict_cache(&cache, 3, |_| panic!("nothing to evict"))
            .await
            .unwrap();
        assert!(evicted.is_empty());
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn test_bound_holds_for_any_limit() {
        for limit in 0..8 {
            let cache = filled(7).await;
            evict_cache(&cache, limit, |_| {}).await.unwrap();
            let keys = cache.keys().await.unwrap();
            assert!(keys.len() <= limit);
            let expected = (7usize.saturating_sub(keys.len())..7)
                .map(|i| format!("k{i}"))
                .collect::<Vec<_>>();
            assert_eq!(keys, expected);
        }
    }

    /// 删除某个 key 总是失败的缓存
    struct FlakyCache {
        inner: MemoryCache,
        broken_key: &'static str,
    }

    #[async_trait]
    impl ResponseCache for FlakyCache {
        async fn put(&self, key: &str, resp: &Response) -> Result<(), CacheError> {
            self.inner.put(key, resp).await
        }
        async fn lookup(&self, key: &str) -> Result<Option<Response>, CacheError> {
            self.inner.lookup(key).await
        }
        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            if key == self.broken_key {
                return Err(CacheError::Io(std::io::Error::other("disk on fire")));
            }
            self.inner.delete(key).await
        }
        async fn keys(&self) -> Result<Vec<String>, CacheError> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_stop_others() {
        let cache = FlakyCache {
            inner: filled(5).await,
            broken_key: "k1",
        };
        let mut notified = Vec::new();
        let evicted = evict_cache(&cache, 2, |k| notified.push(k.to_owned()))
            .await
            .unwrap();
        assert_eq!(evicted, vec!["k2", "k0"]);
        assert_eq!(notified, vec!["k2", "k0"]);
    }
}
