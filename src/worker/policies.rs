//! API 响应的两种缓存策略

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::net::{Fetcher, Request, Response};
use crate::storage::{CacheStorage, ResponseCache, evict_cache};

/// 写入缓存的时间（毫秒时间戳）
pub const CACHED_TIME_HEADER: &str = "x-cached-time";

/// 网络优先：成功就写缓存，网络失败才回退缓存
///
/// 401/404 说明缓存里的内容已不可信，主动失效。
#[derive(Clone)]
pub struct NetworkFirstCache {
    name: String,
    size_limit: usize,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl NetworkFirstCache {
    pub fn new(
        name: impl Into<String>,
        size_limit: usize,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            name: name.into(),
            size_limit,
            storage,
            fetcher,
        }
    }

    pub async fn handle_request(&self, req: Request) -> Response {
        if req.method != Method::GET {
            return pass_through(self.fetcher.as_ref(), req).await;
        }

        let key = req.url.to_string();
        match self.fetcher.fetch(req, CancellationToken::new()).await {
            Ok(resp) if resp.is_ok() => {
                if let Some(cache) = open(self.storage.as_ref(), &self.name).await {
                    match cache.put(&key, &resp).await {
                        Ok(()) => trim(cache.as_ref(), self.size_limit).await,
                        Err(e) => tracing::warn!(key = %key, err = %e, "API 响应写入缓存失败"),
                    }
                }
                resp
            }
            Ok(resp) => {
                if matches!(resp.status, StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND) {
                    invalidate(self.storage.as_ref(), &self.name, &key).await;
                }
                resp
            }
            Err(e) => {
                tracing::warn!(key = %key, err = %e, "API 请求失败，尝试回退缓存");
                cached(self.storage.as_ref(), &self.name, &key)
                    .await
                    .unwrap_or_else(|| Response::cache_layer_error(e))
            }
        }
    }
}

/// 缓存优先（带时效）：新鲜缓存直接返回并在后台刷新，否则阻塞等网络
///
/// 网络失败或 429/5xx 时保留并返回过期缓存，其余错误使缓存失效。
#[derive(Clone)]
pub struct CacheFirstCache {
    name: String,
    size_limit: usize,
    max_age: Duration,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheFirstCache {
    pub fn new(
        name: impl Into<String>,
        size_limit: usize,
        max_age: Duration,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            name: name.into(),
            size_limit,
            max_age,
            storage,
            fetcher,
        }
    }

    pub async fn handle_request(&self, req: Request) -> Response {
        if req.method != Method::GET {
            return pass_through(self.fetcher.as_ref(), req).await;
        }

        let key = req.url.to_string();
        let stale = cached(self.storage.as_ref(), &self.name, &key).await;
        if let Some(hit) = stale.as_ref()
            && is_fresh(hit, self.max_age, now_ms())
        {
            let this = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                if let Err(e) = this.revalidate(req, &key).await {
                    tracing::debug!(key = %key, err = %e, "后台刷新 API 缓存失败");
                }
            });
            return hit.clone();
        }

        match self.fetcher.fetch(req, CancellationToken::new()).await {
            Ok(resp) if resp.is_ok() => self.store(&key, resp).await,
            Ok(resp) if resp.status == StatusCode::TOO_MANY_REQUESTS || resp.status.is_server_error() => {
                tracing::warn!(key = %key, status = %resp.status, "API 暂时不可用，使用过期缓存");
                stale.unwrap_or(resp)
            }
            Ok(resp) => {
                invalidate(self.storage.as_ref(), &self.name, &key).await;
                resp
            }
            Err(e) => {
                tracing::warn!(key = %key, err = %e, "API 请求失败，尝试使用过期缓存");
                stale.unwrap_or_else(|| Response::cache_layer_error(e))
            }
        }
    }

    async fn revalidate(&self, req: Request, key: &str) -> Result<(), crate::error::FetchError> {
        let resp = self.fetcher.fetch(req, CancellationToken::new()).await?;
        if resp.is_ok() {
            self.store(key, resp).await;
        }
        Ok(())
    }

    /// 打上缓存时间后写入，返回带时间戳的响应
    async fn store(&self, key: &str, resp: Response) -> Response {
        let resp = resp.with_header(
            HeaderName::from_static(CACHED_TIME_HEADER),
            HeaderValue::from(now_ms()),
        );
        if let Some(cache) = open(self.storage.as_ref(), &self.name).await {
            match cache.put(key, &resp).await {
                Ok(()) => trim(cache.as_ref(), self.size_limit).await,
                Err(e) => tracing::warn!(key = %key, err = %e, "API 响应写入缓存失败"),
            }
        }
        resp
    }
}

pub fn is_fresh(resp: &Response, max_age: Duration, now_ms: i64) -> bool {
    let Some(cached_at) = resp
        .header_str(CACHED_TIME_HEADER)
        .and_then(|v| v.parse::<i64>().ok())
    else {
        return false;
    };
    let age = now_ms.saturating_sub(cached_at);
    age >= 0 && (age as u128) < max_age.as_millis()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn open(storage: &dyn CacheStorage, name: &str) -> Option<Arc<dyn ResponseCache>> {
    match storage.open(name).await {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(name, err = %e, "打开 API 缓存失败");
            None
        }
    }
}

async fn cached(storage: &dyn CacheStorage, name: &str, key: &str) -> Option<Response> {
    let cache = open(storage, name).await?;
    match cache.lookup(key).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(key, err = %e, "读取 API 缓存失败");
            None
        }
    }
}

async fn invalidate(storage: &dyn CacheStorage, name: &str, key: &str) {
    let Some(cache) = open(storage, name).await else {
        return;
    };
    match cache.delete(key).await {
        Ok(true) => tracing::debug!(key, "API 缓存已失效"),
        Ok(false) => {}
        Err(e) => tracing::warn!(key, err = %e, "API 缓存失效失败"),
    }
}

async fn trim(cache: &dyn ResponseCache, size_limit: usize) {
    if let Err(e) = evict_cache(cache, size_limit, |_| {}).await {
        tracing::warn!(err = %e, "API 缓存淘汰失败");
    }
}

async fn pass_through(fetcher: &dyn Fetcher, req: Request) -> Response {
    fetcher
        .fetch(req, CancellationToken::new())
        .await
        .unwrap_or_else(Response::cache_layer_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fresh() {
        let max_age = Duration::from_secs(60);
        let resp = Response::new(StatusCode::OK, "{}").with_header(
            HeaderName::from_static(CACHED_TIME_HEADER),
            HeaderValue::from(1_000_000i64),
        );
        assert!(is_fresh(&resp, max_age, 1_000_000 + 59_000));
        assert!(!is_fresh(&resp, max_age, 1_000_000 + 60_000));
        assert!(!is_fresh(&Response::new(StatusCode::OK, "{}"), max_age, 0));
    }
}
