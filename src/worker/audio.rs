//! 音频缓存：后台预取 + 播放请求拦截
//!
//! 预取和直连共用一张去重表和一个持久命名空间。

use reqwest::header::RANGE;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::clients::ClientRegistry;
use super::range::build_response;
use super::running::FetchQueue;
use crate::error::{CacheError, FetchError};
use crate::messages::{CachedItem, FailureKind, PrefetchFailure, WorkerMessage};
use crate::net::{Fetcher, Request, Response, canonical_key};
use crate::storage::{CacheStorage, ResponseCache, evict_cache};

/// 已登记、尚未开始的预取
#[derive(Debug)]
pub struct PrefetchJob {
    id: u64,
    key: String,
    url: Url,
    original_url: String,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct AudioCacheHandler {
    cache_name: String,
    size_limit: usize,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    running: FetchQueue,
    clients: Arc<ClientRegistry>,
}

impl AudioCacheHandler {
    pub fn new(
        cache_name: impl Into<String>,
        size_limit: usize,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        running: FetchQueue,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            size_limit,
            storage,
            fetcher,
            running,
            clients,
        }
    }

    /// worker 侧权威的进行中 key 列表
    pub fn pending(&self) -> Vec<String> {
        self.running.keys()
    }

    pub fn abort(&self, path_prefix: &str, keep_direct: bool) {
        let n = self.running.abort(path_prefix, keep_direct);
        tracing::debug!(path_prefix, keep_direct, aborted = n, "处理 AbortLoads");
    }

    pub fn shutdown(&self) {
        self.running.cancel_all();
    }

    /// 预取第一步：同步完成去重登记
    ///
    /// 已有同 key 的进行中拉取时广播 `Skipped` 并返回 `None`。
    pub fn begin_prefetch(
        &self,
        original_url: &str,
        folder_position: Option<u32>,
    ) -> Option<PrefetchJob> {
        let url = match Url::parse(original_url) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(url = original_url, err = %e, "预取 URL 无效");
                self.clients.broadcast(WorkerMessage::PrefetchError {
                    cached_url: original_url.to_owned(),
                    original_url: original_url.to_owned(),
                    error: FetchError::InvalidUrl(e.to_string()).to_failure(),
                });
                return None;
            }
        };
        let key = canonical_key(&url);

        let token = CancellationToken::new();
        let Some(id) = self
            .running
            .try_add(&url, token.clone(), false, folder_position)
        else {
            tracing::debug!(key = %key, "已在加载中，跳过预取");
            self.clients
                .broadcast(WorkerMessage::Skipped(CachedItem::new(key, original_url)));
            return None;
        };

        Some(PrefetchJob {
            id,
            key,
            url,
            original_url: original_url.to_owned(),
            token,
        })
    }

    /// 预取第二步：拉取、写缓存、广播、淘汰
    pub async fn run_prefetch(&self, job: PrefetchJob) {
        let PrefetchJob {
            id,
            key,
            url,
            original_url,
            token,
        } = job;

        let req = Request::get(url).bypassing_cache();
        let outcome = match self.fetcher.fetch(req, token).await {
            Ok(resp) if resp.is_ok() => match self.store(&key, &resp).await {
                Ok(cache) => {
                    tracing::debug!(key = %key, bytes = resp.body.len(), "预取已缓存");
                    Ok(cache)
                }
                Err(e) => {
                    tracing::error!(key = %key, err = %e, "预取写入缓存失败");
                    Err(PrefetchFailure {
                        kind: FailureKind::Cache,
                        message: e.to_string(),
                    })
                }
            },
            Ok(resp) => {
                tracing::error!(key = %key, status = %resp.status, "预取失败");
                Err(FetchError::Http {
                    status: resp.status,
                    url: original_url.clone(),
                }
                .to_failure())
            }
            Err(e) => {
                if e.is_abort() {
                    tracing::debug!(key = %key, "预取已取消");
                } else {
                    tracing::error!(key = %key, err = %e, "预取失败");
                }
                Err(e.to_failure())
            }
        };

        // 通知页面之前先清掉去重记录
        if !self.running.delete_id(id) {
            tracing::debug!(key = %key, "去重记录已被提前清理");
        }

        match outcome {
            Ok(cache) => {
                self.clients.broadcast(WorkerMessage::PrefetchCached(CachedItem::new(
                    key.clone(),
                    original_url,
                )));
                self.evict(cache.as_ref()).await;
            }
            Err(failure) => self.broadcast_error(&key, original_url, failure),
        }
    }

    pub async fn handle_prefetch(&self, original_url: &str, folder_position: Option<u32>) {
        if let Some(job) = self.begin_prefetch(original_url, folder_position) {
            self.run_prefetch(job).await;
        }
    }

    /// 拦截播放端的音频请求
    ///
    /// 缓存只是副作用：写缓存出错只记日志，播放端总能拿到一个响应，最坏是 555。
    pub async fn handle_request(&self, req: Request) -> Response {
        let cache = match self.storage.open(&self.cache_name).await {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::error!(err = %e, "打开音频缓存失败，直接走网络");
                None
            }
        };

        let key = canonical_key(&req.url);
        if let Some(cache) = cache.as_ref()
            && let Some(cached) = self.lookup(cache.as_ref(), &req.url, &key).await
        {
            tracing::debug!(key = %key, range = ?req.header_str(RANGE), "命中音频缓存");
            return build_response(cached, req.header_str(RANGE));
        }

        if self.running.has(&key) {
            tracing::debug!(key = %key, "同一资源已在拉取中，直接透传");
            return self.pass_through(req).await;
        }

        let token = CancellationToken::new();
        let Some(id) = self
            .running
            .try_add(&req.url, token.clone(), true, req.folder_position())
        else {
            return self.pass_through(req).await;
        };

        let upstream = req.without_header(&RANGE);
        let original_url = req.url.to_string();
        match self.fetcher.fetch(upstream, token).await {
            Ok(resp) if resp.status == StatusCode::OK => {
                let this = self.clone();
                let to_cache = resp.clone();
                tokio::spawn(async move {
                    this.cache_direct(id, key, original_url, to_cache).await;
                });
                resp
            }
            Ok(resp) => {
                tracing::warn!(key = %key, status = %resp.status, "直连请求返回非 200，不缓存");
                self.running.delete_id(id);
                resp
            }
            Err(e) => {
                self.running.delete_id(id);
                if e.is_abort() {
                    tracing::debug!(key = %key, "直连请求已取消");
                } else {
                    tracing::error!(key = %key, err = %e, "直连请求失败");
                }
                Response::cache_layer_error(e)
            }
        }
    }

    async fn cache_direct(&self, id: u64, key: String, original_url: String, resp: Response) {
        let stored = self.store(&key, &resp).await;
        self.running.delete_id(id);
        match stored {
            Ok(cache) => {
                tracing::debug!(key = %key, bytes = resp.body.len(), "直连响应已缓存");
                self.clients.broadcast(WorkerMessage::ActualCached(CachedItem::new(
                    key.clone(),
                    original_url,
                )));
                self.evict(cache.as_ref()).await;
            }
            Err(e) => tracing::error!(key = %key, err = %e, "直连响应写入缓存失败"),
        }
    }

    async fn pass_through(&self, req: Request) -> Response {
        let url = req.url.to_string();
        match self.fetcher.fetch(req, CancellationToken::new()).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(url = %url, err = %e, "透传请求失败");
                Response::cache_layer_error(e)
            }
        }
    }

    /// 先按原始 URL 精确匹配，再按规范 key
    async fn lookup(&self, cache: &dyn ResponseCache, url: &Url, key: &str) -> Option<Response> {
        let exact = url.as_str();
        let candidates = if exact == key {
            vec![key]
        } else {
            vec![exact, key]
        };
        for candidate in candidates {
            match cache.lookup(candidate).await {
                Ok(Some(resp)) => return Some(resp),
                Ok(None) => {}
                Err(e) => tracing::warn!(key = candidate, err = %e, "读取音频缓存失败"),
            }
        }
        None
    }

    async fn store(&self, key: &str, resp: &Response) -> Result<Arc<dyn ResponseCache>, CacheError> {
        let cache = self.storage.open(&self.cache_name).await?;
        cache.put(key, resp).await?;
        Ok(cache)
    }

    async fn evict(&self, cache: &dyn ResponseCache) {
        let clients = self.clients.clone();
        let result = evict_cache(cache, self.size_limit, |key| {
            clients.broadcast(WorkerMessage::Deleted(CachedItem::new(key, key)));
        })
        .await;
        match result {
            Ok(evicted) if !evicted.is_empty() => {
                tracing::info!(evicted = evicted.len(), limit = self.size_limit, "音频缓存已淘汰旧条目");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(err = %e, "音频缓存淘汰失败"),
        }
    }

    fn broadcast_error(&self, key: &str, original_url: String, error: PrefetchFailure) {
        self.clients.broadcast(WorkerMessage::PrefetchError {
            cached_url: key.to_owned(),
            original_url,
            error,
        });
    }
}
