//! 后台 worker：预取引擎、请求拦截、API/静态资源缓存
//!
//! 对外只暴露消息通道（`connect`）和拦截入口（`route`），内部状态全部挂在
//! `CacheWorker` 实例上，多个实例互不干扰。

mod audio;
mod clients;
mod policies;
mod range;
mod routes;
mod running;

pub use audio::{AudioCacheHandler, PrefetchJob};
pub use clients::{ClientId, ClientRegistry};
pub use policies::{CACHED_TIME_HEADER, CacheFirstCache, NetworkFirstCache, is_fresh};
pub use range::{build_response, parse_range};
pub use routes::{Route, classify};
pub use running::{FetchQueue, RunningItem, RunningItems};

use reqwest::Url;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;
use crate::messages::{ClientMessage, WorkerMessage};
use crate::net::{Fetcher, Request, Response, canonical_key};
use crate::storage::CacheStorage;

/// 静态命名空间前缀，后面接版本号
pub const STATIC_CACHE_PREFIX: &str = "static-";

const STATIC_RESOURCES: [&str; 9] = [
    "",
    "index.html",
    "global.css",
    "favicon.png",
    "bundle.css",
    "bundle.js",
    "app.webmanifest",
    "static/will_sleep_soon.mp3",
    "static/extended.mp3",
];

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 应用挂载路径，以 `/` 结尾
    pub path_prefix: String,
    /// 静态命名空间版本
    pub version: String,
    pub audio_cache_name: String,
    /// 音频缓存条目上限
    pub audio_cache_limit: usize,
    pub api_cache_name: String,
    pub api_cache_limit: usize,
    /// 设置后 API 改为带时效的缓存优先
    pub api_cache_max_age: Option<Duration>,
    /// 取消后强制清理去重记录的等待时间
    pub abort_grace: Duration,
    /// 相对 `path_prefix` 的静态资源，空串表示入口本身
    pub static_resources: Vec<String>,
    /// 开发模式只预缓存图标
    pub development: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            audio_cache_name: "audio".to_owned(),
            audio_cache_limit: env::var("AUDIOCACHE_AUDIO_CACHE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(1000),
            api_cache_name: "api".to_owned(),
            api_cache_limit: 1000,
            api_cache_max_age: env::var("AUDIOCACHE_API_CACHE_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs),
            abort_grace: Duration::from_secs(1),
            static_resources: STATIC_RESOURCES.iter().map(|s| (*s).to_owned()).collect(),
            development: false,
        }
    }
}

impl WorkerConfig {
    pub fn static_cache_name(&self) -> String {
        format!("{STATIC_CACHE_PREFIX}{}", self.version)
    }
}

/// 页面到 worker 的一条连接
#[derive(Debug)]
pub struct WorkerLink {
    pub client_id: ClientId,
    pub tx: mpsc::UnboundedSender<ClientMessage>,
    pub rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

enum ApiPolicy {
    NetworkFirst(NetworkFirstCache),
    CacheFirst(CacheFirstCache),
}

struct WorkerInner {
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<ClientRegistry>,
    audio: AudioCacheHandler,
    api: ApiPolicy,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct CacheWorker {
    inner: Arc<WorkerInner>,
}

impl CacheWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let clients = Arc::new(ClientRegistry::default());
        let audio = AudioCacheHandler::new(
            config.audio_cache_name.clone(),
            config.audio_cache_limit,
            storage.clone(),
            fetcher.clone(),
            FetchQueue::new(config.abort_grace),
            clients.clone(),
        );
        let api = match config.api_cache_max_age {
            Some(max_age) => ApiPolicy::CacheFirst(CacheFirstCache::new(
                config.api_cache_name.clone(),
                config.api_cache_limit,
                max_age,
                storage.clone(),
                fetcher.clone(),
            )),
            None => ApiPolicy::NetworkFirst(NetworkFirstCache::new(
                config.api_cache_name.clone(),
                config.api_cache_limit,
                storage.clone(),
                fetcher.clone(),
            )),
        };

        Self {
            inner: Arc::new(WorkerInner {
                config,
                storage,
                fetcher,
                clients,
                audio,
                api,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn audio(&self) -> &AudioCacheHandler {
        &self.inner.audio
    }

    /// 注册一个页面连接，并启动该连接的消息转发任务
    pub fn connect(&self) -> WorkerLink {
        let (client_id, rx) = self.inner.clients.register();
        let (tx, mut inbox) = mpsc::unbounded_channel::<ClientMessage>();
        let worker = self.clone();
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = inbox.recv() => {
                        let Some(msg) = msg else {
                            break;
                        };
                        worker.handle_message(client_id, msg);
                    }
                }
            }
            tracing::debug!(client = client_id, "页面连接已关闭");
        });

        tracing::debug!(client = client_id, "页面已连接");
        WorkerLink { client_id, tx, rx }
    }

    /// 处理一条页面消息
    ///
    /// 预取的去重登记在这里同步完成，之后的 Pong 一定包含刚登记的 key。
    pub fn handle_message(&self, from: ClientId, msg: ClientMessage) {
        match msg {
            ClientMessage::Prefetch {
                url,
                folder_position,
            } => {
                if let Some(job) = self.inner.audio.begin_prefetch(&url, folder_position) {
                    let audio = self.inner.audio.clone();
                    tokio::spawn(async move { audio.run_prefetch(job).await });
                }
            }
            ClientMessage::AbortLoads {
                path_prefix,
                keep_direct,
            } => self.inner.audio.abort(&path_prefix, keep_direct),
            ClientMessage::Ping => {
                let pending_audio = self.inner.audio.pending();
                if !self
                    .inner
                    .clients
                    .send_to(from, WorkerMessage::Pong { pending_audio })
                {
                    tracing::debug!(client = from, "Pong 发送失败，页面已断开");
                }
            }
        }
    }

    /// 请求拦截入口；`None` 表示不拦截，由宿主直接走网络
    pub async fn route(&self, req: Request) -> Option<Response> {
        let cfg = &self.inner.config;
        match classify(&cfg.path_prefix, &req.url, &cfg.static_resources) {
            Route::Audio => Some(self.inner.audio.handle_request(req).await),
            Route::Api => Some(match &self.inner.api {
                ApiPolicy::NetworkFirst(p) => p.handle_request(req).await,
                ApiPolicy::CacheFirst(p) => p.handle_request(req).await,
            }),
            Route::Static => Some(self.serve_static(req).await),
            Route::Other => None,
        }
    }

    /// 预缓存应用壳；单个资源失败只记日志
    pub async fn install(&self, origin: &Url) -> Result<usize, CacheError> {
        let cfg = &self.inner.config;
        let cache = self.inner.storage.open(&cfg.static_cache_name()).await?;
        let resources: Vec<&str> = if cfg.development {
            vec!["favicon.png"]
        } else {
            cfg.static_resources.iter().map(String::as_str).collect()
        };

        let mut cached = 0;
        for resource in resources {
            let url = match origin.join(&format!("{}{resource}", cfg.path_prefix)) {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(resource, err = %e, "静态资源地址无效");
                    continue;
                }
            };
            let key = canonical_key(&url);
            match self
                .inner
                .fetcher
                .fetch(Request::get(url).bypassing_cache(), CancellationToken::new())
                .await
            {
                Ok(resp) if resp.is_ok() => match cache.put(&key, &resp).await {
                    Ok(()) => cached += 1,
                    Err(e) => tracing::warn!(key = %key, err = %e, "静态资源写入缓存失败"),
                },
                Ok(resp) => tracing::warn!(key = %key, status = %resp.status, "静态资源下载失败"),
                Err(e) => tracing::warn!(key = %key, err = %e, "静态资源下载失败"),
            }
        }
        tracing::info!(cache = %cfg.static_cache_name(), cached, "静态资源预缓存完成");
        Ok(cached)
    }

    /// 删除旧版本的静态命名空间
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let current = self.inner.config.static_cache_name();
        let mut removed = Vec::new();
        for name in self.inner.storage.names().await? {
            if name.starts_with(STATIC_CACHE_PREFIX) && name != current {
                self.inner.storage.delete(&name).await?;
                tracing::info!(cache = %name, "删除旧版本静态缓存");
                removed.push(name);
            }
        }
        Ok(removed)
    }

    pub fn pending_audio(&self) -> Vec<String> {
        self.inner.audio.pending()
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// 取消所有进行中的拉取并断开所有页面
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.audio.shutdown();
        self.inner.clients.clear();
        tracing::info!("worker 已关闭");
    }

    async fn serve_static(&self, req: Request) -> Response {
        let key = canonical_key(&req.url);
        match self
            .inner
            .storage
            .open(&self.inner.config.static_cache_name())
            .await
        {
            Ok(cache) => match cache.lookup(&key).await {
                Ok(Some(hit)) => return hit,
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, err = %e, "读取静态缓存失败"),
            },
            Err(e) => tracing::warn!(err = %e, "打开静态缓存失败"),
        }
        self.inner
            .fetcher
            .fetch(req, CancellationToken::new())
            .await
            .unwrap_or_else(Response::cache_layer_error)
    }
}
