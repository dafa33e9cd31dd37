//! 控制器 actor：把同步状态机挂到 tokio 任务上

use reqwest::Url;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};

use super::QueueConfig;
use super::controller::QueueController;
use super::item::{PlaybackPosition, PrefetchRequest};
use super::listeners::{CacheListener, ListenerId, SizeListener};
use crate::error::{AppError, CacheError, FetchError};
use crate::messages::CachedItem;
use crate::net::canonical_key;
use crate::storage::{CacheStorage, cached_paths};
use crate::worker::WorkerLink;

pub enum QueueCommand {
    CacheAhead {
        requests: Vec<PrefetchRequest>,
        playing: Option<PlaybackPosition>,
    },
    CancelPendingLoads {
        path_prefix: String,
        including_running: bool,
        keep_direct: bool,
    },
    EnsureStarted,
    QueueSize(oneshot::Sender<usize>),
    AddListener(CacheListener, oneshot::Sender<ListenerId>),
    OnQueueSizeChanged(SizeListener, oneshot::Sender<ListenerId>),
    RemoveListener(ListenerId),
    Shutdown,
}

/// 控制器句柄；查询类操作直接读持久缓存，不经过队列
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueCommand>,
    storage: Arc<dyn CacheStorage>,
    audio_cache_name: String,
    path_prefix: String,
}

pub fn spawn_queue_controller(
    config: QueueConfig,
    storage: Arc<dyn CacheStorage>,
    link: WorkerLink,
) -> QueueHandle {
    let (tx, rx) = mpsc::channel::<QueueCommand>(256);
    let handle = QueueHandle {
        tx,
        storage,
        audio_cache_name: config.audio_cache_name.clone(),
        path_prefix: config.path_prefix.clone(),
    };

    let WorkerLink {
        client_id,
        tx: to_worker,
        rx: from_worker,
    } = link;
    tracing::info!(
        client = client_id,
        max_parallel = config.max_parallel_loads,
        "预取队列控制器已启动"
    );
    tokio::spawn(run(QueueController::new(config, to_worker), rx, from_worker));
    handle
}

async fn run(
    mut controller: QueueController,
    mut rx_cmd: mpsc::Receiver<QueueCommand>,
    mut rx_worker: mpsc::UnboundedReceiver<crate::messages::WorkerMessage>,
) {
    let mut ticker: Option<Interval> = None;

    loop {
        tokio::select! {
            cmd = rx_cmd.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                match cmd {
                    QueueCommand::CacheAhead { requests, playing } => {
                        controller.cache_ahead(requests, playing);
                    }
                    QueueCommand::CancelPendingLoads { path_prefix, including_running, keep_direct } => {
                        controller.cancel_pending_loads(&path_prefix, including_running, keep_direct);
                    }
                    QueueCommand::EnsureStarted => controller.ensure_started(),
                    QueueCommand::QueueSize(reply) => {
                        let _ = reply.send(controller.size());
                    }
                    QueueCommand::AddListener(l, reply) => {
                        let _ = reply.send(controller.listeners_mut().add(l));
                    }
                    QueueCommand::OnQueueSizeChanged(l, reply) => {
                        let _ = reply.send(controller.listeners_mut().add_size(l));
                    }
                    QueueCommand::RemoveListener(id) => {
                        controller.listeners_mut().remove(id);
                    }
                    QueueCommand::Shutdown => {
                        controller.shutdown();
                        break;
                    }
                }
            }
            msg = rx_worker.recv() => {
                let Some(msg) = msg else {
                    tracing::warn!("worker 连接已关闭");
                    break;
                };
                controller.handle_worker_message(msg);
            }
            _ = next_tick(&mut ticker) => controller.poll_tick(),
        }

        sync_ticker(&mut ticker, &controller);
    }

    controller.shutdown();
    tracing::info!("预取队列控制器已退出");
}

/// 让定时器跟随心跳状态：开始轮询时创建，停止时丢弃
fn sync_ticker(ticker: &mut Option<Interval>, controller: &QueueController) {
    match (controller.is_polling(), ticker.is_some()) {
        (true, false) => {
            let mut interval = tokio::time::interval(controller.config().ping_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *ticker = Some(interval);
        }
        (false, true) => *ticker = None,
        _ => {}
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl QueueHandle {
    async fn send(&self, cmd: QueueCommand) -> Result<(), AppError> {
        self.tx.send(cmd).await.map_err(|_| AppError::ControllerClosed)
    }

    pub async fn cache_ahead(
        &self,
        requests: Vec<PrefetchRequest>,
        playing: Option<PlaybackPosition>,
    ) -> Result<(), AppError> {
        self.send(QueueCommand::CacheAhead { requests, playing }).await
    }

    pub async fn cancel_pending_loads(
        &self,
        path_prefix: impl Into<String>,
        including_running: bool,
        keep_direct: bool,
    ) -> Result<(), AppError> {
        self.send(QueueCommand::CancelPendingLoads {
            path_prefix: path_prefix.into(),
            including_running,
            keep_direct,
        })
        .await
    }

    pub async fn ensure_started(&self) -> Result<(), AppError> {
        self.send(QueueCommand::EnsureStarted).await
    }

    /// 排队 + 进行中
    pub async fn queue_size(&self) -> Result<usize, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::QueueSize(reply)).await?;
        rx.await.map_err(|_| AppError::ControllerClosed)
    }

    pub async fn add_listener(&self, listener: CacheListener) -> Result<ListenerId, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::AddListener(listener, reply)).await?;
        rx.await.map_err(|_| AppError::ControllerClosed)
    }

    pub async fn on_queue_size_changed(&self, listener: SizeListener) -> Result<ListenerId, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::OnQueueSizeChanged(listener, reply)).await?;
        rx.await.map_err(|_| AppError::ControllerClosed)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> Result<(), AppError> {
        self.send(QueueCommand::RemoveListener(id)).await
    }

    /// 停止 actor；之后所有调用返回 `ControllerClosed`
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.send(QueueCommand::Shutdown).await
    }

    /// 已缓存时返回缓存条目
    pub async fn get_cached_url(&self, url: &str) -> Result<Option<CachedItem>, AppError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        let key = canonical_key(&parsed);
        let cache = self.storage.open(&self.audio_cache_name).await?;
        if cache.contains(&key).await? {
            return Ok(Some(CachedItem::new(key, url)));
        }
        Ok(None)
    }

    /// 某个合集文件夹下已缓存的文件，路径相对于合集的音频根
    pub async fn get_cached_paths(&self, collection: u32, folder: &str) -> Result<Vec<String>, AppError> {
        let root = format!("{}{collection}/audio/", self.path_prefix);
        let folder = format!("{root}{}", folder.trim_matches('/'));
        let cache = self.storage.open(&self.audio_cache_name).await?;
        let paths = cached_paths(cache.as_ref(), &folder).await?;
        Ok(paths
            .into_iter()
            .filter_map(|p| p.strip_prefix(&root).map(str::to_owned))
            .collect())
    }

    /// 删除整个音频命名空间
    pub async fn clear_cache(&self) -> Result<(), CacheError> {
        if self.storage.delete(&self.audio_cache_name).await? {
            tracing::info!(cache = %self.audio_cache_name, "音频缓存已清空");
        }
        Ok(())
    }
}
