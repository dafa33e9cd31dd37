use audiocache::cli::{Cli, Command};
use audiocache::error::AppError;
use audiocache::logging;
use audiocache::messages::{CacheEvent, EventType};
use audiocache::net::{Fetcher, HttpFetcher, Request};
use audiocache::queue::{PrefetchRequest, QueueHandle, spawn_queue_controller};
use audiocache::settings::{default_data_dir, load_settings};
use audiocache::storage::{CacheStorage, DiskStorage, IndexedStorage, MemoryStorage};
use audiocache::worker::CacheWorker;
use clap::Parser;
use reqwest::header::{HeaderValue, RANGE};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let _log_guard = logging::init(
        &data_dir,
        logging::LogConfig {
            dir: cli.log_dir.clone(),
            filter: cli.log_filter.clone(),
        },
    );
    tracing::info!(data_dir = %data_dir.display(), memory = cli.memory, "audiocache 启动");

    let settings = load_settings(&data_dir);
    let worker_config = settings.worker_config();
    let mut queue_config = settings.queue_config();

    let base: Arc<dyn CacheStorage> = if cli.memory {
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(DiskStorage::new(&data_dir)?)
    };
    let storage: Arc<dyn CacheStorage> = Arc::new(IndexedStorage::new(
        base,
        [worker_config.audio_cache_name.clone()],
    ));
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&settings.http_config()));
    let worker = CacheWorker::new(worker_config, storage.clone(), fetcher);
    worker.activate().await?;

    let result = match cli.command {
        Command::Prefetch {
            urls,
            low,
            parallel,
        } => {
            if let Some(n) = parallel.filter(|n| *n > 0) {
                queue_config.max_parallel_loads = n;
            }
            let queue = spawn_queue_controller(queue_config, storage, worker.connect());
            let result = prefetch(&queue, urls, low).await;
            let _ = queue.shutdown().await;
            result
        }
        Command::Get { url, range } => get(&worker, &url, range.as_deref()).await,
        Command::Ls { collection, folder } => {
            let queue = spawn_queue_controller(queue_config, storage, worker.connect());
            let paths = queue.get_cached_paths(collection, &folder).await;
            let _ = queue.shutdown().await;
            for p in paths? {
                println!("{p}");
            }
            Ok(())
        }
        Command::Clear => {
            let queue = spawn_queue_controller(queue_config, storage, worker.connect());
            let result = queue.clear_cache().await.map_err(AppError::from);
            let _ = queue.shutdown().await;
            if result.is_ok() {
                println!("音频缓存已清空");
            }
            result
        }
    };

    worker.shutdown();
    result
}

async fn prefetch(queue: &QueueHandle, urls: Vec<String>, low: bool) -> Result<(), AppError> {
    let total = urls.len();
    let cached = Arc::new(AtomicUsize::new(0));
    let (size_tx, mut size_rx) = watch::channel(0usize);

    let counter = cached.clone();
    queue
        .add_listener(Arc::new(move |evt: &CacheEvent| {
            if evt.kind == EventType::FileCached {
                counter.fetch_add(1, Ordering::Relaxed);
                println!("已缓存: {}", evt.item.original_url);
            }
        }))
        .await?;
    queue
        .on_queue_size_changed(Arc::new(move |n: usize| {
            let _ = size_tx.send(n);
        }))
        .await?;

    let requests = urls
        .into_iter()
        .map(|url| {
            if low {
                PrefetchRequest::low(url)
            } else {
                PrefetchRequest::from(url)
            }
        })
        .collect();
    queue.cache_ahead(requests, None).await?;

    if queue.queue_size().await? > 0 {
        tokio::select! {
            r = size_rx.wait_for(|n| *n == 0) => {
                r.map_err(|_| AppError::ControllerClosed)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到中断信号，取消剩余预取");
                queue.cancel_pending_loads("", true, false).await?;
            }
        }
    }

    let ok = cached.load(Ordering::Relaxed);
    println!("完成: 缓存 {ok} 个，失败 {} 个", total.saturating_sub(ok));
    Ok(())
}

async fn get(worker: &CacheWorker, url: &str, range: Option<&str>) -> Result<(), AppError> {
    let mut req = Request::parse(url)?;
    if let Some(range) = range {
        let value = HeaderValue::from_str(range).map_err(|e| AppError::Other(format!("Range 无效: {e}")))?;
        req = req.with_header(RANGE, value);
    }

    let Some(resp) = worker.route(req).await else {
        println!("该地址不经过缓存层");
        return Ok(());
    };

    println!("{}", resp.status);
    for (name, value) in &resp.headers {
        println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
    }
    println!("body: {} bytes", resp.body.len());

    // 直连拉取的写缓存在后台进行，等它结束再退出
    while !worker.pending_audio().is_empty() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}
