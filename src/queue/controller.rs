//! 队列控制器本体（同步状态机，由 actor 驱动）

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tokio::sync::mpsc;

use super::QueueConfig;
use super::heartbeat::Heartbeat;
use super::item::{PlaybackPosition, PrefetchRequest, QueueItem};
use super::listeners::ListenerRegistry;
use crate::messages::{CacheEvent, ClientMessage, WorkerMessage};
use crate::net::{folder_of, path_matches_prefix};

pub struct QueueController {
    config: QueueConfig,
    to_worker: mpsc::UnboundedSender<ClientMessage>,
    queue: VecDeque<QueueItem>,
    /// 已交给 worker、尚未收到结果的预取，按 key 索引
    in_flight: BTreeMap<String, QueueItem>,
    /// 最近一次 Ping 之后才派发的 key，那次 Ping 的 Pong 里不可能有它们
    sent_after_ping: BTreeSet<String>,
    heartbeat: Heartbeat,
    listeners: ListenerRegistry,
    last_size: usize,
}

impl QueueController {
    pub fn new(config: QueueConfig, to_worker: mpsc::UnboundedSender<ClientMessage>) -> Self {
        let heartbeat = Heartbeat::new(config.idle_pongs_before_stop);
        Self {
            config,
            to_worker,
            queue: VecDeque::new(),
            in_flight: BTreeMap::new(),
            sent_after_ping: BTreeSet::new(),
            heartbeat,
            listeners: ListenerRegistry::default(),
            last_size: 0,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    pub fn is_polling(&self) -> bool {
        self.heartbeat.is_polling()
    }

    /// 排队 + 进行中
    pub fn size(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    pub fn pending_urls(&self) -> Vec<String> {
        self.queue.iter().map(|i| i.url.clone()).collect()
    }

    pub fn in_flight_keys(&self) -> Vec<String> {
        self.in_flight.keys().cloned().collect()
    }

    /// 合并一批预取请求
    ///
    /// 新的高优先级项排在最前，上一批剩下的低优先级项移到最后；
    /// 切换文件夹时取消旧文件夹的预取，同文件夹里落后于播放位置的预取也取消。
    pub fn cache_ahead(&mut self, requests: Vec<PrefetchRequest>, playing: Option<PlaybackPosition>) {
        if self.queue.len() >= self.config.queue_capacity {
            tracing::error!(
                capacity = self.config.queue_capacity,
                "预取队列已满，拒绝新的请求"
            );
            return;
        }

        let items: Vec<QueueItem> = requests
            .into_iter()
            .filter_map(|req| {
                let url = req.url().to_owned();
                QueueItem::try_from(req)
                    .map_err(|e| tracing::warn!(url = %url, err = %e, "预取 URL 无效，忽略"))
                    .ok()
            })
            .collect();

        self.abort_other_folders(&items);
        if let Some(playing) = playing.as_ref() {
            self.abort_behind(playing);
        }

        let (new_high, new_low): (Vec<_>, Vec<_>) = items.into_iter().partition(|i| !i.low_priority);
        let (old_high, old_low): (Vec<_>, Vec<_>) =
            self.queue.drain(..).partition(|i| !i.low_priority);
        let old_high = if new_high.is_empty() { old_high } else { Vec::new() };

        let mut seen = BTreeSet::new();
        for item in old_high
            .into_iter()
            .chain(new_high)
            .chain(new_low)
            .chain(old_low)
        {
            if self.in_flight.contains_key(&item.key) {
                tracing::debug!(key = %item.key, "已在加载中，不再排队");
                continue;
            }
            if !seen.insert(item.key.clone()) {
                continue;
            }
            self.queue.push_back(item);
        }

        if self.queue.len() > self.config.queue_capacity {
            let dropped = self.queue.len() - self.config.queue_capacity;
            self.queue.truncate(self.config.queue_capacity);
            tracing::warn!(dropped, "预取队列超出上限，丢弃队尾");
        }

        self.report_size();
        self.process_queue();
    }

    /// 删除匹配前缀的排队项；空前缀清空队列。可选地让 worker 取消进行中的拉取
    pub fn cancel_pending_loads(&mut self, path_prefix: &str, including_running: bool, keep_direct: bool) {
        if path_prefix.is_empty() {
            self.queue.clear();
        } else {
            self.queue.retain(|item| match reqwest::Url::parse(&item.url) {
                Ok(url) => !path_matches_prefix(&url, path_prefix),
                Err(_) => false,
            });
        }
        if including_running {
            self.send_abort(path_prefix, keep_direct);
        }
        self.report_size();
    }

    /// 处理 worker 消息，返回需要通知监听者的事件
    pub fn handle_worker_message(&mut self, msg: WorkerMessage) -> Option<CacheEvent> {
        match msg {
            WorkerMessage::Pong { pending_audio } => {
                self.on_pong(pending_audio);
                None
            }
            WorkerMessage::PrefetchCached(item) => {
                tracing::debug!(key = %item.cached_url, "预取完成");
                self.finish(&item.cached_url);
                Some(self.emit(CacheEvent::cached(item)))
            }
            WorkerMessage::ActualCached(item) => {
                tracing::debug!(key = %item.cached_url, "播放请求已写入缓存");
                Some(self.emit(CacheEvent::cached(item)))
            }
            WorkerMessage::Skipped(item) => {
                tracing::debug!(key = %item.cached_url, "worker 已在加载，跳过");
                self.finish(&item.cached_url);
                None
            }
            WorkerMessage::Deleted(item) => Some(self.emit(CacheEvent::deleted(item))),
            WorkerMessage::PrefetchError {
                cached_url,
                original_url,
                error,
            } => {
                if error.is_abort() {
                    tracing::debug!(key = %cached_url, "预取已取消");
                } else {
                    tracing::error!(url = %original_url, err = %error.message, "预取失败");
                }
                self.finish(&cached_url);
                None
            }
        }
    }

    /// 心跳对账；worker 的列表是权威的，但只对 Ping 之前派发的 key 有效
    pub fn on_pong(&mut self, pending_audio: Vec<String>) {
        let idle = pending_audio.is_empty() && self.in_flight.is_empty() && self.queue.is_empty();

        let pending: BTreeSet<&str> = pending_audio.iter().map(String::as_str).collect();
        let lost: Vec<String> = self
            .in_flight
            .keys()
            .filter(|k| !pending.contains(k.as_str()) && !self.sent_after_ping.contains(*k))
            .cloned()
            .collect();
        if !lost.is_empty() {
            if pending.is_empty() {
                tracing::warn!(
                    lost = lost.len(),
                    "worker 没有进行中的预取，可能已被重启，恢复队列"
                );
            }
            for key in &lost {
                if !pending.is_empty() {
                    tracing::warn!(key = %key, "worker 已不再加载该文件，视为丢失");
                }
                self.in_flight.remove(key);
            }
            self.report_size();
        }

        if self.heartbeat.on_pong(idle) {
            tracing::debug!("连续空闲，停止心跳");
        }
        self.process_queue();
    }

    /// 定时器触发：轮询中则发 Ping
    pub fn poll_tick(&mut self) {
        if !self.heartbeat.is_polling() {
            return;
        }
        if self.to_worker.send(ClientMessage::Ping).is_err() {
            tracing::warn!("worker 连接已断开，停止心跳");
            self.heartbeat.stop();
            return;
        }
        self.sent_after_ping.clear();
    }

    pub fn ensure_started(&mut self) {
        if self.heartbeat.start() {
            tracing::debug!("开始心跳轮询");
        }
    }

    /// 在并发额度内从队首派发
    pub fn process_queue(&mut self) {
        while self.in_flight.len() < self.config.max_parallel_loads {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            if self.in_flight.contains_key(&item.key) {
                continue;
            }
            let msg = ClientMessage::Prefetch {
                url: item.url.clone(),
                folder_position: item.folder_position,
            };
            if self.to_worker.send(msg).is_err() {
                tracing::error!(url = %item.url, "worker 连接已断开，无法派发预取");
                self.queue.push_front(item);
                break;
            }
            tracing::debug!(url = %item.url, "派发预取");
            self.sent_after_ping.insert(item.key.clone());
            self.in_flight.insert(item.key.clone(), item);
            self.ensure_started();
        }
        self.report_size();
    }

    /// 停止心跳并清理所有状态和订阅者
    pub fn shutdown(&mut self) {
        self.heartbeat.stop();
        self.queue.clear();
        self.in_flight.clear();
        self.sent_after_ping.clear();
        self.listeners.clear();
        self.last_size = 0;
    }

    fn finish(&mut self, key: &str) {
        self.sent_after_ping.remove(key);
        if self.in_flight.remove(key).is_none() {
            // 广播给所有页面，别的页面发起的预取也会到这里
            tracing::debug!(key, "不在本地进行中记录里");
        }
        self.report_size();
        self.process_queue();
    }

    fn emit(&self, event: CacheEvent) -> CacheEvent {
        self.listeners.emit(&event);
        event
    }

    fn report_size(&mut self) {
        let size = self.size();
        if size != self.last_size {
            self.last_size = size;
            self.listeners.emit_size(size);
        }
    }

    fn send_abort(&self, path_prefix: &str, keep_direct: bool) {
        let msg = ClientMessage::AbortLoads {
            path_prefix: path_prefix.to_owned(),
            keep_direct,
        };
        if self.to_worker.send(msg).is_err() {
            tracing::warn!(path_prefix, "worker 连接已断开，无法取消");
        }
    }

    /// 新请求里有高优先级项时，取消其它文件夹里进行中的高优先级预取
    fn abort_other_folders(&self, items: &[QueueItem]) {
        let wanted: BTreeSet<&str> = items
            .iter()
            .filter(|i| !i.low_priority)
            .map(|i| i.folder.as_str())
            .collect();
        if wanted.is_empty() {
            return;
        }
        let stale: BTreeSet<&str> = self
            .in_flight
            .values()
            .filter(|i| !i.low_priority && !wanted.contains(i.folder.as_str()))
            .map(|i| i.folder.as_str())
            .collect();
        for folder in stale {
            tracing::debug!(folder, "切换文件夹，取消旧文件夹的预取");
            self.send_abort(&format!("{folder}/"), true);
        }
    }

    /// 取消同文件夹里位置落后于播放游标的预取
    fn abort_behind(&self, playing: &PlaybackPosition) {
        let Ok(url) = reqwest::Url::parse(&playing.url) else {
            tracing::warn!(url = %playing.url, "播放位置 URL 无效");
            return;
        };
        let folder = folder_of(&url);
        for item in self.in_flight.values() {
            let behind = item
                .folder_position
                .is_some_and(|p| p < playing.folder_position);
            if item.folder == folder && behind {
                tracing::debug!(path = %item.path, "预取已落后于播放位置，取消");
                self.send_abort(&item.path, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CachedItem;

    fn controller(max_parallel: usize) -> (QueueController, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = QueueConfig {
            max_parallel_loads: max_parallel,
            ..QueueConfig::default()
        };
        (QueueController::new(config, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn prefetched(msgs: &[ClientMessage]) -> Vec<String> {
        msgs.iter()
            .filter_map(|m| match m {
                ClientMessage::Prefetch { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_dispatch_respects_parallel_limit() {
        let (mut c, mut rx) = controller(2);
        c.cache_ahead(
            vec![
                "http://h/1/audio/a/1.mp3".into(),
                "http://h/1/audio/a/2.mp3".into(),
                "http://h/1/audio/a/3.mp3".into(),
            ],
            None,
        );
        assert_eq!(prefetched(&drain(&mut rx)).len(), 2);
        assert_eq!(c.size(), 3);
        assert!(c.is_polling());

        c.handle_worker_message(WorkerMessage::PrefetchCached(CachedItem::new(
            "http://h/1/audio/a/1.mp3",
            "http://h/1/audio/a/1.mp3",
        )));
        assert_eq!(prefetched(&drain(&mut rx)), vec!["http://h/1/audio/a/3.mp3"]);
        assert_eq!(c.size(), 2);
    }

    #[test]
    fn test_high_priority_before_low() {
        let (mut c, mut rx) = controller(1);
        c.cache_ahead(vec!["http://h/1/audio/a/0.mp3".into()], None);
        c.cache_ahead(vec![PrefetchRequest::low("http://h/1/audio/a/low1.mp3")], None);
        c.cache_ahead(
            vec![
                PrefetchRequest::low("http://h/1/audio/a/low2.mp3"),
                "http://h/1/audio/a/high.mp3".into(),
            ],
            None,
        );
        drain(&mut rx);
        assert_eq!(
            c.pending_urls(),
            vec![
                "http://h/1/audio/a/high.mp3",
                "http://h/1/audio/a/low2.mp3",
                "http://h/1/audio/a/low1.mp3",
            ]
        );
    }

    #[test]
    fn test_low_only_call_keeps_pending_high() {
        let (mut c, mut rx) = controller(1);
        c.cache_ahead(
            vec!["http://h/1/audio/a/0.mp3".into(), "http://h/1/audio/a/1.mp3".into()],
            None,
        );
        c.cache_ahead(vec![PrefetchRequest::low("http://h/1/audio/a/low.mp3")], None);
        drain(&mut rx);
        assert_eq!(
            c.pending_urls(),
            vec!["http://h/1/audio/a/1.mp3", "http://h/1/audio/a/low.mp3"]
        );
    }

    #[test]
    fn test_in_flight_not_requeued() {
        let (mut c, mut rx) = controller(1);
        c.cache_ahead(vec!["http://h/1/audio/a/1.mp3".into()], None);
        c.cache_ahead(vec!["http://h/1/audio/a/1.mp3?x=1".into()], None);
        assert_eq!(prefetched(&drain(&mut rx)).len(), 1);
        assert!(c.pending_urls().is_empty());
    }

    #[test]
    fn test_folder_switch_aborts_old_folder() {
        let (mut c, mut rx) = controller(2);
        c.cache_ahead(vec!["http://h/1/audio/a/1.mp3".into()], None);
        drain(&mut rx);
        c.cache_ahead(vec!["http://h/1/audio/b/1.mp3".into()], None);
        let msgs = drain(&mut rx);
        assert!(msgs.contains(&ClientMessage::AbortLoads {
            path_prefix: "/1/audio/a/".to_owned(),
            keep_direct: true,
        }));
    }

    #[test]
    fn test_folder_switch_prefix_is_decoded_once() {
        let (mut c, mut rx) = controller(2);
        c.cache_ahead(vec!["http://h/1/audio/x%2541/1.mp3".into()], None);
        drain(&mut rx);
        c.cache_ahead(vec!["http://h/1/audio/b/1.mp3".into()], None);
        assert!(drain(&mut rx).contains(&ClientMessage::AbortLoads {
            path_prefix: "/1/audio/x%41/".to_owned(),
            keep_direct: true,
        }));
    }

    #[test]
    fn test_same_folder_behind_playback_aborted() {
        let (mut c, mut rx) = controller(3);
        c.cache_ahead(
            (1..=3)
                .map(|i| PrefetchRequest::at(format!("http://h/1/audio/a/{i}.mp3"), i))
                .collect(),
            None,
        );
        drain(&mut rx);

        let playing = PlaybackPosition {
            url: "http://h/1/audio/a/3.mp3".to_owned(),
            folder_position: 3,
        };
        c.cache_ahead(vec![PrefetchRequest::at("http://h/1/audio/a/4.mp3", 4)], Some(playing));

        let aborts: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::AbortLoads { path_prefix, keep_direct } => {
                    assert!(keep_direct);
                    Some(path_prefix)
                }
                _ => None,
            })
            .collect();
        assert_eq!(aborts, vec!["/1/audio/a/1.mp3", "/1/audio/a/2.mp3"]);
    }

    #[test]
    fn test_capacity_rejects() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = QueueConfig {
            max_parallel_loads: 1,
            queue_capacity: 2,
            ..QueueConfig::default()
        };
        let mut c = QueueController::new(config, tx);
        let batch = |from: u32| {
            (from..from + 3)
                .map(|i| PrefetchRequest::from(format!("http://h/1/audio/a/{i}.mp3")))
                .collect::<Vec<_>>()
        };

        // 截断到上限后派发一个
        c.cache_ahead(batch(0), None);
        assert_eq!(c.pending_urls(), vec!["http://h/1/audio/a/1.mp3"]);

        c.cache_ahead(batch(10), None);
        assert_eq!(c.pending_urls().len(), 2);

        // 队列已满，整批拒绝
        c.cache_ahead(batch(20), None);
        assert!(!c.pending_urls().contains(&"http://h/1/audio/a/20.mp3".to_owned()));
        assert_eq!(prefetched(&drain(&mut rx)).len(), 1);
    }

    #[test]
    fn test_cancel_pending_by_prefix() {
        let (mut c, mut rx) = controller(1);
        c.cache_ahead(
            vec![
                "http://h/1/audio/a/1.mp3".into(),
                "http://h/1/audio/a/2.mp3".into(),
                PrefetchRequest::low("http://h/1/audio/b/1.mp3"),
            ],
            None,
        );
        drain(&mut rx);
        c.cancel_pending_loads("/1/audio/a", true, true);
        assert_eq!(c.pending_urls(), vec!["http://h/1/audio/b/1.mp3"]);
        assert_eq!(
            drain(&mut rx),
            vec![ClientMessage::AbortLoads {
                path_prefix: "/1/audio/a".to_owned(),
                keep_direct: true,
            }]
        );
    }

    #[test]
    fn test_pong_drops_lost_items() {
        let (mut c, mut rx) = controller(2);
        c.cache_ahead(
            vec!["http://h/1/audio/a/1.mp3".into(), "http://h/1/audio/a/2.mp3".into()],
            None,
        );
        drain(&mut rx);
        c.poll_tick();
        c.on_pong(vec!["http://h/1/audio/a/2.mp3".to_owned()]);
        assert_eq!(c.in_flight_keys(), vec!["http://h/1/audio/a/2.mp3"]);
    }

    #[test]
    fn test_pong_ignores_keys_sent_after_ping() {
        let (mut c, mut rx) = controller(2);
        c.cache_ahead(vec!["http://h/1/audio/a/1.mp3".into()], None);
        c.poll_tick();
        c.cache_ahead(
            vec!["http://h/1/audio/a/2.mp3".into(), "http://h/1/audio/a/3.mp3".into()],
            None,
        );
        drain(&mut rx);

        // 这个 Pong 回答的是 2 派发之前的 Ping
        c.on_pong(vec!["http://h/1/audio/a/1.mp3".to_owned()]);
        assert_eq!(
            c.in_flight_keys(),
            vec!["http://h/1/audio/a/1.mp3", "http://h/1/audio/a/2.mp3"]
        );
        assert!(prefetched(&drain(&mut rx)).is_empty());

        // 下一轮 Ping 之后，2 缺席才算丢失
        c.poll_tick();
        c.on_pong(vec!["http://h/1/audio/a/1.mp3".to_owned()]);
        assert_eq!(prefetched(&drain(&mut rx)), vec!["http://h/1/audio/a/3.mp3"]);
    }

    #[test]
    fn test_idle_pongs_stop_polling() {
        let (mut c, _rx) = controller(2);
        c.ensure_started();
        for _ in 0..3 {
            assert!(c.is_polling());
            c.on_pong(Vec::new());
        }
        assert!(!c.is_polling());
    }
}
