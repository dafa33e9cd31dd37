//! 进行中拉取的去重表
//!
//! 同一个规范 key 同时最多一个条目。检查与登记在同一次加锁内完成，
//! 中间没有挂起点，这是去重契约成立的前提。

use reqwest::Url;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::net::{canonical_key, path_matches_prefix};

#[derive(Debug)]
pub struct RunningItem {
    pub id: u64,
    pub key: String,
    pub url: Url,
    pub token: CancellationToken,
    /// 由播放端直接请求触发（而不是后台预取）
    pub is_direct: bool,
    pub folder_position: Option<u32>,
}

#[derive(Debug, Default)]
pub struct RunningItems {
    items: Vec<RunningItem>,
    next_id: u64,
}

impl RunningItems {
    pub fn has(&self, key: &str) -> bool {
        self.items.iter().any(|i| i.key == key)
    }

    /// 登记一个新条目，返回条目 id 以及被取代的 direct 条目 id
    ///
    /// direct 请求同时只保留一个：新的 direct 会取消其余所有 direct。
    pub fn add(
        &mut self,
        url: &Url,
        token: CancellationToken,
        is_direct: bool,
        folder_position: Option<u32>,
    ) -> (u64, Vec<u64>) {
        let mut superseded = Vec::new();
        if is_direct {
            for item in self.items.iter().filter(|i| i.is_direct) {
                tracing::debug!(key = %item.key, "新的直连请求取代旧的直连请求");
                item.token.cancel();
                superseded.push(item.id);
            }
        }

        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.items.push(RunningItem {
            id,
            key: canonical_key(url),
            url: url.clone(),
            token,
            is_direct,
            folder_position,
        });
        (id, superseded)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.key != key);
        self.items.len() != before
    }

    /// 按 id 删除，不会误删后来登记的同 key 条目
    pub fn delete_id(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != id);
        self.items.len() != before
    }

    /// 取消路径前缀匹配的条目（空前缀匹配全部），返回被取消的 id
    pub fn abort(&mut self, path_prefix: &str, keep_direct: bool) -> Vec<u64> {
        let mut aborted = Vec::new();
        for item in &self.items {
            if keep_direct && item.is_direct {
                continue;
            }
            if path_matches_prefix(&item.url, path_prefix) {
                tracing::debug!(key = %item.key, direct = item.is_direct, "取消进行中的拉取");
                item.token.cancel();
                aborted.push(item.id);
            }
        }
        aborted
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|i| i.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for item in self.items.drain(..) {
            item.token.cancel();
        }
    }
}

/// 跨任务共享的去重表
///
/// 有的网络栈在取消后不一定回调，取消后延迟一段时间强制清理记录，避免 key 永久卡住。
#[derive(Debug, Clone)]
pub struct FetchQueue {
    inner: Arc<Mutex<RunningItems>>,
    abort_grace: Duration,
}

impl FetchQueue {
    pub fn new(abort_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunningItems::default())),
            abort_grace,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunningItems> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has(&self, key: &str) -> bool {
        self.lock().has(key)
    }

    /// 原子的“检查 + 登记”；key 已存在时返回 `None`
    pub fn try_add(
        &self,
        url: &Url,
        token: CancellationToken,
        is_direct: bool,
        folder_position: Option<u32>,
    ) -> Option<u64> {
        let (id, superseded) = {
            let mut items = self.lock();
            if items.has(&canonical_key(url)) {
                return None;
            }
            items.add(url, token, is_direct, folder_position)
        };
        self.schedule_forced_delete(superseded);
        Some(id)
    }

    pub fn delete_id(&self, id: u64) -> bool {
        self.lock().delete_id(id)
    }

    pub fn abort(&self, path_prefix: &str, keep_direct: bool) -> usize {
        let aborted = self.lock().abort(path_prefix, keep_direct);
        let n = aborted.len();
        self.schedule_forced_delete(aborted);
        n
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys()
    }

    pub fn cancel_all(&self) {
        self.lock().cancel_all();
    }

    fn schedule_forced_delete(&self, ids: Vec<u64>) {
        if ids.is_empty() {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(queue.abort_grace).await;
            let mut items = queue.lock();
            for id in ids {
                if items.delete_id(id) {
                    tracing::debug!(id, "取消后未收到结束回调，强制清理去重记录");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_direct_supersedes_direct() {
        let mut items = RunningItems::default();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let p = CancellationToken::new();
        items.add(&url("http://h/1/audio/trackA"), a.clone(), true, None);
        items.add(&url("http://h/1/audio/bg.mp3"), p.clone(), false, None);
        let (_, superseded) = items.add(&url("http://h/1/audio/trackB"), b.clone(), true, None);

        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!p.is_cancelled());
        assert_eq!(superseded.len(), 1);
    }

    #[test]
    fn test_abort_by_prefix_keeps_direct() {
        let mut items = RunningItems::default();
        let direct = CancellationToken::new();
        let bg = CancellationToken::new();
        let other = CancellationToken::new();
        items.add(&url("http://h/1/audio/A/01.mp3"), direct.clone(), true, None);
        items.add(&url("http://h/1/audio/A/02.mp3"), bg.clone(), false, None);
        items.add(&url("http://h/1/audio/B/01.mp3"), other.clone(), false, None);

        let aborted = items.abort("/1/audio/A/", true);
        assert_eq!(aborted.len(), 1);
        assert!(bg.is_cancelled());
        assert!(!direct.is_cancelled());
        assert!(!other.is_cancelled());

        items.abort("", false);
        assert!(direct.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_abort_folder_with_literal_percent() {
        let mut items = RunningItems::default();
        let token = CancellationToken::new();
        items.add(&url("http://h/1/audio/x%2541/1.mp3"), token.clone(), false, None);

        assert_eq!(items.abort("/1/audio/x%41/", true).len(), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_delete_id_spares_newer_entry_with_same_key() {
        let mut items = RunningItems::default();
        let u = url("http://h/1/audio/a.mp3?trans=m");
        let (old, _) = items.add(&u, CancellationToken::new(), false, None);
        items.delete_id(old);
        let (new, _) = items.add(&u, CancellationToken::new(), false, None);
        assert!(!items.delete_id(old));
        assert!(items.has("http://h/1/audio/a.mp3"));
        assert!(items.delete_id(new));
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_try_add_dedups() {
        let queue = FetchQueue::new(Duration::from_secs(1));
        let u = url("http://h/1/audio/a.mp3");
        assert!(queue.try_add(&u, CancellationToken::new(), false, None).is_some());
        assert!(
            queue
                .try_add(&url("http://h/1/audio/a.mp3?seek=3"), CancellationToken::new(), true, None)
                .is_none()
        );
        assert_eq!(queue.keys(), vec!["http://h/1/audio/a.mp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_forces_cleanup_after_grace() {
        let queue = FetchQueue::new(Duration::from_secs(1));
        let u = url("http://h/1/audio/a.mp3");
        queue.try_add(&u, CancellationToken::new(), false, None);
        assert_eq!(queue.abort("/1/audio", false), 1);
        assert!(queue.has("http://h/1/audio/a.mp3"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!queue.has("http://h/1/audio/a.mp3"));
    }
}
