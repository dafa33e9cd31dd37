use reqwest::Url;

use crate::error::FetchError;
use crate::net::{canonical_key, decoded_path, folder_of};

/// `cache_ahead` 的一个输入：裸 URL 或带提示的详情
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchRequest {
    Url(String),
    Detail {
        url: String,
        low_priority: bool,
        folder_position: Option<u32>,
    },
}

impl PrefetchRequest {
    pub fn low(url: impl Into<String>) -> Self {
        PrefetchRequest::Detail {
            url: url.into(),
            low_priority: true,
            folder_position: None,
        }
    }

    pub fn at(url: impl Into<String>, folder_position: u32) -> Self {
        PrefetchRequest::Detail {
            url: url.into(),
            low_priority: false,
            folder_position: Some(folder_position),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            PrefetchRequest::Url(url) | PrefetchRequest::Detail { url, .. } => url,
        }
    }
}

impl From<&str> for PrefetchRequest {
    fn from(url: &str) -> Self {
        PrefetchRequest::Url(url.to_owned())
    }
}

impl From<String> for PrefetchRequest {
    fn from(url: String) -> Self {
        PrefetchRequest::Url(url)
    }
}

/// 当前播放到的位置，用来判断同文件夹里哪些预取已经落后
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackPosition {
    pub url: String,
    pub folder_position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// 原始 URL（带 query），原样发给 worker
    pub url: String,
    pub key: String,
    /// 解码后的 pathname
    pub path: String,
    pub folder: String,
    pub low_priority: bool,
    pub folder_position: Option<u32>,
}

impl TryFrom<PrefetchRequest> for QueueItem {
    type Error = FetchError;

    fn try_from(req: PrefetchRequest) -> Result<Self, Self::Error> {
        let (url, low_priority, folder_position) = match req {
            PrefetchRequest::Url(url) => (url, false, None),
            PrefetchRequest::Detail {
                url,
                low_priority,
                folder_position,
            } => (url, low_priority, folder_position),
        };
        let parsed = Url::parse(&url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            key: canonical_key(&parsed),
            path: decoded_path(&parsed),
            folder: folder_of(&parsed),
            url,
            low_priority,
            folder_position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_item_from_plain_url() {
        let item = QueueItem::try_from(PrefetchRequest::from(
            "http://h/1/audio/My%20Book/01.mp3?trans=m",
        ))
        .unwrap();
        assert_eq!(item.key, "http://h/1/audio/My%20Book/01.mp3");
        assert_eq!(item.folder, "/1/audio/My Book");
        assert_eq!(item.path, "/1/audio/My Book/01.mp3");
        assert!(!item.low_priority);
        assert_eq!(item.url, "http://h/1/audio/My%20Book/01.mp3?trans=m");
    }

    #[test]
    fn test_queue_item_rejects_bad_url() {
        assert!(QueueItem::try_from(PrefetchRequest::from("not a url")).is_err());
    }
}
