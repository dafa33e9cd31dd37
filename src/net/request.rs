//! 请求/响应值类型
//!
//! body 总是完整的 `Bytes`：持久缓存只存整文件，Range 响应从中切片得到。

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};

use crate::error::FetchError;

/// 播放端透传的“文件在文件夹中的序号”提示
pub const FOLDER_POSITION_HEADER: &str = "x-folder-position";

/// 缓存层内部错误使用的非标准状态码，区别于上游 HTTP 错误
pub fn cache_layer_error_status() -> StatusCode {
    StatusCode::from_u16(555).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// 绕过任何中间 HTTP 缓存，总是打到源站
    pub bypass_cache: bool,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            bypass_cache: false,
        }
    }

    pub fn parse(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn header_str(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 复制一份去掉指定头的请求（例如去掉 Range 以便上游返回整文件）
    pub fn without_header(&self, name: &HeaderName) -> Self {
        let mut cloned = self.clone();
        cloned.headers.remove(name);
        cloned
    }

    /// 解析 `X-Folder-Position`，非数字时忽略
    pub fn folder_position(&self) -> Option<u32> {
        self.header_str(FOLDER_POSITION_HEADER)
            .and_then(|v| v.trim().parse().ok())
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// 等价于 fetch API 的 `response.ok`
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.headers.get(CONTENT_TYPE)
    }

    pub fn header_str(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 缓存层兜底响应：播放器应当把它当作普通的不可播放源处理
    pub fn cache_layer_error(message: impl std::fmt::Display) -> Self {
        Self::new(cache_layer_error_status(), message.to_string())
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::RANGE;

    #[test]
    fn test_without_header_keeps_original() {
        let req = Request::parse("http://localhost/1/audio/a.mp3")
            .unwrap()
            .with_header(RANGE, HeaderValue::from_static("bytes=0-"));
        let stripped = req.without_header(&RANGE);
        assert!(stripped.headers.get(RANGE).is_none());
        assert_eq!(req.header_str(RANGE), Some("bytes=0-"));
    }

    #[test]
    fn test_folder_position_header() {
        let req = Request::parse("http://localhost/1/audio/a.mp3")
            .unwrap()
            .with_header(
                HeaderName::from_static(FOLDER_POSITION_HEADER),
                HeaderValue::from_static("7"),
            );
        assert_eq!(req.folder_position(), Some(7));

        let bad = Request::parse("http://localhost/1/audio/a.mp3")
            .unwrap()
            .with_header(
                HeaderName::from_static(FOLDER_POSITION_HEADER),
                HeaderValue::from_static("seven"),
            );
        assert_eq!(bad.folder_position(), None);
    }

    #[test]
    fn test_cache_layer_error_status() {
        let resp = Response::cache_layer_error("boom");
        assert_eq!(resp.status.as_u16(), 555);
        assert!(!resp.is_ok());
    }
}
