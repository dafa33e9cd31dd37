use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, COOKIE, HeaderMap, HeaderValue, PRAGMA};
use std::env;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::request::{Request, Response};
use crate::error::FetchError;

/// 网络访问的抽象边界
///
/// 任何 HTTP 状态都返回 `Ok`（与浏览器 fetch 一致），只有网络失败和取消才是 `Err`。
/// 实现必须在每个挂起点观察 `cancel`，触发后返回 [`FetchError::Aborted`]。
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: Request, cancel: CancellationToken) -> Result<Response, FetchError>;
}

/// HTTP 客户端配置
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// 整体超时（秒）
    pub timeout_secs: u64,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 随每个请求携带的凭据（Cookie 头）
    pub cookie: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: env::var("AUDIOCACHE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            connect_timeout_secs: env::var("AUDIOCACHE_HTTP_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            cookie: env::var("AUDIOCACHE_COOKIE").ok().filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Self {
        let mut default_headers = HeaderMap::new();
        if let Some(cookie) = config.cookie.as_deref() {
            match HeaderValue::from_str(cookie) {
                Ok(v) => {
                    default_headers.insert(COOKIE, v);
                }
                Err(e) => tracing::warn!(err = %e, "Cookie 不是合法的头部值，已忽略"),
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .default_headers(default_headers)
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(err = %e, "初始化 HTTP 客户端失败");
                Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: Request, cancel: CancellationToken) -> Result<Response, FetchError> {
        let url = req.url.to_string();
        let mut builder = self
            .client
            .request(req.method, req.url)
            .headers(req.headers);
        if req.bypass_cache {
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Aborted),
            r = builder.send() => r?,
        };

        let status = resp.status();
        let headers = resp.headers().clone();
        let mut stream = resp.bytes_stream();
        let mut body = BytesMut::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Aborted),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => body.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        tracing::debug!(url = %url, err = %e, "读取响应 body 失败");
                        return Err(e.into());
                    }
                    None => break,
                },
            }
        }

        Ok(Response {
            status,
            headers,
            body: body.freeze(),
        })
    }
}
