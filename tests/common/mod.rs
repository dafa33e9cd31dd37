//! 集成测试共用的脚本化网络层

#![allow(dead_code)]

use async_trait::async_trait;
use audiocache::error::FetchError;
use audiocache::net::{Fetcher, Request, Response, canonical_key};
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Reply {
    Status(StatusCode, Bytes),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Script {
    reply: Reply,
    delay: Duration,
}

/// 按 key（去掉 query 的 URL）返回预设响应；未登记的地址返回 404
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<Request>>,
    cancelled: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set(&self, url: &str, reply: Reply, delay: Duration) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_owned(), Script { reply, delay });
    }

    pub fn respond(&self, url: &str, status: u16, body: &'static [u8]) {
        self.respond_slow(url, status, body, Duration::ZERO);
    }

    pub fn respond_slow(&self, url: &str, status: u16, body: &'static [u8], delay: Duration) {
        let status = StatusCode::from_u16(status).unwrap();
        self.set(url, Reply::Status(status, Bytes::from_static(body)), delay);
    }

    pub fn fail(&self, url: &str, message: &str) {
        self.set(url, Reply::Fail(message.to_owned()), Duration::ZERO);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| canonical_key(&r.url))
            .collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| *u == url).count()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, req: Request, cancel: CancellationToken) -> Result<Response, FetchError> {
        let key = canonical_key(&req.url);
        self.requests.lock().unwrap().push(req);
        let script = self.scripts.lock().unwrap().get(&key).cloned();
        let Some(script) = script else {
            return Ok(Response::new(StatusCode::NOT_FOUND, "not found"));
        };

        if !script.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(script.delay) => {}
                _ = cancel.cancelled() => {
                    self.cancelled.lock().unwrap().push(key);
                    return Err(FetchError::Aborted);
                }
            }
        }

        match script.reply {
            Reply::Status(status, body) => Ok(Response::new(status, body)
                .with_header(CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"))),
            Reply::Fail(message) => Err(FetchError::Network(message)),
        }
    }
}
