use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

use super::{CacheStorage, ResponseCache, validate_name};
use crate::error::CacheError;
use crate::net::Response;

const INDEX_VERSION: u32 = 1;
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Serialize, Deserialize, Default)]
struct DiskIndex {
    #[serde(default)]
    version: u32,
    /// 插入顺序即淘汰顺序
    entries: Vec<DiskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    file_name: String,
    status: u16,
    headers: Vec<(String, String)>,
    size_bytes: u64,
}

/// 单个命名空间：一个目录 + 有序索引 + 每个 key 一个负载文件
#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<DiskIndex>,
}

impl DiskCache {
    fn open(dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&dir)?;
        let index_path = dir.join(INDEX_FILE);
        let index = fs::read(&index_path)
            .ok()
            .and_then(|b| serde_json::from_slice::<DiskIndex>(&b).ok());

        let cache = Self {
            dir,
            index_path,
            index: Mutex::new(DiskIndex::default()),
        };

        match index {
            Some(index) if index.version == INDEX_VERSION => {
                *cache.lock() = index;
            }
            _ => {
                // 旧索引或损坏：负载文件无从对应，整个命名空间作废
                let removed = clear_payload_files(&cache.dir);
                tracing::info!(dir = %cache.dir.display(), removed, "缓存索引缺失或版本不符，已重建");
                let fresh = DiskIndex {
                    version: INDEX_VERSION,
                    entries: Vec::new(),
                };
                cache.persist_index(&fresh)?;
                *cache.lock() = fresh;
            }
        }

        Ok(cache)
    }

    fn lock(&self) -> MutexGuard<'_, DiskIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_index(&self, index: &DiskIndex) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(index)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&self.index_path).map_err(|e| e.error)?;
        Ok(())
    }

    fn payload_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }
}

#[async_trait]
impl ResponseCache for DiskCache {
    async fn put(&self, key: &str, resp: &Response) -> Result<(), CacheError> {
        let file_name = payload_file_name(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&resp.body)?;
        tmp.persist(self.payload_path(&file_name))
            .map_err(|e| e.error)?;

        let entry = DiskEntry {
            key: key.to_owned(),
            file_name,
            status: resp.status.as_u16(),
            headers: encode_headers(&resp.headers),
            size_bytes: resp.body.len() as u64,
        };

        let mut index = self.lock();
        index.entries.retain(|e| e.key != key);
        index.entries.push(entry);
        self.persist_index(&index)
    }

    async fn lookup(&self, key: &str) -> Result<Option<Response>, CacheError> {
        let Some(entry) = self.lock().entries.iter().find(|e| e.key == key).cloned() else {
            return Ok(None);
        };

        let body = match fs::read(self.payload_path(&entry.file_name)) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(key, "缓存负载文件丢失，移除索引记录");
                let mut index = self.lock();
                index.entries.retain(|e| e.key != key);
                self.persist_index(&index)?;
                return Err(CacheError::MissingPayload {
                    key: key.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let status = StatusCode::from_u16(entry.status)
            .map_err(|e| CacheError::BadHeader(format!("status {}: {e}", entry.status)))?;
        Ok(Some(Response {
            status,
            headers: decode_headers(&entry.headers)?,
            body: body.into(),
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut index = self.lock();
        let Some(pos) = index.entries.iter().position(|e| e.key == key) else {
            return Ok(false);
        };
        let entry = index.entries.remove(pos);
        match fs::remove_file(self.payload_path(&entry.file_name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                index.entries.insert(pos, entry);
                return Err(e.into());
            }
        }
        self.persist_index(&index)?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.lock().entries.iter().map(|e| e.key.clone()).collect())
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock().entries.iter().any(|e| e.key == key))
    }
}

/// 数据目录下每个命名空间一个子目录
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    opened: Mutex<HashMap<String, Arc<DiskCache>>>,
}

impl DiskStorage {
    pub fn new(data_dir: &Path) -> Result<Self, CacheError> {
        let root = data_dir.join("caches");
        fs::create_dir_all(&root)
            .map_err(|e| CacheError::DirUnavailable(format!("{}: {e}", root.display())))?;
        Ok(Self {
            root,
            opened: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn opened(&self) -> MutexGuard<'_, HashMap<String, Arc<DiskCache>>> {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ResponseCache>, CacheError> {
        validate_name(name)?;
        if let Some(cache) = self.opened().get(name) {
            return Ok(cache.clone());
        }

        let cache = Arc::new(DiskCache::open(self.root.join(name))?);
        let cache = self
            .opened()
            .entry(name.to_owned())
            .or_insert(cache)
            .clone();
        Ok(cache)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        validate_name(name)?;
        self.opened().remove(name);
        let dir = self.root.join(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = fs::read_dir(&self.root)?
            .flatten()
            .filter(|ent| ent.path().is_dir())
            .filter_map(|ent| ent.file_name().into_string().ok())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}

fn payload_file_name(key: &str) -> String {
    format!("{}.bin", hex::encode(Md5::digest(key.as_bytes())))
}

fn encode_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_owned(), v.to_owned())))
        .collect()
}

fn decode_headers(pairs: &[(String, String)]) -> Result<HeaderMap, CacheError> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (k, v) in pairs {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| CacheError::BadHeader(format!("{k}: {e}")))?;
        let value =
            HeaderValue::from_str(v).map_err(|e| CacheError::BadHeader(format!("{k}: {e}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn clear_payload_files(dir: &Path) -> usize {
    let Ok(rd) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0usize;
    for ent in rd.flatten() {
        let p = ent.path();
        if p.is_dir() || p.file_name().is_some_and(|n| n == INDEX_FILE) {
            continue;
        }
        if fs::remove_file(&p).is_ok() {
            removed += 1;
        }
    }
    removed
}
