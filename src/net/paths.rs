//! URL 规范化与路径工具

use reqwest::Url;

/// 去掉 query（以及 fragment）后的 URL，作为缓存 key 和去重 key
pub fn canonical_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

/// 解码后的 pathname；非法编码时退回原始 path
pub fn decoded_path(url: &Url) -> String {
    urlencoding::decode(url.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| url.path().to_owned())
}

/// 按最后一个 `/` 切分为 (folder, file)
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    match path.rfind('/') {
        Some(idx) => (Some(&path[..idx]), &path[idx + 1..]),
        None => (None, path),
    }
}

/// URL 所在文件夹（解码后的父路径）
pub fn folder_of(url: &Url) -> String {
    let path = decoded_path(url);
    split_path(&path).0.unwrap_or_default().to_owned()
}

/// `prefix` 是解码后的路径，原样比较；空前缀匹配一切
pub fn path_matches_prefix(url: &Url, prefix: &str) -> bool {
    prefix.is_empty() || decoded_path(url).starts_with(prefix)
}
