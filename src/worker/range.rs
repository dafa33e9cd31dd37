//! 基于整文件缓存构造 Range 响应

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderValue};

use crate::net::Response;

/// 解析 `bytes=<start>-<end>?`，只支持单段
pub fn parse_range(range: &str) -> Option<(u64, Option<u64>)> {
    let spec = range.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-').unwrap_or((spec, ""));
    let start = start.trim().parse::<u64>().ok()?;
    let end = end
        .trim()
        .split(',')
        .next()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.trim().parse::<u64>().ok());
    Some((start, end))
}

/// 按请求的 Range 从缓存的整文件中切片
///
/// 没有 Range 时原样返回缓存响应；无法解析的 Range 也按整文件返回。
/// 起点超出文件大小时返回 416。
pub fn build_response(cached: Response, range: Option<&str>) -> Response {
    let Some(range) = range else {
        return cached;
    };
    let Some((start, end)) = parse_range(range) else {
        tracing::debug!(range, "无法解析 Range，返回整文件");
        return cached;
    };

    let size = cached.body.len() as u64;
    if start >= size {
        return Response::new(StatusCode::RANGE_NOT_SATISFIABLE, bytes::Bytes::new()).with_header(
            CONTENT_RANGE,
            header_value(&format!("bytes */{size}")),
        );
    }

    let last = end.map_or(size - 1, |e| e.min(size - 1));
    if last < start {
        return Response::new(StatusCode::RANGE_NOT_SATISFIABLE, bytes::Bytes::new()).with_header(
            CONTENT_RANGE,
            header_value(&format!("bytes */{size}")),
        );
    }

    let body = cached.body.slice(start as usize..=last as usize);
    let mut resp = Response::new(StatusCode::PARTIAL_CONTENT, body)
        .with_header(
            CONTENT_RANGE,
            header_value(&format!("bytes {start}-{last}/{size}")),
        )
        .with_header(CONTENT_LENGTH, HeaderValue::from(last - start + 1));
    if let Some(ct) = cached.content_type() {
        resp = resp.with_header(CONTENT_TYPE, ct.clone());
    }
    resp
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}
