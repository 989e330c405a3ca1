//! ETag 计算与条件 GET 校验。

use axum::http::{HeaderMap, header};
use httpdate::parse_http_date;
use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// 根据文件元数据生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    let modified = metadata.modified().ok();
    if let Some(modified) = modified
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// `If-None-Match` 优先；缺省时回退到 `If-Modified-Since`（秒级精度）。
pub fn is_not_modified(headers: &HeaderMap, etag: &str, modified: Option<SystemTime>) -> bool {
    if let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        return value.trim() == "*" || etag_matches(value, etag);
    }

    let since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_http_date(v).ok());
    match (since, modified) {
        (Some(since), Some(modified)) => truncate_to_secs(modified) <= since,
        _ => false,
    }
}

fn truncate_to_secs(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => UNIX_EPOCH + std::time::Duration::from_secs(duration.as_secs()),
        Err(_) => time,
    }
}

fn etag_matches(header_value: &str, current: &str) -> bool {
    header_value
        .split(',')
        .map(|item| item.trim())
        .any(|item| item == current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use httpdate::fmt_http_date;
    use std::time::Duration;

    #[test]
    fn if_none_match_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static(r#"W/"1-2-3", W/"5-6-7""#),
        );
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
        );
        assert!(is_not_modified(&headers, r#"W/"5-6-7""#, None));
        assert!(!is_not_modified(&headers, r#"W/"9-9-9""#, Some(SystemTime::now())));
    }

    #[test]
    fn if_modified_since_compares_whole_seconds() {
        let modified = UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        let mut headers = HeaderMap::new();
        let stamp = fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_str(&stamp).expect("header"),
        );
        assert!(is_not_modified(&headers, "W/\"x\"", Some(modified)));

        let later = modified + Duration::from_secs(5);
        assert!(!is_not_modified(&headers, "W/\"x\"", Some(later)));
    }
}
