//! 静态文件与目录列表：处理除 `/upload` 之外的全部请求路径。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use httpdate::{fmt_http_date, parse_http_date};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::http::decode_request_path;
use crate::listing::render_listing;
use crate::storage::{Storage, StorageError};

/// 路由回退处理器：GET/HEAD 返回文件或目录列表，其它路径上的 POST 为 404。
pub async fn serve_path(
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    if method == Method::POST {
        return Err(ApiError::NotFound("Not found.".into()));
    }
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::MethodNotAllowed);
    }

    let request_path = decode_request_path(uri.path())?;
    let target = storage.resolve_path_checked(&request_path).await?;
    let metadata = fs::metadata(&target).await.map_err(StorageError::from)?;

    if metadata.is_dir() {
        if !request_path.ends_with('/') {
            return redirect_with_slash(&uri);
        }
        let entries = storage.list_dir(&target).await?;
        debug!(path = request_path, count = entries.len(), "list directory");
        return Ok(Html(render_listing(&request_path, &entries)).into_response());
    }

    send_file(&request_path, &target, &metadata, &headers).await
}

fn redirect_with_slash(uri: &Uri) -> Result<Response, ApiError> {
    let location = match uri.query() {
        Some(query) => format!("{}/?{query}", uri.path()),
        None => format!("{}/", uri.path()),
    };
    let location =
        HeaderValue::from_str(&location).map_err(|_| ApiError::BadRequest("invalid path".into()))?;
    Ok((
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, location)],
    )
        .into_response())
}

/// 发送文件内容，支持 Range、If-Range 与条件 GET。
async fn send_file(
    request_path: &str,
    target: &std::path::Path,
    metadata: &std::fs::Metadata,
    request_headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let file_size = metadata.len();
    let modified = metadata.modified().ok();
    let etag = etag_from_metadata(metadata);
    let mime = mime_guess::from_path(target).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::ETAG, header_value(&etag)?);
    if let Some(modified) = modified {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }

    if is_not_modified(request_headers, &etag, modified) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    response_headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);

    let if_range_matches = match request_headers
        .get(header::IF_RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) if value.trim() == etag => true,
        Some(value) => match parse_http_date(value) {
            Ok(date) => modified.map(|ts| ts <= date).unwrap_or(false),
            Err(_) => false,
        },
        None => true,
    };

    let range = if if_range_matches {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    let file = File::open(target).await?;

    if let Some((start, end)) = range {
        let length = end - start + 1;
        debug!(path = request_path, start, end, length, "range request accepted");
        let mut file = file;
        file.seek(SeekFrom::Start(start)).await?;
        response_headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{file_size}"))?,
        );
        response_headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);
        let stream = ReaderStream::new(file.take(length));
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            AxumBody::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(header::CONTENT_LENGTH, header_value(&file_size.to_string())?);
    info!(path = request_path, size = file_size, "serve file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("invalid header value".into()))
}

/// 解析单段 Range 头，返回闭区间。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Ok(value) = value.to_str() else {
        return Ok(None);
    };
    // 非 bytes 单位或多段范围按普通请求处理
    let Some(range) = value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if range.contains(',') {
        return Ok(None);
    }
    if file_size == 0 {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }

    let (start_part, end_part) = range.split_once('-').unwrap_or((range, ""));
    let invalid = || ApiError::BadRequest("invalid Range header".into());

    let (start, end) = if start_part.trim().is_empty() {
        let suffix: u64 = end_part.trim().parse().map_err(|_| invalid())?;
        if suffix == 0 {
            return Err(ApiError::RangeNotSatisfiable(file_size));
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let start: u64 = start_part.trim().parse().map_err(|_| invalid())?;
        let end: u64 = if end_part.trim().is_empty() {
            file_size - 1
        } else {
            end_part.trim().parse().map_err(|_| invalid())?
        };
        (start, end.min(file_size - 1))
    };

    if start > end || start >= file_size {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }

    Ok(Some((start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("share");
        std::fs::create_dir_all(root.join("docs")).expect("create root");
        std::fs::write(root.join("docs/readme.txt"), b"0123456789").expect("write");
        (temp, Arc::new(Storage::new(root)))
    }

    async fn get(storage: &Arc<Storage>, path: &str, headers: HeaderMap) -> Response {
        match serve_path(
            Method::GET,
            path.parse().expect("uri"),
            headers,
            Extension(storage.clone()),
        )
        .await
        {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn serves_file_contents_with_mime() {
        let (_temp, storage) = make_storage();
        let response = get(&storage, "/docs/readme.txt", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn range_request_returns_partial_content() {
        let (_temp, storage) = make_storage();
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=2-4"));
        let response = get(&storage, "/docs/readme.txt", headers).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE),
            Some(&HeaderValue::from_static("bytes 2-4/10"))
        );
        assert_eq!(body_bytes(response).await, b"234");
    }

    #[tokio::test]
    async fn matching_etag_returns_not_modified() {
        let (_temp, storage) = make_storage();
        let first = get(&storage, "/docs/readme.txt", HeaderMap::new()).await;
        let etag = first.headers().get(header::ETAG).cloned().expect("etag");

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag);
        let response = get(&storage, "/docs/readme.txt", headers).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn directory_without_slash_redirects() {
        let (_temp, storage) = make_storage();
        let response = get(&storage, "/docs", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION),
            Some(&HeaderValue::from_static("/docs/"))
        );
    }

    #[tokio::test]
    async fn directory_renders_listing() {
        let (_temp, storage) = make_storage();
        let response = get(&storage, "/docs/", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(response).await).expect("utf8");
        assert!(html.contains("readme.txt"));
        assert!(html.contains("/upload"));
    }

    #[tokio::test]
    async fn traversal_and_missing_paths_are_rejected() {
        let (_temp, storage) = make_storage();
        let response = get(&storage, "/docs/%2E%2E/%2E%2E/etc/passwd", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = get(&storage, "/nope.txt", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_to_other_paths_is_not_found() {
        let (_temp, storage) = make_storage();
        let result = serve_path(
            Method::POST,
            "/docs/".parse().expect("uri"),
            HeaderMap::new(),
            Extension(storage),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[test]
    fn range_parsing_edge_cases() {
        let value = |raw: &'static str| HeaderValue::from_static(raw);
        assert_eq!(
            parse_range(Some(&value("bytes=-3")), 10).ok().flatten(),
            Some((7, 9))
        );
        assert_eq!(
            parse_range(Some(&value("bytes=8-")), 10).ok().flatten(),
            Some((8, 9))
        );
        assert_eq!(
            parse_range(Some(&value("bytes=5-100")), 10).ok().flatten(),
            Some((5, 9))
        );
        assert!(matches!(
            parse_range(Some(&value("bytes=10-12")), 10),
            Err(ApiError::RangeNotSatisfiable(10))
        ));
        assert!(matches!(parse_range(Some(&value("bytes=0-1,4-5")), 10), Ok(None)));
    }
}
