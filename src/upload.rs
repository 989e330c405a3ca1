//! 表单上传：内容类型校验、容量检查、multipart 解析与落盘。

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use bytes::Bytes;
use std::path::{Component, Path};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::atomic::{AtomicFile, is_temp_file_name};
use crate::error::ApiError;
use crate::listing::UPLOAD_FORM_HTML;
use crate::multipart::{MultipartParser, UploadedFile, boundary_from_content_type};
use crate::quota::{QuotaGuard, QuotaStatus};
use crate::storage::Storage;

const FILE_FIELD: &str = "file";

const MSG_INVALID_REQUEST: &str = "Invalid request.";
const MSG_QUOTA_EXCEEDED: &str = "Upload folder size limit exceeded.";
const MSG_NO_FILE: &str = "No file was uploaded.";
const MSG_INVALID_NAME: &str = "Invalid file name.";

#[derive(Debug)]
pub struct UploadConfig {
    pub quota: QuotaGuard,
    /// 串行化“容量检查 + 写入”，避免并发上传共同越过上限。
    pub write_lock: Mutex<()>,
}

impl UploadConfig {
    pub fn new(max_total_size: u64) -> Self {
        Self {
            quota: QuotaGuard::new(max_total_size),
            write_lock: Mutex::new(()),
        }
    }
}

/// 上传表单页面。
pub async fn upload_form() -> Html<&'static str> {
    Html(UPLOAD_FORM_HTML)
}

/// 处理 `POST /upload`。
pub async fn handle_upload(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let boundary = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| is_form_data(value))
        .and_then(boundary_from_content_type)
        .ok_or_else(|| ApiError::BadRequest(MSG_INVALID_REQUEST.into()))?;
    let parser = MultipartParser::new(&boundary)
        .map_err(|_| ApiError::BadRequest(MSG_INVALID_REQUEST.into()))?;

    let upload_dir = storage.upload_dir();
    let _guard = upload.write_lock.lock().await;

    let current = match upload.quota.check(upload_dir).await? {
        QuotaStatus::Within { current } => current,
        QuotaStatus::Exceeded { current, limit } => {
            warn!(current, limit, "upload rejected: folder size limit reached");
            return Err(ApiError::PayloadTooLarge(MSG_QUOTA_EXCEEDED.into()));
        }
    };

    let UploadedFile { filename, content } = parser.extract_file(&body, FILE_FIELD)?;
    if filename.is_empty() {
        return Err(ApiError::BadRequest(MSG_NO_FILE.into()));
    }
    if !is_plain_file_name(&filename) {
        warn!(filename, "upload rejected: unsafe file name");
        return Err(ApiError::BadRequest(MSG_INVALID_NAME.into()));
    }

    let target = upload_dir.join(&filename);
    let replaced = match fs::symlink_metadata(&target).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        Ok(_) => {
            warn!(filename, "upload rejected: target is not a regular file");
            return Err(ApiError::BadRequest(MSG_INVALID_NAME.into()));
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };

    let incoming = content.len() as u64;
    if let QuotaStatus::Exceeded { current, limit } =
        upload.quota.check_incoming(current, incoming, replaced)
    {
        warn!(
            current,
            limit, incoming, filename, "upload rejected: would exceed folder size limit"
        );
        return Err(ApiError::PayloadTooLarge(MSG_QUOTA_EXCEEDED.into()));
    }

    persist(&target, &content).await?;
    info!(filename, size = incoming, "file uploaded");

    Ok((
        StatusCode::OK,
        format!("File '{filename}' uploaded successfully."),
    )
        .into_response())
}

async fn persist(target: &Path, content: &[u8]) -> Result<(), ApiError> {
    let mut atomic = AtomicFile::new(target).await?;
    if let Err(err) = atomic.write_all(content).await {
        atomic.cleanup().await;
        return Err(err.into());
    }
    atomic.finalize().await?;
    Ok(())
}

fn is_form_data(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..19)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/form-data"))
}

/// 仅接受单个普通路径段：拒绝 `..`、分隔符、绝对路径与盘符。
/// 与临时文件同名的上传会被列表隐藏并在启动时清除，同样拒绝。
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\', '\0']) || is_temp_file_name(name) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(segment)), None) if segment == name
    )
}
