//! multipart/form-data 解析器。
//!
//! 不依赖 HTTP 框架：输入为完整请求体与 boundary，输出带头部的分段列表，
//! 上传处理只取第一个 `name="file"` 且带 `filename` 的文件分段。

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("multipart boundary is empty")]
    EmptyBoundary,
    #[error("no file part present")]
    NoFilePart,
}

/// 单个分段：原始头部与负载（负载为请求体的零拷贝切片）。
#[derive(Debug, Clone)]
pub struct MultipartPart {
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl MultipartPart {
    /// 按名称（忽略大小写）取第一个匹配的头部值。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_disposition(&self) -> Option<ContentDisposition> {
        self.header("content-disposition")
            .map(ContentDisposition::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    pub name: Option<String>,
    pub filename: Option<String>,
}

impl ContentDisposition {
    pub fn parse(value: &str) -> Self {
        // 首段为处置类型（form-data、attachment 等），不做限制
        let mut name = None;
        let mut filename = None;
        for segment in split_params(value).into_iter().skip(1) {
            let Some((key, raw)) = segment.split_once('=') else {
                continue;
            };
            let value = unquote(raw.trim());
            match key.trim().to_ascii_lowercase().as_str() {
                "name" if name.is_none() => name = Some(value),
                "filename" if filename.is_none() => filename = Some(value),
                _ => {}
            }
        }
        Self { name, filename }
    }
}

/// 从请求体中取出的文件内容，处理完即丢弃。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Bytes,
}

#[derive(Debug, Clone)]
pub struct MultipartParser {
    delimiter: Vec<u8>,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Result<Self, MultipartError> {
        if boundary.is_empty() {
            return Err(MultipartError::EmptyBoundary);
        }
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Ok(Self { delimiter })
    }

    /// 按 `--boundary` 切分请求体；前导内容被忽略，`--boundary--` 结束解析。
    pub fn parts(&self, body: &Bytes) -> Vec<MultipartPart> {
        let mut parts = Vec::new();
        let Some(first) = self.find_delimiter(body, 0) else {
            return parts;
        };
        let mut pos = first + self.delimiter.len();

        loop {
            if body[pos..].starts_with(b"--") {
                break;
            }
            while matches!(body.get(pos), Some(b' ' | b'\t')) {
                pos += 1;
            }
            pos += line_break_len(&body[pos..]);

            let next = self.find_delimiter(body, pos);
            let end = trim_line_break(body, pos, next.unwrap_or(body.len()));
            if let Some(part) = split_part(body.slice(pos..end)) {
                parts.push(part);
            }
            match next {
                Some(index) => pos = index + self.delimiter.len(),
                None => break,
            }
        }

        parts
    }

    /// 返回第一个字段名为 `field` 且带 `filename` 属性的分段，其余分段跳过。
    pub fn extract_file(&self, body: &Bytes, field: &str) -> Result<UploadedFile, MultipartError> {
        self.parts(body)
            .into_iter()
            .find_map(|part| {
                let disposition = part.content_disposition()?;
                if disposition.name.as_deref() != Some(field) {
                    return None;
                }
                let filename = disposition.filename?;
                Some(UploadedFile {
                    filename,
                    content: part.body,
                })
            })
            .ok_or(MultipartError::NoFilePart)
    }

    /// 分隔符必须位于行首，避免负载中间出现的同名字节串被误判。
    fn find_delimiter(&self, body: &[u8], from: usize) -> Option<usize> {
        let mut start = from;
        while let Some(offset) = find_bytes(&body[start..], &self.delimiter) {
            let index = start + offset;
            if index == 0 || body[index - 1] == b'\n' {
                return Some(index);
            }
            start = index + 1;
        }
        None
    }
}

/// 从 `Content-Type` 中读取 `boundary` 参数（可带引号）。
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    split_params(content_type)
        .into_iter()
        .skip(1)
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| unquote(value.trim()))
        })
        .find(|boundary| !boundary.is_empty())
}

fn split_part(content: Bytes) -> Option<MultipartPart> {
    let (header_end, body_start) = find_header_end(&content)?;
    let header_block = String::from_utf8_lossy(&content[..header_end]);
    let headers = header_block
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();
    Some(MultipartPart {
        headers,
        body: content.slice(body_start..),
    })
}

/// 逐行扫描头部，第一个空行（CRLF 或 LF）处结束；负载中的空行不参与判断。
fn find_header_end(content: &[u8]) -> Option<(usize, usize)> {
    let mut pos = 0;
    loop {
        match line_break_len(&content[pos..]) {
            0 => {}
            len => return Some((pos, pos + len)),
        }
        let line_end = content[pos..].iter().position(|&byte| byte == b'\n')?;
        pos += line_end + 1;
    }
}

fn line_break_len(data: &[u8]) -> usize {
    if data.starts_with(b"\r\n") {
        2
    } else if data.starts_with(b"\n") {
        1
    } else {
        0
    }
}

/// 去掉紧邻分隔符之前的那一个换行（CRLF 或 LF），负载本身的字节保持不变。
fn trim_line_break(body: &[u8], start: usize, mut end: usize) -> usize {
    if end > start && body[end - 1] == b'\n' {
        end -= 1;
        if end > start && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// 以 `;` 切分头部参数，引号内的 `;` 不参与切分。
fn split_params(value: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in value.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => segments.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    segments.push(current);
    segments
}

/// 引号值读到下一个 `"` 为止，反斜杠原样保留（旧浏览器会发送 Windows 完整路径）。
fn unquote(value: &str) -> String {
    match value.strip_prefix('"') {
        Some(inner) => inner.split('"').next().unwrap_or_default().to_string(),
        None => value.to_string(),
    }
}
