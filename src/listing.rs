//! 目录列表与上传表单页面的 HTML 渲染。

use html_escape::{encode_double_quoted_attribute, encode_text};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::fmt::Write;

use crate::storage::FileEntry;

/// 单个路径段中需要转义的字符。
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub const UPLOAD_FORM_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Upload File</title></head>
<body>
<h2>Upload File</h2>
<form enctype="multipart/form-data" method="post" action="/upload">
  <input type="file" name="file"><br><br>
  <input type="submit" value="Upload">
</form>
<button onclick="window.location.href='/'">Back to Directory Listing</button>
</body>
</html>
"#;

/// 渲染目录列表；`request_path` 为已解码且以 `/` 结尾的请求路径。
pub fn render_listing(request_path: &str, entries: &[FileEntry]) -> String {
    let title = format!("Directory listing for {}", encode_text(request_path));
    let mut html = String::with_capacity(512 + entries.len() * 96);
    html.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>");
    html.push_str(&title);
    html.push_str("</title></head>\n<body>\n<h2>");
    html.push_str(&title);
    html.push_str("</h2>\n");
    html.push_str(
        "<button onclick=\"window.location.href='/upload'\">Upload File</button>\n<hr>\n<ul>\n",
    );

    if request_path != "/" {
        html.push_str("<li><a href=\"../\">../</a></li>\n");
    }

    for entry in entries {
        let href = utf8_percent_encode(&entry.name, PATH_SEGMENT).to_string();
        let href = encode_double_quoted_attribute(&href);
        let name = encode_text(&entry.name);
        if entry.is_dir {
            let _ = writeln!(
                html,
                "<li><strong>[DIR]</strong> <a href=\"{href}/\">{name}/</a></li>"
            );
        } else {
            let modified = entry.modified.as_deref().unwrap_or("-");
            let _ = writeln!(
                html,
                "<li><a href=\"{href}\">{name}</a> <small>{} &middot; {modified}</small></li>",
                format_size(entry.size)
            );
        }
    }

    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    html
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
