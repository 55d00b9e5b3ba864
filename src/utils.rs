// src/utils.rs

use crate::constants;
use md5::{Digest, Md5};
use regex::Regex;
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use url::Url;

static ILLEGAL_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// 清洗媒体标题，使其可以安全地用作文件名。
pub fn sanitize_filename(name: &str) -> String {
    let original_name = name.trim();
    if original_name.is_empty() {
        return "unknown".to_string();
    }

    let stem = Path::new(original_name)
        .file_stem()
        .unwrap_or_else(|| OsStr::new(original_name))
        .to_string_lossy()
        .to_uppercase();
    let windows_reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];

    let mut name = if windows_reserved.contains(&stem.as_ref()) {
        format!("_{}", original_name)
    } else {
        original_name.to_string()
    };

    name = ILLEGAL_CHARS_RE.replace_all(&name, " ").into_owned();
    name = WHITESPACE_RE.replace_all(&name, " ").trim().to_string();
    name = name
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();
    if name.is_empty() {
        return "unnamed".to_string();
    }

    if name.as_bytes().len() > constants::MAX_FILENAME_BYTES {
        if let (Some(stem_part), Some(ext)) =
            (Path::new(&name).file_stem(), Path::new(&name).extension())
        {
            let stem_part_str = stem_part.to_string_lossy();
            let ext_str = format!(".{}", ext.to_string_lossy());
            let max_stem_bytes =
                constants::MAX_FILENAME_BYTES.saturating_sub(ext_str.as_bytes().len());
            let truncated_stem = safe_truncate_utf8(&stem_part_str, max_stem_bytes);
            name = format!("{}{}", truncated_stem, ext_str);
        } else {
            name = safe_truncate_utf8(&name, constants::MAX_FILENAME_BYTES).to_string();
        }
    }
    name
}

fn safe_truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut i = max_bytes;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    &s[..i]
}

pub fn truncate_text(text: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut end_pos = 0;
    for (i, c) in text.char_indices() {
        width += if c.is_ascii() { 1 } else { 2 };
        if width > max_width.saturating_sub(3) {
            end_pos = i;
            break;
        }
    }
    if end_pos == 0 {
        text.to_string()
    } else {
        format!("{}...", &text[..end_pos])
    }
}

/// 从目标文件名推导扩展名（不含点）。
pub fn extension_from_path(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
}

/// 从 URL 的路径部分推导扩展名。查询参数不参与推导。
pub fn extension_from_url(url: &Url) -> Option<String> {
    let path = url.path();
    let filename = path.rsplit('/').next()?;
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

/// 从 Content-Type 头推导扩展名，只处理媒体库常见类型。
pub fn extension_from_content_type(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim().to_lowercase();
    let ext = match mime.as_str() {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "audio/mp4" | "audio/m4a" => "m4a",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "application/x-subrip" => "srt",
        _ => return None,
    };
    Some(ext.to_string())
}

/// 为目标路径生成确定性的临时文件名: `{name}.{md5(dest)[..8]}.part`。
/// 名称由目标的绝对路径哈希限定，共享的暂存目录内不同目标互不冲突；
/// 同一目标在进程重启后仍映射到同一个 part 文件，续传因此得以跨次运行。
pub fn temp_part_name(dest: &Path) -> String {
    let mut hasher = Md5::new();
    hasher.update(dest.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    format!("{}.{}.{}", name, &digest[..8], constants::TEMP_SUFFIX)
}

/// 解析暂存目录：优先使用配置的 scratch 目录，不可写时回退到目标文件旁。
pub fn resolve_scratch_dir(scratch: &Path, dest: &Path) -> PathBuf {
    if std::fs::create_dir_all(scratch).is_ok() {
        // create_dir_all 成功不代表可写，探测一次
        let probe = scratch.join(format!(".probe-{}", std::process::id()));
        if std::fs::write(&probe, b"").is_ok() {
            let _ = std::fs::remove_file(&probe);
            return scratch.to_path_buf();
        }
    }
    log::warn!(
        "暂存目录 {:?} 不可写，临时文件将写入目标目录。",
        scratch
    );
    dest.parent().map(|p| p.to_path_buf()).unwrap_or_default()
}
