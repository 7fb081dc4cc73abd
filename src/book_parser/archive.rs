//! 归档写入的公共部分：写入器 trait、错误类型、图片类型判断。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// 文件扩展名不是支持的图片类型。
    #[error("不支持的图片类型: {file_name}")]
    UnsupportedImage { file_name: String },

    /// 文件名重复，或带有路径成分。
    #[error("图片文件名无效: {file_name}（{reason}）")]
    InvalidFileName {
        file_name: String,
        reason: &'static str,
    },

    #[error("写入失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip 写入失败: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("归档已完成，不能继续写入")]
    Finalized,
}

/// 按最终顺序接收页面的归档写入器。写入器自身不做任何重排。
pub trait ArchiveWriter {
    fn append_page(&mut self, data: Vec<u8>) -> Result<(), ArchiveError>;

    /// 写出格式要求的尾部数据并关闭底层 zip；之后不可再写。
    fn finalize(&mut self) -> Result<(), ArchiveError>;

    fn pages_written(&self) -> usize;
}

// ── MIME / 扩展名 ───────────────────────────────────────────────

/// 按扩展名（不区分大小写）给出媒体类型；未知扩展名返回 None。
pub fn media_type_for(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// 按文件头猜测扩展名（不带点）。
pub fn sniff_ext(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }
    if bytes.len() >= 6 && bytes.starts_with(b"GIF") {
        return Some("gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("webp");
    }
    None
}
