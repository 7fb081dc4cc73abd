//! 页面定位 / 页面抓取的协作接口。
//!
//! 下载核心只通过这两个 trait 访问站点；会话状态完全由实现方持有。

use thiserror::Error;

use crate::download::models::PageId;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("章节不可用: {reason}")]
    ChapterUnavailable { reason: String },

    /// 页面上没有图片地址属性。
    #[error("页面 {page} 没有图片地址")]
    ImageRefMissing { page: String },

    /// 找到了图片地址，但取不到对应的响应内容。
    #[error("图片 {url} 内容不可用: {reason}")]
    BodyUnavailable { url: String, reason: String },

    #[error("浏览器错误: {0}")]
    Browser(String),
}

/// 章节定位：解析章节页面列表，并建立后续抓取所需的会话。
///
/// 会话只会被创建它的线程使用，因此不要求 `Send`。
pub trait PageLocator: Sync {
    type Session;

    /// 失败时不得返回部分页面列表。
    fn open_chapter(
        &self,
        work_id: &str,
        chapter_id: &str,
    ) -> Result<(Self::Session, Vec<PageId>), SourceError>;
}

/// 在已打开的会话上抓取单页图片的原始字节。
pub trait PageFetcher: PageLocator {
    fn fetch_page(
        &self,
        session: &mut Self::Session,
        page: &PageId,
    ) -> Result<Vec<u8>, SourceError>;
}
