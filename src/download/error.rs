//! 下载任务的错误分类。
//!
//! 页面级错误都带上章节、页面与全局序号，终端只打印一条即可定位。

use thiserror::Error;

use super::models::{PageId, PageTask};
use crate::book_parser::archive::ArchiveError;
use crate::network_parser::source::SourceError;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// 规划阶段章节解析失败，此时尚未启动任何下载线程。
    #[error("章节 {chapter_id} 解析失败: {source}")]
    Planning {
        chapter_id: String,
        #[source]
        source: SourceError,
    },

    #[error("章节 {chapter_id} 会话建立失败（第 {index} 页任务）: {source}")]
    Session {
        chapter_id: String,
        index: usize,
        #[source]
        source: SourceError,
    },

    #[error("章节 {chapter_id} 页面 {page_id}（#{index}）找不到图片地址: {source}")]
    PageResolution {
        chapter_id: String,
        page_id: PageId,
        index: usize,
        #[source]
        source: SourceError,
    },

    #[error("章节 {chapter_id} 页面 {page_id}（#{index}）图片内容不可用: {source}")]
    PageBodyUnavailable {
        chapter_id: String,
        page_id: PageId,
        index: usize,
        #[source]
        source: SourceError,
    },

    #[error("章节 {chapter_id} 页面 {page_id}（#{index}）下载失败: {source}")]
    PageFetch {
        chapter_id: String,
        page_id: PageId,
        index: usize,
        #[source]
        source: SourceError,
    },

    #[error("写入归档失败: {0}")]
    Archive(#[from] ArchiveError),

    #[error("输出文件错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("输出文件已存在且不允许覆盖: {}", path.display())]
    OutputExists { path: std::path::PathBuf },

    #[error("下载已取消")]
    Canceled,
}

impl DownloadError {
    /// 按采集器错误类型归入对应的页面级错误。
    pub(crate) fn from_fetch(task: &PageTask, err: SourceError) -> Self {
        let chapter_id = task.chapter_id.clone();
        let page_id = task.page_id.clone();
        let index = task.global_index;
        match err {
            SourceError::ImageRefMissing { .. } => DownloadError::PageResolution {
                chapter_id,
                page_id,
                index,
                source: err,
            },
            SourceError::BodyUnavailable { .. } => DownloadError::PageBodyUnavailable {
                chapter_id,
                page_id,
                index,
                source: err,
            },
            _ => DownloadError::PageFetch {
                chapter_id,
                page_id,
                index,
                source: err,
            },
        }
    }

    pub(crate) fn from_session(task: &PageTask, err: SourceError) -> Self {
        DownloadError::Session {
            chapter_id: task.chapter_id.clone(),
            index: task.global_index,
            source: err,
        }
    }

    /// 出错页面的全局序号（仅页面级错误）。
    pub fn page_index(&self) -> Option<usize> {
        match self {
            DownloadError::Session { index, .. }
            | DownloadError::PageResolution { index, .. }
            | DownloadError::PageBodyUnavailable { index, .. }
            | DownloadError::PageFetch { index, .. } => Some(*index),
            _ => None,
        }
    }
}
