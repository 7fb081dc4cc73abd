//! 下载计划：把章节列表展开为全局有序的页面任务。
//!
//! 所有章节都在下载开始前解析完毕，任何一章失败整个任务直接放弃。

use tracing::{debug, info};

use super::error::DownloadError;
use super::models::{ChapterRef, PageTask};
use crate::network_parser::source::PageLocator;

/// 按章节顺序、章内页序生成任务，`global_index` 从 0 连续递增。
pub fn plan_tasks<L: PageLocator>(
    locator: &L,
    chapters: &[ChapterRef],
) -> Result<Vec<PageTask>, DownloadError> {
    let mut tasks = Vec::new();

    for (n, chapter) in chapters.iter().enumerate() {
        info!(
            target: "plan",
            chapter_id = %chapter.chapter_id,
            "准备章节 ({}/{})",
            n + 1,
            chapters.len()
        );
        // 规划阶段的会话只用来拿页面列表，用完即弃
        let (_session, pages) = locator
            .open_chapter(&chapter.work_id, &chapter.chapter_id)
            .map_err(|source| DownloadError::Planning {
                chapter_id: chapter.chapter_id.clone(),
                source,
            })?;
        debug!(target: "plan", chapter_id = %chapter.chapter_id, pages = pages.len(), "章节页面已解析");

        tasks.reserve(pages.len());
        for page_id in pages {
            let global_index = tasks.len();
            tasks.push(PageTask {
                work_id: chapter.work_id.clone(),
                chapter_id: chapter.chapter_id.clone(),
                page_id,
                global_index,
            });
        }
    }

    info!(target: "plan", chapters = chapters.len(), pages = tasks.len(), "下载计划就绪");
    Ok(tasks)
}
