//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`：数据模型（ChapterRef / PageTask / DownloadJob 等）
//! - `error`：下载错误分类
//! - `plan`：章节 → 全局有序页面任务
//! - `page_pool`：页面并发下载工作池
//! - `result_buffer`：按全局序号写入的结果槽
//! - `progress`：进度计数与 CLI 进度条
//! - `downloader`：下载主流程编排

pub mod downloader;
pub mod error;
pub mod models;
pub mod page_pool;
pub mod plan;
pub(crate) mod progress;
pub(crate) mod result_buffer;

#[cfg(test)]
mod test_helpers;
