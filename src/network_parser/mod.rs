//! 站点访问模块入口。
//!
//! `source` 定义下载核心使用的协作接口，`browser` 用 headless Chrome 实现它，
//! `comic_info` 提供搜索与作品详情查询。

pub mod browser;
pub mod comic_info;
pub mod source;
