//! 归档编码模块入口。
//!
//! 把按顺序排好的页面字节写成 cbz 或 epub。

pub mod archive;
pub mod cbz_writer;
pub mod epub_writer;
pub(crate) mod xhtml;
