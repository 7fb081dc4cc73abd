//! EPUB 写入。
//!
//! 页面在 `add_page` 时只做校验并缓存，所有条目在 `finalize` 时一次写出，
//! 保证 `mimetype`（不压缩）是 zip 里的第一个条目。写出顺序：
//! mimetype、META-INF/container.xml、OEBPS/content.opf、OEBPS/toc.ncx，
//! 然后逐页写包装文档与图片。

use std::collections::HashSet;
use std::io::{Seek, Write};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info};
use uuid::Uuid;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use super::archive::{ArchiveError, ArchiveWriter, media_type_for, sniff_ext};
use super::xhtml::{self, PackageMeta, PageEntry};

const DEFAULT_CREATOR: &str = "comic-downloader";

struct BufferedPage {
    file_name: String,
    media_type: &'static str,
    data: Vec<u8>,
}

enum State<W: Write + Seek> {
    Open(ZipWriter<W>),
    Finished(W),
    Broken,
}

pub struct EpubWriter<W: Write + Seek> {
    state: State<W>,
    title: String,
    creator: String,
    date: String,
    pages: Vec<BufferedPage>,
    names: HashSet<String>,
}

impl<W: Write + Seek> EpubWriter<W> {
    pub fn new(inner: W, title: impl Into<String>) -> Self {
        let date = OffsetDateTime::now_utc()
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_default();
        Self {
            state: State::Open(ZipWriter::new(inner)),
            title: title.into(),
            creator: DEFAULT_CREATOR.to_string(),
            date,
            pages: Vec::new(),
            names: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    /// 覆盖 `dc:date`，格式 YYYY-MM-DD。
    #[cfg(test)]
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    /// 由标题派生的稳定标识，同名作品多次导出结果一致。
    pub fn identifier(&self) -> String {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, self.title.as_bytes());
        format!("urn:uuid:{id}")
    }

    /// 以指定文件名追加一页；扩展名必须是支持的图片类型，文件名不可重复，
    /// 也不能带目录。
    pub fn add_page(&mut self, file_name: &str, data: Vec<u8>) -> Result<(), ArchiveError> {
        if !matches!(self.state, State::Open(_)) {
            return Err(ArchiveError::Finalized);
        }
        let invalid = |reason| ArchiveError::InvalidFileName {
            file_name: file_name.to_string(),
            reason,
        };
        if file_name.contains(['/', '\\']) || file_name.contains("..") {
            return Err(invalid("不能包含路径"));
        }
        let media_type = media_type_for(file_name).ok_or_else(|| ArchiveError::UnsupportedImage {
            file_name: file_name.to_string(),
        })?;
        if !self.names.insert(file_name.to_string()) {
            return Err(invalid("与已有页面重名"));
        }
        self.pages.push(BufferedPage {
            file_name: file_name.to_string(),
            media_type,
            data,
        });
        Ok(())
    }

    pub fn into_inner(self) -> Option<W> {
        match self.state {
            State::Finished(w) => Some(w),
            _ => None,
        }
    }

    fn write_all_entries(&self, zip: &mut ZipWriter<W>) -> Result<(), ArchiveError> {
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(xhtml::MIMETYPE.as_bytes())?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(xhtml::CONTAINER_XML.as_bytes())?;

        let identifier = self.identifier();
        let meta = PackageMeta {
            title: &self.title,
            creator: &self.creator,
            identifier: &identifier,
            date: &self.date,
        };
        let entries: Vec<PageEntry<'_>> = self
            .pages
            .iter()
            .enumerate()
            .map(|(i, p)| PageEntry {
                seq: i + 1,
                image_file: &p.file_name,
                media_type: p.media_type,
            })
            .collect();

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(xhtml::package_opf(&meta, &entries).as_bytes())?;

        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(xhtml::toc_ncx(&meta, &entries).as_bytes())?;

        for (entry, page) in entries.iter().zip(&self.pages) {
            zip.start_file(format!("OEBPS/{}", entry.doc_name()), deflated)?;
            zip.write_all(xhtml::page_xhtml(entry.seq, entry.image_file).as_bytes())?;

            // 图片本身已是压缩格式，直接存储
            zip.start_file(format!("OEBPS/images/{}", page.file_name), stored)?;
            zip.write_all(&page.data)?;
        }
        Ok(())
    }
}

impl<W: Write + Seek> ArchiveWriter for EpubWriter<W> {
    /// 文件名按 `{序号}.{扩展名}` 生成，扩展名由文件头判断，认不出时按 jpg 处理。
    fn append_page(&mut self, data: Vec<u8>) -> Result<(), ArchiveError> {
        let ext = sniff_ext(&data).unwrap_or("jpg");
        let name = format!("{}.{ext}", self.pages.len());
        self.add_page(&name, data)
    }

    fn finalize(&mut self) -> Result<(), ArchiveError> {
        let mut zip = match std::mem::replace(&mut self.state, State::Broken) {
            State::Open(zip) => zip,
            other => {
                self.state = other;
                return Err(ArchiveError::Finalized);
            }
        };
        self.write_all_entries(&mut zip)?;
        let inner = zip.finish()?;
        self.state = State::Finished(inner);
        info!(target: "archive", title = %self.title, "EPUB 写入完成");
        debug!(target: "archive", identifier = %self.identifier(), "EPUB 标识");
        Ok(())
    }

    fn pages_written(&self) -> usize {
        self.pages.len()
    }
}
