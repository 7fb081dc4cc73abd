//! 下载主流程编排：规划 → 并发抓取 → 按序编码 → 落盘。
//!
//! 任一阶段出错时 `.part` 临时文件被删除，目标路径不会出现不完整的归档。

use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::error::DownloadError;
use super::models::{DownloadJob, DownloadSummary, OutputFormat};
use super::page_pool::{DEFAULT_WORKERS, PagePool};
use super::plan::plan_tasks;
use crate::base_system::context::{Config, safe_fs_name};
use crate::base_system::file_utils::PartFile;
use crate::book_parser::archive::{ArchiveError, ArchiveWriter};
use crate::book_parser::cbz_writer::CbzWriter;
use crate::book_parser::epub_writer::EpubWriter;
use crate::network_parser::source::PageFetcher;

const MAX_FILE_NAME_LEN: usize = 120;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub workers: usize,
    pub show_progress: bool,
    pub allow_overwrite: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            show_progress: false,
            allow_overwrite: true,
            cancel: None,
        }
    }
}

impl DownloadOptions {
    pub fn from_config(
        config: &Config,
        cli_workers: Option<usize>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            workers: config.resolve_workers(cli_workers),
            show_progress: config.show_progress,
            allow_overwrite: config.allow_overwrite_files,
            cancel,
        }
    }
}

/// `{目录}/{安全化标题}.{扩展名}`
pub fn output_path(job: &DownloadJob, dir: &Path) -> PathBuf {
    let stem = safe_fs_name(&job.title, "_", MAX_FILE_NAME_LEN);
    dir.join(format!("{stem}.{}", job.format.extension()))
}

/// 下载并写入 `dir`，成功后返回最终文件路径。
///
/// 内容先写入 `.part` 临时文件，出错时临时文件随之删除。
pub fn download_to_dir<S: PageFetcher>(
    source: &S,
    job: &DownloadJob,
    options: &DownloadOptions,
    dir: &Path,
) -> Result<(PathBuf, DownloadSummary), DownloadError> {
    let target = output_path(job, dir);
    if target.exists() && !options.allow_overwrite {
        return Err(DownloadError::OutputExists { path: target });
    }

    let (part, file) = PartFile::create(&target)?;
    let (writer, summary) = download_to_writer(source, job, options, BufWriter::new(file))?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    let path = part.commit()?;

    info!(
        path = %path.display(),
        pages = summary.pages,
        bytes = summary.bytes,
        "已保存 {}",
        job.format
    );
    Ok((path, summary))
}

/// 下载并写入任意可寻址输出；抓取失败时输出中不会有任何条目。
pub fn download_to_writer<S: PageFetcher, W: Write + Seek>(
    source: &S,
    job: &DownloadJob,
    options: &DownloadOptions,
    out: W,
) -> Result<(W, DownloadSummary), DownloadError> {
    let pages = fetch_pages(source, job, options)?;
    let summary = summarize(job, &pages);
    let out = encode_pages(job, pages, out)?;
    Ok((out, summary))
}

fn fetch_pages<S: PageFetcher>(
    source: &S,
    job: &DownloadJob,
    options: &DownloadOptions,
) -> Result<Vec<Vec<u8>>, DownloadError> {
    let started = Instant::now();
    let tasks = plan_tasks(source, &job.chapter_refs())?;
    if tasks.is_empty() {
        warn!(work_id = %job.work_id, "没有任何页面，将生成空归档");
    }

    let pages = PagePool::new(source, options.workers)
        .with_cancel(options.cancel.clone())
        .with_progress(options.show_progress)
        .run(&tasks)?;

    info!(
        pages = pages.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "页面抓取完成"
    );
    Ok(pages)
}

/// 严格按下标顺序把页面交给编码器。
fn encode_pages<W: Write + Seek>(
    job: &DownloadJob,
    pages: Vec<Vec<u8>>,
    out: W,
) -> Result<W, DownloadError> {
    match job.format {
        OutputFormat::Cbz => {
            let mut writer = CbzWriter::new(out);
            write_in_order(&mut writer, pages)?;
            writer
                .into_inner()
                .ok_or(DownloadError::Archive(ArchiveError::Finalized))
        }
        OutputFormat::Epub => {
            let mut writer = EpubWriter::new(out, job.title.clone());
            write_in_order(&mut writer, pages)?;
            writer
                .into_inner()
                .ok_or(DownloadError::Archive(ArchiveError::Finalized))
        }
    }
}

fn write_in_order(writer: &mut impl ArchiveWriter, pages: Vec<Vec<u8>>) -> Result<(), DownloadError> {
    for page in pages {
        writer.append_page(page)?;
    }
    writer.finalize()?;
    debug!(target: "archive", pages = writer.pages_written(), "归档写入完成");
    Ok(())
}

fn summarize(job: &DownloadJob, pages: &[Vec<u8>]) -> DownloadSummary {
    DownloadSummary {
        chapters: job.chapter_ids.len(),
        pages: pages.len(),
        bytes: pages.iter().map(|p| p.len() as u64).sum(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use zip::ZipArchive;

    use super::*;
    use crate::download::test_helpers::{FailKind, StubSource};

    fn job(format: OutputFormat) -> DownloadJob {
        DownloadJob {
            work_id: "w".into(),
            title: "Demo: 第1卷".into(),
            format,
            chapter_ids: vec!["A".into(), "B".into()],
        }
    }

    fn two_workers() -> DownloadOptions {
        DownloadOptions {
            workers: 2,
            ..DownloadOptions::default()
        }
    }

    fn entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut entry = zip.by_index(i).unwrap();
                let mut body = Vec::new();
                entry.read_to_end(&mut body).unwrap();
                (entry.name().to_string(), body)
            })
            .collect()
    }

    #[test]
    fn cbz_contains_markers_in_index_order() {
        let source = StubSource::new(&[("A", 2), ("B", 3)]).reverse_latency();
        let (out, summary) =
            download_to_writer(&source, &job(OutputFormat::Cbz), &two_workers(), Cursor::new(Vec::new()))
                .unwrap();

        let got = entries(out.into_inner());
        let want: Vec<(String, Vec<u8>)> = [("A", "p1"), ("A", "p2"), ("B", "p1"), ("B", "p2"), ("B", "p3")]
            .iter()
            .enumerate()
            .map(|(i, (c, p))| (format!("{i}.jpg"), StubSource::marker(c, p)))
            .collect();
        assert_eq!(got, want);
        assert_eq!(summary.pages, 5);
        assert_eq!(summary.chapters, 2);
    }

    #[test]
    fn failing_page_reports_one_error_and_writes_nothing() {
        let source = StubSource::new(&[("A", 2), ("B", 3)]).fail_page("B", "p2", FailKind::MissingRef);
        let out = Cursor::new(Vec::new());

        let err = download_to_writer(&source, &job(OutputFormat::Cbz), &two_workers(), out).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("章节 B"), "{msg}");
        assert!(msg.contains("页面 p2"), "{msg}");
        assert_eq!(err.page_index(), Some(3));
    }

    #[test]
    fn epub_pages_follow_task_order() {
        let source = StubSource::new(&[("A", 1), ("B", 2)]);
        let (out, _) =
            download_to_writer(&source, &job(OutputFormat::Epub), &two_workers(), Cursor::new(Vec::new()))
                .unwrap();

        let got = entries(out.into_inner());
        assert_eq!(got[0].0, "mimetype");
        let images: Vec<&(String, Vec<u8>)> = got
            .iter()
            .filter(|(name, _)| name.starts_with("OEBPS/images/"))
            .collect();
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].0, "OEBPS/images/0.jpg");
        assert_eq!(images[0].1, StubSource::marker("A", "p1"));
        assert_eq!(images[2].1, StubSource::marker("B", "p2"));
    }

    #[test]
    fn writes_file_named_after_title() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(&[("A", 2), ("B", 1)]);

        let (path, _) = download_to_dir(&source, &job(OutputFormat::Cbz), &two_workers(), dir.path()).unwrap();
        assert_eq!(path, dir.path().join("Demo： 第1卷.cbz"));
        assert_eq!(entries(std::fs::read(&path).unwrap()).len(), 3);
        assert!(!crate::base_system::file_utils::part_path(&path).exists());
    }

    #[test]
    fn failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(&[("A", 2), ("B", 3)]).fail_page("A", "p2", FailKind::NoBody);
        let job = job(OutputFormat::Epub);

        let err = download_to_dir(&source, &job, &two_workers(), dir.path()).unwrap_err();
        assert!(matches!(err, DownloadError::PageBodyUnavailable { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn planning_failure_starts_no_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(&[("A", 2), ("B", 3)]).unresolvable("B");

        let err = download_to_dir(&source, &job(OutputFormat::Cbz), &two_workers(), dir.path()).unwrap_err();
        assert!(matches!(err, DownloadError::Planning { .. }));
        assert_eq!(source.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn existing_file_is_kept_when_overwrite_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(OutputFormat::Cbz);
        let target = output_path(&job, dir.path());
        std::fs::write(&target, b"old").unwrap();

        let source = StubSource::new(&[("A", 1), ("B", 1)]);
        let options = DownloadOptions {
            allow_overwrite: false,
            ..two_workers()
        };
        let err = download_to_dir(&source, &job, &options, dir.path()).unwrap_err();
        assert!(matches!(err, DownloadError::OutputExists { .. }));
        assert_eq!(source.opens.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
    }

    #[test]
    fn empty_chapter_list_produces_empty_archive() {
        let source = StubSource::new(&[]);
        let job = DownloadJob {
            chapter_ids: Vec::new(),
            ..job(OutputFormat::Cbz)
        };
        let (out, summary) =
            download_to_writer(&source, &job, &DownloadOptions::default(), Cursor::new(Vec::new())).unwrap();
        assert!(entries(out.into_inner()).is_empty());
        assert_eq!(summary.pages, 0);
    }
}
