//! 测试用的站点替身：页面内容由章节与页码确定，可按需注入失败。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::download::models::PageId;
use crate::network_parser::source::{PageFetcher, PageLocator, SourceError};

#[derive(Debug, Clone, Copy)]
pub(crate) enum FailKind {
    MissingRef,
    NoBody,
}

pub(crate) struct StubSession {
    pub(crate) chapter_id: String,
}

#[derive(Default)]
pub(crate) struct StubSource {
    chapters: HashMap<String, Vec<String>>,
    unresolvable: HashSet<String>,
    page_failures: HashMap<(String, String), FailKind>,
    /// 累计打开次数达到该值后，后续打开全部失败
    fail_opens_after: Option<usize>,
    /// 页码越小睡得越久，让完成顺序与任务顺序相反
    reverse_latency: bool,
    pub(crate) opens: AtomicUsize,
    pub(crate) fetches: AtomicUsize,
    pub(crate) opened_by_thread: Mutex<Vec<(String, String)>>,
}

impl StubSource {
    pub(crate) fn new(chapters: &[(&str, usize)]) -> Self {
        let chapters = chapters
            .iter()
            .map(|(id, n)| {
                let pages = (1..=*n).map(|p| format!("p{p}")).collect();
                (id.to_string(), pages)
            })
            .collect();
        Self {
            chapters,
            ..Self::default()
        }
    }

    pub(crate) fn unresolvable(mut self, chapter: &str) -> Self {
        self.unresolvable.insert(chapter.to_string());
        self
    }

    pub(crate) fn fail_page(mut self, chapter: &str, page: &str, kind: FailKind) -> Self {
        self.page_failures
            .insert((chapter.to_string(), page.to_string()), kind);
        self
    }

    pub(crate) fn fail_opens_after(mut self, n: usize) -> Self {
        self.fail_opens_after = Some(n);
        self
    }

    pub(crate) fn reverse_latency(mut self) -> Self {
        self.reverse_latency = true;
        self
    }

    pub(crate) fn marker(chapter: &str, page: &str) -> Vec<u8> {
        format!("{chapter}:{page}").into_bytes()
    }
}

impl PageLocator for StubSource {
    type Session = StubSession;

    fn open_chapter(
        &self,
        _work_id: &str,
        chapter_id: &str,
    ) -> Result<(StubSession, Vec<PageId>), SourceError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_opens_after.is_some_and(|limit| n >= limit) {
            return Err(SourceError::Browser("tab limit reached".into()));
        }
        if self.unresolvable.contains(chapter_id) {
            return Err(SourceError::ChapterUnavailable {
                reason: format!("{chapter_id} not found"),
            });
        }
        let pages = self
            .chapters
            .get(chapter_id)
            .ok_or_else(|| SourceError::ChapterUnavailable {
                reason: format!("unknown chapter {chapter_id}"),
            })?;
        if let Ok(mut log) = self.opened_by_thread.lock() {
            log.push((
                format!("{:?}", thread::current().id()),
                chapter_id.to_string(),
            ));
        }
        Ok((
            StubSession {
                chapter_id: chapter_id.to_string(),
            },
            pages.iter().map(|p| PageId(p.clone())).collect(),
        ))
    }
}

impl PageFetcher for StubSource {
    fn fetch_page(
        &self,
        session: &mut StubSession,
        page: &PageId,
    ) -> Result<Vec<u8>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.reverse_latency {
            let n: u64 = page.as_str().trim_start_matches('p').parse().unwrap_or(1);
            thread::sleep(Duration::from_millis(40_u64.saturating_sub(n * 8)));
        }
        let key = (session.chapter_id.clone(), page.as_str().to_string());
        match self.page_failures.get(&key) {
            Some(FailKind::MissingRef) => Err(SourceError::ImageRefMissing {
                page: page.to_string(),
            }),
            Some(FailKind::NoBody) => Err(SourceError::BodyUnavailable {
                url: format!("https://img.example/{}/{}.jpg", key.0, key.1),
                reason: "no recorded exchange".into(),
            }),
            None => Ok(Self::marker(&session.chapter_id, page.as_str())),
        }
    }
}
