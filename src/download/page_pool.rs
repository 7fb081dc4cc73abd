//! 页面并发下载工作池。
//!
//! 固定数量的工作线程共享一个任务通道；每个线程持有自己的章节会话表，
//! 下载结果按全局序号写入预分配的结果槽。任一线程出错后只保留第一个错误，
//! 其余线程在下一轮循环时停止取任务，全部退出后再把错误交给调用方。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use tracing::{debug, info, warn};

use super::error::DownloadError;
use super::models::PageTask;
use super::progress::PageProgress;
use super::result_buffer::ResultBuffer;
use crate::network_parser::source::PageFetcher;

pub const DEFAULT_WORKERS: usize = 4;

const RECV_POLL: Duration = Duration::from_millis(200);

pub struct PagePool<'a, S: PageFetcher> {
    source: &'a S,
    workers: usize,
    cancel: Option<Arc<AtomicBool>>,
    show_progress: bool,
}

/// 工作线程之间共享的状态：结果槽、首个错误、取消标志。
struct Shared<'a> {
    buffer: ResultBuffer,
    first_error: OnceLock<DownloadError>,
    cancel: AtomicBool,
    external_cancel: Option<&'a AtomicBool>,
    progress: PageProgress,
}

impl Shared<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
            || self
                .external_cancel
                .map(|c| c.load(Ordering::Relaxed))
                .unwrap_or(false)
    }

    /// 先到先得：只记录第一个错误，随后广播取消。
    fn fail(&self, err: DownloadError) {
        if let Err(dropped) = self.first_error.set(err) {
            debug!(target: "pool", error = %dropped, "已有错误，忽略后续错误");
        }
        self.cancel.store(true, Ordering::Release);
    }
}

impl<'a, S: PageFetcher> PagePool<'a, S> {
    pub fn new(source: &'a S, workers: usize) -> Self {
        Self {
            source,
            workers: workers.max(1),
            cancel: None,
            show_progress: false,
        }
    }

    /// 外部取消信号（例如 Ctrl-C），与内部的出错取消同等对待。
    pub fn with_cancel(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// 下载全部任务，成功时按 `global_index` 顺序返回每页字节。
    pub fn run(&self, tasks: &[PageTask]) -> Result<Vec<Vec<u8>>, DownloadError> {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = self.workers.min(total);
        info!(target: "pool", workers, pages = total, "启动下载线程");

        let shared = Shared {
            buffer: ResultBuffer::new(total),
            first_error: OnceLock::new(),
            cancel: AtomicBool::new(false),
            external_cancel: self.cancel.as_deref(),
            progress: PageProgress::new(total, self.show_progress),
        };

        let (tx, rx) = channel::bounded::<&PageTask>(workers);

        thread::scope(|s| {
            let shared = &shared;

            // 投递线程：所有工作线程退出后 send 会失败，不会永久阻塞
            s.spawn(move || {
                for task in tasks {
                    if shared.is_cancelled() || tx.send(task).is_err() {
                        break;
                    }
                }
            });

            for id in 1..=workers {
                let rx = rx.clone();
                let source = self.source;
                let spawned = thread::Builder::new()
                    .name(format!("page-worker-{id}"))
                    .spawn_scoped(s, move || worker_loop(id, source, rx, shared));
                if let Err(err) = spawned {
                    shared.fail(DownloadError::Io(err));
                    break;
                }
            }
            drop(rx);
        });

        shared.progress.finish();
        let Shared {
            buffer,
            first_error,
            progress,
            ..
        } = shared;

        if let Some(err) = first_error.into_inner() {
            warn!(
                target: "pool",
                done = progress.done(),
                total,
                index = ?err.page_index(),
                "下载失败，丢弃已完成的页面"
            );
            return Err(err);
        }
        match buffer.into_ordered() {
            Some(pages) => {
                info!(target: "pool", pages = pages.len(), "全部页面下载完成");
                Ok(pages)
            }
            None => {
                info!(target: "pool", done = progress.done(), total, "下载已取消");
                Err(DownloadError::Canceled)
            }
        }
    }
}

fn worker_loop<S: PageFetcher>(
    id: usize,
    source: &S,
    rx: channel::Receiver<&PageTask>,
    shared: &Shared<'_>,
) {
    // 会话只属于本线程：同一章节可能被多个线程各自打开一次
    let mut sessions: HashMap<String, S::Session> = HashMap::new();

    loop {
        if shared.is_cancelled() {
            debug!(target: "pool", worker = id, "收到取消信号，退出");
            return;
        }

        let task = match rx.recv_timeout(RECV_POLL) {
            Ok(task) => task,
            Err(channel::RecvTimeoutError::Timeout) => continue,
            Err(channel::RecvTimeoutError::Disconnected) => return,
        };

        if shared.is_cancelled() {
            return;
        }

        let session = match sessions.entry(task.chapter_id.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => match source.open_chapter(&task.work_id, &task.chapter_id) {
                Ok((session, _pages)) => {
                    debug!(target: "pool", worker = id, chapter_id = %task.chapter_id, "打开章节会话");
                    e.insert(session)
                }
                Err(err) => {
                    shared.fail(DownloadError::from_session(task, err));
                    return;
                }
            },
        };

        match source.fetch_page(session, &task.page_id) {
            Ok(bytes) => {
                if !shared.buffer.fill(task.global_index, bytes) {
                    warn!(target: "pool", index = task.global_index, "结果槽重复写入，已忽略");
                }
                let done = shared.progress.tick();
                let total = shared.progress.total();
                if shared.progress.bar_visible() {
                    debug!(target: "pool", "Worker {} downloaded page {}/{}", id, done, total);
                } else {
                    info!(target: "pool", "Worker {} downloaded page {}/{}", id, done, total);
                }
            }
            Err(err) => {
                shared.fail(DownloadError::from_fetch(task, err));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::ChapterRef;
    use crate::download::plan::plan_tasks;
    use crate::download::test_helpers::{FailKind, StubSource};

    fn plan(source: &StubSource, ids: &[&str]) -> Vec<PageTask> {
        let refs: Vec<ChapterRef> = ids.iter().map(|id| ChapterRef::new("w", *id)).collect();
        plan_tasks(source, &refs).unwrap()
    }

    fn expected(pairs: &[(&str, &str)]) -> Vec<Vec<u8>> {
        pairs.iter().map(|(c, p)| StubSource::marker(c, p)).collect()
    }

    #[test]
    fn results_follow_task_order_with_two_workers() {
        let source = StubSource::new(&[("A", 2), ("B", 3)]);
        let tasks = plan(&source, &["A", "B"]);

        let pages = PagePool::new(&source, 2).run(&tasks).unwrap();
        assert_eq!(
            pages,
            expected(&[("A", "p1"), ("A", "p2"), ("B", "p1"), ("B", "p2"), ("B", "p3")])
        );
    }

    #[test]
    fn order_holds_when_later_pages_finish_first() {
        let source = StubSource::new(&[("A", 4), ("B", 4)]).reverse_latency();
        let tasks = plan(&source, &["A", "B"]);

        for workers in [1, 3, 8, 32] {
            let pages = PagePool::new(&source, workers).run(&tasks).unwrap();
            let want: Vec<Vec<u8>> = tasks
                .iter()
                .map(|t| StubSource::marker(&t.chapter_id, t.page_id.as_str()))
                .collect();
            assert_eq!(pages, want, "workers = {workers}");
        }
    }

    #[test]
    fn single_failure_reports_exactly_that_page() {
        let source =
            StubSource::new(&[("A", 2), ("B", 3)]).fail_page("B", "p2", FailKind::NoBody);
        let tasks = plan(&source, &["A", "B"]);

        let err = PagePool::new(&source, 2).run(&tasks).unwrap_err();
        match &err {
            DownloadError::PageBodyUnavailable {
                chapter_id,
                page_id,
                index,
                ..
            } => {
                assert_eq!(chapter_id, "B");
                assert_eq!(page_id.as_str(), "p2");
                assert_eq!(*index, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_image_reference_is_a_resolution_error() {
        let source = StubSource::new(&[("A", 3)]).fail_page("A", "p1", FailKind::MissingRef);
        let tasks = plan(&source, &["A"]);

        let err = PagePool::new(&source, 1).run(&tasks).unwrap_err();
        assert!(matches!(err, DownloadError::PageResolution { index: 0, .. }));
        // 单线程时出错后立即停止，不再抓取剩余页面
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_error_wins_when_many_pages_fail() {
        let mut source = StubSource::new(&[("A", 6)]);
        for p in 1..=6 {
            source = source.fail_page("A", &format!("p{p}"), FailKind::MissingRef);
        }
        let tasks = plan(&source, &["A"]);

        let err = PagePool::new(&source, 4).run(&tasks).unwrap_err();
        assert!(matches!(err, DownloadError::PageResolution { .. }));
    }

    #[test]
    fn early_failure_stops_all_workers() {
        let source = StubSource::new(&[("A", 400)]).fail_page("A", "p1", FailKind::MissingRef);
        let tasks = plan(&source, &["A"]);

        let err = PagePool::new(&source, 4).run(&tasks).unwrap_err();
        assert!(matches!(err, DownloadError::PageResolution { index: 0, .. }), "{err}");
        let fetched = source.fetches.load(Ordering::SeqCst);
        assert!(fetched < 40, "{fetched} of {} pages fetched after the first failure", tasks.len());
    }

    #[test]
    fn progress_bar_does_not_change_results() {
        let source = StubSource::new(&[("A", 3)]);
        let tasks = plan(&source, &["A"]);

        let pages = PagePool::new(&source, 2).with_progress(true).run(&tasks).unwrap();
        assert_eq!(pages, expected(&[("A", "p1"), ("A", "p2"), ("A", "p3")]));
    }

    #[test]
    fn session_failure_mid_run_is_reported_as_session_error() {
        // 规划阶段打开两次成功，之后工作线程打开会话全部失败
        let source = StubSource::new(&[("A", 2), ("B", 2)]).fail_opens_after(2);
        let tasks = plan(&source, &["A", "B"]);

        let err = PagePool::new(&source, 2).run(&tasks).unwrap_err();
        assert!(matches!(err, DownloadError::Session { .. }), "{err}");
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sessions_are_reused_within_a_worker() {
        let source = StubSource::new(&[("A", 5)]);
        let tasks = plan(&source, &["A"]);
        let before = source.opens.load(Ordering::SeqCst);

        PagePool::new(&source, 1).run(&tasks).unwrap();
        assert_eq!(source.opens.load(Ordering::SeqCst) - before, 1);
    }

    #[test]
    fn sessions_never_exceed_one_per_worker_per_chapter() {
        let source = StubSource::new(&[("A", 6), ("B", 6)]);
        let tasks = plan(&source, &["A", "B"]);
        let before = source.opens.load(Ordering::SeqCst);

        PagePool::new(&source, 3).run(&tasks).unwrap();
        let opened = source.opens.load(Ordering::SeqCst) - before;
        assert!((2..=6).contains(&opened), "opened {opened} sessions");

        let log = source.opened_by_thread.lock().unwrap();
        let worker_opens: Vec<_> = log.iter().skip(before).collect();
        let mut uniq = worker_opens.clone();
        uniq.sort();
        uniq.dedup();
        assert_eq!(uniq.len(), worker_opens.len());
    }

    #[test]
    fn external_cancel_stops_before_any_fetch() {
        let source = StubSource::new(&[("A", 3)]);
        let tasks = plan(&source, &["A"]);
        let cancel = Arc::new(AtomicBool::new(true));

        let err = PagePool::new(&source, 2)
            .with_cancel(Some(cancel))
            .run(&tasks)
            .unwrap_err();
        assert!(matches!(err, DownloadError::Canceled));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_task_list_returns_immediately() {
        let source = StubSource::new(&[]);
        assert!(PagePool::new(&source, 4).run(&[]).unwrap().is_empty());
    }
}
