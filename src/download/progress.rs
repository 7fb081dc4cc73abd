//! 页面下载进度（仅用于展示，不参与正确性判断）。

use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub(crate) struct PageProgress {
    done: AtomicUsize,
    total: usize,
    bar: Option<ProgressBar>,
}

impl PageProgress {
    pub(crate) fn new(total: usize, show_bar: bool) -> Self {
        let bar = (show_bar && total > 0).then(|| {
            let bar = ProgressBar::with_draw_target(
                Some(total as u64),
                ProgressDrawTarget::stderr(),
            );
            let style = ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
            bar.set_style(style);
            bar.set_prefix("页面下载");
            bar
        });
        Self {
            done: AtomicUsize::new(0),
            total,
            bar,
        }
    }

    /// 完成一页，返回累计完成数。
    pub(crate) fn tick(&self) -> usize {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        done
    }

    pub(crate) fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    /// 进度条与日志共用 stderr，显示进度条时逐页日志应降到 debug。
    pub(crate) fn bar_visible(&self) -> bool {
        self.bar.is_some()
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
