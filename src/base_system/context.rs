//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::{ConfigSpec, FieldMeta};

/// 覆盖 `max_workers` 的环境变量。
pub const WORKERS_ENV: &str = "COMIC_DL_WORKERS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 下载配置
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub headless: bool,

    // 保存配置
    #[serde(default = "default_format")]
    pub default_format: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default = "default_true")]
    pub allow_overwrite_files: bool,

    // 界面
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            page_timeout_secs: default_page_timeout_secs(),
            headless: default_true(),
            default_format: default_format(),
            save_path: String::new(),
            allow_overwrite_files: default_true(),
            show_progress: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 7] = [
            FieldMeta {
                name: "max_workers",
                description: "下载页面时的并发线程数（环境变量 COMIC_DL_WORKERS 可覆盖）",
            },
            FieldMeta {
                name: "page_timeout_secs",
                description: "单页加载与图片抓取的超时时间（秒）",
            },
            FieldMeta {
                name: "headless",
                description: "是否以无头模式启动浏览器",
            },
            FieldMeta {
                name: "default_format",
                description: "默认输出格式, 可选: [cbz, epub]",
            },
            FieldMeta {
                name: "save_path",
                description: "保存路径（留空为当前目录）",
            },
            FieldMeta {
                name: "allow_overwrite_files",
                description: "是否允许覆盖已存在的文件",
            },
            FieldMeta {
                name: "show_progress",
                description: "下载时是否显示进度条",
            },
        ];
        &FIELDS
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs.max(1))
    }

    /// 并发数：命令行 > 环境变量 > 配置文件，非法值忽略。
    pub fn resolve_workers(&self, cli_override: Option<usize>) -> usize {
        let env_value = std::env::var(WORKERS_ENV).ok();
        pick_workers(cli_override, env_value.as_deref(), self.max_workers)
    }
}

fn pick_workers(cli: Option<usize>, env_value: Option<&str>, configured: usize) -> usize {
    if let Some(n) = cli.filter(|n| *n > 0) {
        return n;
    }
    if let Some(raw) = env_value {
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => return n,
            _ => warn!(target: "startup", value = raw, "忽略无效的 {WORKERS_ENV}"),
        }
    }
    configured.max(1)
}

pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let fallback = replacement.chars().next().unwrap_or('_');
    let mut cleaned: String = name
        .trim()
        .chars()
        .map(|ch| match ch {
            ':' => '：',
            '<' => '《',
            '>' => '》',
            '/' | '\\' => '、',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            '"' => '＂',
            c if (c as u32) < 32 => fallback,
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if RESERVED.contains(&cleaned.to_uppercase().as_str()) {
        cleaned.insert(0, '_');
    }

    if cleaned.len() > max_len {
        // 避免在多字节字符中间截断
        let mut end = max_len;
        while end > 0 && !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
        while cleaned.ends_with(' ') || cleaned.ends_with('.') {
            cleaned.pop();
        }
        if cleaned.is_empty() {
            cleaned.push_str("unnamed");
        }
    }

    cleaned
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    4
}

fn default_page_timeout_secs() -> u64 {
    30
}

fn default_format() -> String {
    "cbz".to_string()
}
