//! 下载相关的数据模型定义。
//!
//! 章节引用、页面任务、输出格式、下载任务描述与结果汇总。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 待下载的一个章节，由调用方给出，按给出的顺序输出。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub work_id: String,
    pub chapter_id: String,
}

impl ChapterRef {
    pub fn new(work_id: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self {
            work_id: work_id.into(),
            chapter_id: chapter_id.into(),
        }
    }
}

/// 页面定位器给出的页面标识，对核心流程不透明。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub String);

impl PageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 一个页面下载任务。`global_index` 在规划时确定，即最终归档中的位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub work_id: String,
    pub chapter_id: String,
    pub page_id: PageId,
    pub global_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Cbz,
    Epub,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Cbz => "cbz",
            OutputFormat::Epub => "epub",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cbz" => Ok(OutputFormat::Cbz),
            "epub" => Ok(OutputFormat::Epub),
            other => Err(format!("不支持的输出格式: {other}（可选 cbz / epub）")),
        }
    }
}

/// 一次下载任务的完整描述。
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub work_id: String,
    pub title: String,
    pub format: OutputFormat,
    pub chapter_ids: Vec<String>,
}

impl DownloadJob {
    pub fn chapter_refs(&self) -> Vec<ChapterRef> {
        self.chapter_ids
            .iter()
            .map(|id| ChapterRef::new(self.work_id.clone(), id.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub chapters: usize,
    pub pages: usize,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_parses_case_insensitively() {
        assert_eq!("CBZ".parse::<OutputFormat>().unwrap(), OutputFormat::Cbz);
        assert_eq!(" epub ".parse::<OutputFormat>().unwrap(), OutputFormat::Epub);
        assert!("pdf".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn job_expands_chapters_in_given_order() {
        let job = DownloadJob {
            work_id: "26964".into(),
            title: "t".into(),
            format: OutputFormat::Cbz,
            chapter_ids: vec!["718179".into(), "718180".into()],
        };
        let refs = job.chapter_refs();
        assert_eq!(refs[0], ChapterRef::new("26964", "718179"));
        assert_eq!(refs[1].chapter_id, "718180");
    }
}
