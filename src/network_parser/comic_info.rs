//! 作品搜索与详情查询。
//!
//! 页面数据先由页面脚本整理成 JSON，再在这里转换为强类型记录；
//! 详情页缺失的部分会一并列在错误里。

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::browser::{BASE_URL, BrowserSource};
use super::source::SourceError;

#[derive(Debug, Error)]
pub enum InfoError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("页面数据格式异常: {0}")]
    Json(#[from] serde_json::Error),

    #[error("页面缺少: {}", parts.join("; "))]
    Missing { parts: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    pub status: String,
    pub description: String,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// 页面脚本返回的链接。
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawLink {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// 详情页脚本的原始返回；元素不存在时对应字段为 null。
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawComicPage {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub description: Option<String>,
    pub chapters: Option<Vec<RawLink>>,
}

const COMIC_PAGE_SCRIPT: &str = r#"JSON.stringify((() => {
    const text = (sel) => { const el = document.querySelector(sel); return el ? el.textContent : null; };
    const links = (sel) => Array.from(document.querySelectorAll(sel))
        .map(a => ({ href: a.getAttribute('href'), title: a.textContent.trim() }));
    const list = document.querySelector('.chapter-list');
    return {
        title: text('.book-title h1'),
        detail: text('.book-detail .detail-list'),
        description: text('#intro-all'),
        chapters: list ? links('.chapter-list li a') : null,
    };
})())"#;

const SEARCH_SCRIPT: &str = r#"JSON.stringify(Array.from(document.querySelectorAll('.book-result .book-detail dt a'))
    .map(a => ({ href: a.getAttribute('href'), title: a.textContent.trim() })))"#;

fn re_chapter_id() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"/comic/\d+/(\d+)\.html").unwrap())
}

fn re_comic_id() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"/comic/(\d+)/").unwrap())
}

fn re_author() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"作者[：:]\s*([^\n\r]+)").unwrap())
}

fn re_status() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?:狀態|状态)[：:]\s*([^\n\r]+)").unwrap())
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn chapter_id_from_url(link: &str) -> Option<String> {
    first_capture(re_chapter_id(), link)
}

pub fn comic_id_from_url(link: &str) -> Option<String> {
    first_capture(re_comic_id(), link)
}

pub fn author_from_detail(detail: &str) -> Option<String> {
    first_capture(re_author(), detail)
}

pub fn status_from_detail(detail: &str) -> Option<String> {
    first_capture(re_status(), detail)
}

pub fn comic_url(comic_id: &str) -> String {
    format!("{BASE_URL}/comic/{comic_id}/")
}

pub fn search_url(keyword: &str) -> String {
    format!("{BASE_URL}/s/{}.html", urlencoding::encode(keyword.trim()))
}

pub(crate) fn build_comic_info(id: &str, raw: RawComicPage) -> Result<ComicInfo, InfoError> {
    let mut missing = Vec::new();
    let mut info = ComicInfo {
        id: id.to_string(),
        ..ComicInfo::default()
    };

    match raw.title {
        Some(title) => info.title = title.trim().to_string(),
        None => missing.push("标题 (.book-title h1)".to_string()),
    }
    match raw.detail {
        Some(detail) => {
            info.author = author_from_detail(&detail).unwrap_or_default();
            info.status = status_from_detail(&detail).unwrap_or_default();
        }
        None => missing.push("详情 (.book-detail .detail-list)".to_string()),
    }
    match raw.description {
        Some(desc) => info.description = desc.trim().to_string(),
        None => missing.push("简介 (#intro-all)".to_string()),
    }
    match raw.chapters {
        Some(links) => {
            info.chapters = links
                .into_iter()
                .map(|link| {
                    let url = link.href.unwrap_or_default();
                    Chapter {
                        id: chapter_id_from_url(&url).unwrap_or_default(),
                        title: link.title.unwrap_or_default().trim().to_string(),
                        url,
                    }
                })
                .collect();
        }
        None => missing.push("章节列表 (.chapter-list)".to_string()),
    }

    if missing.is_empty() {
        Ok(info)
    } else {
        Err(InfoError::Missing { parts: missing })
    }
}

/// 没有作品编号的链接直接丢弃。
pub(crate) fn build_search_results(links: Vec<RawLink>) -> Vec<SearchResult> {
    links
        .into_iter()
        .filter_map(|link| {
            let url = link.href?;
            let id = comic_id_from_url(&url)?;
            Some(SearchResult {
                id,
                title: link.title.unwrap_or_default().trim().to_string(),
                url,
            })
        })
        .collect()
}

impl ComicInfo {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Comic ID: {}", self.id);
        let _ = writeln!(out, "Title: {}", self.title);
        if !self.author.is_empty() {
            let _ = writeln!(out, "Author: {}", self.author);
        }
        if !self.status.is_empty() {
            let _ = writeln!(out, "Status: {}", self.status);
        }
        if !self.description.is_empty() {
            let _ = writeln!(out, "Description: {}", self.description);
        }
        let _ = writeln!(out, "Chapters: {}", self.chapters.len());
        out.push_str("\nChapter List:\n");
        for (i, ch) in self.chapters.iter().enumerate() {
            let _ = writeln!(out, "  {}. [{}] {}", i + 1, ch.id, ch.title);
        }
        out
    }
}

pub fn search_results_to_plain_text(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results.\n".to_string();
    }
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        let _ = writeln!(out, "{}. [{}] {}", i + 1, r.id, r.title);
    }
    out
}

/// 打开详情页并读取作品信息。
pub fn fetch_comic_info(source: &BrowserSource, comic_id: &str) -> Result<ComicInfo, InfoError> {
    let url = comic_url(comic_id);
    info!(target: "browser", url = %url, "读取作品详情");
    let tab = source.open_tab(&url, ".book-title")?;
    let value = source.evaluate_json(&tab, COMIC_PAGE_SCRIPT)?;
    let _ = tab.close(false);
    let raw: RawComicPage = serde_json::from_value(value)?;
    let info = build_comic_info(comic_id, raw)?;
    debug!(target: "browser", chapters = info.chapters.len(), "作品详情解析完成");
    Ok(info)
}

pub fn search(source: &BrowserSource, keyword: &str) -> Result<Vec<SearchResult>, InfoError> {
    let url = search_url(keyword);
    info!(target: "browser", url = %url, "搜索作品");
    let tab = source.open_tab(&url, ".book-result")?;
    let value = source.evaluate_json(&tab, SEARCH_SCRIPT)?;
    let _ = tab.close(false);
    let links: Vec<RawLink> = serde_json::from_value(value)?;
    Ok(build_search_results(links))
}
