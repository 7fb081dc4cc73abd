//! 基于 headless Chrome 的页面定位与抓取。
//!
//! 每个章节会话独占一个标签页，并在该标签页上登记响应监听，把图片响应体
//! 记录到会话自己的 `url -> bytes` 表中；`fetch_page` 只在这张表里查找。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use headless_chrome::protocol::cdp::Network::GetResponseBodyReturnObject;
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, warn};

use super::source::{PageFetcher, PageLocator, SourceError};
use crate::download::models::PageId;

pub const BASE_URL: &str = "https://tw.manhuagui.com";

const RESPONSE_HANDLER: &str = "page-images";
const BODY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout: Duration::from_secs(30),
        }
    }
}

pub fn chapter_url(work_id: &str, chapter_id: &str) -> String {
    format!("{BASE_URL}/comic/{work_id}/{chapter_id}.html")
}

fn browser_err(context: &str, err: impl std::fmt::Display) -> SourceError {
    SourceError::Browser(format!("{context}: {err}"))
}

/// 标签页上记录到的图片响应体，以解码后的地址为键；取出即删除。
#[derive(Clone, Default)]
struct ResponseBodies(Arc<Mutex<HashMap<String, Vec<u8>>>>);

impl ResponseBodies {
    fn key(url: &str) -> String {
        urlencoding::decode(url)
            .map(|u| u.into_owned())
            .unwrap_or_else(|_| url.to_string())
    }

    fn record(&self, url: &str, bytes: Vec<u8>) {
        if let Ok(mut map) = self.0.lock() {
            map.insert(Self::key(url), bytes);
        }
    }

    /// 原始地址与转义后的地址都能取到同一份内容。
    fn take(&self, src: &str) -> Option<Vec<u8>> {
        self.0.lock().ok()?.remove(&Self::key(src))
    }
}

/// 单个章节的浏览上下文；析构时关闭标签页。
pub struct BrowserSession {
    tab: Arc<Tab>,
    chapter_url: String,
    bodies: ResponseBodies,
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let _ = self.tab.deregister_response_handling(RESPONSE_HANDLER);
        if let Err(err) = self.tab.close(false) {
            debug!(target: "browser", error = %err, "关闭标签页失败");
        }
    }
}

pub struct BrowserSource {
    browser: Browser,
    options: BrowserOptions,
}

impl BrowserSource {
    pub fn launch(options: BrowserOptions) -> Result<Self, SourceError> {
        let launch = LaunchOptions::default_builder()
            .headless(options.headless)
            .build()
            .map_err(|e| browser_err("浏览器参数无效", e))?;
        let browser = Browser::new(launch).map_err(|e| browser_err("启动浏览器失败", e))?;
        debug!(target: "browser", headless = options.headless, "浏览器已启动");
        Ok(Self { browser, options })
    }

    /// 新标签页打开 `url` 并等待 `selector` 出现。
    pub fn open_tab(&self, url: &str, selector: &str) -> Result<Arc<Tab>, SourceError> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| browser_err("创建标签页失败", e))?;
        tab.set_default_timeout(self.options.timeout);
        tab.navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| browser_err(&format!("打开 {url} 失败"), e))?;
        tab.wait_for_element_with_custom_timeout(selector, self.options.timeout)
            .map_err(|e| browser_err(&format!("等待 {selector} 超时"), e))?;
        Ok(tab)
    }

    /// 在标签页中执行脚本，脚本需返回 JSON 字符串。
    pub fn evaluate_json(&self, tab: &Tab, script: &str) -> Result<serde_json::Value, SourceError> {
        let result = tab
            .evaluate(script, false)
            .map_err(|e| browser_err("执行页面脚本失败", e))?;
        match result.value {
            Some(serde_json::Value::String(raw)) => {
                serde_json::from_str(&raw).map_err(|e| browser_err("页面脚本返回值无法解析", e))
            }
            other => Err(SourceError::Browser(format!("页面脚本返回值异常: {other:?}"))),
        }
    }

    fn record_image_bodies(tab: &Tab, bodies: ResponseBodies) -> Result<(), SourceError> {
        tab.register_response_handling(
            RESPONSE_HANDLER,
            Box::new(
                move |params: ResponseReceivedEventParams,
                      fetch_body: &dyn Fn() -> anyhow::Result<GetResponseBodyReturnObject>| {
                let response = &params.response;
                if !response.mime_type.starts_with("image/") {
                    return;
                }
                let body = match fetch_body() {
                    Ok(body) => body,
                    Err(err) => {
                        debug!(target: "browser", url = %response.url, error = %err, "读取响应体失败");
                        return;
                    }
                };
                let bytes = if body.base_64_encoded {
                    match BASE64.decode(body.body.as_bytes()) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            warn!(target: "browser", url = %response.url, error = %err, "响应体 base64 解码失败");
                            return;
                        }
                    }
                } else {
                    body.body.into_bytes()
                };
                bodies.record(&response.url, bytes);
            },
            ),
        )
        .map_err(|e| browser_err("登记响应监听失败", e))?;
        Ok(())
    }

    /// 在会话的响应表里等待图片到达。
    fn wait_for_body(&self, session: &BrowserSession, src: &str) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.options.timeout;
        loop {
            if let Some(bytes) = session.bodies.take(src) {
                return Some(bytes);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(BODY_POLL);
        }
    }
}

impl PageLocator for BrowserSource {
    type Session = BrowserSession;

    fn open_chapter(
        &self,
        work_id: &str,
        chapter_id: &str,
    ) -> Result<(BrowserSession, Vec<PageId>), SourceError> {
        let url = chapter_url(work_id, chapter_id);
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| browser_err("创建标签页失败", e))?;
        tab.set_default_timeout(self.options.timeout);

        let bodies = ResponseBodies::default();
        Self::record_image_bodies(&tab, bodies.clone())?;
        let session = BrowserSession {
            tab,
            chapter_url: url.clone(),
            bodies,
        };

        session
            .tab
            .navigate_to(&url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| SourceError::ChapterUnavailable {
                reason: format!("打开 {url} 失败: {e}"),
            })?;
        session
            .tab
            .wait_for_element_with_custom_timeout("#mangaBox", self.options.timeout)
            .map_err(|e| SourceError::ChapterUnavailable {
                reason: format!("{url} 没有漫画内容: {e}"),
            })?;

        let option_nodes = session
            .tab
            .find_elements("#pageSelect option")
            .map_err(|e| SourceError::ChapterUnavailable {
                reason: format!("{url} 找不到页码列表: {e}"),
            })?;
        let mut pages = Vec::with_capacity(option_nodes.len());
        for option in &option_nodes {
            let value = option
                .get_attribute_value("value")
                .map_err(|e| browser_err("读取页码失败", e))?;
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                pages.push(PageId(value));
            }
        }
        if pages.is_empty() {
            return Err(SourceError::ChapterUnavailable {
                reason: format!("{url} 页码列表为空"),
            });
        }

        debug!(target: "browser", chapter_id, pages = pages.len(), "章节页面列表");
        Ok((session, pages))
    }
}

impl PageFetcher for BrowserSource {
    fn fetch_page(
        &self,
        session: &mut BrowserSession,
        page: &PageId,
    ) -> Result<Vec<u8>, SourceError> {
        let url = format!("{}#p={}", session.chapter_url, page.as_str());
        let tab = &session.tab;
        tab.navigate_to(&url)
            .and_then(|t| t.reload(false, None))
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| browser_err(&format!("打开 {url} 失败"), e))?;

        let image = tab
            .wait_for_element_with_custom_timeout("#mangaFile", self.options.timeout)
            .map_err(|_| SourceError::ImageRefMissing {
                page: page.as_str().to_string(),
            })?;
        let src = image
            .get_attribute_value("src")
            .map_err(|e| browser_err("读取图片地址失败", e))?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SourceError::ImageRefMissing {
                page: page.to_string(),
            })?;

        self.wait_for_body(session, &src)
            .ok_or_else(|| SourceError::BodyUnavailable {
                url: src.clone(),
                reason: "没有记录到对应的网络响应".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_url_uses_site_layout() {
        assert_eq!(
            chapter_url("26964", "718179"),
            "https://tw.manhuagui.com/comic/26964/718179.html"
        );
    }

    #[test]
    fn recorded_body_is_found_by_raw_or_escaped_url_and_taken_once() {
        let bodies = ResponseBodies::default();
        bodies.record("https://i.example/第1话/001.jpg.webp", b"one".to_vec());
        bodies.record("https://i.example/a%20b/002.jpg", b"two".to_vec());

        assert_eq!(
            bodies.take("https://i.example/%E7%AC%AC1%E8%AF%9D/001.jpg.webp"),
            Some(b"one".to_vec())
        );
        assert_eq!(bodies.take("https://i.example/第1话/001.jpg.webp"), None);

        assert_eq!(bodies.take("https://i.example/a b/002.jpg"), Some(b"two".to_vec()));
        assert!(bodies.0.lock().unwrap().is_empty());
    }

    #[test]
    fn defaults_are_headless() {
        let opts = BrowserOptions::default();
        assert!(opts.headless);
        assert_eq!(opts.timeout, Duration::from_secs(30));
    }
}
