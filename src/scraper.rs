use async_trait::async_trait;
use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::types::RemoteError;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ScraperConfig;
use crate::utils::error::{AppError, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How an element is located on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    Xpath(String),
    /// Anchor whose visible text contains the given fragment.
    LinkText(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::Xpath(expression.into())
    }

    pub fn link_text(text: impl Into<String>) -> Self {
        Locator::LinkText(text.into())
    }

    /// XPath form for locators CSS cannot express.
    pub fn to_xpath(&self) -> Option<String> {
        match self {
            Locator::Css(_) => None,
            Locator::Xpath(expr) => Some(expr.clone()),
            Locator::LinkText(text) => Some(format!(
                "//a[contains(normalize-space(.), {})]",
                xpath_literal(text)
            )),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => f.write_str(selector),
            Locator::Xpath(expr) => write!(f, "xpath:{}", expr),
            Locator::LinkText(text) => write!(f, "link:{}", text),
        }
    }
}

fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// A resolved element: the `index`-th match of `locator` at lookup time.
/// Handles are re-resolved on every use, so a re-render invalidates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub locator: Locator,
    pub index: usize,
}

impl ElementHandle {
    pub fn new(locator: Locator, index: usize) -> Self {
        Self { locator, index }
    }
}

/// One browser session: the automation capability the navigator and the
/// calendar extractor drive. Waits are bounded polls built on
/// [`BrowserSession::find_element`].
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn load(&self, url: &str) -> Result<()>;
    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>>;
    async fn is_clickable(&self, element: &ElementHandle) -> Result<bool>;
    async fn click(&self, element: &ElementHandle) -> Result<()>;
    /// Clicks via script, bypassing overlays that would intercept a pointer click.
    async fn force_click(&self, element: &ElementHandle) -> Result<()>;
    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()>;
    async fn set_property(&self, element: &ElementHandle, name: &str, value: serde_json::Value) -> Result<()>;
    async fn read_text(&self, element: &ElementHandle) -> Result<String>;
    async fn read_attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;
    async fn wait_for_navigation(&self) -> Result<()>;
    async fn current_url(&self) -> String;
    async fn screenshot(&self) -> Result<Vec<u8>>;
    /// Releases the session. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    async fn find_element(&self, locator: &Locator) -> Result<Option<ElementHandle>> {
        Ok(self.find_elements(locator).await?.into_iter().next())
    }

    /// Polls until the element exists or `timeout` elapses. `None` means absent.
    async fn wait_until_present(&self, locator: &Locator, timeout: Duration) -> Result<Option<ElementHandle>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_element(locator).await? {
                return Ok(Some(element));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Polls until the element exists and can receive a click.
    async fn wait_until_clickable(&self, locator: &Locator, timeout: Duration) -> Result<Option<ElementHandle>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_element(locator).await? {
                if self.is_clickable(&element).await? {
                    return Ok(Some(element));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}

/// Acquires a fresh browser session for each scan cycle.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>>;
}

/// Launches a dedicated Chrome process per session.
pub struct ChromeLauncher {
    config: ScraperConfig,
}

impl ChromeLauncher {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    fn launch_options(&self) -> Result<LaunchOptions<'static>> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some((self.config.window_width, self.config.window_height)))
            .idle_browser_timeout(Duration::from_secs(self.config.element_timeout_secs.max(30) * 4))
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
            ])
            .build()
            .map_err(|e| AppError::browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &self.config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        Ok(launch_options)
    }
}

#[async_trait]
impl SessionFactory for ChromeLauncher {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        let browser = Browser::new(self.launch_options()?)
            .map_err(|e| AppError::browser(format!("Failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AppError::browser(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(self.config.element_timeout());

        tracing::debug!(headless = self.config.headless, "browser session opened");

        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            tab,
            poll_interval: self.config.poll_interval(),
        }))
    }
}

/// DevTools messages that mean the query matched nothing, or matched a node
/// that went away while the page was still loading.
const ABSENT_NODE_MESSAGES: &[&str] = &[
    "Invalid search result range",
    "Could not find node with given id",
];

/// headless_chrome reports an empty match as an error. Only that case is
/// folded into an empty list; a dead connection or a bad selector is not.
fn lookup_outcome<T>(locator: &Locator, found: anyhow::Result<Vec<T>>) -> Result<Vec<T>> {
    match found {
        Ok(elements) => Ok(elements),
        Err(err) if is_absence(&err) => Ok(Vec::new()),
        Err(err) => Err(AppError::browser(format!("lookup of {} failed: {}", locator, err))),
    }
}

fn is_absence(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<NoElementFound>().is_some() {
        return true;
    }
    err.downcast_ref::<RemoteError>()
        .map(|remote| ABSENT_NODE_MESSAGES.contains(&remote.message.as_str()))
        .unwrap_or(false)
}

pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    poll_interval: Duration,
}

impl ChromeSession {
    fn resolve_all(&self, locator: &Locator) -> Result<Vec<Element<'_>>> {
        let found = match locator.to_xpath() {
            None => self.tab.find_elements(&locator.to_string()),
            Some(xpath) => self.tab.find_elements_by_xpath(&xpath),
        };
        lookup_outcome(locator, found)
    }

    fn resolve(&self, element: &ElementHandle) -> Result<Element<'_>> {
        self.resolve_all(&element.locator)?
            .into_iter()
            .nth(element.index)
            .ok_or_else(|| {
                AppError::browser(format!(
                    "element {}[{}] is no longer on the page",
                    element.locator, element.index
                ))
            })
    }

    fn call_js(&self, element: &ElementHandle, function: &str, args: Vec<serde_json::Value>) -> Result<Option<serde_json::Value>> {
        let remote = self
            .resolve(element)?
            .call_js_fn(function, args, false)
            .map_err(AppError::browser)?;
        Ok(remote.value)
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn load(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| AppError::browser(format!("Navigation to {} failed: {}", url, e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| AppError::browser(format!("Page load failed: {}", e)))?;
        Ok(())
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let count = self.resolve_all(locator)?.len();
        Ok((0..count).map(|i| ElementHandle::new(locator.clone(), i)).collect())
    }

    async fn is_clickable(&self, element: &ElementHandle) -> Result<bool> {
        let value = self.call_js(
            element,
            "function() { const r = this.getBoundingClientRect(); return !this.disabled && r.width > 0 && r.height > 0; }",
            vec![],
        )?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.resolve(element)?.click().map_err(AppError::browser)?;
        Ok(())
    }

    async fn force_click(&self, element: &ElementHandle) -> Result<()> {
        self.call_js(element, "function() { this.click(); }", vec![])?;
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.resolve(element)?.type_into(text).map_err(AppError::browser)?;
        Ok(())
    }

    async fn set_property(&self, element: &ElementHandle, name: &str, value: serde_json::Value) -> Result<()> {
        self.call_js(
            element,
            "function(name, value) { this[name] = value; }",
            vec![serde_json::Value::String(name.to_string()), value],
        )?;
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String> {
        self.resolve(element)?.get_inner_text().map_err(AppError::browser)
    }

    async fn read_attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.resolve(element)?
            .get_attribute_value(name)
            .map_err(AppError::browser)
    }

    async fn wait_for_navigation(&self) -> Result<()> {
        self.tab
            .wait_until_navigated()
            .map_err(|e| AppError::browser(format!("Navigation did not settle: {}", e)))?;
        Ok(())
    }

    async fn current_url(&self) -> String {
        self.tab.get_url()
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| AppError::browser(format!("Screenshot capture failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(browser) = self.browser.take() else {
            return Ok(());
        };
        let closed = self.tab.close(true);
        // Dropping the browser kills the Chrome process.
        drop(browser);
        tracing::debug!("browser session closed");
        closed.map(|_| ()).map_err(AppError::browser)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            let _ = self.tab.close(true);
        }
    }
}

/// Writes a PNG capture as `failure_<timestamp>_<uuid>.png` under `dir`.
pub fn save_screenshot(dir: &Path, png: &[u8]) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let filename = format!("failure_{}_{}.png", timestamp, uuid::Uuid::new_v4().simple());
    std::fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    std::fs::write(&path, png)?;
    Ok(path)
}
