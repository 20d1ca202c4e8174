//! Headless browser access through a small DOM query layer
//!
//! Every read goes to the live page. Nothing is cached between calls, so a
//! poll sees each re-render as it lands.

use async_trait::async_trait;
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Budget for closing the browser during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const TEXT_CONTENT_FN: &str = "function() { return this.textContent; }";
const TAG_NAME_FN: &str = "function() { return this.tagName; }";

/// Query and interaction primitives over one live page
#[async_trait]
pub trait PageDriver: Send + Sync {
    type Element: Clone + Debug + Send + Sync;

    async fn navigate(&self, url: &str) -> HarnessResult<()>;

    /// First element matching `selector`, if any
    async fn query(&self, selector: &str) -> HarnessResult<Option<Self::Element>>;

    async fn query_all_within(
        &self,
        parent: &Self::Element,
        selector: &str,
    ) -> HarnessResult<Vec<Self::Element>>;

    async fn element_text(&self, element: &Self::Element) -> HarnessResult<Option<String>>;

    async fn element_tag_name(&self, element: &Self::Element) -> HarnessResult<Option<String>>;

    async fn click(&self, element: &Self::Element) -> HarnessResult<()>;

    /// Resolved value of a CSS property on the first element matching `selector`
    async fn computed_style(&self, selector: &str, property: &str) -> HarnessResult<String>;

    /// Stop relaying console output
    fn detach_listeners(&mut self) {}

    async fn close(&mut self) -> HarnessResult<()>;
}

/// What to read: a selector resolved on every call, or an element held
/// across calls
#[derive(Debug)]
pub enum Target<'a, E> {
    Selector(&'a str),
    Element(&'a E),
}

impl<E> Clone for Target<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Target<'_, E> {}

impl<'a, E> From<&'a str> for Target<'a, E> {
    fn from(selector: &'a str) -> Self {
        Target::Selector(selector)
    }
}

pub async fn resolve_element<D: PageDriver>(
    driver: &D,
    target: Target<'_, D::Element>,
) -> HarnessResult<Option<D::Element>> {
    match target {
        Target::Selector(selector) => driver.query(selector).await,
        Target::Element(element) => Ok(Some(element.clone())),
    }
}

/// `textContent` of the target, `None` when it does not exist
pub async fn text_of<D: PageDriver>(
    driver: &D,
    target: Target<'_, D::Element>,
) -> HarnessResult<Option<String>> {
    match resolve_element(driver, target).await? {
        Some(element) => driver.element_text(&element).await,
        None => Ok(None),
    }
}

/// Upper-case tag name of the target, `None` when it does not exist
pub async fn tag_name_of<D: PageDriver>(
    driver: &D,
    target: Target<'_, D::Element>,
) -> HarnessResult<Option<String>> {
    match resolve_element(driver, target).await? {
        Some(element) => driver.element_tag_name(&element).await,
        None => Ok(None),
    }
}

/// Produces one page per suite
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Driver: PageDriver + 'static;

    async fn launch(&self, integration_id: &str, verbose: bool) -> HarnessResult<Self::Driver>;
}

/// Launches headless Chromium, one profile directory per integration
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    /// Browser binary; auto-detected when unset
    pub executable: Option<PathBuf>,

    /// Parent of the per-integration profile directories
    pub profile_root: PathBuf,
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self {
            executable: None,
            profile_root: std::env::temp_dir(),
        }
    }
}

impl ChromiumLauncher {
    /// Profile directory for one integration's browser. Concurrent
    /// Chromium instances must never share one.
    pub fn profile_dir(&self, integration_id: &str) -> PathBuf {
        self.profile_root
            .join(format!("hmr-e2e-{}-chrome", integration_id))
    }

    fn config(&self, profile: Option<&Path>) -> HarnessResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(exe) = &self.executable {
            builder = builder.chrome_executable(exe);
        }
        if let Some(profile) = profile {
            builder = builder.user_data_dir(profile);
        }
        builder.build().map_err(HarnessError::Browser)
    }

    /// Fails if no browser binary can be found
    pub fn detect(&self) -> HarnessResult<()> {
        self.config(None).map(|_| ())
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    type Driver = BrowserSession;

    async fn launch(&self, integration_id: &str, verbose: bool) -> HarnessResult<BrowserSession> {
        let profile = self.profile_dir(integration_id);
        remove_profile(&profile).await?;

        let (browser, mut handler) = Browser::launch(self.config(Some(&profile))?).await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {}", e);
                }
            }
        });

        let mut session = BrowserSession {
            browser: Some(browser),
            page: None,
            profile,
            handler,
            console: None,
        };
        let page = match session.open_page(integration_id, verbose).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close) = session.close().await {
                    debug!("Closing half-launched browser: {}", close);
                }
                return Err(e);
            }
        };
        session.page = Some(page);

        info!("Launched headless browser for {}", integration_id);
        Ok(session)
    }
}

/// Remove a profile directory; a missing one is fine
async fn remove_profile(profile: &Path) -> HarnessResult<()> {
    match tokio::fs::remove_dir_all(profile).await {
        Ok(()) => {
            debug!("Removed browser profile {}", profile.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn relay_console(page: &Page, integration_id: &str) -> HarnessResult<JoinHandle<()>> {
    let mut events = page.event_listener::<EventConsoleApiCalled>().await?;
    let id = integration_id.to_string();

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let text = event
                .args
                .iter()
                .filter_map(|arg| match &arg.value {
                    Some(serde_json::Value::String(s)) => Some(s.clone()),
                    Some(value) => Some(value.to_string()),
                    None => arg.description.clone(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            info!(integration = %id, "[BROWSER LOG]: {}", text);
        }
    }))
}

/// One Chromium instance and the page the suite drives
pub struct BrowserSession {
    browser: Option<Browser>,
    page: Option<Page>,
    profile: PathBuf,
    handler: JoinHandle<()>,
    console: Option<JoinHandle<()>>,
}

impl BrowserSession {
    async fn open_page(&mut self, integration_id: &str, verbose: bool) -> HarnessResult<Page> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| HarnessError::Browser("browser already closed".into()))?;
        let page = browser.new_page("about:blank").await?;
        if verbose {
            self.console = Some(relay_console(&page, integration_id).await?);
        }
        Ok(page)
    }

    fn page(&self) -> HarnessResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| HarnessError::Browser("no page open".into()))
    }

    async fn call_string_fn(
        &self,
        element: &Element,
        function: &str,
    ) -> HarnessResult<Option<String>> {
        let returns = element.call_js_fn(function, false).await?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_str().map(str::to_string)))
    }
}

#[async_trait]
impl PageDriver for BrowserSession {
    type Element = Arc<Element>;

    async fn navigate(&self, url: &str) -> HarnessResult<()> {
        debug!("Navigating to {}", url);
        self.page()?.goto(url).await?;
        Ok(())
    }

    async fn query(&self, selector: &str) -> HarnessResult<Option<Arc<Element>>> {
        // find_element errors on no match; an empty list is unambiguous
        let found = self.page()?.find_elements(selector).await?;
        Ok(found.into_iter().next().map(Arc::new))
    }

    async fn query_all_within(
        &self,
        parent: &Arc<Element>,
        selector: &str,
    ) -> HarnessResult<Vec<Arc<Element>>> {
        let found = parent.find_elements(selector).await?;
        Ok(found.into_iter().map(Arc::new).collect())
    }

    async fn element_text(&self, element: &Arc<Element>) -> HarnessResult<Option<String>> {
        self.call_string_fn(element, TEXT_CONTENT_FN).await
    }

    async fn element_tag_name(&self, element: &Arc<Element>) -> HarnessResult<Option<String>> {
        self.call_string_fn(element, TAG_NAME_FN).await
    }

    async fn click(&self, element: &Arc<Element>) -> HarnessResult<()> {
        element.click().await?;
        Ok(())
    }

    async fn computed_style(&self, selector: &str, property: &str) -> HarnessResult<String> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
             return el ? getComputedStyle(el).getPropertyValue({}) : null; }})()",
            serde_json::to_string(selector)?,
            serde_json::to_string(property)?,
        );
        let value: Option<String> = self.page()?.evaluate(script).await?.into_value()?;
        value.ok_or_else(|| HarnessError::ElementNotFound(selector.to_string()))
    }

    fn detach_listeners(&mut self) {
        if let Some(console) = self.console.take() {
            console.abort();
        }
    }

    async fn close(&mut self) -> HarnessResult<()> {
        self.detach_listeners();

        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };

        let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
            browser.close().await?;
            browser.wait().await?;
            Ok::<_, HarnessError>(())
        })
        .await;

        self.handler.abort();
        let closed = match closed {
            Ok(result) => result,
            Err(_) => {
                warn!("Browser did not close within {:?}; killing it", CLOSE_TIMEOUT);
                browser.kill().await;
                Ok(())
            }
        };

        // Chromium is gone by now, so its profile can go too
        let removed = remove_profile(&self.profile).await;
        closed.and(removed)
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.detach_listeners();
        self.handler.abort();
    }
}

/// In-memory page for exercising suites without a browser
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Renders the current DOM on every query
    pub type Render = Arc<dyn Fn() -> Vec<FakeNode> + Send + Sync>;

    /// Reacts to a click on the element with this selector
    pub type ClickHandler = Arc<dyn Fn(&str) + Send + Sync>;

    #[derive(Debug, Clone, PartialEq)]
    pub struct FakeNode {
        pub selector: String,
        pub tag: String,
        pub text: String,
        pub style: HashMap<String, String>,
    }

    impl FakeNode {
        pub fn new(selector: &str, tag: &str, text: &str) -> Self {
            Self {
                selector: selector.into(),
                tag: tag.into(),
                text: text.into(),
                style: HashMap::new(),
            }
        }
    }

    pub struct FakePage {
        render: Render,
        on_click: Option<ClickHandler>,
        pub visited: Arc<Mutex<Vec<String>>>,
        pub clicks: Arc<Mutex<Vec<String>>>,
        pub closed: Arc<Mutex<bool>>,
    }

    impl FakePage {
        pub fn new(render: Render) -> Self {
            Self {
                render,
                on_click: None,
                visited: Arc::default(),
                clicks: Arc::default(),
                closed: Arc::default(),
            }
        }

        fn find(&self, selector: &str) -> Option<FakeNode> {
            (self.render)().into_iter().find(|n| n.selector == selector)
        }
    }

    #[async_trait]
    impl PageDriver for FakePage {
        /// Elements are remembered by selector and re-read on access
        type Element = String;

        async fn navigate(&self, url: &str) -> HarnessResult<()> {
            self.visited.lock().push(url.to_string());
            Ok(())
        }

        async fn query(&self, selector: &str) -> HarnessResult<Option<String>> {
            Ok(self.find(selector).map(|n| n.selector))
        }

        async fn query_all_within(
            &self,
            parent: &String,
            selector: &str,
        ) -> HarnessResult<Vec<String>> {
            let prefix = format!("{} {}", parent, selector);
            Ok((self.render)()
                .into_iter()
                .filter(|n| n.selector.starts_with(&prefix))
                .map(|n| n.selector)
                .collect())
        }

        async fn element_text(&self, element: &String) -> HarnessResult<Option<String>> {
            Ok(self.find(element).map(|n| n.text))
        }

        async fn element_tag_name(&self, element: &String) -> HarnessResult<Option<String>> {
            Ok(self.find(element).map(|n| n.tag.to_uppercase()))
        }

        async fn click(&self, element: &String) -> HarnessResult<()> {
            self.clicks.lock().push(element.clone());
            if let Some(on_click) = &self.on_click {
                on_click(element);
            }
            Ok(())
        }

        async fn computed_style(&self, selector: &str, property: &str) -> HarnessResult<String> {
            self.find(selector)
                .and_then(|n| n.style.get(property).cloned())
                .ok_or_else(|| HarnessError::ElementNotFound(selector.to_string()))
        }

        async fn close(&mut self) -> HarnessResult<()> {
            *self.closed.lock() = true;
            Ok(())
        }
    }

    /// Hands out pre-built fake pages
    pub struct FakeLauncher {
        pub render: Render,
        pub on_click: Option<ClickHandler>,
        pub fail_launch: bool,
        pub closed: Arc<Mutex<bool>>,
        pub clicks: Arc<Mutex<Vec<String>>>,
    }

    impl FakeLauncher {
        pub fn new(render: Render) -> Self {
            Self {
                render,
                on_click: None,
                fail_launch: false,
                closed: Arc::default(),
                clicks: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        type Driver = FakePage;

        async fn launch(&self, _integration_id: &str, _verbose: bool) -> HarnessResult<FakePage> {
            if self.fail_launch {
                return Err(HarnessError::Browser("failed to launch".into()));
            }
            let mut page = FakePage::new(self.render.clone());
            page.closed = self.closed.clone();
            page.clicks = self.clicks.clone();
            page.on_click = self.on_click.clone();
            Ok(page)
        }
    }
}
