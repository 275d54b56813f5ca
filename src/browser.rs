use anyhow::{Context, Result};
use headless_chrome::browser::default_executable;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsString;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CrawlError, CrawlResult};

/// A live page a crawler can navigate and read from.
///
/// Selector lookups never fail: a missing element is an empty result, since
/// listing pages are routinely partial. Dropping the driver releases whatever
/// browser resources back it.
pub trait PageDriver {
    fn open(&mut self, url: &str) -> CrawlResult<()>;
    fn page_source(&self) -> CrawlResult<String>;
    fn extract_text(&self, selector: &str) -> Vec<String>;
    fn extract_attribute(&self, selector: &str, attr: &str) -> Option<String>;
}

/// Hands out a fresh driver per crawl. Sessions are never shared or reused.
pub trait DriverLauncher: Send + Sync {
    fn launch(&self) -> CrawlResult<Box<dyn PageDriver>>;
}

pub struct ChromeLauncher {
    config: Config,
}

impl ChromeLauncher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl DriverLauncher for ChromeLauncher {
    fn launch(&self) -> CrawlResult<Box<dyn PageDriver>> {
        let session = BrowserSession::start(&self.config)
            .map_err(|e| CrawlError::fetch(format!("{:#}", e)))?;
        Ok(Box::new(session))
    }
}

/// One headless Chrome process with a single tab. The process is killed when
/// the session is dropped.
pub struct BrowserSession {
    tab: Arc<Tab>,
    _browser: Browser,
}

impl BrowserSession {
    pub fn start(config: &Config) -> Result<Self> {
        let lang_arg = OsString::from(format!("--lang={}", primary_language(&config.accept_language)));
        let ua_arg = OsString::from(format!("--user-agent={}", config.user_agent));
        let extra_args = [
            OsString::from("--disable-gpu"),
            OsString::from("--disable-dev-shm-usage"),
            OsString::from("--disable-blink-features=AutomationControlled"),
            lang_arg,
            ua_arg,
        ];

        let launch_options = LaunchOptions {
            headless: config.headless,
            sandbox: false,
            path: config.chrome_path.clone().or_else(|| default_executable().ok()),
            args: extra_args.iter().map(|a| a.as_os_str()).collect(),
            idle_browser_timeout: config.navigation_timeout() * 4,
            ..Default::default()
        };

        info!(headless = config.headless, "Launching browser");
        let browser = Browser::new(launch_options)
            .context("Failed to launch Chrome. Make sure Chrome or Chromium is installed.")?;

        let tab = browser.new_tab().context("Failed to create new browser tab")?;
        tab.set_default_timeout(config.navigation_timeout());
        tab.set_user_agent(&config.user_agent, Some(&config.accept_language), None)
            .context("Failed to set user agent")?;

        Ok(Self {
            tab,
            _browser: browser,
        })
    }
}

impl PageDriver for BrowserSession {
    fn open(&mut self, url: &str) -> CrawlResult<()> {
        debug!(url, "Navigating");
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| CrawlError::fetch(format!("navigation to {} failed: {}", url, e)))?;
        Ok(())
    }

    fn page_source(&self) -> CrawlResult<String> {
        self.tab
            .get_content()
            .map_err(|e| CrawlError::fetch(format!("could not read page source: {}", e)))
    }

    fn extract_text(&self, selector: &str) -> Vec<String> {
        match self.tab.find_elements(selector) {
            Ok(elements) => elements
                .iter()
                .filter_map(|el| el.get_inner_text().ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn extract_attribute(&self, selector: &str, attr: &str) -> Option<String> {
        let elements = self.tab.find_elements(selector).ok()?;
        elements
            .iter()
            .find_map(|el| el.get_attribute_value(attr).ok().flatten())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            debug!(error = %e, "Tab already gone while releasing browser session");
        }
        debug!("Browser session released");
    }
}

fn primary_language(accept_language: &str) -> &str {
    accept_language
        .split([',', ';'])
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or("en-US")
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory driver serving canned HTML, for exercising crawlers offline.

    use super::*;
    use scraper::{Html, Selector};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct Recorder {
        pub opened: Mutex<Vec<String>>,
        pub launched: AtomicUsize,
        pub released: AtomicUsize,
    }

    impl Recorder {
        pub fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }

        pub fn launched(&self) -> usize {
            self.launched.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    pub struct StaticPages {
        pages: HashMap<String, String>,
        current: Option<String>,
        recorder: Arc<Recorder>,
    }

    impl PageDriver for StaticPages {
        fn open(&mut self, url: &str) -> CrawlResult<()> {
            self.recorder.opened.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(html) => {
                    self.current = Some(html.clone());
                    Ok(())
                }
                None => Err(CrawlError::fetch(format!("no such page: {}", url))),
            }
        }

        fn page_source(&self) -> CrawlResult<String> {
            self.current
                .clone()
                .ok_or_else(|| CrawlError::fetch("no page open"))
        }

        fn extract_text(&self, selector: &str) -> Vec<String> {
            let (Some(html), Ok(sel)) = (&self.current, Selector::parse(selector)) else {
                return Vec::new();
            };
            Html::parse_document(html)
                .select(&sel)
                .map(|el| el.text().collect::<String>())
                .collect()
        }

        fn extract_attribute(&self, selector: &str, attr: &str) -> Option<String> {
            let html = self.current.as_ref()?;
            let sel = Selector::parse(selector).ok()?;
            let doc = Html::parse_document(html);
            doc.select(&sel)
                .find_map(|el| el.value().attr(attr).map(str::to_string))
        }
    }

    impl Drop for StaticPages {
        fn drop(&mut self) {
            self.recorder.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Launches `StaticPages` drivers over a fixed set of pages.
    pub struct StaticLauncher {
        pub pages: HashMap<String, String>,
        pub recorder: Arc<Recorder>,
        pub fail_launch: bool,
    }

    impl StaticLauncher {
        pub fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, html)| (url.to_string(), html.to_string()))
                    .collect(),
                recorder: Arc::new(Recorder::default()),
                fail_launch: false,
            }
        }
    }

    impl DriverLauncher for StaticLauncher {
        fn launch(&self) -> CrawlResult<Box<dyn PageDriver>> {
            if self.fail_launch {
                return Err(CrawlError::fetch("browser failed to start"));
            }
            self.recorder.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StaticPages {
                pages: self.pages.clone(),
                current: None,
                recorder: self.recorder.clone(),
            }))
        }
    }
}
