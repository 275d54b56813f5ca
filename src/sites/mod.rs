pub mod lagou;
pub mod shixiseng;

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::browser::DriverLauncher;
use crate::config::Config;
use crate::decode::decode;
use crate::error::{CrawlError, CrawlResult};
use crate::font::{GlyphMap, GlyphResolver};
use crate::models::NewJobPosting;

/// Everything a site crawler needs from the outside world.
pub struct CrawlContext {
    pub launcher: Arc<dyn DriverLauncher>,
    pub glyphs: Arc<dyn GlyphResolver>,
    pub config: Config,
}

impl CrawlContext {
    pub fn new(
        launcher: Arc<dyn DriverLauncher>,
        glyphs: Arc<dyn GlyphResolver>,
        config: Config,
    ) -> Self {
        Self {
            launcher,
            glyphs,
            config,
        }
    }
}

/// One listing site. `crawl` owns a browser session for its whole duration
/// and returns postings that have not been stored yet.
pub trait SiteCrawler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Source identifiers accepted for this site, matched case-insensitively.
    fn aliases(&self) -> &'static [&'static str];

    fn crawl(&self, keyword: &str, city: &str) -> CrawlResult<Vec<NewJobPosting>>;
}

/// Source identifier -> crawler. Built once at startup and read-only after.
pub struct CrawlerRegistry {
    by_alias: HashMap<String, Arc<dyn SiteCrawler>>,
    names: Vec<&'static str>,
}

impl CrawlerRegistry {
    pub fn new(crawlers: Vec<Arc<dyn SiteCrawler>>) -> Self {
        let mut by_alias = HashMap::new();
        let mut names = Vec::new();
        for crawler in crawlers {
            names.push(crawler.name());
            by_alias.insert(crawler.name().to_lowercase(), crawler.clone());
            for alias in crawler.aliases() {
                by_alias.insert(alias.to_lowercase(), crawler.clone());
            }
        }
        Self { by_alias, names }
    }

    /// The sites this build knows how to crawl.
    pub fn with_default_sites(ctx: Arc<CrawlContext>) -> Self {
        Self::new(vec![
            Arc::new(shixiseng::Shixiseng::new(ctx.clone())) as Arc<dyn SiteCrawler>,
            Arc::new(lagou::Lagou::new(ctx)),
        ])
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SiteCrawler>> {
        self.by_alias.get(&source.trim().to_lowercase()).cloned()
    }

    pub fn names(&self) -> &[&'static str] {
        &self.names
    }
}

/// The glyph map for the font most recently seen during one crawl.
#[derive(Debug, Default)]
pub struct GlyphCache {
    url: Option<String>,
    map: GlyphMap,
}

impl GlyphCache {
    /// Rebuilds the map only when `font_url` differs from the cached one.
    /// A page without a font reference keeps the current map.
    pub fn refresh(&mut self, font_url: Option<String>, resolver: &dyn GlyphResolver, referer: &str) {
        let Some(url) = font_url else { return };
        if self.url.as_deref() == Some(url.as_str()) {
            return;
        }
        debug!(font_url = %url, "Font changed, rebuilding glyph map");
        self.map = resolver.resolve(&url, referer);
        self.url = Some(url);
    }

    pub fn map(&self) -> &GlyphMap {
        &self.map
    }
}

/// Runs `parse_item` over every element matching `item_selector`. An item
/// that fails to parse is logged and skipped; the rest still come through.
pub fn parse_listing<F>(markup: &str, item_selector: &str, mut parse_item: F) -> Vec<NewJobPosting>
where
    F: FnMut(ElementRef<'_>) -> CrawlResult<NewJobPosting>,
{
    let item_sel = match selector(item_selector) {
        Ok(sel) => sel,
        Err(e) => {
            warn!(error = %e, "Unusable listing selector");
            return Vec::new();
        }
    };

    let doc = Html::parse_document(markup);
    let mut jobs = Vec::new();
    for (index, item) in doc.select(&item_sel).enumerate() {
        match parse_item(item) {
            Ok(job) => jobs.push(job),
            Err(e) => debug!(index, error = %e, "Skipping listing item"),
        }
    }
    jobs
}

pub fn selector(css: &str) -> CrawlResult<Selector> {
    Selector::parse(css)
        .map_err(|e| CrawlError::extraction(format!("invalid selector '{}': {}", css, e)))
}

/// Decoded text of the first element under `item` matching `css`.
pub fn item_text(item: ElementRef<'_>, css: &str, glyphs: &GlyphMap) -> CrawlResult<String> {
    let sel = selector(css)?;
    let el = item
        .select(&sel)
        .next()
        .ok_or_else(|| CrawlError::extraction(format!("no element matches '{}'", css)))?;
    Ok(decode(&el.text().collect::<String>(), glyphs))
}

/// An attribute of the first element under `item` matching `css`.
pub fn item_attr(item: ElementRef<'_>, css: &str, attr: &str) -> CrawlResult<String> {
    let sel = selector(css)?;
    item.select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| CrawlError::extraction(format!("no '{}' on '{}'", attr, css)))
}

/// Makes a listing link absolute.
pub fn absolute_link(origin: &Url, href: &str) -> CrawlResult<String> {
    origin
        .join(href)
        .map(|u| u.to_string())
        .map_err(|e| CrawlError::extraction(format!("bad link '{}': {}", href, e)))
}

/// Fixed wait for content that streams in after navigation.
pub fn settle(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
