//! Internship listings from shixiseng.com. Visible text on both the search
//! and detail pages is rendered through a per-page obfuscation font.

use rand::Rng;
use scraper::ElementRef;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::{CrawlContext, GlyphCache, SiteCrawler, absolute_link, item_attr, item_text, parse_listing, settle};
use crate::browser::PageDriver;
use crate::decode::decode;
use crate::error::{CrawlError, CrawlResult};
use crate::font::{GlyphMap, extract_font_url};
use crate::models::{NewJobPosting, format_timestamp, now_local};

const ORIGIN: &str = "https://www.shixiseng.com";
const REFERER: &str = "https://www.shixiseng.com/";

const ITEM: &str = ".intern-wrap.intern-item";
const TITLE: &str = ".f-l.intern-detail__job a";
const COMPANY: &str = ".f-r.intern-detail__company a";
const SALARY: &str = ".f-l.intern-detail__job .day";
const DESCRIPTION: &str = ".job_part";
const CANONICAL: &str = "link[rel=canonical]";

pub const DESCRIPTION_UNAVAILABLE: &str = "Description unavailable";

pub struct Shixiseng {
    ctx: Arc<CrawlContext>,
    origin: Url,
}

impl Shixiseng {
    pub fn new(ctx: Arc<CrawlContext>) -> Self {
        Self {
            ctx,
            origin: Url::parse(ORIGIN).expect("valid origin"),
        }
    }

    pub fn search_url(keyword: &str, city: &str) -> String {
        format!(
            "{}/interns?keyword={}&city={}",
            ORIGIN,
            urlencoding::encode(keyword),
            urlencoding::encode(city)
        )
    }

    fn parse_item(&self, item: ElementRef<'_>, city: &str, glyphs: &GlyphMap) -> CrawlResult<NewJobPosting> {
        let title = item_text(item, TITLE, glyphs)?;
        let company = item_text(item, COMPANY, glyphs)?;
        let salary = item_text(item, SALARY, glyphs)?;
        let link = absolute_link(&self.origin, &item_attr(item, TITLE, "href")?)?;

        Ok(NewJobPosting {
            title,
            company,
            description: None,
            location: city.to_string(),
            salary,
            source_url: Some(link),
            crawl_time: format_timestamp(now_local()),
        })
    }

    fn detail_pause(&self) -> Duration {
        let (min, max) = self.ctx.config.detail_delay_range();
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Reads one detail page, returning the decoded description and the
    /// page's canonical link when it declares one.
    fn read_detail(
        &self,
        driver: &mut dyn PageDriver,
        link: &str,
        glyphs: &mut GlyphCache,
    ) -> CrawlResult<(String, Option<String>)> {
        driver.open(link)?;
        settle(self.detail_pause());

        let markup = driver.page_source()?;
        glyphs.refresh(
            extract_font_url(&markup, &self.origin),
            self.ctx.glyphs.as_ref(),
            REFERER,
        );

        let raw = driver.extract_text(DESCRIPTION).join("\n");
        let description = decode(&raw, glyphs.map());
        if description.is_empty() {
            return Err(CrawlError::extraction(format!("no description on {}", link)));
        }

        let canonical = driver
            .extract_attribute(CANONICAL, "href")
            .and_then(|href| absolute_link(&self.origin, &href).ok());
        Ok((description, canonical))
    }
}

impl SiteCrawler for Shixiseng {
    fn name(&self) -> &'static str {
        "shixiseng"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["shixiseng.com", "www.shixiseng.com"]
    }

    fn crawl(&self, keyword: &str, city: &str) -> CrawlResult<Vec<NewJobPosting>> {
        let mut driver = self.ctx.launcher.launch()?;

        let url = Self::search_url(keyword, city);
        info!(url = %url, "Fetching shixiseng listing");
        driver.open(&url)?;
        settle(self.ctx.config.settle_delay());

        let markup = driver.page_source()?;
        let mut glyphs = GlyphCache::default();
        glyphs.refresh(
            extract_font_url(&markup, &self.origin),
            self.ctx.glyphs.as_ref(),
            REFERER,
        );
        if glyphs.map().is_empty() {
            warn!("No glyph map for listing page, text may be garbled");
        }

        let mut jobs = parse_listing(&markup, ITEM, |item| self.parse_item(item, city, glyphs.map()));
        info!(count = jobs.len(), "Parsed shixiseng listing");

        for job in &mut jobs {
            let Some(link) = job.source_url.clone() else {
                continue;
            };
            match self.read_detail(driver.as_mut(), &link, &mut glyphs) {
                Ok((description, canonical)) => {
                    job.description = Some(description);
                    if canonical.is_some() {
                        job.source_url = canonical;
                    }
                }
                Err(e) => {
                    warn!(title = %job.title, error = %e, "Detail page unavailable");
                    job.description = Some(DESCRIPTION_UNAVAILABLE.to_string());
                }
            }
        }

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::StaticLauncher;
    use crate::config::Config;
    use crate::sites::testing::StubGlyphs;

    const FONT_1: &str = "https://www.shixiseng.com/interns/iconfonts/file?rand=1";
    const FONT_2: &str = "https://www.shixiseng.com/interns/iconfonts/file?rand=2";

    fn item(title: &str, company: Option<&str>, salary: &str, href: &str) -> String {
        let company = company
            .map(|c| format!(r#"<div class="f-r intern-detail__company"><a>{}</a></div>"#, c))
            .unwrap_or_default();
        format!(
            r#"<div class="intern-wrap intern-item">
                 <div class="f-l intern-detail__job"><p><a href="{href}">{title}</a><span class="day">{salary}</span></p></div>
                 {company}
               </div>"#
        )
    }

    fn listing() -> String {
        format!(
            r#"<html><head><style>@font-face{{font-family:myFont;src: url(//www.shixiseng.com/interns/iconfonts/file?rand=1)}}</style></head>
               <body>{}{}{}{}</body></html>"#,
            item("Java\u{E000}", Some("Acme"), "\u{E001}\u{E000}0/天", "/intern/a?pcm=list"),
            item("Broken", None, "100/天", "/intern/b"),
            item("Rust", Some("\u{E002}\u{E002}Soft"), "200/天", "/intern/c"),
            item("Go", Some("Gopher"), "300/天", "https://www.shixiseng.com/intern/d"),
        )
    }

    fn detail(font_rand: u32, body: &str, canonical: Option<&str>) -> String {
        let canonical = canonical
            .map(|c| format!(r#"<link rel="canonical" href="{}">"#, c))
            .unwrap_or_default();
        format!(
            r#"<html><head>{canonical}<style>@font-face{{src:url(/interns/iconfonts/file?rand={font_rand})}}</style></head>
               <body>{body}</body></html>"#
        )
    }

    fn fixture() -> (Arc<StaticLauncher>, Arc<StubGlyphs>, Shixiseng) {
        let search = Shixiseng::search_url("java", "上海");
        let detail_a = detail(1, "<div class=\"job_part\">Write \u{E001}\u{E000} services</div>", Some("/intern/a"));
        let detail_c = detail(2, "<div class=\"job_part\">Own the \u{E002}\u{E002} stack</div>", None);
        let launcher = Arc::new(StaticLauncher::new(&[
            (search.as_str(), listing().as_str()),
            ("https://www.shixiseng.com/intern/a?pcm=list", detail_a.as_str()),
            ("https://www.shixiseng.com/intern/c", detail_c.as_str()),
        ]));
        let glyphs = Arc::new(
            StubGlyphs::default()
                .with(FONT_1, &[(0xE000, '1'), (0xE001, '5'), (0xE002, 'A')])
                .with(FONT_2, &[(0xE000, '7'), (0xE001, '8'), (0xE002, 'B')]),
        );
        let ctx = Arc::new(CrawlContext::new(launcher.clone(), glyphs.clone(), Config::without_delays()));
        (launcher, glyphs, Shixiseng::new(ctx))
    }

    #[test]
    fn test_search_url_encodes_parameters() {
        assert_eq!(
            Shixiseng::search_url("c++ dev", "上海"),
            "https://www.shixiseng.com/interns?keyword=c%2B%2B%20dev&city=%E4%B8%8A%E6%B5%B7"
        );
    }

    #[test]
    fn test_crawl_decodes_listing_and_skips_broken_item() {
        let (_, _, site) = fixture();
        let jobs = site.crawl("java", "上海").unwrap();

        let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["Java1", "Rust", "Go"]);
        assert_eq!(jobs[0].salary, "510/天");
        assert_eq!(jobs[1].company, "AASoft");
        assert!(jobs.iter().all(|j| j.location == "上海"));
    }

    #[test]
    fn test_crawl_fills_descriptions_and_rebuilds_on_font_change() {
        let (_, glyphs, site) = fixture();
        let jobs = site.crawl("java", "上海").unwrap();

        // same font as the listing
        assert_eq!(jobs[0].description.as_deref(), Some("Write 51 services"));
        // detail page switched fonts
        assert_eq!(jobs[1].description.as_deref(), Some("Own the BB stack"));
        // page that fails to load
        assert_eq!(jobs[2].description.as_deref(), Some(DESCRIPTION_UNAVAILABLE));

        assert_eq!(glyphs.calls(), vec![FONT_1, FONT_2]);
    }

    #[test]
    fn test_crawl_prefers_canonical_link() {
        let (_, _, site) = fixture();
        let jobs = site.crawl("java", "上海").unwrap();
        assert_eq!(jobs[0].source_url.as_deref(), Some("https://www.shixiseng.com/intern/a"));
        assert_eq!(jobs[1].source_url.as_deref(), Some("https://www.shixiseng.com/intern/c"));
    }

    #[test]
    fn test_crawl_visits_details_in_order_and_releases_browser() {
        let (launcher, _, site) = fixture();
        site.crawl("java", "上海").unwrap();

        let opened = launcher.recorder.opened();
        assert_eq!(opened.len(), 4);
        assert_eq!(opened[1], "https://www.shixiseng.com/intern/a?pcm=list");
        assert_eq!(opened[3], "https://www.shixiseng.com/intern/d");
        assert_eq!(launcher.recorder.launched(), 1);
        assert_eq!(launcher.recorder.released(), 1);
    }

    #[test]
    fn test_listing_fetch_failure_propagates_and_releases_browser() {
        let (launcher, _, site) = fixture();
        let result = site.crawl("python", "北京");
        assert!(matches!(result, Err(CrawlError::Fetch(_))));
        assert_eq!(launcher.recorder.released(), 1);
    }

    #[test]
    fn test_page_without_font_passes_text_through() {
        let search = Shixiseng::search_url("ops", "杭州");
        let page = format!("<html><body>{}</body></html>", item("SRE \u{E000}", Some("Ops Co"), "150/天", "/intern/x"));
        let launcher = Arc::new(StaticLauncher::new(&[(search.as_str(), page.as_str())]));
        let glyphs = Arc::new(StubGlyphs::default());
        let ctx = Arc::new(CrawlContext::new(launcher, glyphs.clone(), Config::without_delays()));

        let jobs = Shixiseng::new(ctx).crawl("ops", "杭州").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "SRE \u{E000}");
        assert_eq!(jobs[0].description.as_deref(), Some(DESCRIPTION_UNAVAILABLE));
        assert!(glyphs.calls().is_empty());
    }
}
