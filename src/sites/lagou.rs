//! Job listings from lagou.com. Text is served in the clear, but the listing
//! renders client-side and needs a longer settle time.

use scraper::ElementRef;
use std::sync::Arc;
use tracing::info;
use url::Url;

use super::{CrawlContext, SiteCrawler, absolute_link, item_attr, item_text, parse_listing, settle};
use crate::error::CrawlResult;
use crate::font::GlyphMap;
use crate::models::{NewJobPosting, format_timestamp, now_local};

const ORIGIN: &str = "https://www.lagou.com";

const ITEM: &str = ".item__10RTO";
const TITLE: &str = ".p-top__1F7CL a";
const COMPANY: &str = ".company-name__2-SjF a";
const SALARY: &str = ".money__3Lkgq";
const LOCATION: &str = ".position__21iO4";

/// Lagou detail pages sit behind a login wall, so postings point there instead.
pub const DESCRIPTION_PLACEHOLDER: &str = "See source link";

pub struct Lagou {
    ctx: Arc<CrawlContext>,
    origin: Url,
}

impl Lagou {
    pub fn new(ctx: Arc<CrawlContext>) -> Self {
        Self {
            ctx,
            origin: Url::parse(ORIGIN).expect("valid origin"),
        }
    }

    pub fn search_url(keyword: &str, city: &str) -> String {
        format!(
            "{}/jobs/list_{}?city={}",
            ORIGIN,
            urlencoding::encode(keyword),
            urlencoding::encode(city)
        )
    }

    fn parse_item(&self, item: ElementRef<'_>) -> CrawlResult<NewJobPosting> {
        let plain = GlyphMap::default();
        let link = absolute_link(&self.origin, &item_attr(item, TITLE, "href")?)?;

        Ok(NewJobPosting {
            title: item_text(item, TITLE, &plain)?,
            company: item_text(item, COMPANY, &plain)?,
            description: Some(DESCRIPTION_PLACEHOLDER.to_string()),
            location: item_text(item, LOCATION, &plain)?,
            salary: item_text(item, SALARY, &plain)?,
            source_url: Some(link),
            crawl_time: format_timestamp(now_local()),
        })
    }
}

impl SiteCrawler for Lagou {
    fn name(&self) -> &'static str {
        "lagou"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["lagou.com", "www.lagou.com"]
    }

    fn crawl(&self, keyword: &str, city: &str) -> CrawlResult<Vec<NewJobPosting>> {
        let mut driver = self.ctx.launcher.launch()?;

        let url = Self::search_url(keyword, city);
        info!(url = %url, "Fetching lagou listing");
        driver.open(&url)?;
        settle(self.ctx.config.slow_settle_delay());

        let markup = driver.page_source()?;
        let jobs = parse_listing(&markup, ITEM, |item| self.parse_item(item));
        info!(count = jobs.len(), "Parsed lagou listing");
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::StaticLauncher;
    use crate::config::Config;
    use crate::error::CrawlError;
    use crate::sites::testing::StubGlyphs;

    fn item(title: &str, salary: Option<&str>, location: &str) -> String {
        let salary = salary
            .map(|s| format!(r#"<span class="money__3Lkgq">{}</span>"#, s))
            .unwrap_or_default();
        format!(
            r#"<div class="item__10RTO">
                 <div class="p-top__1F7CL"><a href="https://www.lagou.com/wn/jobs/{title}.html">{title}</a><span class="position__21iO4">[{location}]</span></div>
                 {salary}
                 <div class="company-name__2-SjF"><a>  Lagou Labs  </a></div>
               </div>"#
        )
    }

    fn site(pages: &[(&str, &str)]) -> (Arc<StaticLauncher>, Lagou) {
        let launcher = Arc::new(StaticLauncher::new(pages));
        let ctx = Arc::new(CrawlContext::new(
            launcher.clone(),
            Arc::new(StubGlyphs::default()),
            Config::without_delays(),
        ));
        (launcher, Lagou::new(ctx))
    }

    #[test]
    fn test_search_url() {
        assert_eq!(
            Lagou::search_url("后端", "北京"),
            "https://www.lagou.com/jobs/list_%E5%90%8E%E7%AB%AF?city=%E5%8C%97%E4%BA%AC"
        );
    }

    #[test]
    fn test_crawl_reads_listing_without_detail_pages() {
        let url = Lagou::search_url("rust", "北京");
        let page = format!(
            "<html><body>{}{}{}</body></html>",
            item("101", Some("20k-40k"), "北京·海淀区"),
            item("102", None, "北京·朝阳区"),
            item("103", Some("15k-25k"), "北京·朝阳区"),
        );
        let (launcher, lagou) = site(&[(url.as_str(), page.as_str())]);

        let jobs = lagou.crawl("rust", "北京").unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].title, "101");
        assert_eq!(jobs[0].company, "Lagou Labs");
        assert_eq!(jobs[0].salary, "20k-40k");
        assert_eq!(jobs[0].location, "[北京·海淀区]");
        assert_eq!(jobs[1].source_url.as_deref(), Some("https://www.lagou.com/wn/jobs/103.html"));
        assert!(jobs.iter().all(|j| j.description.as_deref() == Some(DESCRIPTION_PLACEHOLDER)));

        assert_eq!(launcher.recorder.opened(), vec![url]);
        assert_eq!(launcher.recorder.released(), 1);
    }

    #[test]
    fn test_launch_failure_is_fetch_error() {
        let mut launcher = StaticLauncher::new(&[]);
        launcher.fail_launch = true;
        let ctx = Arc::new(CrawlContext::new(
            Arc::new(launcher),
            Arc::new(StubGlyphs::default()),
            Config::without_delays(),
        ));
        let result = Lagou::new(ctx).crawl("rust", "北京");
        assert!(matches!(result, Err(CrawlError::Fetch(_))));
    }

    #[test]
    fn test_empty_listing_is_ok() {
        let url = Lagou::search_url("cobol", "全国");
        let (_, lagou) = site(&[(url.as_str(), "<html><body><p>暂无职位</p></body></html>")]);
        assert!(lagou.crawl("cobol", "全国").unwrap().is_empty());
    }
}
