use thiserror::Error;

/// Failures inside the crawl pipeline.
///
/// Only `Fetch` and `Persistence` ever reach the orchestrator; font and
/// extraction problems are absorbed where they happen.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("font resolution failed: {0}")]
    FontResolution(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl CrawlError {
    pub fn fetch(e: impl std::fmt::Display) -> Self {
        CrawlError::Fetch(e.to_string())
    }

    pub fn font(e: impl std::fmt::Display) -> Self {
        CrawlError::FontResolution(e.to_string())
    }

    pub fn extraction(e: impl std::fmt::Display) -> Self {
        CrawlError::Extraction(e.to_string())
    }

    pub fn persistence(e: impl std::fmt::Display) -> Self {
        CrawlError::Persistence(e.to_string())
    }
}

pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
