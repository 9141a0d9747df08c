//! Content store crawling
//!
//! - `content_store`: the paging API seam and its REST implementation
//! - `filter`: per-site list and folder inclusion policy
//! - `site_crawler`: web/list/page traversal and item classification

pub mod content_store;
pub mod filter;
mod site_crawler;

pub use content_store::{ContentStore, ItemPage, ListInfo, ListItem, RestContentStore, WebInfo};
pub use filter::{ListFilter, SiteFilter};
pub use site_crawler::{
    CrawlEvent, CrawlSummary, DiscoveredFile, ListCrawl, SiteCrawler, WEB_LISTS_TITLE,
};
