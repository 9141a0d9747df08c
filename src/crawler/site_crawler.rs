//! Recursive site enumeration
//!
//! The crawler walks the root web and its immediate sub-webs, pages every
//! eligible list and turns items into [`FileRecord`]s. Discoveries are
//! streamed to the orchestrator as [`CrawlEvent`]s over a bounded channel.

use crate::crawler::content_store::{ContentStore, ListInfo, ListItem, ListTemplate, ObjectType};
use crate::crawler::filter::SiteFilter;
use crate::snapshot::{Container, ContainerFailure, DriveRef, FileKind, FileRecord, SubFolder};
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Container title reported when the lists of a whole web could not be loaded
pub const WEB_LISTS_TITLE: &str = "<lists>";

/// A file together with the container it was found in
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub file: FileRecord,
    pub container: Container,
}

/// Totals of a finished crawl
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub webs: usize,
    pub containers: usize,
    pub files: usize,
    pub excluded: usize,
    pub failed_containers: usize,
}

/// Messages sent from the crawler to its consumer
#[derive(Debug)]
pub enum CrawlEvent {
    FileFound(DiscoveredFile),
    ContainerFailed(ContainerFailure),
    /// Sent exactly once, after every web and list was paged
    Finished(CrawlSummary),
}

/// Every file of one list, for callers that want a synchronous result
#[derive(Debug, Clone)]
pub struct ListCrawl {
    pub container: Container,
    pub files: Vec<FileRecord>,
}

/// Walks one site of the content store
pub struct SiteCrawler {
    store: Arc<dyn ContentStore>,
    site_url: String,
    page_size: u32,
}

impl SiteCrawler {
    pub fn new(store: Arc<dyn ContentStore>, site_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            store,
            site_url: site_url.into(),
            page_size,
        }
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    /// Crawls the site, streaming discoveries into `events`
    ///
    /// Only a failure to load the root web aborts the crawl. A failing list
    /// is reported as `ContainerFailed` and the crawl moves on. If the
    /// receiver goes away the crawl stops quietly.
    pub async fn crawl(
        &self,
        filter: &SiteFilter,
        events: mpsc::Sender<CrawlEvent>,
    ) -> Result<CrawlSummary> {
        let root = self.store.web(&self.site_url).await?;
        let mut webs = vec![root.url.clone()];
        webs.extend(root.sub_webs.iter().cloned());

        let mut summary = CrawlSummary::default();
        tracing::info!("Crawling {} ({} sub-webs)", self.site_url, root.sub_webs.len());

        for web_url in &webs {
            summary.webs += 1;
            let lists = match self.store.lists(web_url).await {
                Ok(lists) => lists,
                Err(e) => {
                    tracing::warn!("Failed to load lists of {}: {}", web_url, e);
                    let failure = ContainerFailure {
                        web_url: web_url.clone(),
                        title: WEB_LISTS_TITLE.to_string(),
                        reason: e.to_string(),
                    };
                    if !report_failure(&events, &mut summary, failure).await {
                        return Ok(summary);
                    }
                    continue;
                }
            };

            for list in lists.iter().filter(|l| is_eligible(l, filter)) {
                summary.containers += 1;
                match self.stream_list(web_url, list, filter, &events, &mut summary).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!("Crawl receiver closed, stopping {}", self.site_url);
                        return Ok(summary);
                    }
                    Err(e) => {
                        tracing::warn!("Container '{}' in {} failed: {}", list.title, web_url, e);
                        let failure = ContainerFailure {
                            web_url: web_url.clone(),
                            title: list.title.clone(),
                            reason: e.to_string(),
                        };
                        if !report_failure(&events, &mut summary, failure).await {
                            return Ok(summary);
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Crawl of {} finished: {} files in {} containers ({} excluded, {} failed)",
            self.site_url,
            summary.files,
            summary.containers,
            summary.excluded,
            summary.failed_containers
        );
        // A closed receiver here means nobody is waiting for the summary
        let _ = events.send(CrawlEvent::Finished(summary.clone())).await;
        Ok(summary)
    }

    /// Pages one list into `events`; returns false if the receiver closed
    async fn stream_list(
        &self,
        web_url: &str,
        list: &ListInfo,
        filter: &SiteFilter,
        events: &mpsc::Sender<CrawlEvent>,
        summary: &mut CrawlSummary,
    ) -> Result<bool> {
        let mut walk = ListWalk::new(self, web_url, list);

        while let Some(files) = walk.next_page().await? {
            for file in files {
                if !filter.include_folder(&list.title, &file.sub_folder) {
                    summary.excluded += 1;
                    continue;
                }
                summary.files += 1;
                let event = CrawlEvent::FileFound(DiscoveredFile {
                    file,
                    container: walk.container.clone(),
                });
                if events.send(event).await.is_err() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Pages a whole list and returns every file in it
    pub async fn crawl_list(&self, web_url: &str, list: &ListInfo) -> Result<ListCrawl> {
        let mut walk = ListWalk::new(self, web_url, list);
        let mut files = Vec::new();
        while let Some(page) = walk.next_page().await? {
            files.extend(page);
        }
        Ok(ListCrawl {
            container: walk.container,
            files,
        })
    }
}

/// Counts and forwards a failed container; returns false if the receiver closed
async fn report_failure(
    events: &mpsc::Sender<CrawlEvent>,
    summary: &mut CrawlSummary,
    failure: ContainerFailure,
) -> bool {
    summary.failed_containers += 1;
    events.send(CrawlEvent::ContainerFailed(failure)).await.is_ok()
}

fn is_eligible(list: &ListInfo, filter: &SiteFilter) -> bool {
    if list.hidden || list.is_system_list {
        return false;
    }
    filter.include_list(&list.title)
}

/// Cursor over the pages of one list
struct ListWalk<'a> {
    crawler: &'a SiteCrawler,
    web_url: &'a str,
    list: &'a ListInfo,
    container: Container,
    position: Option<String>,
    done: bool,
}

impl<'a> ListWalk<'a> {
    fn new(crawler: &'a SiteCrawler, web_url: &'a str, list: &'a ListInfo) -> Self {
        let container = match list.template {
            ListTemplate::DocumentLibrary => {
                Container::document_library(&list.title, &list.root_folder, web_url)
            }
            ListTemplate::GenericList => Container::list(&list.title, &list.root_folder, web_url),
        };
        Self {
            crawler,
            web_url,
            list,
            container,
            position: None,
            done: false,
        }
    }

    /// Fetches and classifies the next page
    ///
    /// A transport failure ends the walk early with whatever was already
    /// returned; there is no cursor to resume from.
    async fn next_page(&mut self) -> Result<Option<Vec<FileRecord>>> {
        if self.done {
            return Ok(None);
        }

        let page = match self
            .crawler
            .store
            .items_page(
                self.web_url,
                &self.list.title,
                self.position.as_deref(),
                self.crawler.page_size,
            )
            .await
        {
            Ok(page) => page,
            Err(e @ HarvestError::Http { .. }) => {
                tracing::warn!(
                    "Paging '{}' in {} failed, skipping the rest of the list: {}",
                    self.list.title,
                    self.web_url,
                    e
                );
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.container.set_delta_token(page.change_token.clone());
        self.position = page.next_position.filter(|p| !p.is_empty());
        self.done = self.position.is_none();

        let mut files = Vec::with_capacity(page.items.len());
        for item in &page.items {
            files.extend(self.classify(item)?);
        }
        Ok(Some(files))
    }

    fn classify(&mut self, item: &ListItem) -> Result<Vec<FileRecord>> {
        let list_title = self.list.title.clone();
        let malformed = |reason: &str| HarvestError::MalformedItem {
            list: list_title.clone(),
            item_id: item.id,
            reason: reason.to_string(),
        };

        if self.list.template == ListTemplate::DocumentLibrary {
            let is_file = item.object_type == ObjectType::File;
            if !is_file || !item.file.as_ref().map(|f| f.exists).unwrap_or(false) {
                return Ok(Vec::new());
            }
        } else if item.attachments.is_empty() {
            return Ok(Vec::new());
        }

        let directory = item
            .file_dir_ref
            .as_deref()
            .ok_or_else(|| malformed("missing directory"))?;
        let modified = item
            .modified
            .as_deref()
            .ok_or_else(|| malformed("missing modified date"))?;
        let modified = DateTime::parse_from_rfc3339(modified)
            .map_err(|e| malformed(&format!("unparseable modified date '{}': {}", modified, e)))?
            .with_timezone(&Utc);
        let author = item
            .editor
            .as_ref()
            .and_then(|e| e.display())
            .ok_or_else(|| malformed("missing editor"))?;
        let sub_folder = SubFolder::from_directory(directory, &self.list.root_folder)?;

        let base = FileRecord {
            site_url: self.crawler.site_url.clone(),
            web_url: self.web_url.to_string(),
            server_relative_path: String::new(),
            author,
            last_modified: modified,
            size: item.file_size.unwrap_or(0),
            sub_folder,
            kind: FileKind::Plain,
        };

        match self.list.template {
            ListTemplate::DocumentLibrary => {
                let file = item.file.as_ref().ok_or_else(|| malformed("missing file"))?;
                let drive_id = file
                    .drive_id
                    .as_deref()
                    .ok_or_else(|| malformed("missing drive id"))?;
                let item_id = file
                    .item_id
                    .as_deref()
                    .ok_or_else(|| malformed("missing item id"))?;
                self.container.learn_drive_id(drive_id);

                Ok(vec![FileRecord {
                    server_relative_path: file.server_relative_url.clone(),
                    kind: FileKind::Drive(DriveRef::new(drive_id, item_id)),
                    ..base
                }])
            }
            ListTemplate::GenericList => Ok(item
                .attachments
                .iter()
                .map(|attachment| FileRecord {
                    server_relative_path: attachment.server_relative_url.clone(),
                    size: attachment.size.unwrap_or(base.size),
                    ..base.clone()
                })
                .collect()),
        }
    }
}
