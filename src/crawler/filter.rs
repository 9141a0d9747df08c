//! List and folder inclusion policy for a site
//!
//! Stored as JSON with each target site. An empty filter includes everything.

use crate::snapshot::SubFolder;
use serde::{Deserialize, Serialize};

/// Inclusion rule for one list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    /// List title, compared case-insensitively
    pub title: String,

    /// Folders to include, relative to the list root; empty means all
    #[serde(default)]
    pub folders: Vec<String>,
}

impl ListFilter {
    pub fn include_folder(&self, folder: &SubFolder) -> bool {
        self.folders.is_empty() || self.folders.iter().any(|f| folder.is_within(f))
    }
}

/// Which lists and folders of a site to harvest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteFilter {
    #[serde(default)]
    pub lists: Vec<ListFilter>,
}

impl SiteFilter {
    /// A filter that includes every list and folder
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses a stored filter, falling back to allow-all
    ///
    /// Missing or blank JSON means no restriction. Unparseable JSON is
    /// logged and also treated as no restriction.
    pub fn from_json_lenient(site_url: &str, json: Option<&str>) -> Self {
        match json.map(str::trim) {
            None | Some("") => Self::allow_all(),
            Some(raw) => match serde_json::from_str(raw) {
                Ok(filter) => filter,
                Err(e) => {
                    tracing::warn!(
                        "Ignoring invalid filter for {}: {} (including all lists)",
                        site_url,
                        e
                    );
                    Self::allow_all()
                }
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn list(&self, title: &str) -> Option<&ListFilter> {
        self.lists
            .iter()
            .find(|l| l.title.eq_ignore_ascii_case(title))
    }

    pub fn include_list(&self, title: &str) -> bool {
        self.lists.is_empty() || self.list(title).is_some()
    }

    pub fn include_folder(&self, list_title: &str, folder: &SubFolder) -> bool {
        match self.list(list_title) {
            Some(list) => list.include_folder(folder),
            None => self.lists.is_empty(),
        }
    }
}
