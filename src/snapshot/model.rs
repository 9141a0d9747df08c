//! Value types of the in-memory site inventory

use crate::state::AnalysisState;
use crate::ModelError;
use chrono::{DateTime, Utc};
use std::fmt;
use url::Url;

/// Folder path of a file relative to its container root
///
/// Never starts or ends with `/` and never contains `//`. Empty means the
/// file sits at the container root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubFolder(String);

impl SubFolder {
    pub fn new(path: impl Into<String>) -> Result<Self, ModelError> {
        let path = path.into();
        if path.starts_with('/') || path.ends_with('/') || path.contains("//") {
            return Err(ModelError::InvalidSubFolder(path));
        }
        Ok(Self(path))
    }

    /// Derives the sub-folder of an item directory under a container root
    ///
    /// The root prefix is removed when present and surrounding slashes are
    /// trimmed before validation.
    pub fn from_directory(directory: &str, container_root: &str) -> Result<Self, ModelError> {
        let root = container_root.trim_end_matches('/');
        let relative = directory.strip_prefix(root).unwrap_or(directory);
        Self::new(relative.trim_matches('/'))
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if this folder equals `prefix` or lies beneath it
    pub fn is_within(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_matches('/');
        prefix.is_empty()
            || self.0.eq_ignore_ascii_case(prefix)
            || (self.0.len() > prefix.len()
                && self.0.as_bytes()[prefix.len()] == b'/'
                && self.0[..prefix.len()].eq_ignore_ascii_case(prefix))
    }
}

impl fmt::Display for SubFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of container holds the files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKind {
    /// Generic list; files are item attachments
    List,
    /// Document library addressable through the enrichment API
    DocumentLibrary {
        /// Learned from the first document seen
        drive_id: Option<String>,
        /// Opaque change-tracking token, stored but not consumed
        delta_token: Option<String>,
    },
}

impl ContainerKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::DocumentLibrary { .. } => "document_library",
        }
    }
}

/// A list or document library inside a web
///
/// Identity is the (title, root path) pair; two containers with the same
/// pair are the same container regardless of what else is known about them.
#[derive(Debug, Clone)]
pub struct Container {
    pub title: String,
    pub root_path: String,
    pub web_url: String,
    pub kind: ContainerKind,
}

impl Container {
    pub fn list(title: impl Into<String>, root_path: impl Into<String>, web_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            root_path: root_path.into(),
            web_url: web_url.into(),
            kind: ContainerKind::List,
        }
    }

    pub fn document_library(
        title: impl Into<String>,
        root_path: impl Into<String>,
        web_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            root_path: root_path.into(),
            web_url: web_url.into(),
            kind: ContainerKind::DocumentLibrary {
                drive_id: None,
                delta_token: None,
            },
        }
    }

    pub fn drive_id(&self) -> Option<&str> {
        match &self.kind {
            ContainerKind::DocumentLibrary { drive_id, .. } => drive_id.as_deref(),
            ContainerKind::List => None,
        }
    }

    pub fn delta_token(&self) -> Option<&str> {
        match &self.kind {
            ContainerKind::DocumentLibrary { delta_token, .. } => delta_token.as_deref(),
            ContainerKind::List => None,
        }
    }

    pub fn is_document_library(&self) -> bool {
        matches!(self.kind, ContainerKind::DocumentLibrary { .. })
    }

    /// Records a drive id if none is known yet
    pub fn learn_drive_id(&mut self, id: &str) {
        if let ContainerKind::DocumentLibrary { drive_id, .. } = &mut self.kind {
            if drive_id.is_none() {
                *drive_id = Some(id.to_string());
            }
        }
    }

    pub fn set_delta_token(&mut self, token: Option<String>) {
        if let ContainerKind::DocumentLibrary { delta_token, .. } = &mut self.kind {
            if token.is_some() {
                *delta_token = token;
            }
        }
    }

    /// Merges facts learned by another instance of the same container
    pub fn absorb(&mut self, other: &Container) {
        if let Some(id) = other.drive_id() {
            self.learn_drive_id(id);
        }
        self.set_delta_token(other.delta_token().map(str::to_string));
    }

    pub fn identity(&self) -> (&str, &str) {
        (&self.title, &self.root_path)
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Container {}

/// Address of a document in the enrichment API
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriveRef {
    pub drive_id: String,
    pub item_id: String,
}

impl DriveRef {
    pub fn new(drive_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            drive_id: drive_id.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for DriveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.drive_id, self.item_id)
    }
}

/// A document together with its enrichment results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub drive: DriveRef,
    pub access_count: Option<u64>,
    pub actor_count: Option<u64>,
    pub version_count: Option<u64>,
    pub versions_size: Option<u64>,
    pub state: AnalysisState,
    pub last_error: Option<String>,
}

impl DocumentFile {
    pub fn new(drive: DriveRef) -> Self {
        Self {
            drive,
            access_count: None,
            actor_count: None,
            version_count: None,
            versions_size: None,
            state: AnalysisState::Pending,
            last_error: None,
        }
    }
}

/// The three shapes a discovered file can take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// List attachment, not addressable by the enrichment API
    Plain,
    /// Document-library item, not yet tracked for enrichment
    Drive(DriveRef),
    /// Document-library item tracked for enrichment
    Document(DocumentFile),
}

impl FileKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Drive(_) => "drive",
            Self::Document(_) => "document",
        }
    }
}

/// A discovered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub site_url: String,
    pub web_url: String,
    pub server_relative_path: String,
    pub author: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub sub_folder: SubFolder,
    pub kind: FileKind,
}

impl FileRecord {
    /// Absolute URL of the file, used as its durable key
    ///
    /// Every path segment is encoded as a literal name, so `%`, `#` and `?`
    /// in file names never alias another file.
    pub fn full_url(&self) -> String {
        let Ok(mut url) = Url::parse(&self.site_url) else {
            return self.server_relative_path.clone();
        };
        url.set_query(None);
        url.set_fragment(None);
        match url.path_segments_mut() {
            Ok(mut segments) => {
                segments
                    .clear()
                    .extend(self.server_relative_path.split('/').filter(|s| !s.is_empty()));
            }
            Err(()) => return self.server_relative_path.clone(),
        }
        url.to_string()
    }

    pub fn drive_ref(&self) -> Option<&DriveRef> {
        match &self.kind {
            FileKind::Plain => None,
            FileKind::Drive(drive) => Some(drive),
            FileKind::Document(doc) => Some(&doc.drive),
        }
    }

    pub fn document(&self) -> Option<&DocumentFile> {
        match &self.kind {
            FileKind::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn analysis_state(&self) -> Option<AnalysisState> {
        self.document().map(|doc| doc.state)
    }

    /// Starts tracking a drive item for enrichment
    pub fn into_document(self) -> Self {
        match self.kind {
            FileKind::Drive(drive) => Self {
                kind: FileKind::Document(DocumentFile::new(drive)),
                ..self
            },
            _ => self,
        }
    }
}
