//! In-memory inventory of a site harvest
//!
//! `model` holds the value types (containers, files, drive references);
//! `site` holds [`SiteSnapshot`], the lock-protected inventory the crawler
//! writes into and the enricher updates.

mod model;
mod site;

pub use model::{
    Container, ContainerKind, DocumentFile, DriveRef, FileKind, FileRecord, SubFolder,
};
pub use site::{ContainerFailure, SiteSnapshot};
