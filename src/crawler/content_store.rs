//! Content store access: webs, lists and paged list items
//!
//! [`ContentStore`] is the seam the crawler pages through; [`RestContentStore`]
//! speaks the JSON REST endpoints over a [`ThrottledClient`].

use crate::http::ThrottledClient;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// A web (site or sub-site)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebInfo {
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Absolute URLs of the immediate sub-webs
    #[serde(rename = "subWebs", default)]
    pub sub_webs: Vec<String>,
}

/// Template a list was created from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ListTemplate {
    #[serde(rename = "documentLibrary")]
    DocumentLibrary,
    #[serde(other)]
    GenericList,
}

/// A list as reported by the content store
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListInfo {
    pub title: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(rename = "isSystemList", default)]
    pub is_system_list: bool,
    #[serde(rename = "baseTemplate")]
    pub template: ListTemplate,
    /// Server-relative path of the list root folder
    #[serde(rename = "rootFolder")]
    pub root_folder: String,
}

#[derive(Debug, Deserialize)]
struct ListCollection {
    #[serde(default)]
    value: Vec<ListInfo>,
}

/// Whether an item is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectType {
    File,
    Folder,
}

/// Last editor of an item
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Editor {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "lookupValue", default)]
    pub lookup_value: Option<String>,
}

impl Editor {
    /// Email if present, otherwise the display value
    pub fn display(&self) -> Option<String> {
        self.email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .or(self.lookup_value.as_deref())
            .map(str::to_string)
    }
}

/// File facet of a document-library item
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemFile {
    #[serde(default)]
    pub exists: bool,
    #[serde(rename = "serverRelativeUrl")]
    pub server_relative_url: String,
    #[serde(rename = "driveId", default)]
    pub drive_id: Option<String>,
    #[serde(rename = "itemId", default)]
    pub item_id: Option<String>,
}

/// Attachment of a generic list item
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Attachment {
    #[serde(rename = "serverRelativeUrl")]
    pub server_relative_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One list item
///
/// Fields the crawler requires are optional here so that a malformed item
/// can be reported precisely instead of failing the whole page decode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListItem {
    pub id: i64,
    #[serde(rename = "fileSystemObjectType")]
    pub object_type: ObjectType,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub editor: Option<Editor>,
    #[serde(rename = "fileDirRef", default)]
    pub file_dir_ref: Option<String>,
    #[serde(rename = "fileSize", default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file: Option<ItemFile>,
    #[serde(rename = "attachmentFiles", default)]
    pub attachments: Vec<Attachment>,
}

/// One page of list items
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemPage {
    #[serde(rename = "value", default)]
    pub items: Vec<ListItem>,
    /// Continuation cursor; None when the list is exhausted
    #[serde(rename = "nextPosition", default)]
    pub next_position: Option<String>,
    /// Opaque change-tracking token of the list
    #[serde(rename = "changeToken", default)]
    pub change_token: Option<String>,
}

/// Read access to the content store
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Loads a web and the URLs of its immediate sub-webs
    async fn web(&self, web_url: &str) -> Result<WebInfo>;

    /// Lists every list of a web, hidden ones included
    async fn lists(&self, web_url: &str) -> Result<Vec<ListInfo>>;

    /// Loads one page of items ordered by ascending id
    async fn items_page(
        &self,
        web_url: &str,
        list_title: &str,
        position: Option<&str>,
        page_size: u32,
    ) -> Result<ItemPage>;
}

/// JSON REST implementation of [`ContentStore`]
pub struct RestContentStore {
    http: ThrottledClient,
}

impl RestContentStore {
    pub fn new(http: ThrottledClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &ThrottledClient {
        &self.http
    }
}

fn endpoint(web_url: &str, path: &str) -> String {
    format!("{}/_api/web{}", web_url.trim_end_matches('/'), path)
}

#[async_trait]
impl ContentStore for RestContentStore {
    async fn web(&self, web_url: &str) -> Result<WebInfo> {
        self.http.get_json(&endpoint(web_url, "")).await
    }

    async fn lists(&self, web_url: &str) -> Result<Vec<ListInfo>> {
        let collection: ListCollection = self.http.get_json(&endpoint(web_url, "/lists")).await?;
        Ok(collection.value)
    }

    async fn items_page(
        &self,
        web_url: &str,
        list_title: &str,
        position: Option<&str>,
        page_size: u32,
    ) -> Result<ItemPage> {
        let url = endpoint(web_url, "/lists/items");
        let top = page_size.to_string();
        let mut query: Vec<(&str, &str)> =
            vec![("list", list_title), ("orderBy", "id"), ("top", &top)];
        if let Some(position) = position {
            query.push(("position", position));
        }

        let response = self
            .http
            .execute(&url, |client| client.get(&url).query(&query))
            .await?;
        crate::http::decode_json(&url, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        assert_eq!(
            endpoint("https://t.example.com/sites/hr/", "/lists"),
            "https://t.example.com/sites/hr/_api/web/lists"
        );
        assert_eq!(
            endpoint("https://t.example.com/sites/hr", ""),
            "https://t.example.com/sites/hr/_api/web"
        );
    }

    #[test]
    fn test_list_decoding() {
        let json = r#"{"value": [
            {"title": "Documents", "baseTemplate": "documentLibrary", "rootFolder": "/sites/hr/Documents"},
            {"title": "Tasks", "hidden": true, "baseTemplate": "tasks", "rootFolder": "/sites/hr/Lists/Tasks"}
        ]}"#;
        let lists: ListCollection = serde_json::from_str(json).unwrap();
        assert_eq!(lists.value[0].template, ListTemplate::DocumentLibrary);
        assert_eq!(lists.value[1].template, ListTemplate::GenericList);
        assert!(lists.value[1].hidden);
        assert!(!lists.value[0].is_system_list);
    }

    #[test]
    fn test_item_page_decoding() {
        let json = r#"{
            "value": [{
                "id": 7,
                "fileSystemObjectType": "file",
                "modified": "2024-03-01T10:00:00Z",
                "editor": {"email": "", "lookupValue": "Ana Lima"},
                "fileDirRef": "/sites/hr/Documents/Policies",
                "fileSize": 2048,
                "file": {"exists": true, "serverRelativeUrl": "/sites/hr/Documents/Policies/a.docx", "driveId": "d1", "itemId": "i7"}
            }],
            "nextPosition": "Paged=TRUE&p_ID=7"
        }"#;
        let page: ItemPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_position.as_deref(), Some("Paged=TRUE&p_ID=7"));

        let item = &page.items[0];
        assert_eq!(item.object_type, ObjectType::File);
        assert_eq!(item.editor.as_ref().unwrap().display().as_deref(), Some("Ana Lima"));
        assert_eq!(item.file.as_ref().unwrap().item_id.as_deref(), Some("i7"));
    }

    #[test]
    fn test_editor_prefers_email() {
        let editor = Editor {
            email: Some("ana@example.com".to_string()),
            lookup_value: Some("Ana".to_string()),
        };
        assert_eq!(editor.display().as_deref(), Some("ana@example.com"));
        assert_eq!(Editor::default().display(), None);
    }
}
