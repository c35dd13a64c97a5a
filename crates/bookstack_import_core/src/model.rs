use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Book {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Chapter {
    pub id: i64,
    pub book_id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
}

/// Pages outside a chapter are listed with `chapter_id = 0`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Page {
    pub id: i64,
    #[serde(default)]
    pub book_id: i64,
    #[serde(default)]
    pub chapter_id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub markdown: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub uploaded_to: i64,
}

impl Attachment {
    /// Path on the wiki that serves this attachment.
    pub fn link(&self) -> String {
        format!("/attachments/{}", self.id)
    }
}

/// Envelope of every `GET /api/<entity>` listing.
#[derive(Debug, Deserialize)]
pub(crate) struct Listing<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub total: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateBookRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateChapterRequest<'a> {
    pub book_id: i64,
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreatePageRequest<'a> {
    pub chapter_id: i64,
    pub name: &'a str,
    pub markdown: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdatePageRequest<'a> {
    pub markdown: &'a str,
}
