use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};

use crate::client::BookStackApi;
use crate::model::{Attachment, Book, Chapter, Page};

/// In-memory BookStack used by unit tests.
#[derive(Debug, Default)]
pub struct MockApi {
    pub books: Vec<Book>,
    pub chapters: Vec<Chapter>,
    pub pages: Vec<Page>,
    pub attachments: Vec<(Attachment, PathBuf)>,
    pub created_books: Vec<String>,
    pub created_chapters: Vec<(i64, String)>,
    pub updated_pages: Vec<i64>,
    pub fail_list_books: bool,
    pub fail_list_chapters: bool,
    pub fail_list_pages: bool,
    /// File names whose upload is rejected.
    pub reject_uploads: Vec<String>,
    pub request_count: usize,
    pub(crate) next_id: i64,
}

impl MockApi {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    pub fn page_named(&self, name: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.name == name)
    }
}

impl BookStackApi for MockApi {
    fn list_books(&mut self) -> Result<Vec<Book>> {
        self.request_count += 1;
        if self.fail_list_books {
            bail!("HTTP 500 while listing books");
        }
        Ok(self.books.clone())
    }

    fn list_chapters(&mut self) -> Result<Vec<Chapter>> {
        self.request_count += 1;
        if self.fail_list_chapters {
            bail!("HTTP 500 while listing chapters");
        }
        Ok(self.chapters.clone())
    }

    fn list_pages(&mut self) -> Result<Vec<Page>> {
        self.request_count += 1;
        if self.fail_list_pages {
            bail!("HTTP 500 while listing pages");
        }
        Ok(self.pages.clone())
    }

    fn create_book(&mut self, name: &str) -> Result<Book> {
        self.request_count += 1;
        let book = Book {
            id: self.allocate_id(),
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: String::new(),
        };
        self.created_books.push(name.to_string());
        self.books.push(book.clone());
        Ok(book)
    }

    fn create_chapter(&mut self, book_id: i64, name: &str) -> Result<Chapter> {
        self.request_count += 1;
        let chapter = Chapter {
            id: self.allocate_id(),
            book_id,
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: String::new(),
        };
        self.created_chapters.push((book_id, name.to_string()));
        self.chapters.push(chapter.clone());
        Ok(chapter)
    }

    fn create_page(&mut self, chapter_id: i64, name: &str, markdown: &str) -> Result<Page> {
        self.request_count += 1;
        let book_id = self
            .chapters
            .iter()
            .find(|chapter| chapter.id == chapter_id)
            .map(|chapter| chapter.book_id)
            .unwrap_or_default();
        let page = Page {
            id: self.allocate_id(),
            book_id,
            chapter_id,
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: String::new(),
            markdown: markdown.to_string(),
        };
        self.pages.push(page.clone());
        Ok(page)
    }

    fn update_page(&mut self, page_id: i64, markdown: &str) -> Result<Page> {
        self.request_count += 1;
        let page = self
            .pages
            .iter_mut()
            .find(|page| page.id == page_id)
            .ok_or_else(|| anyhow!("HTTP 404: page {page_id} not found"))?;
        page.markdown = markdown.to_string();
        self.updated_pages.push(page_id);
        Ok(page.clone())
    }

    fn upload_attachment(&mut self, page_id: i64, name: &str, path: &Path) -> Result<Attachment> {
        self.request_count += 1;
        if !path.is_file() {
            bail!("failed to open file to upload: {}", path.display());
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.reject_uploads.contains(&file_name) {
            bail!("HTTP 422: upload of {file_name} rejected");
        }
        let attachment = Attachment {
            id: self.allocate_id(),
            name: name.to_string(),
            extension: path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default(),
            uploaded_to: page_id,
        };
        self.attachments.push((attachment.clone(), path.to_path_buf()));
        Ok(attachment)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
