use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::client::BookStackApi;
use crate::model::{Book, Chapter, Page};

/// Markdown stored on pages that exist only so attachments can reference them.
pub const PLACEHOLDER_MARKDOWN: &str = "empty";

/// `(parent id, name)` identity of a chapter or page.
pub type ChildKey = (i64, String);

/// Remote hierarchy for the lifetime of one import run.
///
/// Filled by one listing per entity kind, then kept current on every create and
/// update so lookups never go back to the server. Later inserts for an existing
/// key replace the earlier entity.
#[derive(Debug, Default)]
pub struct HierarchyCache {
    books: HashMap<String, Book>,
    chapters: HashMap<ChildKey, Chapter>,
    pages: HashMap<ChildKey, Page>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

impl HierarchyCache {
    /// Any failing listing aborts construction; there is no partial cache.
    pub fn load<A: BookStackApi>(api: &mut A) -> Result<Self> {
        let mut cache = Self::default();
        for book in api.list_books().context("could not get list of books")? {
            cache.insert_book(book);
        }
        for chapter in api
            .list_chapters()
            .context("could not get list of chapters")?
        {
            cache.insert_chapter(chapter);
        }
        for page in api.list_pages().context("could not get list of pages")? {
            cache.insert_page(page);
        }
        info!(
            "loaded {} books, {} chapters, {} pages",
            cache.books.len(),
            cache.chapters.len(),
            cache.pages.len()
        );
        Ok(cache)
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, chapter_id: i64, name: &str) -> Option<&Page> {
        self.pages.get(&(chapter_id, name.to_string()))
    }

    pub fn get_or_create_book<A: BookStackApi>(&mut self, api: &mut A, name: &str) -> Result<Book> {
        if let Some(book) = self.books.get(name) {
            return Ok(book.clone());
        }

        info!("creating new book {name:?}");
        let book = api.create_book(name)?;
        debug!("new book: {book:?}");
        self.insert_book(book.clone());
        Ok(book)
    }

    pub fn get_or_create_chapter<A: BookStackApi>(
        &mut self,
        api: &mut A,
        name: &str,
        book_id: i64,
    ) -> Result<Chapter> {
        if let Some(chapter) = self.chapters.get(&(book_id, name.to_string())) {
            return Ok(chapter.clone());
        }

        info!("creating new chapter {name:?} in book {book_id}");
        let chapter = api.create_chapter(book_id, name)?;
        debug!("new chapter: {chapter:?}");
        self.insert_chapter(chapter.clone());
        Ok(chapter)
    }

    /// Resolve the id of a page, creating it with placeholder content when missing.
    pub fn get_or_create_page_id<A: BookStackApi>(
        &mut self,
        api: &mut A,
        name: &str,
        chapter_id: i64,
    ) -> Result<i64> {
        if let Some(page) = self.page(chapter_id, name) {
            return Ok(page.id);
        }

        info!("creating new page {name:?} in chapter {chapter_id}");
        let page = api
            .create_page(chapter_id, name, PLACEHOLDER_MARKDOWN)
            .context("create page")?;
        let id = page.id;
        self.insert_page(page);
        Ok(id)
    }

    /// Create the page with `markdown`, or overwrite the content of the existing one.
    pub fn get_or_create_page<A: BookStackApi>(
        &mut self,
        api: &mut A,
        name: &str,
        chapter_id: i64,
        markdown: &str,
    ) -> Result<(Page, Upsert)> {
        let (page, action) = match self.page(chapter_id, name) {
            Some(existing) => {
                let page_id = existing.id;
                info!("updating existing page {page_id} {name:?}");
                let mut page = api
                    .update_page(page_id, markdown)
                    .with_context(|| format!("could not update page {page_id}"))?;
                // Some BookStack versions answer updates without the parent ids.
                if page.chapter_id == 0 {
                    page.chapter_id = chapter_id;
                }
                (page, Upsert::Updated)
            }
            None => {
                info!("creating new page {name:?} in chapter {chapter_id}");
                let page = api
                    .create_page(chapter_id, name, markdown)
                    .context("create page")?;
                (page, Upsert::Created)
            }
        };
        self.insert_page(page.clone());
        Ok((page, action))
    }

    fn insert_book(&mut self, book: Book) {
        self.books.insert(book.name.clone(), book);
    }

    fn insert_chapter(&mut self, chapter: Chapter) {
        self.chapters
            .insert((chapter.book_id, chapter.name.clone()), chapter);
    }

    fn insert_page(&mut self, page: Page) {
        self.pages.insert((page.chapter_id, page.name.clone()), page);
    }
}

#[cfg(test)]
mod tests {
    use super::{HierarchyCache, PLACEHOLDER_MARKDOWN, Upsert};
    use crate::model::{Book, Chapter, Page};
    use crate::testing::MockApi;

    fn book(id: i64, name: &str) -> Book {
        Book {
            id,
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: String::new(),
        }
    }

    fn chapter(id: i64, book_id: i64, name: &str) -> Chapter {
        Chapter {
            id,
            book_id,
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: String::new(),
        }
    }

    #[test]
    fn load_indexes_existing_entities() {
        let mut api = MockApi::default();
        api.books.push(book(1, "Notes"));
        api.chapters.push(chapter(10, 1, "Work"));

        let mut cache = HierarchyCache::load(&mut api).expect("load");
        assert_eq!(cache.book_count(), 1);
        assert_eq!(cache.chapter_count(), 1);

        let found = cache.get_or_create_book(&mut api, "Notes").expect("book");
        assert_eq!(found.id, 1);
        let found = cache
            .get_or_create_chapter(&mut api, "Work", 1)
            .expect("chapter");
        assert_eq!(found.id, 10);
        assert!(api.created_books.is_empty());
        assert!(api.created_chapters.is_empty());
    }

    #[test]
    fn load_fails_when_any_listing_fails() {
        let mut api = MockApi {
            fail_list_chapters: true,
            ..Default::default()
        };
        let error = HierarchyCache::load(&mut api).expect_err("must fail");
        assert!(format!("{error:#}").contains("could not get list of chapters"));
    }

    #[test]
    fn chapter_keys_do_not_collide_across_books() {
        let mut api = MockApi::default();
        api.chapters.push(chapter(10, 5, "Foo"));
        let mut cache = HierarchyCache::load(&mut api).expect("load");

        let created = cache
            .get_or_create_chapter(&mut api, "Foo", 6)
            .expect("chapter");
        assert_ne!(created.id, 10);
        assert_eq!(api.created_chapters, vec![(6, "Foo".to_string())]);

        let again = cache
            .get_or_create_chapter(&mut api, "Foo", 6)
            .expect("chapter");
        assert_eq!(again.id, created.id);
        assert_eq!(api.created_chapters.len(), 1);
    }

    #[test]
    fn page_id_lookup_creates_placeholder_once() {
        let mut api = MockApi::default();
        let mut cache = HierarchyCache::load(&mut api).expect("load");

        let first = cache
            .get_or_create_page_id(&mut api, "Intro", 3)
            .expect("page id");
        let second = cache
            .get_or_create_page_id(&mut api, "Intro", 3)
            .expect("page id");
        assert_eq!(first, second);
        assert_eq!(api.pages.len(), 1);
        assert_eq!(api.pages[0].markdown, PLACEHOLDER_MARKDOWN);
    }

    #[test]
    fn upsert_updates_existing_page_content() {
        let mut api = MockApi::default();
        api.pages.push(Page {
            id: 77,
            book_id: 1,
            chapter_id: 3,
            name: "Intro".to_string(),
            slug: "intro".to_string(),
            description: String::new(),
            markdown: "old".to_string(),
        });
        let mut cache = HierarchyCache::load(&mut api).expect("load");

        let (page, action) = cache
            .get_or_create_page(&mut api, "Intro", 3, "new body")
            .expect("upsert");
        assert_eq!(action, Upsert::Updated);
        assert_eq!(page.id, 77);
        assert_eq!(api.updated_pages, vec![77]);
        assert_eq!(cache.page(3, "Intro").map(|page| page.markdown.as_str()), Some("new body"));
        assert_eq!(cache.page_count(), 1);
    }

    #[test]
    fn upsert_creates_missing_page() {
        let mut api = MockApi::default();
        let mut cache = HierarchyCache::load(&mut api).expect("load");

        let (page, action) = cache
            .get_or_create_page(&mut api, "Fresh", 4, "body")
            .expect("upsert");
        assert_eq!(action, Upsert::Created);
        assert_eq!(page.chapter_id, 4);
        assert!(api.updated_pages.is_empty());
        assert_eq!(cache.page(4, "Fresh").map(|page| page.id), Some(page.id));
    }
}
