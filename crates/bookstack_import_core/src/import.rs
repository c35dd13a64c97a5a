use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::cache::{HierarchyCache, Upsert};
use crate::client::BookStackApi;
use crate::config::ImportSettings;
use crate::model::Attachment;
use crate::rewrite::{AttachmentUploader, find_internal_links, rewrite_embeds, rewrite_images};
use crate::scanner::find_marker;

const HEADER_MARKER: &[u8] = b"---";
const HEADER_TRAILING_BYTES: usize = 2;
/// OneNote exports its WingDings arrow glyph as this character.
const EXPORTED_ARROW: &str = "à";
const ARROW: &str = "->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Created,
    Updated,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub relative_path: String,
    pub status: FileStatus,
    pub page_id: Option<i64>,
    pub attachments: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedLink {
    pub relative_path: String,
    pub label: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub import_path: String,
    pub discovered_files: usize,
    pub imported_files: usize,
    pub created_pages: usize,
    pub updated_pages: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub uploaded_attachments: usize,
    pub reused_attachments: usize,
    pub internal_links: Vec<ReportedLink>,
    pub files: Vec<FileOutcome>,
    pub request_count: usize,
}

/// Book, chapter and page name derived from a path relative to the import root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub book: String,
    pub chapter: String,
    pub page: String,
}

/// Import every Markdown file below `settings.import_path` into BookStack.
///
/// Errors before the walk starts (unreadable root, failing listings) abort the
/// run. Errors while processing a file are recorded in the report and the walk
/// continues with the next file.
pub fn run_import<A: BookStackApi>(settings: &ImportSettings, api: &mut A) -> Result<ImportReport> {
    let root = &settings.import_path;
    if !root.is_dir() {
        bail!("import path {} is not a directory", root.display());
    }
    let session = ImportSession::new(api, settings)?;
    session.run()
}

pub struct ImportSession<'a, A: BookStackApi> {
    api: &'a mut A,
    settings: &'a ImportSettings,
    cache: HierarchyCache,
    known_attachments: HashMap<(i64, String), Attachment>,
    report: ImportReport,
}

struct ImportedFile {
    page_id: i64,
    status: FileStatus,
    attachments: usize,
}

impl<'a, A: BookStackApi> ImportSession<'a, A> {
    pub fn new(api: &'a mut A, settings: &'a ImportSettings) -> Result<Self> {
        let cache = HierarchyCache::load(&mut *api).context("failed to build BookStack cache")?;
        Ok(Self {
            api,
            settings,
            cache,
            known_attachments: HashMap::new(),
            report: ImportReport {
                import_path: settings.import_path.display().to_string(),
                ..Default::default()
            },
        })
    }

    pub fn run(mut self) -> Result<ImportReport> {
        let settings = self.settings;
        let root = settings.import_path.as_path();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.depth() > 0
                    && entry.file_type().is_dir()
                    && settings
                        .skip_dirs
                        .iter()
                        .any(|skip| entry.file_name() == skip.as_str()))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(walk_error) => {
                    let relative = walk_error
                        .path()
                        .map(|path| display_relative(root, path))
                        .unwrap_or_default();
                    warn!("failed to walk {relative}: {walk_error}");
                    self.record_failure(relative, format!("failed to walk: {walk_error}"));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !is_markdown(path) {
                debug!("skipping {}", path.display());
                self.report.skipped_files += 1;
                continue;
            }

            self.report.discovered_files += 1;
            let relative = path.strip_prefix(root).unwrap_or(path);
            self.import_file(path, relative);
        }

        self.report.request_count = self.api.request_count();
        info!(
            "imported {} of {} files ({} failed)",
            self.report.imported_files, self.report.discovered_files, self.report.failed_files
        );
        Ok(self.report)
    }

    fn import_file(&mut self, path: &Path, relative: &Path) {
        let relative_path = display_relative(Path::new(""), relative);
        info!("importing {relative_path}");

        match self.process_file(path, relative, &relative_path) {
            Ok(imported) => {
                self.report.imported_files += 1;
                match imported.status {
                    FileStatus::Created => self.report.created_pages += 1,
                    _ => self.report.updated_pages += 1,
                }
                self.report.files.push(FileOutcome {
                    relative_path,
                    status: imported.status,
                    page_id: Some(imported.page_id),
                    attachments: imported.attachments,
                    error: None,
                });
            }
            Err(file_error) => {
                error!("failed to import {relative_path}: {file_error:#}");
                self.record_failure(relative_path, format!("{file_error:#}"));
            }
        }
    }

    fn record_failure(&mut self, relative_path: String, message: String) {
        self.report.failed_files += 1;
        self.report.files.push(FileOutcome {
            relative_path,
            status: FileStatus::Failed,
            page_id: None,
            attachments: 0,
            error: Some(message),
        });
    }

    fn process_file(
        &mut self,
        path: &Path,
        relative: &Path,
        relative_path: &str,
    ) -> Result<ImportedFile> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let content = strip_header(&raw);
        let content = if self.settings.normalize_arrows {
            normalize_arrows(content)
        } else {
            content.to_vec()
        };

        let location = page_location(relative).context("get page ID")?;
        let (chapter_id, is_new) = self
            .resolve_chapter(&location)
            .context("get page ID")?;
        let page_id = self
            .cache
            .get_or_create_page_id(&mut *self.api, &location.page, chapter_id)
            .context("get page ID")?;

        let mut uploader = PageUploader {
            api: &mut *self.api,
            page_id,
            known: if self.settings.dedup_attachments {
                Some(&mut self.known_attachments)
            } else {
                None
            },
            uploaded: 0,
            reused: 0,
        };
        let rewritten = rewrite_images(&content, path, &mut uploader)
            .context("replace images")
            .and_then(|content| {
                rewrite_embeds(&content, path, &mut uploader).context("replace embeds")
            });
        let attachments = uploader.uploaded + uploader.reused;
        self.report.uploaded_attachments += uploader.uploaded;
        self.report.reused_attachments += uploader.reused;
        let content = rewritten?;

        let links = find_internal_links(&content, &self.settings.internal_link_schemes)
            .context("replace internal links")?;
        self.report
            .internal_links
            .extend(links.into_iter().map(|link| ReportedLink {
                relative_path: relative_path.to_string(),
                label: link.label,
                target: link.target,
            }));

        let markdown = String::from_utf8(content)
            .context("page content is not valid UTF-8")
            .context("upsert page")?;
        let (page, action) = self
            .cache
            .get_or_create_page(&mut *self.api, &location.page, chapter_id, &markdown)
            .context("upsert page")?;

        let status = if is_new || action == Upsert::Created {
            FileStatus::Created
        } else {
            FileStatus::Updated
        };
        Ok(ImportedFile {
            page_id: page.id,
            status,
            attachments,
        })
    }

    /// Returns the chapter id and whether the page is unknown to the server yet.
    fn resolve_chapter(&mut self, location: &PageLocation) -> Result<(i64, bool)> {
        let book = self
            .cache
            .get_or_create_book(&mut *self.api, &location.book)?;
        let chapter = self
            .cache
            .get_or_create_chapter(&mut *self.api, &location.chapter, book.id)?;
        let is_new = self.cache.page(chapter.id, &location.page).is_none();
        Ok((chapter.id, is_new))
    }
}

/// Uploads attachments for one page, optionally reusing identical files.
struct PageUploader<'s, A: BookStackApi> {
    api: &'s mut A,
    page_id: i64,
    known: Option<&'s mut HashMap<(i64, String), Attachment>>,
    uploaded: usize,
    reused: usize,
}

impl<A: BookStackApi> AttachmentUploader for PageUploader<'_, A> {
    fn upload(&mut self, path: &Path) -> Result<Attachment> {
        let key = match self.known {
            Some(_) => Some((self.page_id, file_digest(path)?)),
            None => None,
        };
        if let (Some(known), Some(key)) = (self.known.as_deref(), key.as_ref())
            && let Some(existing) = known.get(key)
        {
            debug!(
                "reusing attachment {} for {}",
                existing.id,
                path.display()
            );
            self.reused += 1;
            return Ok(existing.clone());
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("uploading {} to page {}", path.display(), self.page_id);
        let attachment = self.api.upload_attachment(self.page_id, &name, path)?;
        self.uploaded += 1;

        if let (Some(known), Some(key)) = (self.known.as_deref_mut(), key) {
            known.insert(key, attachment.clone());
        }
        Ok(attachment)
    }
}

fn file_digest(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Split a root-relative path into book, chapter and page name.
///
/// Both `/` and `\` separate segments. Everything below the chapter forms the
/// page name, joined with `/`, without its `.md` extension.
pub fn page_location(relative: &Path) -> Result<PageLocation> {
    let text = relative.to_string_lossy();
    let segments: Vec<&str> = text
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.len() < 3 {
        bail!("{text} is not nested as <book>/<chapter>/<page>.md");
    }

    let page = segments[2..].join("/");
    let page = match page.len().checked_sub(3).and_then(|cut| page.get(cut..)) {
        Some(extension) if extension.eq_ignore_ascii_case(".md") => {
            page[..page.len() - 3].to_string()
        }
        _ => page,
    };
    Ok(PageLocation {
        book: segments[0].to_string(),
        chapter: segments[1].to_string(),
        page,
    })
}

/// Drop everything up to the first `---` and the two bytes after it.
pub fn strip_header(content: &[u8]) -> &[u8] {
    match find_marker(content, 0, HEADER_MARKER) {
        Some(last) => &content[(last + 1 + HEADER_TRAILING_BYTES).min(content.len())..],
        None => content,
    }
}

pub fn normalize_arrows(content: &[u8]) -> Vec<u8> {
    let from = EXPORTED_ARROW.as_bytes();
    let mut output = Vec::with_capacity(content.len());
    let mut index = 0;
    while index < content.len() {
        if content[index..].starts_with(from) {
            output.extend_from_slice(ARROW.as_bytes());
            index += from.len();
        } else {
            output.push(content[index]);
            index += 1;
        }
    }
    output
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("md"))
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
