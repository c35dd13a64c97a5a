use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::{Method, StatusCode};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ClientSettings;
use crate::model::{
    Attachment, Book, Chapter, CreateBookRequest, CreateChapterRequest, CreatePageRequest,
    Listing, Page, UpdatePageRequest,
};

const LISTING_PAGE_SIZE: usize = 500;
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Remote operations the importer needs from a BookStack instance.
pub trait BookStackApi {
    fn list_books(&mut self) -> Result<Vec<Book>>;
    fn list_chapters(&mut self) -> Result<Vec<Chapter>>;
    fn list_pages(&mut self) -> Result<Vec<Page>>;
    fn create_book(&mut self, name: &str) -> Result<Book>;
    fn create_chapter(&mut self, book_id: i64, name: &str) -> Result<Chapter>;
    fn create_page(&mut self, chapter_id: i64, name: &str, markdown: &str) -> Result<Page>;
    fn update_page(&mut self, page_id: i64, markdown: &str) -> Result<Page>;
    fn upload_attachment(&mut self, page_id: i64, name: &str, path: &Path) -> Result<Attachment>;
    fn request_count(&self) -> usize;
}

pub struct BookStackClient {
    client: Client,
    settings: ClientSettings,
    request_count: usize,
}

impl BookStackClient {
    /// Build the client and probe `/api/docs.json` so bad URLs or credentials
    /// fail before any import work starts.
    pub fn connect(settings: ClientSettings) -> Result<Self> {
        let mut client = Self::new(settings)?;
        client.probe().with_context(|| {
            format!(
                "failed to reach BookStack API at {} (check BOOKSTACK_URL and token)",
                client.settings.base_url
            )
        })?;
        Ok(client)
    }

    pub fn new(settings: ClientSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build BookStack HTTP client")?;

        Ok(Self {
            client,
            settings,
            request_count: 0,
        })
    }

    pub fn probe(&mut self) -> Result<()> {
        let url = self.endpoint("/api/docs.json");
        let client = self.client.clone();
        self.send_with_retries(false, || client.get(&url))?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        join_endpoint(&self.settings.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", self.settings.authorization())
            .header("Accept", "application/json")
    }

    fn send_with_retries<F>(&mut self, is_write: bool, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_retries = if is_write {
            self.settings.max_write_retries
        } else {
            self.settings.max_retries
        };

        for attempt in 0..=max_retries {
            self.request_count += 1;
            let response = self.authorized(build()).send();
            match response {
                Ok(response) => {
                    let status = response.status();
                    if attempt < max_retries && is_retryable_status(status) {
                        warn!("BookStack answered HTTP {status}, retrying");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return ensure_success(response);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        warn!("BookStack request failed ({error}), retrying");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call BookStack API");
                }
            }
        }

        bail!("BookStack API request exhausted retry budget")
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .settings
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn get_json<T: DeserializeOwned>(&mut self, path: &str, what: &str) -> Result<T> {
        let url = self.endpoint(path);
        let client = self.client.clone();
        let response = self.send_with_retries(false, || client.get(&url))?;
        response
            .json()
            .with_context(|| format!("failed to decode {what} response"))
    }

    fn send_json<B, T>(&mut self, method: Method, path: &str, body: &B, what: &str) -> Result<T>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let client = self.client.clone();
        let response =
            self.send_with_retries(true, || client.request(method.clone(), &url).json(body))?;
        response
            .json()
            .with_context(|| format!("failed to decode {what} response"))
    }

    fn list_all<T: DeserializeOwned>(&mut self, entity: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            let path = format!(
                "/api/{entity}?count={LISTING_PAGE_SIZE}&offset={}",
                items.len()
            );
            let listing: Listing<T> = self.get_json(&path, &format!("{entity} listing"))?;
            let received = listing.data.len();
            items.extend(listing.data);
            debug!("listed {received} {entity} (total so far {})", items.len());

            if !listing_has_more(received, items.len(), listing.total) {
                break;
            }
        }
        Ok(items)
    }
}

impl BookStackApi for BookStackClient {
    fn list_books(&mut self) -> Result<Vec<Book>> {
        self.list_all("books").context("failed to list books")
    }

    fn list_chapters(&mut self) -> Result<Vec<Chapter>> {
        self.list_all("chapters").context("failed to list chapters")
    }

    fn list_pages(&mut self) -> Result<Vec<Page>> {
        self.list_all("pages").context("failed to list pages")
    }

    fn create_book(&mut self, name: &str) -> Result<Book> {
        self.send_json(
            Method::POST,
            "/api/books",
            &CreateBookRequest { name },
            "create book",
        )
        .with_context(|| format!("failed to create book {name:?}"))
    }

    fn create_chapter(&mut self, book_id: i64, name: &str) -> Result<Chapter> {
        self.send_json(
            Method::POST,
            "/api/chapters",
            &CreateChapterRequest { book_id, name },
            "create chapter",
        )
        .with_context(|| format!("failed to create chapter {name:?} in book {book_id}"))
    }

    fn create_page(&mut self, chapter_id: i64, name: &str, markdown: &str) -> Result<Page> {
        self.send_json(
            Method::POST,
            "/api/pages",
            &CreatePageRequest {
                chapter_id,
                name,
                markdown,
            },
            "create page",
        )
        .with_context(|| format!("failed to create page {name:?} in chapter {chapter_id}"))
    }

    fn update_page(&mut self, page_id: i64, markdown: &str) -> Result<Page> {
        self.send_json(
            Method::PUT,
            &format!("/api/pages/{page_id}"),
            &UpdatePageRequest { markdown },
            "update page",
        )
        .with_context(|| format!("failed to update page {page_id}"))
    }

    fn upload_attachment(&mut self, page_id: i64, name: &str, path: &Path) -> Result<Attachment> {
        // Form::file sets the part's file name and guesses its content type from the extension.
        let form = Form::new()
            .file("file", path)
            .with_context(|| format!("failed to open file to upload: {}", path.display()))?
            .text("uploaded_to", page_id.to_string())
            .text("name", name.to_string());

        // Multipart bodies are consumed on send, so uploads are never retried.
        self.request_count += 1;
        let request = self.authorized(self.client.post(self.endpoint("/api/attachments")));
        let response = request
            .multipart(form)
            .send()
            .context("failed to call BookStack API")?;
        ensure_success(response)?
            .json()
            .with_context(|| {
                format!("failed to decode attachment response for {}", path.display())
            })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Anything above 399 is a failure; the body is kept for diagnostics.
fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.as_u16() <= 399 {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    bail!(
        "BookStack API request failed with HTTP {status}: {}",
        truncate_body(&body)
    )
}

fn join_endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn listing_has_more(received: usize, collected: usize, total: Option<usize>) -> bool {
    if received == 0 {
        return false;
    }
    match total {
        Some(total) => collected < total,
        None => received >= LISTING_PAGE_SIZE,
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut output: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    output.push_str("...");
    output
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
