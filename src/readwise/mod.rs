//! Readwise Export Client
//!
//! Pulls highlights out of the Readwise export API (`/api/v2/export/`). The export
//! is paginated: every response carries a `nextPageCursor` that has to be sent back
//! until it comes back empty.
//!
//! # Usage
//!
//! ```rust,ignore
//! use futures_util::TryStreamExt;
//! use readpress::readwise::{self, ReadwiseClient};
//!
//! let client = ReadwiseClient::new(&cfg.readwise)?;
//! let pages: Vec<_> = readwise::pages(&client, &token, "1970-01-01T00:00:00Z")
//!     .try_collect()
//!     .await?;
//! ```

pub mod model;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, stream};
use reqwest::{Client, StatusCode, header};

use crate::config::Readwise;
use crate::error::SyncError;

pub use model::{Book, Category, ExportPage, Highlight, Tag};

const EXPORT_PATH: &str = "/api/v2/export/";

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches a single page of highlights updated after `since`.
    async fn fetch(
        &self,
        token: &str,
        since: &str,
        cursor: Option<&str>,
    ) -> Result<ExportPage, SyncError>;
}

pub struct ReadwiseClient {
    client: Client,
    base_url: String,
}

impl ReadwiseClient {
    pub fn new(cfg: &Readwise) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn export_url(&self) -> String {
        format!("{}{}", self.base_url, EXPORT_PATH)
    }
}

#[async_trait]
impl PageSource for ReadwiseClient {
    async fn fetch(
        &self,
        token: &str,
        since: &str,
        cursor: Option<&str>,
    ) -> Result<ExportPage, SyncError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::missing_token());
        }

        let mut query = vec![("updatedAfter", since)];
        if let Some(cursor) = cursor {
            query.push(("pageCursor", cursor));
        }

        tracing::debug!(since, cursor, "fetching readwise export page");
        let response = self
            .client
            .get(self.export_url())
            .header(header::AUTHORIZATION, format!("Token {}", token))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Auth(format!(
                "Readwise rejected the access token ({})",
                status
            )));
        }

        let body = response.error_for_status()?.text().await?;
        let page: ExportPage = serde_json::from_str(&body)?;
        Ok(page)
    }
}

/// Lazily walks the export, one request per page, until the cursor runs out.
///
/// The stream yields the first error it hits and ends there.
pub fn pages<'a>(
    source: &'a dyn PageSource,
    token: &'a str,
    since: &'a str,
) -> impl Stream<Item = Result<ExportPage, SyncError>> + Send + 'a {
    // `Some(cursor)` means there is a page left to request.
    stream::try_unfold(Some(None::<String>), move |next| async move {
        let Some(cursor) = next else {
            return Ok::<_, SyncError>(None);
        };

        let page = source.fetch(token, since, cursor.as_deref()).await?;
        let following = page.next_cursor().map(|c| Some(c.to_string()));
        Ok::<_, SyncError>(Some((page, following)))
    })
}
