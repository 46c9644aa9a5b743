//! The remote (HTTP) document source.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use anyhow::Context;
use anyhow::anyhow;
use indexmap::IndexMap;
use oas_tree::NodeArena;
use oas_tree::load_source;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::runtime::Handle;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::ContentType;
use crate::Document;
use crate::ErrorKind;
use crate::IndexConfig;
use crate::IndexError;
use crate::detect;
use crate::source::OpenResult;
use crate::source::SingleFlight;

/// The per-request timeout for remote fetches, in seconds.
const TIMEOUT_IN_SECS: u64 = 30;

/// The maximum number of fetch attempts per URL.
const MAX_ATTEMPTS: u32 = 3;

/// A fetched remote response.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body.
    pub body: String,
    /// The raw `Last-Modified` header value, if present.
    pub last_modified: Option<String>,
}

/// Fetches remote documents for a remote source.
pub trait RemoteHandler: fmt::Debug + Send + Sync {
    /// Fetches the document at the given URL.
    ///
    /// Transport failures are errors; HTTP error statuses are returned in
    /// the response so the caller can decide whether to retry.
    fn fetch(&self, url: &Url) -> anyhow::Result<RemoteResponse>;
}

/// The default remote handler, fetching over HTTP with a shared client.
///
/// Requests run on the provided tokio runtime; the calling worker blocks
/// until the response body has been read.
#[derive(Debug)]
pub struct HttpRemoteHandler {
    /// The tokio runtime requests are made on.
    handle: Handle,
    /// The HTTP client requests are made with.
    client: Client,
}

impl HttpRemoteHandler {
    /// Constructs a new handler on the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            client: Client::new(),
        }
    }
}

impl RemoteHandler for HttpRemoteHandler {
    fn fetch(&self, url: &Url) -> anyhow::Result<RemoteResponse> {
        info!("downloading document from `{url}`");

        self.handle.block_on(async {
            let resp = self
                .client
                .get(url.as_str())
                .timeout(Duration::from_secs(TIMEOUT_IN_SECS))
                .send()
                .await?;

            let status = resp.status().as_u16();
            let last_modified = resp
                .headers()
                .get(reqwest::header::LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .map(String::from);

            let body = resp.text().await.context("failed to read response body")?;
            Ok(RemoteResponse {
                status,
                body,
                last_modified,
            })
        })
    }
}

/// A document source fetching over HTTP.
///
/// Documents are keyed by their full URL (fragment stripped); concurrent
/// opens of the same URL are single-flighted, and content-type detection
/// results are cached per URL.
#[derive(Debug)]
pub struct RemoteSource {
    /// The configuration of the owning rolodex.
    config: Arc<IndexConfig>,
    /// The shared node arena documents are parsed into.
    arena: Arc<RwLock<NodeArena>>,
    /// The handler fetches go through.
    handler: Arc<dyn RemoteHandler>,
    /// Opened documents by URL.
    documents: RwLock<IndexMap<String, Arc<Document>>>,
    /// In-progress opens by URL.
    flights: SingleFlight,
    /// Content-type detection results by URL.
    detection_cache: RwLock<HashMap<String, ContentType>>,
}

impl RemoteSource {
    /// Constructs a new remote source.
    ///
    /// When the configuration carries no `remote_handler`, a default
    /// HTTP handler is built on the current tokio runtime; constructing a
    /// handler-less source outside a runtime is an error.
    pub fn new(
        config: Arc<IndexConfig>,
        arena: Arc<RwLock<NodeArena>>,
    ) -> anyhow::Result<Self> {
        let handler = match config.remote_handler.clone() {
            Some(handler) => handler,
            None => Arc::new(HttpRemoteHandler::new(
                Handle::try_current()
                    .context("a tokio runtime is required for the default remote handler")?,
            )) as Arc<dyn RemoteHandler>,
        };

        Ok(Self {
            config,
            arena,
            handler,
            documents: RwLock::new(IndexMap::new()),
            flights: SingleFlight::default(),
            detection_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Gets every document the source has opened.
    pub fn documents(&self) -> Vec<Arc<Document>> {
        self.documents.read().values().cloned().collect()
    }

    /// Gets an already-opened document by URL.
    pub fn document(&self, key: &str) -> Option<Arc<Document>> {
        self.documents.read().get(key).cloned()
    }

    /// Opens a document by URL.
    pub fn open(&self, location: &str) -> OpenResult {
        let url = self.rewrite(location).map_err(Arc::new)?;
        let key = url.to_string();

        if let Some(document) = self.document(&key) {
            return Ok(document);
        }

        self.flights.run(&key, || {
            if let Some(document) = self.document(&key) {
                return Ok(document);
            }

            let document = self.fetch_document(&url, &key)?;
            self.documents
                .write()
                .insert(key.clone(), document.clone());
            Ok(document)
        })
    }

    /// Rewrites an inbound location against the configured base URL.
    ///
    /// The scheme and host of the base replace those of the location; the
    /// location's path is preserved.
    fn rewrite(&self, location: &str) -> Result<Url, IndexError> {
        let mut url = Url::parse(location).map_err(|e| {
            IndexError::new(
                ErrorKind::DocumentOpenFailed,
                format!("invalid document URL `{location}`: {e}"),
            )
        })?;
        url.set_fragment(None);

        if let Some(base) = &self.config.base_url {
            url.set_scheme(base.scheme()).map_err(|()| {
                IndexError::new(
                    ErrorKind::DocumentOpenFailed,
                    format!("cannot rewrite scheme of `{location}`"),
                )
            })?;
            url.set_host(base.host_str()).map_err(|e| {
                IndexError::new(
                    ErrorKind::DocumentOpenFailed,
                    format!("cannot rewrite host of `{location}`: {e}"),
                )
            })?;
            url.set_port(base.port()).ok();
        }

        Ok(url)
    }

    /// Fetches, detects and parses a document.
    fn fetch_document(&self, url: &Url, key: &str) -> Result<Arc<Document>, Arc<IndexError>> {
        let response = self.fetch_with_retry(url).map_err(Arc::new)?;

        let content_type = match self.detection_cache.read().get(key).copied() {
            Some(cached) => cached,
            None => {
                let detected = detect(
                    url.path(),
                    &response.body,
                    self.config.allow_unknown_extension_content_detection,
                );
                self.detection_cache
                    .write()
                    .insert(key.to_string(), detected);
                detected
            }
        };

        if content_type == ContentType::Unsupported {
            // Drop the negative entry so the error is observed without
            // polluting the positive cache.
            self.detection_cache.write().remove(key);
            return Err(Arc::new(IndexError::new(
                ErrorKind::DocumentUnsupported,
                format!("remote document `{key}` is not YAML or JSON"),
            )));
        }

        let last_modified = response.last_modified.as_deref().map(|raw| {
            parse_http_date(raw).unwrap_or_else(|| {
                warn!("unparseable Last-Modified `{raw}` for `{key}`");
                SystemTime::now()
            })
        });

        let line_count = response.body.lines().count();

        // Parse outside the shared arena's write lock; absorbing the
        // scratch arena is a short move.
        let mut scratch = NodeArena::new();
        let root = load_source(&mut scratch, &response.body).map_err(|e| {
            Arc::new(
                IndexError::new(
                    ErrorKind::IndexingFailure,
                    format!("unable to parse remote document `{key}`: {e}"),
                )
                .with_position(e.line(), e.column()),
            )
        })?;
        let root = self.arena.write().absorb(scratch, root);

        debug!("opened remote document `{key}` ({line_count} lines)");
        Ok(Arc::new(Document::new(
            key,
            content_type,
            root,
            line_count,
            last_modified,
        )))
    }

    /// Fetches a URL with up to three attempts.
    ///
    /// Network failures and server-side error statuses retry; a 4xx status
    /// fails immediately. Cancellation is honored between attempts.
    fn fetch_with_retry(&self, url: &Url) -> Result<RemoteResponse, IndexError> {
        let mut last: Option<anyhow::Error> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if self.config.cancellation.is_cancelled() {
                return Err(IndexError::new(
                    ErrorKind::DocumentOpenFailed,
                    format!("fetch of `{url}` cancelled"),
                ));
            }

            match self.handler.fetch(url) {
                Ok(response) if (200..300).contains(&response.status) => return Ok(response),
                Ok(response) if (400..500).contains(&response.status) => {
                    return Err(IndexError::new(
                        ErrorKind::DocumentOpenFailed,
                        format!(
                            "server returned HTTP status {status} for `{url}`",
                            status = response.status
                        ),
                    ));
                }
                Ok(response) => {
                    warn!(
                        "attempt {attempt} for `{url}` returned HTTP status {status}",
                        status = response.status
                    );
                    last = Some(anyhow!("server returned HTTP status {}", response.status));
                }
                Err(e) => {
                    warn!("attempt {attempt} for `{url}` failed: {e:#}");
                    last = Some(e);
                }
            }
        }

        let mut error = IndexError::new(
            ErrorKind::DocumentOpenFailed,
            format!("unable to fetch `{url}` after {MAX_ATTEMPTS} attempts"),
        );
        if let Some(e) = last {
            error = error.with_source(e);
        }
        Err(error)
    }
}

/// Parses an HTTP-date per RFC 7231: the IMF fixdate plus the two obsolete
/// forms.
pub fn parse_http_date(raw: &str) -> Option<SystemTime> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split_whitespace().collect();

    let (day, month, year, time) = match parts.as_slice() {
        // IMF-fixdate: `Sun, 06 Nov 1994 08:49:37 GMT`
        [_, day, month, year, time, "GMT"] => {
            (day.parse().ok()?, *month, year.parse().ok()?, *time)
        }
        // RFC 850: `Sunday, 06-Nov-94 08:49:37 GMT`
        [_, date, time, "GMT"] => {
            let mut pieces = date.split('-');
            let day = pieces.next()?.parse().ok()?;
            let month = pieces.next()?;
            let year: i64 = pieces.next()?.parse().ok()?;
            // Two-digit years pivot at 1970 per the usual convention.
            let year = if year < 70 { year + 2000 } else { year + 1900 };
            (day, month, year, *time)
        }
        // asctime: `Sun Nov  6 08:49:37 1994`
        [_, month, day, time, year] => {
            (day.parse().ok()?, *month, year.parse().ok()?, *time)
        }
        _ => return None,
    };

    let month = match month {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };

    let mut clock = time.split(':');
    let hour: u64 = clock.next()?.parse().ok()?;
    let minute: u64 = clock.next()?.parse().ok()?;
    let second: u64 = clock.next()?.parse().ok()?;
    if hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    let days = days_from_civil(year, month, day)?;
    let seconds = u64::try_from(days).ok()? * 86_400 + hour * 3_600 + minute * 60 + second;
    SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(seconds))
}

/// Computes days since the Unix epoch for a civil date.
fn days_from_civil(year: i64, month: u32, day: u32) -> Option<i64> {
    if !(1..=31).contains(&day) {
        return None;
    }

    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp as i64 + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + doe - 719_468)
}
