//! Byte retrieval for document references
//!
//! [`Fetcher`] is the network capability the loaders and the download
//! orchestrator depend on. [`ReqwestFetcher`] serves `http(s)` through
//! reqwest, decodes `data:` payloads in place, and reads `file://` URLs or
//! bare paths from disk.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use log::debug;
use url::Url;

/// Public relay used when no endpoint is configured
pub const DEFAULT_RELAY_ENDPOINT: &str = "https://cors-anywhere.herokuapp.com";

const USER_AGENT: &str = concat!("doccompare/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to fetch {url}: {detail}")]
    Transport { url: String, detail: String },

    #[error("Failed to fetch {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to fetch {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("Malformed data URL: {0}")]
    DataUrl(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    /// Whether ambient credentials (cookies, auth) may be attached
    pub credentials: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: Vec::new(),
            credentials: true,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_for_status(self, url: &str) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve a reference. Non-2xx statuses are returned, not raised.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;

    /// Reachability check without credentials; any response counts as reachable
    async fn probe(&self, url: &str) -> Result<(), FetchError> {
        self.fetch(FetchRequest::head(url).without_credentials())
            .await
            .map(|_| ())
    }
}

pub fn is_remote(reference: &str) -> bool {
    let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// True when `reference` is remote and served by a host other than `origin_host`.
///
/// Only host names are compared; scheme and port are ignored. Without an
/// origin every remote reference counts as cross-host.
pub fn is_cross_host(reference: &str, origin_host: Option<&str>) -> bool {
    if !is_remote(reference) {
        return false;
    }
    let Some(origin) = origin_host else {
        return true;
    };
    Url::parse(reference)
        .ok()
        .and_then(|url| url.host_str().map(|host| !host.eq_ignore_ascii_case(origin)))
        .unwrap_or(false)
}

/// Route `reference` through a relay endpoint
pub fn relay_url(relay: &str, reference: &str) -> String {
    format!("{}/{}", relay.trim_end_matches('/'), reference)
}

/// Decode a `data:[<media type>][;base64],<payload>` reference
pub fn decode_data_url(reference: &str) -> Result<FetchResponse, FetchError> {
    let payload = reference
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::DataUrl("missing data: prefix".to_string()))?;
    let (meta, data) = payload
        .split_once(',')
        .ok_or_else(|| FetchError::DataUrl("missing ',' separator".to_string()))?;

    let (media, is_base64) = match meta.strip_suffix(";base64") {
        Some(media) => (media, true),
        None => (meta, false),
    };

    let body = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| FetchError::DataUrl(e.to_string()))?
    } else {
        urlencoding::decode_binary(data.as_bytes()).into_owned()
    };

    let media = media
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("text/plain");

    Ok(FetchResponse {
        status: 200,
        content_type: Some(media.to_string()),
        body,
    })
}

fn local_path(reference: &str) -> Option<PathBuf> {
    if reference.starts_with("file:") {
        Url::parse(reference).ok()?.to_file_path().ok()
    } else if is_remote(reference) || reference.starts_with("data:") {
        None
    } else {
        Some(PathBuf::from(reference))
    }
}

/// reqwest-backed [`Fetcher`]. The client keeps no cookie store, so requests
/// never carry ambient credentials.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: request.url.clone(),
            detail: e.to_string(),
        };

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = match request.method {
            Method::Head => Vec::new(),
            Method::Get => response.bytes().await.map_err(transport)?.to_vec(),
        };

        debug!(
            "{:?} {} -> {status} ({} bytes)",
            request.method,
            request.url,
            body.len()
        );

        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        if request.url.starts_with("data:") {
            return decode_data_url(&request.url);
        }

        if let Some(path) = local_path(&request.url) {
            let io_err = |source| FetchError::Io {
                url: request.url.clone(),
                source,
            };
            let body = match request.method {
                Method::Head => {
                    tokio::fs::metadata(&path).await.map_err(io_err)?;
                    Vec::new()
                }
                Method::Get => tokio::fs::read(&path).await.map_err(io_err)?,
            };
            return Ok(FetchResponse::ok(body));
        }

        self.fetch_http(request).await
    }
}
