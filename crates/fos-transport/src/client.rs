//! Transports
//!
//! HTTP via a blocking reqwest client, local files, and a scheme router
//! that picks between them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Response, Transport, TransportError};

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent string
    pub user_agent: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// Max redirects to follow (0 = disable)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "fOS-Engine/0.1".into(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_redirects: 10,
        }
    }
}

/// HTTP(S) transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let redirect = if config.max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(config.max_redirects)
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(redirect)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str) -> Result<Response, TransportError> {
        tracing::info!("HTTP GET {}", url);

        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp
            .bytes()
            .map_err(|e| TransportError::Network(e.to_string()))?
            .to_vec();

        tracing::debug!("HTTP {} {} ({} bytes)", status, url, body.len());

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// Local file transport
///
/// Accepts `file://` URLs and plain paths. A missing file is reported as a
/// 404 response rather than an error, like a web server would.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    fn read(path: &Path) -> Result<Response, TransportError> {
        match std::fs::read(path) {
            Ok(body) => Ok(Response::ok(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Response::with_status(404)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for FileTransport {
    fn fetch(&self, url: &str) -> Result<Response, TransportError> {
        match Url::parse(url) {
            Ok(parsed) => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
                Self::read(&path)
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => Self::read(Path::new(url)),
            Err(e) => Err(TransportError::InvalidUrl(format!("{url}: {e}"))),
        }
    }
}

/// Routes `http`/`https` to [`HttpTransport`] and `file` or bare paths to
/// [`FileTransport`]
#[derive(Debug, Clone)]
pub struct DefaultTransport {
    http: HttpTransport,
    file: FileTransport,
}

impl DefaultTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            file: FileTransport,
        })
    }
}

impl Transport for DefaultTransport {
    fn fetch(&self, url: &str) -> Result<Response, TransportError> {
        match Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "http" | "https" => self.http.fetch(url),
                "file" => self.file.fetch(url),
                other => Err(TransportError::UnsupportedScheme(other.to_string())),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => self.file.fetch(url),
            Err(e) => Err(TransportError::InvalidUrl(format!("{url}: {e}"))),
        }
    }
}
