use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_HEADER_NAME_LENGTH: usize = 256;
pub const MAX_HEADER_VALUE_LENGTH: usize = 8192;
pub const MAX_HEADERS_COUNT: usize = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("too many headers: {count} exceeds maximum of {max}")]
    TooManyHeaders { count: usize, max: usize },

    #[error("connection failed to {url}: {message}")]
    Connection { url: String, message: String },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("network unavailable")]
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// Only `GET` responses are stored in or served from the offline cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Method::Get)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive insert; replaces an existing header of the same name.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), NetworkError> {
        let name = name.into();
        let value = value.into();

        Self::validate_header_name(&name)?;
        Self::validate_header_value(&name, &value)?;

        let name_lower = name.to_lowercase();
        self.headers.retain(|(n, _)| n.to_lowercase() != name_lower);

        if self.headers.len() >= MAX_HEADERS_COUNT {
            return Err(NetworkError::TooManyHeaders {
                count: self.headers.len() + 1,
                max: MAX_HEADERS_COUNT,
            });
        }
        self.headers.push((name, value));

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| n.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn into_vec(self) -> Vec<(String, String)> {
        self.headers
    }

    fn validate_header_name(name: &str) -> Result<(), NetworkError> {
        if name.is_empty() {
            return Err(NetworkError::InvalidHeader {
                name: name.to_string(),
                reason: "header name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_HEADER_NAME_LENGTH {
            return Err(NetworkError::InvalidHeader {
                name: name.chars().take(50).collect::<String>() + "...",
                reason: format!("header name exceeds maximum length of {MAX_HEADER_NAME_LENGTH} bytes"),
            });
        }

        if let Some(c) = name
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(NetworkError::InvalidHeader {
                name: name.to_string(),
                reason: format!("invalid character '{c}' in header name"),
            });
        }

        Ok(())
    }

    fn validate_header_value(name: &str, value: &str) -> Result<(), NetworkError> {
        if value.len() > MAX_HEADER_VALUE_LENGTH {
            return Err(NetworkError::InvalidHeader {
                name: name.to_string(),
                reason: format!("header value exceeds maximum length of {MAX_HEADER_VALUE_LENGTH} bytes"),
            });
        }

        if value.chars().any(|c| c == '\r' || c == '\n' || c == '\0') {
            return Err(NetworkError::InvalidHeader {
                name: name.to_string(),
                reason: "header value contains invalid characters (CR, LF, or NULL)".to_string(),
            });
        }

        Ok(())
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
}

impl Request {
    pub fn get(url: &str) -> Result<Self, NetworkError> {
        Ok(Self {
            method: Method::Get,
            url: parse_url(url)?,
            headers: Headers::new(),
        })
    }

    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url, NetworkError> {
    if url.len() > MAX_URL_LENGTH {
        return Err(NetworkError::InvalidUrl {
            url: url.chars().take(100).collect::<String>() + "...",
            reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
        });
    }
    Url::parse(url).map_err(|e| NetworkError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Platform fetch. Concurrent calls may complete in any order.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}
