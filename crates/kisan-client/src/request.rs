//! Request specifications and replay bookkeeping

use transport::{Bytes, HeaderMap, HeaderName, HeaderValue, Method, header};

use crate::error::{Error, Result};

/// What the caller wants sent: method, path, headers, body.
///
/// `path` is joined onto the client's API base unless it is already an
/// absolute `http(s)://` URL. Any `Authorization` header is replaced by the
/// client's own bearer credential, or removed when none is stored.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("header value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json<T: serde::Serialize>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("serializing body: {e}")))?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Bytes::from(body);
        Ok(self)
    }

    /// Resolve `path` against `base`.
    pub(crate) fn url(&self, base: &str) -> String {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return self.path.clone();
        }
        let base = base.trim_end_matches('/');
        if self.path.is_empty() {
            base.to_string()
        } else if self.path.starts_with('/') {
            format!("{base}{}", self.path)
        } else {
            format!("{base}/{}", self.path)
        }
    }
}

/// A spec travelling through the call chain with its retry marker.
///
/// The marker is set once, when the request is handed to the refresh path;
/// the spec itself is never mutated.
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub spec: RequestSpec,
    pub retried: bool,
}

impl Attempt {
    pub fn first(spec: RequestSpec) -> Self {
        Self {
            spec,
            retried: false,
        }
    }

    pub fn into_retry(self) -> Self {
        Self {
            spec: self.spec,
            retried: true,
        }
    }
}
