//! reqwest-backed [`Connector`] used by default for profiling requests.

use crate::connection::{Connection, Connector, RawResponse};
use crate::error::ProfileError;
use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Opens [`HttpConnection`]s with a blocking reqwest client.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    type Connection = HttpConnection;

    fn connect(
        &self,
        host: &str,
        port: u16,
        read_timeout: Duration,
    ) -> Result<HttpConnection, ProfileError> {
        let addr = format!("{host}:{port}");
        let base_url = Url::parse(&format!("http://{addr}/"))
            .map_err(|e| ProfileError::connection(&addr, e.to_string()))?;

        let client = Client::builder()
            .timeout(read_timeout)
            .build()
            .map_err(|e| ProfileError::connection(&addr, e.to_string()))?;

        debug!(%addr, ?read_timeout, "opened profiling connection");
        Ok(HttpConnection {
            client: Some(client),
            base_url,
            addr,
        })
    }
}

/// A connection to the target server. Finishing it drops the client, after
/// which every request fails with [`ProfileError::ConnectionFinished`].
#[derive(Debug)]
pub struct HttpConnection {
    client: Option<Client>,
    base_url: Url,
    addr: String,
}

impl HttpConnection {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `host:port` of the target.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Start a request to `path` on the target.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::ConnectionFinished` after [`finish`](Connection::finish),
    /// or `ProfileError::Request` if `path` does not form a valid URL.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProfileError> {
        let client = self.client.as_ref().ok_or(ProfileError::ConnectionFinished)?;
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ProfileError::Request(format!("invalid path '{path}': {e}")))?;
        Ok(client.request(method, url))
    }

    /// Shorthand for a `GET` [`request`](Self::request).
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub fn get(&self, path: &str) -> Result<RequestBuilder, ProfileError> {
        self.request(Method::GET, path)
    }

    /// Send a request and read the full response.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Connection` if the server refuses the
    /// connection, `ProfileError::Timeout` once the read timeout elapses, and
    /// `ProfileError::Request` for anything else reqwest reports.
    pub fn send(&self, request: RequestBuilder) -> Result<RawResponse, ProfileError> {
        if self.client.is_none() {
            return Err(ProfileError::ConnectionFinished);
        }

        let response = request.send().map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();

        // Non-UTF-8 values are kept lossily so a malformed header still
        // counts as present.
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response.text().map_err(|e| self.map_error(e))?;
        let mut raw = RawResponse::new(status, body);
        for (name, value) in headers {
            raw.insert_header(name, value);
        }
        Ok(raw)
    }

    fn map_error(&self, err: reqwest::Error) -> ProfileError {
        match ProfileError::from(err) {
            ProfileError::Connection { reason, .. } => ProfileError::Connection {
                addr: self.addr.clone(),
                reason,
            },
            ProfileError::Timeout { .. } => ProfileError::Timeout {
                addr: self.addr.clone(),
            },
            other => other,
        }
    }
}

impl Connection for HttpConnection {
    fn finish(&mut self) {
        if self.client.take().is_some() {
            debug!(addr = %self.addr, "closed profiling connection");
        }
    }

    fn is_finished(&self) -> bool {
        self.client.is_none()
    }
}
