//! # Connection Seam
//!
//! Profiling hands an open [`Connection`] to a caller-supplied callback that
//! issues the actual request. The traits here keep the transport swappable
//! (the default is [`HttpConnector`](crate::http::HttpConnector)) and
//! [`ConnectionGuard`] guarantees the connection is finished exactly once,
//! whether the callback returns, fails, panics, or finishes it itself.

use crate::error::ProfileError;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// An open connection to the target server.
pub trait Connection {
    /// Close the connection. Later requests on it fail.
    fn finish(&mut self);

    fn is_finished(&self) -> bool;
}

/// Opens connections to the target server.
pub trait Connector {
    type Connection: Connection;

    /// Open a connection to `host:port`, bounding reads by `read_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Connection` if the connection cannot be set up.
    fn connect(
        &self,
        host: &str,
        port: u16,
        read_timeout: Duration,
    ) -> Result<Self::Connection, ProfileError>;
}

/// Finishes the wrapped connection when dropped, unless it already was.
#[derive(Debug)]
pub struct ConnectionGuard<C: Connection> {
    connection: C,
}

impl<C: Connection> ConnectionGuard<C> {
    pub fn new(connection: C) -> Self {
        Self { connection }
    }
}

impl<C: Connection> Deref for ConnectionGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C: Connection> DerefMut for ConnectionGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

impl<C: Connection> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        if !self.connection.is_finished() {
            self.connection.finish();
        }
    }
}

/// Status, headers and body of a response, as handed back by the callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    status: u16,
    /// Keyed by lowercased header name
    headers: BTreeMap<String, String>,
    body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Add a header. Names are case-insensitive; a repeated name replaces
    /// the earlier value.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn insert_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}
