#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! A framework-agnostic facade for configuring and running a web server.
//!
//! Callers describe metadata, routes, router groups, middleware, exception
//! handlers, docs URLs and lifecycle hooks through the capability traits in
//! [`contracts`]. The selected backend adapter translates that configuration
//! into the wrapped framework's native primitives when the server starts.
//!
//! # Backends
//!
//! * `actix` - [`actix-web`](https://actix.rs) 4
//! * `axum` - [`axum`](https://github.com/tokio-rs/axum) 0.8 on a dedicated
//!   tokio runtime
//! * `simulator` - an in-process backend with no sockets, driven through
//!   [`WebServer::simulate`]

use std::{borrow::Cow, collections::BTreeMap};

use bytes::Bytes;

pub use webadapters_cors as cors;
pub use webadapters_http_models::{Method, StatusCode};

#[cfg(feature = "serde")]
pub use serde_querystring as qs;
#[cfg(feature = "openapi")]
pub use utoipa;

pub mod adapter;
pub mod application;
pub mod config;
pub mod contracts;
pub mod error;
pub mod exception;
pub mod facade;
pub mod handler;
pub mod middleware;
pub mod routing;
pub mod server;

#[cfg(feature = "actix")]
pub mod actix;
#[cfg(feature = "axum")]
pub mod axum;
#[cfg(feature = "openapi")]
pub mod openapi;
#[cfg(feature = "simulator")]
pub mod simulator;

pub use config::{Contact, DocsConfig, License, ServerConfig, ServerDescriptor, TagInfo};
pub use contracts::{BackendKind, Capability, ServerEvent, UnsupportedPolicy};
pub use error::ServerError;
pub use exception::ExceptionKey;
pub use facade::WebServer;
pub use handler::{Handler, HandlerFuture, IntoHandler};
pub use middleware::{Middleware, Next, RequestLogger};
pub use routing::{Dependency, Route, RouteOptions, RouterGroup, RouterGroupOptions};
pub use server::{ServerState, ServerTask, StopHandle};

/// A framework-neutral HTTP request.
///
/// Every backend translates its native request into this type before the
/// middleware chain runs, so handlers behave identically on all of them.
/// Header names are stored lower-cased.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    path: String,
    query_string: String,
    headers: BTreeMap<String, String>,
    path_params: BTreeMap<String, String>,
    body: Option<Bytes>,
    remote_addr: Option<String>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query_string: String::new(),
            headers: BTreeMap::new(),
            path_params: BTreeMap::new(),
            body: None,
            remote_addr: None,
        }
    }

    #[must_use]
    pub fn with_query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    #[cfg_attr(not(feature = "simulator"), allow(dead_code))]
    pub(crate) fn set_path_params(&mut self, params: BTreeMap<String, String>) {
        self.path_params = params;
    }
}

impl HttpRequest {
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    #[must_use]
    pub const fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path_params
    }

    #[must_use]
    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie")?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// # Errors
    ///
    /// * If the query string parsing fails
    #[cfg(feature = "serde")]
    pub fn parse_query<'a, T: serde::Deserialize<'a>>(&'a self) -> Result<T, qs::Error> {
        qs::from_str(self.query_string(), qs::ParseMode::UrlEncoded)
    }

    /// # Errors
    ///
    /// * If the request has no body, or it is not valid JSON for `T`
    #[cfg(feature = "serde")]
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        let body = self
            .body()
            .ok_or_else(|| Error::bad_request("Missing request body"))?;
        serde_json::from_slice(body).map_err(Error::bad_request)
    }
}

#[derive(Debug, Clone)]
pub enum HttpResponseBody {
    Bytes(Bytes),
}

impl HttpResponseBody {
    #[must_use]
    pub fn from_static(value: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(value.as_bytes()))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(bytes) => bytes,
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl From<&str> for HttpResponseBody {
    fn from(value: &str) -> Self {
        value.to_string().into()
    }
}

impl From<String> for HttpResponseBody {
    fn from(value: String) -> Self {
        Self::Bytes(Bytes::from(value.into_bytes()))
    }
}

impl From<Bytes> for HttpResponseBody {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for HttpResponseBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl<'a> From<Cow<'a, [u8]>> for HttpResponseBody {
    fn from(value: Cow<'a, [u8]>) -> Self {
        value.into_owned().into()
    }
}

impl From<&serde_json::Value> for HttpResponseBody {
    fn from(value: &serde_json::Value) -> Self {
        value.to_string().into()
    }
}

impl From<serde_json::Value> for HttpResponseBody {
    fn from(value: serde_json::Value) -> Self {
        (&value).into()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: StatusCode,
    pub location: Option<String>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<HttpResponseBody>,
}

impl HttpResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    #[must_use]
    pub fn from_status_code(status_code: StatusCode) -> Self {
        Self::new(status_code)
    }

    #[must_use]
    pub fn temporary_redirect() -> Self {
        Self::new(StatusCode::TemporaryRedirect)
    }

    #[must_use]
    pub fn permanent_redirect() -> Self {
        Self::new(StatusCode::PermanentRedirect)
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(StatusCode::NotFound)
    }

    /// A `405` carrying the `allow` header.
    #[must_use]
    pub fn method_not_allowed(allowed: &[Method]) -> Self {
        Self::new(StatusCode::MethodNotAllowed).with_header(
            "allow",
            allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    #[must_use]
    pub fn json(value: &serde_json::Value) -> Self {
        Self::ok()
            .with_content_type("application/json")
            .with_body(value)
    }

    #[must_use]
    pub fn html(value: impl Into<String>) -> Self {
        Self::ok()
            .with_content_type("text/html; charset=utf-8")
            .with_body(value.into())
    }
}

impl HttpResponse {
    #[must_use]
    pub fn new(status_code: impl Into<StatusCode>) -> Self {
        Self {
            status_code: status_code.into(),
            location: None,
            content_type: None,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_location<T: Into<String>, O: Into<Option<T>>>(mut self, location: O) -> Self {
        self.location = location.into().map(Into::into);
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_body<T: Into<HttpResponseBody>, B: Into<Option<T>>>(mut self, body: B) -> Self {
        self.body = body.into().map(Into::into);
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The body as UTF-8 text, if there is one and it decodes.
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|x| std::str::from_utf8(x.as_bytes()).ok())
    }
}

/// Error returned by route handlers, dependencies and middleware.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP Error {status_code}: {source}")]
    Http {
        status_code: StatusCode,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn from_http_status_code(
        status_code: StatusCode,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Http {
            status_code,
            source: Box::new(source),
        }
    }

    pub fn from_http_status_code_u16(
        status_code: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::from_http_status_code(StatusCode::from_u16(status_code), source)
    }

    pub fn bad_request(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Http {
            status_code: StatusCode::BadRequest,
            source: error.into(),
        }
    }

    pub fn unauthorized(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Http {
            status_code: StatusCode::Unauthorized,
            source: error.into(),
        }
    }

    pub fn not_found(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Http {
            status_code: StatusCode::NotFound,
            source: error.into(),
        }
    }

    pub fn internal_server_error(
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Http {
            status_code: StatusCode::InternalServerError,
            source: error.into(),
        }
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Http { status_code, .. } => *status_code,
        }
    }

    #[must_use]
    pub fn source_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            Self::Http { source, .. } => source.as_ref(),
        }
    }

    /// Renders an error no exception handler claimed: its status code and a
    /// plain text message.
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        match self {
            Self::Http {
                status_code,
                source,
            } => HttpResponse::new(status_code)
                .with_content_type("text/plain; charset=utf-8")
                .with_body(source.to_string()),
        }
    }
}

#[cfg(feature = "serde")]
impl From<qs::Error> for Error {
    fn from(value: qs::Error) -> Self {
        Self::bad_request(value)
    }
}
