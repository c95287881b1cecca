//! The capability interfaces every backend adapter and the facade implement.
//!
//! Each concern has exactly one trait. Configuration methods take `&mut self`
//! and fail with [`ServerError::ConfigurationFrozen`] once `start_server` has
//! been invoked. `start_server` and `stop_server` take `&self`, so a server
//! shared behind an `Arc` can be stopped from another thread.

use std::{future::Future, str::FromStr, sync::Arc, time::Duration};

use webadapters_cors::Cors;

use crate::{
    Error, HttpRequest, HttpResponse, ServerError,
    config::{Contact, License, ServerDescriptor, TagInfo},
    exception::ExceptionKey,
    middleware::Middleware,
    routing::{RouteOptions, RouterGroup, RouterGroupOptions},
};

/// The wrapped framework behind a facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    Actix,
    Axum,
    Simulator,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Actix => "actix",
            Self::Axum => "axum",
            Self::Simulator => "simulator",
        }
    }

    /// Whether this build was compiled with the backend's cargo feature.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        match self {
            Self::Actix => cfg!(feature = "actix"),
            Self::Axum => cfg!(feature = "axum"),
            Self::Simulator => cfg!(feature = "simulator"),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "actix" | "actix-web" | "actix_web" => Self::Actix,
            "axum" => Self::Axum,
            "simulator" => Self::Simulator,
            _ => return Err(ServerError::UnsupportedBackend(s.to_string())),
        })
    }
}

/// Optional features a backend may or may not honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Binds a real TCP listener.
    Listener,
    Workers,
    Cors,
    Compression,
    OpenApi,
    SwaggerUi,
    /// Dispatches requests in process.
    Simulation,
}

/// What to do when a configuration call needs a capability the backend lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsupportedPolicy {
    /// Fail the call with [`ServerError::UnsupportedOperation`].
    #[default]
    Error,
    /// Log a warning and carry on.
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerEvent {
    Startup,
    Shutdown,
}

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

pub type Hook = Arc<dyn Fn() -> Result<(), HookError> + Send + Sync>;

/// API metadata published through the docs.
pub trait ServerParams {
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_title(&mut self, title: &str) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_description(&mut self, description: &str) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_summary(&mut self, summary: &str) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_version(&mut self, version: &str) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_contact(&mut self, contact: Contact) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_license(&mut self, license: License) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_license_url(&mut self, url: &str) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_terms_of_service(&mut self, url: &str) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_servers(&mut self, servers: Vec<ServerDescriptor>) -> Result<(), ServerError>;

    /// Stores an arbitrary metadata entry, replacing any previous value.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_extra(&mut self, key: &str, value: serde_json::Value) -> Result<(), ServerError>;

    /// Sets the path prefix applied to every route.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_prefix(&mut self, prefix: &str) -> Result<(), ServerError>;

    /// Sets the content type given to response bodies that carry none.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_media_type(&mut self, media_type: &str) -> Result<(), ServerError>;
}

pub trait ServerRouting {
    /// # Errors
    ///
    /// * [`ServerError::DuplicateGroup`] if `name` is taken; the existing
    ///   group is left untouched
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn add_router_group(
        &mut self,
        prefix: &str,
        name: &str,
        options: RouterGroupOptions,
    ) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::UnknownGroup`] if no group is named `name`
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn add_route_in_router_group<F, Fut>(
        &mut self,
        name: &str,
        path: &str,
        handler: F,
        options: RouteOptions,
    ) -> Result<(), ServerError>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static;

    /// Registers a route outside any group, at an absolute path.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn add_api_route<F, Fut>(
        &mut self,
        path: &str,
        handler: F,
        options: RouteOptions,
    ) -> Result<(), ServerError>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static;

    fn get_router_group(&self, name: &str) -> Option<&RouterGroup>;

    /// All groups, in insertion order.
    fn get_router_groups(&self) -> &[RouterGroup];
}

pub trait ServerMiddlewares {
    /// Appends a middleware. The first registered is the outermost.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn add_middleware<M: Middleware>(&mut self, middleware: M) -> Result<(), ServerError>;

    /// Registers the handler for `key`, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn exception_handler<F>(&mut self, key: ExceptionKey, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&HttpRequest, &Error) -> HttpResponse + Send + Sync + 'static;

    /// # Errors
    ///
    /// * [`ServerError::UnsupportedOperation`] if the backend has no CORS
    ///   support and the policy is [`UnsupportedPolicy::Error`]
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_cors(&mut self, cors: Cors) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::UnsupportedOperation`] if the backend cannot compress
    ///   and the policy is [`UnsupportedPolicy::Error`]
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_compression(&mut self, enabled: bool) -> Result<(), ServerError>;
}

/// Docs settings. A backend that cannot honour one records it and logs a
/// warning instead of failing.
pub trait ServerDocs {
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_openapi_url(&mut self, url: Option<&str>) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_openapi_tags(&mut self, tags: Vec<TagInfo>) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_docs_url(&mut self, url: Option<&str>) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_redoc_url(&mut self, url: Option<&str>) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_swagger_ui_oauth2_redirect_url(&mut self, url: Option<&str>) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_swagger_ui_init_oauth(&mut self, value: serde_json::Value) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_swagger_ui_parameters(&mut self, value: serde_json::Value)
    -> Result<(), ServerError>;
}

pub trait ServerLifecycle {
    /// Registers a hook. Startup hooks run after the configuration is
    /// materialized and before the server listens; shutdown hooks run after
    /// it stops.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn on_event<F>(&mut self, event: ServerEvent, hook: F) -> Result<(), ServerError>
    where
        F: Fn() -> Result<(), HookError> + Send + Sync + 'static;

    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_shutdown_timeout(&mut self, timeout: Duration) -> Result<(), ServerError>;

    /// Caps the request body every backend reads; larger bodies are answered
    /// with `413 Content Too Large` before any handler runs.
    ///
    /// # Errors
    ///
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_max_body_size(&mut self, bytes: usize) -> Result<(), ServerError>;

    /// # Errors
    ///
    /// * [`ServerError::UnsupportedOperation`] if the backend has no worker
    ///   pool and the policy is [`UnsupportedPolicy::Error`]
    /// * [`ServerError::ConfigurationFrozen`] after `start_server`
    fn set_workers(&mut self, workers: usize) -> Result<(), ServerError>;

    /// Materializes the configuration and serves it. Blocks until the server
    /// stops, except on backends without a listener, which return once the
    /// configuration is installed.
    ///
    /// # Errors
    ///
    /// * [`ServerError::AlreadyStarted`] on a second call
    /// * [`ServerError::RouteConflict`] if two routes claim the same requests
    /// * [`ServerError::StartupHook`] if a startup hook fails
    /// * [`ServerError::Bind`] if the address cannot be bound
    fn start_server(&self, host: &str, port: u16) -> Result<(), ServerError>;

    /// Gracefully stops a running server. A no-op before `start_server` and
    /// after the server has stopped.
    ///
    /// # Errors
    ///
    /// * [`ServerError::Io`] if the backend fails while shutting down
    fn stop_server(&self) -> Result<(), ServerError>;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn backend_identifiers_parse() {
        assert_eq!("actix".parse::<BackendKind>().unwrap(), BackendKind::Actix);
        assert_eq!(
            "actix-web".parse::<BackendKind>().unwrap(),
            BackendKind::Actix
        );
        assert_eq!("Axum".parse::<BackendKind>().unwrap(), BackendKind::Axum);
        assert_eq!(
            "simulator".parse::<BackendKind>().unwrap(),
            BackendKind::Simulator
        );
    }

    #[test_log::test]
    fn unknown_backend_identifier_is_rejected() {
        let err = "flask".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, ServerError::UnsupportedBackend(x) if x == "flask"));
    }

    #[test_log::test]
    fn backend_kind_displays_its_identifier() {
        assert_eq!(BackendKind::Actix.to_string(), "actix");
        assert_eq!(BackendKind::Simulator.to_string(), "simulator");
    }
}
