use crate::contracts::BackendKind;

/// Errors raised by configuration calls and by the server lifecycle.
///
/// Configuration errors are returned synchronously from the call that caused
/// them. Only materialization errors (route conflicts, bind failures, docs
/// rendering, startup hooks) surface from `start_server`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("add_router_group: a router group named '{name}' already exists")]
    DuplicateGroup { name: String },
    #[error("{operation}: no router group named '{name}'")]
    UnknownGroup {
        operation: &'static str,
        name: String,
    },
    #[error("Unsupported backend identifier '{0}'")]
    UnsupportedBackend(String),
    #[error("{operation}: configuration is frozen once the server has started")]
    ConfigurationFrozen { operation: &'static str },
    #[error("{operation}: not supported by the {backend} backend")]
    UnsupportedOperation {
        backend: BackendKind,
        operation: &'static str,
    },
    #[error("Route conflict on {method} '{path}': {reason}")]
    RouteConflict {
        method: String,
        path: String,
        reason: String,
    },
    #[error("start_server: the server was already started")]
    AlreadyStarted,
    #[error("{operation}: the server is not running")]
    NotRunning { operation: &'static str },
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Startup hook failed: {0}")]
    StartupHook(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Failed to materialize {backend} server: {message}")]
    Materialize {
        backend: BackendKind,
        message: String,
    },
    #[error("Failed to render OpenAPI document: {0}")]
    OpenApi(#[from] serde_json::Error),
    #[error("Server did not start listening within {0:?}")]
    StartupTimeout(std::time::Duration),
    #[error("Server thread panicked")]
    ServerPanicked,
}
