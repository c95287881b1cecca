//! [`WebServer`], the facade over every compiled-in backend.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use webadapters_cors::Cors;

use crate::{
    Error, HttpRequest, HttpResponse, ServerError,
    adapter::Adapter,
    application::Application,
    config::{Contact, License, ServerConfig, ServerDescriptor, TagInfo},
    contracts::{
        BackendKind, Capability, HookError, ServerDocs, ServerEvent, ServerLifecycle,
        ServerMiddlewares, ServerParams, ServerRouting, UnsupportedPolicy,
    },
    exception::ExceptionKey,
    middleware::Middleware,
    routing::{RouteOptions, RouterGroup, RouterGroupOptions},
    server::{DEFAULT_STARTUP_TIMEOUT, ServerControl, ServerState, ServerTask, StopHandle},
};

#[cfg(not(any(feature = "actix", feature = "axum", feature = "simulator")))]
compile_error!("enable at least one of the `actix`, `axum` or `simulator` features");

/// A web server backed by one of the compiled-in frameworks.
///
/// ```rust,no_run
/// use webadapters::{
///     BackendKind, HttpResponse, RouteOptions, RouterGroupOptions, WebServer,
///     contracts::{ServerLifecycle as _, ServerParams as _, ServerRouting as _},
/// };
///
/// # fn main() -> Result<(), webadapters::ServerError> {
/// let mut server = WebServer::new(BackendKind::Actix)?;
/// server.set_title("Demo")?;
/// server.add_router_group("/users", "Users", RouterGroupOptions::default())?;
/// server.add_route_in_router_group(
///     "Users",
///     "/",
///     |_req| async { Ok(HttpResponse::ok().with_body("[]")) },
///     RouteOptions::default(),
/// )?;
/// server.start_server("0.0.0.0", 8000)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub enum WebServer {
    #[cfg(feature = "actix")]
    Actix(Adapter<crate::actix::ActixBackend>),
    #[cfg(feature = "axum")]
    Axum(Adapter<crate::axum::AxumBackend>),
    #[cfg(feature = "simulator")]
    Simulator(Adapter<crate::simulator::SimulatorBackend>),
}

macro_rules! dispatch {
    ($self:expr, $adapter:ident => $body:expr) => {
        match $self {
            #[cfg(feature = "actix")]
            WebServer::Actix($adapter) => $body,
            #[cfg(feature = "axum")]
            WebServer::Axum($adapter) => $body,
            #[cfg(feature = "simulator")]
            WebServer::Simulator($adapter) => $body,
        }
    };
}

impl WebServer {
    /// # Errors
    ///
    /// * [`ServerError::UnsupportedBackend`] if the backend's feature is not
    ///   compiled in
    pub fn new(backend: BackendKind) -> Result<Self, ServerError> {
        Self::with_config(backend, ServerConfig::default())
    }

    /// # Errors
    ///
    /// * [`ServerError::UnsupportedBackend`] if the backend's feature is not
    ///   compiled in
    pub fn with_config(backend: BackendKind, config: ServerConfig) -> Result<Self, ServerError> {
        log::debug!("with_config: backend={backend} title={}", config.title);

        Ok(match backend {
            #[cfg(feature = "actix")]
            BackendKind::Actix => Self::Actix(Adapter::new(config)),
            #[cfg(feature = "axum")]
            BackendKind::Axum => Self::Axum(Adapter::new(config)),
            #[cfg(feature = "simulator")]
            BackendKind::Simulator => Self::Simulator(Adapter::new(config)),
            #[allow(unreachable_patterns)]
            _ => {
                log::error!("with_config: compiled without the `{backend}` feature");
                return Err(ServerError::UnsupportedBackend(backend.to_string()));
            }
        })
    }

    /// Selects the backend by name, e.g. `"actix"`, `"axum"` or
    /// `"simulator"`.
    ///
    /// # Errors
    ///
    /// * [`ServerError::UnsupportedBackend`] for an unknown identifier or a
    ///   backend that is not compiled in
    pub fn from_identifier(identifier: &str) -> Result<Self, ServerError> {
        Self::new(identifier.parse()?)
    }

    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        dispatch!(self, x => x.kind())
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        dispatch!(self, x => x.supports(capability))
    }

    pub fn set_unsupported_policy(&mut self, policy: UnsupportedPolicy) {
        dispatch!(self, x => x.set_unsupported_policy(policy));
    }

    #[must_use]
    pub const fn application(&self) -> &Application {
        dispatch!(self, x => x.application())
    }

    pub(crate) const fn control(&self) -> &Arc<ServerControl> {
        dispatch!(self, x => x.control())
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.control().state()
    }

    /// The bound address once a listening backend is running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.control().local_addr()
    }

    /// A handle that stops this server from another thread, e.g. a signal
    /// handler.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        dispatch!(self, x => x.stop_handle())
    }

    /// Dispatches a request in process. Only the simulator backend supports
    /// this.
    ///
    /// # Errors
    ///
    /// * [`ServerError::UnsupportedOperation`] on any other backend
    /// * [`ServerError::NotRunning`] unless the server is started
    pub fn simulate(&self, request: HttpRequest) -> Result<HttpResponse, ServerError> {
        match self {
            #[cfg(feature = "simulator")]
            Self::Simulator(x) => x.backend().simulate(request),
            #[allow(unreachable_patterns)]
            _ => {
                drop(request);
                Err(ServerError::UnsupportedOperation {
                    backend: self.backend(),
                    operation: "simulate",
                })
            }
        }
    }

    /// Starts the server on a new thread and returns once it listens.
    ///
    /// # Errors
    ///
    /// * Any error `start_server` fails with before listening
    /// * [`ServerError::StartupTimeout`] if the server neither listens nor
    ///   fails in time
    pub fn spawn(self, host: &str, port: u16) -> Result<ServerTask, ServerError> {
        self.spawn_with_timeout(host, port, DEFAULT_STARTUP_TIMEOUT)
    }

    /// # Errors
    ///
    /// See [`WebServer::spawn`].
    pub fn spawn_with_timeout(
        self,
        host: &str,
        port: u16,
        startup_timeout: Duration,
    ) -> Result<ServerTask, ServerError> {
        ServerTask::spawn(self, host, port, startup_timeout)
    }
}

impl ServerParams for WebServer {
    fn set_title(&mut self, title: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_title(title))
    }

    fn set_description(&mut self, description: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_description(description))
    }

    fn set_summary(&mut self, summary: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_summary(summary))
    }

    fn set_version(&mut self, version: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_version(version))
    }

    fn set_contact(&mut self, contact: Contact) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_contact(contact))
    }

    fn set_license(&mut self, license: License) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_license(license))
    }

    fn set_license_url(&mut self, url: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_license_url(url))
    }

    fn set_terms_of_service(&mut self, url: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_terms_of_service(url))
    }

    fn set_servers(&mut self, servers: Vec<ServerDescriptor>) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_servers(servers))
    }

    fn set_extra(&mut self, key: &str, value: serde_json::Value) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_extra(key, value))
    }

    fn set_prefix(&mut self, prefix: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_prefix(prefix))
    }

    fn set_media_type(&mut self, media_type: &str) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_media_type(media_type))
    }
}

impl ServerRouting for WebServer {
    fn add_router_group(
        &mut self,
        prefix: &str,
        name: &str,
        options: RouterGroupOptions,
    ) -> Result<(), ServerError> {
        dispatch!(self, x => x.add_router_group(prefix, name, options))
    }

    fn add_route_in_router_group<F, Fut>(
        &mut self,
        name: &str,
        path: &str,
        handler: F,
        options: RouteOptions,
    ) -> Result<(), ServerError>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        dispatch!(self, x => x.add_route_in_router_group(name, path, handler, options))
    }

    fn add_api_route<F, Fut>(
        &mut self,
        path: &str,
        handler: F,
        options: RouteOptions,
    ) -> Result<(), ServerError>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        dispatch!(self, x => x.add_api_route(path, handler, options))
    }

    fn get_router_group(&self, name: &str) -> Option<&RouterGroup> {
        dispatch!(self, x => x.get_router_group(name))
    }

    fn get_router_groups(&self) -> &[RouterGroup] {
        dispatch!(self, x => x.get_router_groups())
    }
}

impl ServerMiddlewares for WebServer {
    fn add_middleware<M: Middleware>(&mut self, middleware: M) -> Result<(), ServerError> {
        dispatch!(self, x => x.add_middleware(middleware))
    }

    fn exception_handler<F>(&mut self, key: ExceptionKey, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&HttpRequest, &Error) -> HttpResponse + Send + Sync + 'static,
    {
        dispatch!(self, x => x.exception_handler(key, handler))
    }

    fn set_cors(&mut self, cors: Cors) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_cors(cors))
    }

    fn set_compression(&mut self, enabled: bool) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_compression(enabled))
    }
}

impl ServerDocs for WebServer {
    fn set_openapi_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_openapi_url(url))
    }

    fn set_openapi_tags(&mut self, tags: Vec<TagInfo>) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_openapi_tags(tags))
    }

    fn set_docs_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_docs_url(url))
    }

    fn set_redoc_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_redoc_url(url))
    }

    fn set_swagger_ui_oauth2_redirect_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_swagger_ui_oauth2_redirect_url(url))
    }

    fn set_swagger_ui_init_oauth(&mut self, value: serde_json::Value) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_swagger_ui_init_oauth(value))
    }

    fn set_swagger_ui_parameters(
        &mut self,
        value: serde_json::Value,
    ) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_swagger_ui_parameters(value))
    }
}

impl ServerLifecycle for WebServer {
    fn on_event<F>(&mut self, event: ServerEvent, hook: F) -> Result<(), ServerError>
    where
        F: Fn() -> Result<(), HookError> + Send + Sync + 'static,
    {
        dispatch!(self, x => x.on_event(event, hook))
    }

    fn set_shutdown_timeout(&mut self, timeout: Duration) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_shutdown_timeout(timeout))
    }

    fn set_max_body_size(&mut self, bytes: usize) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_max_body_size(bytes))
    }

    fn set_workers(&mut self, workers: usize) -> Result<(), ServerError> {
        dispatch!(self, x => x.set_workers(workers))
    }

    fn start_server(&self, host: &str, port: u16) -> Result<(), ServerError> {
        dispatch!(self, x => x.start_server(host, port))
    }

    fn stop_server(&self) -> Result<(), ServerError> {
        dispatch!(self, x => x.stop_server())
    }
}

#[cfg(all(test, feature = "actix", feature = "axum", feature = "simulator"))]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn selects_backend_by_identifier() {
        assert_eq!(
            WebServer::from_identifier("actix").unwrap().backend(),
            BackendKind::Actix
        );
        assert_eq!(
            WebServer::from_identifier("axum").unwrap().backend(),
            BackendKind::Axum
        );
        assert!(matches!(
            WebServer::from_identifier("tornado"),
            Err(ServerError::UnsupportedBackend(x)) if x == "tornado"
        ));
    }

    #[test_log::test]
    fn capabilities_differ_per_backend() {
        let actix = WebServer::new(BackendKind::Actix).unwrap();
        let simulator = WebServer::new(BackendKind::Simulator).unwrap();

        assert!(actix.supports(Capability::Workers));
        assert!(actix.supports(Capability::Cors));
        assert!(!actix.supports(Capability::SwaggerUi));
        assert!(!simulator.supports(Capability::Workers));
        assert!(simulator.supports(Capability::Simulation));
    }

    #[test_log::test]
    fn simulate_is_simulator_only() {
        let server = WebServer::new(BackendKind::Axum).unwrap();
        let err = server
            .simulate(HttpRequest::new(crate::Method::Get, "/"))
            .unwrap_err();
        assert_eq!(err.to_string(), "simulate: not supported by the axum backend");
    }

    #[test_log::test]
    fn stop_before_start_is_a_no_op() {
        let server = WebServer::new(BackendKind::Actix).unwrap();
        server.stop_server().unwrap();
        server.stop_server().unwrap();
        assert_eq!(server.state(), ServerState::Idle);
    }
}
