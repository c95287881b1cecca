//! The generic adapter every backend plugs into.
//!
//! [`Adapter`] owns the registry and lifecycle state and implements the
//! capability traits once for all backends. A [`Backend`] only declares its
//! capabilities and serves a materialized [`Plan`].

use std::{
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use webadapters_cors::Cors;

use crate::{
    Error, HttpRequest, HttpResponse, IntoHandler as _, ServerError,
    application::{Application, Plan},
    config::{Contact, License, ServerConfig, ServerDescriptor, TagInfo},
    contracts::{
        BackendKind, Capability, Hook, HookError, ServerDocs, ServerEvent, ServerLifecycle,
        ServerMiddlewares, ServerParams, ServerRouting, UnsupportedPolicy,
    },
    exception::ExceptionKey,
    middleware::Middleware,
    routing::{Route, RouteOptions, RouterGroup, RouterGroupOptions},
    server::{ServerControl, ShutdownTrigger, StopHandle},
};

/// Where and how a backend should serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub shutdown_timeout: Duration,
}

impl ServeOptions {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How [`Backend::serve`] returned.
pub enum Serving {
    /// The server ran and has stopped.
    Finished,
    /// The plan is installed and requests are dispatched without a serving
    /// thread. The trigger uninstalls it.
    Detached(ShutdownTrigger),
}

pub trait Backend: Default + Send + Sync + 'static {
    const KIND: BackendKind;

    fn supports(capability: Capability) -> bool;

    /// Serves `plan`. Listening backends block until the server stops and
    /// call [`ServerControl::mark_running`] once they accept connections.
    ///
    /// # Errors
    ///
    /// * [`ServerError::Bind`] if the address cannot be bound
    /// * [`ServerError::Materialize`] if the plan cannot be expressed natively
    fn serve(
        &self,
        plan: Arc<Plan>,
        options: &ServeOptions,
        control: &ServerControl,
    ) -> Result<Serving, ServerError>;
}

pub struct Adapter<B: Backend> {
    app: Application,
    backend: B,
    control: Arc<ServerControl>,
    policy: UnsupportedPolicy,
}

impl<B: Backend> Default for Adapter<B> {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl<B: Backend> Adapter<B> {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            app: Application::new(config),
            backend: B::default(),
            control: Arc::new(ServerControl::new()),
            policy: UnsupportedPolicy::default(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        B::KIND
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        B::supports(capability)
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub const fn application(&self) -> &Application {
        &self.app
    }

    #[must_use]
    pub const fn control(&self) -> &Arc<ServerControl> {
        &self.control
    }

    pub const fn set_unsupported_policy(&mut self, policy: UnsupportedPolicy) {
        self.policy = policy;
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.control.clone())
    }

    fn configure(&mut self, operation: &'static str) -> Result<&mut Application, ServerError> {
        if self.control.is_started() {
            return Err(ServerError::ConfigurationFrozen { operation });
        }
        Ok(&mut self.app)
    }

    /// Like [`Self::configure`], but also consults the capability matrix and
    /// the unsupported policy. The value is recorded either way.
    fn configure_with(
        &mut self,
        capability: Capability,
        operation: &'static str,
    ) -> Result<&mut Application, ServerError> {
        let policy = self.policy;
        self.configure_capability(capability, operation, policy)
    }

    fn configure_capability(
        &mut self,
        capability: Capability,
        operation: &'static str,
        policy: UnsupportedPolicy,
    ) -> Result<&mut Application, ServerError> {
        let app = self.configure(operation)?;
        if !B::supports(capability) {
            match policy {
                UnsupportedPolicy::Error => {
                    return Err(ServerError::UnsupportedOperation {
                        backend: B::KIND,
                        operation,
                    });
                }
                UnsupportedPolicy::Warn => {
                    log::warn!(
                        "{operation}: not supported by the {} backend, the setting is recorded but has no effect",
                        B::KIND
                    );
                }
            }
        }
        Ok(app)
    }

    fn serve(&self, host: &str, port: u16) -> Result<(), ServerError> {
        let plan = Arc::new(self.app.plan()?);

        for hook in self.app.hooks(ServerEvent::Startup) {
            hook().map_err(ServerError::StartupHook)?;
        }

        let settings = self.app.settings();
        let options = ServeOptions {
            host: host.to_string(),
            port,
            workers: settings.workers,
            shutdown_timeout: settings.shutdown_timeout,
        };

        if B::supports(Capability::Listener) {
            log::info!(
                "start_server: serving '{}' on {} with the {} backend",
                plan.title,
                options.addr(),
                B::KIND
            );
        } else {
            log::info!(
                "start_server: serving '{}' in process with the {} backend",
                plan.title,
                B::KIND
            );
        }

        match self.backend.serve(plan, &options, &self.control)? {
            Serving::Finished => {
                run_shutdown_hooks(self.app.hooks(ServerEvent::Shutdown));
                self.control.mark_stopped();
            }
            Serving::Detached(trigger) => {
                let hooks = self.app.hooks(ServerEvent::Shutdown).to_vec();
                let control: Weak<ServerControl> = Arc::downgrade(&self.control);
                self.control.mark_running(
                    None,
                    Box::new(move || {
                        trigger();
                        run_shutdown_hooks(&hooks);
                        if let Some(control) = control.upgrade() {
                            control.mark_stopped();
                        }
                    }),
                );
            }
        }

        Ok(())
    }
}

fn run_shutdown_hooks(hooks: &[Hook]) {
    for hook in hooks {
        if let Err(e) = hook() {
            log::error!("stop_server: shutdown hook failed: {e}");
        }
    }
}

impl<B: Backend> std::fmt::Debug for Adapter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("backend", &B::KIND)
            .field("app", &self.app)
            .field("control", &self.control)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<B: Backend> ServerParams for Adapter<B> {
    fn set_title(&mut self, title: &str) -> Result<(), ServerError> {
        self.configure("set_title")?.config_mut().title = title.to_string();
        Ok(())
    }

    fn set_description(&mut self, description: &str) -> Result<(), ServerError> {
        self.configure("set_description")?.config_mut().description =
            Some(description.to_string());
        Ok(())
    }

    fn set_summary(&mut self, summary: &str) -> Result<(), ServerError> {
        self.configure("set_summary")?.config_mut().summary = Some(summary.to_string());
        Ok(())
    }

    fn set_version(&mut self, version: &str) -> Result<(), ServerError> {
        self.configure("set_version")?.config_mut().version = version.to_string();
        Ok(())
    }

    fn set_contact(&mut self, contact: Contact) -> Result<(), ServerError> {
        self.configure("set_contact")?.config_mut().contact = Some(contact);
        Ok(())
    }

    fn set_license(&mut self, license: License) -> Result<(), ServerError> {
        self.configure("set_license")?.config_mut().license = Some(license);
        Ok(())
    }

    fn set_license_url(&mut self, url: &str) -> Result<(), ServerError> {
        self.configure("set_license_url")?.config_mut().license_url = Some(url.to_string());
        Ok(())
    }

    fn set_terms_of_service(&mut self, url: &str) -> Result<(), ServerError> {
        self.configure("set_terms_of_service")?
            .config_mut()
            .terms_of_service = Some(url.to_string());
        Ok(())
    }

    fn set_servers(&mut self, servers: Vec<ServerDescriptor>) -> Result<(), ServerError> {
        self.configure("set_servers")?.config_mut().servers = servers;
        Ok(())
    }

    fn set_extra(&mut self, key: &str, value: serde_json::Value) -> Result<(), ServerError> {
        self.configure("set_extra")?
            .config_mut()
            .extra
            .insert(key.to_string(), value);
        Ok(())
    }

    fn set_prefix(&mut self, prefix: &str) -> Result<(), ServerError> {
        self.configure("set_prefix")?.config_mut().prefix = prefix.to_string();
        Ok(())
    }

    fn set_media_type(&mut self, media_type: &str) -> Result<(), ServerError> {
        self.configure("set_media_type")?.config_mut().media_type = Some(media_type.to_string());
        Ok(())
    }
}

impl<B: Backend> ServerRouting for Adapter<B> {
    fn add_router_group(
        &mut self,
        prefix: &str,
        name: &str,
        options: RouterGroupOptions,
    ) -> Result<(), ServerError> {
        self.configure("add_router_group")?
            .add_group(prefix, name, options)
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
        const OPERATION: &str = "add_route_in_router_group";
        self.configure(OPERATION)?.add_group_route(
            OPERATION,
            name,
            Route::new(path, handler.into_handler(), options),
        )
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
        self.configure("add_api_route")?
            .add_route(Route::new(path, handler.into_handler(), options));
        Ok(())
    }

    fn get_router_group(&self, name: &str) -> Option<&RouterGroup> {
        self.app.group(name)
    }

    fn get_router_groups(&self) -> &[RouterGroup] {
        self.app.groups()
    }
}

impl<B: Backend> ServerMiddlewares for Adapter<B> {
    fn add_middleware<M: Middleware>(&mut self, middleware: M) -> Result<(), ServerError> {
        self.configure("add_middleware")?
            .add_middleware(Arc::new(middleware));
        Ok(())
    }

    fn exception_handler<F>(&mut self, key: ExceptionKey, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&HttpRequest, &Error) -> HttpResponse + Send + Sync + 'static,
    {
        log::debug!("exception_handler: key={key}");
        self.configure("exception_handler")?
            .set_exception_handler(key, Arc::new(handler));
        Ok(())
    }

    fn set_cors(&mut self, cors: Cors) -> Result<(), ServerError> {
        self.configure_with(Capability::Cors, "set_cors")?
            .settings_mut()
            .cors = Some(cors);
        Ok(())
    }

    fn set_compression(&mut self, enabled: bool) -> Result<(), ServerError> {
        self.configure_with(Capability::Compression, "set_compression")?
            .settings_mut()
            .compress = enabled;
        Ok(())
    }
}

// Docs settings never fail on a backend that lacks the capability.
impl<B: Backend> ServerDocs for Adapter<B> {
    fn set_openapi_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        self.configure_capability(Capability::OpenApi, "set_openapi_url", UnsupportedPolicy::Warn)?
            .config_mut()
            .docs
            .openapi_url = url.map(ToString::to_string);
        Ok(())
    }

    fn set_openapi_tags(&mut self, tags: Vec<TagInfo>) -> Result<(), ServerError> {
        self.configure_capability(
            Capability::OpenApi,
            "set_openapi_tags",
            UnsupportedPolicy::Warn,
        )?
        .config_mut()
        .docs
        .openapi_tags = tags;
        Ok(())
    }

    fn set_docs_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        self.configure_capability(Capability::OpenApi, "set_docs_url", UnsupportedPolicy::Warn)?
            .config_mut()
            .docs
            .docs_url = url.map(ToString::to_string);
        Ok(())
    }

    fn set_redoc_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        self.configure_capability(Capability::OpenApi, "set_redoc_url", UnsupportedPolicy::Warn)?
            .config_mut()
            .docs
            .redoc_url = url.map(ToString::to_string);
        Ok(())
    }

    fn set_swagger_ui_oauth2_redirect_url(&mut self, url: Option<&str>) -> Result<(), ServerError> {
        self.configure_capability(
            Capability::SwaggerUi,
            "set_swagger_ui_oauth2_redirect_url",
            UnsupportedPolicy::Warn,
        )?
        .config_mut()
        .docs
        .swagger_ui_oauth2_redirect_url = url.map(ToString::to_string);
        Ok(())
    }

    fn set_swagger_ui_init_oauth(&mut self, value: serde_json::Value) -> Result<(), ServerError> {
        self.configure_capability(
            Capability::SwaggerUi,
            "set_swagger_ui_init_oauth",
            UnsupportedPolicy::Warn,
        )?
        .config_mut()
        .docs
        .swagger_ui_init_oauth = Some(value);
        Ok(())
    }

    fn set_swagger_ui_parameters(
        &mut self,
        value: serde_json::Value,
    ) -> Result<(), ServerError> {
        self.configure_capability(
            Capability::SwaggerUi,
            "set_swagger_ui_parameters",
            UnsupportedPolicy::Warn,
        )?
        .config_mut()
        .docs
        .swagger_ui_parameters = Some(value);
        Ok(())
    }
}

impl<B: Backend> ServerLifecycle for Adapter<B> {
    fn on_event<F>(&mut self, event: ServerEvent, hook: F) -> Result<(), ServerError>
    where
        F: Fn() -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.configure("on_event")?.add_hook(event, Arc::new(hook));
        Ok(())
    }

    fn set_shutdown_timeout(&mut self, timeout: Duration) -> Result<(), ServerError> {
        self.configure("set_shutdown_timeout")?
            .settings_mut()
            .shutdown_timeout = timeout;
        self.control.set_shutdown_timeout(timeout);
        Ok(())
    }

    fn set_max_body_size(&mut self, bytes: usize) -> Result<(), ServerError> {
        self.configure("set_max_body_size")?
            .settings_mut()
            .max_body_size = bytes;
        Ok(())
    }

    fn set_workers(&mut self, workers: usize) -> Result<(), ServerError> {
        self.configure_with(Capability::Workers, "set_workers")?
            .settings_mut()
            .workers = Some(workers);
        Ok(())
    }

    fn start_server(&self, host: &str, port: u16) -> Result<(), ServerError> {
        self.control.begin_start()?;

        let result = self.serve(host, port);
        if let Err(e) = &result {
            log::error!("start_server: {} backend failed: {e}", B::KIND);
            self.control.mark_stopped();
        }
        result
    }

    fn stop_server(&self) -> Result<(), ServerError> {
        self.control.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::server::ServerState;

    /// Serves nothing and finishes as soon as it is stopped.
    #[derive(Default)]
    struct Inert {
        served: Mutex<Option<Arc<Plan>>>,
    }

    impl Backend for Inert {
        const KIND: BackendKind = BackendKind::Simulator;

        fn supports(capability: Capability) -> bool {
            matches!(capability, Capability::OpenApi | Capability::Simulation)
        }

        fn serve(
            &self,
            plan: Arc<Plan>,
            _options: &ServeOptions,
            _control: &ServerControl,
        ) -> Result<Serving, ServerError> {
            *self.served.lock().unwrap() = Some(plan);
            Ok(Serving::Detached(Box::new(|| {})))
        }
    }

    #[test_log::test]
    fn unsupported_setting_fails_under_error_policy() {
        let mut adapter = Adapter::<Inert>::default();
        let err = adapter.set_workers(4).unwrap_err();
        assert_eq!(
            err.to_string(),
            "set_workers: not supported by the simulator backend"
        );
        assert_eq!(adapter.application().settings().workers, None);
    }

    #[test_log::test]
    fn unsupported_setting_is_recorded_under_warn_policy() {
        let mut adapter = Adapter::<Inert>::default();
        adapter.set_unsupported_policy(UnsupportedPolicy::Warn);
        adapter.set_workers(4).unwrap();
        adapter.set_compression(true).unwrap();
        assert_eq!(adapter.application().settings().workers, Some(4));
        assert!(adapter.application().settings().compress);
    }

    #[test_log::test]
    fn swagger_settings_warn_and_record() {
        let mut adapter = Adapter::<Inert>::default();
        adapter
            .set_swagger_ui_oauth2_redirect_url(Some("/docs/oauth2-redirect"))
            .unwrap();
        adapter
            .set_swagger_ui_parameters(serde_json::json!({"deepLinking": true}))
            .unwrap();
        let docs = &adapter.application().config().docs;
        assert_eq!(
            docs.swagger_ui_oauth2_redirect_url.as_deref(),
            Some("/docs/oauth2-redirect")
        );
        assert_eq!(
            docs.swagger_ui_parameters,
            Some(serde_json::json!({"deepLinking": true}))
        );
    }

    #[test_log::test]
    fn configuration_freezes_once_started() {
        let mut adapter = Adapter::<Inert>::default();
        adapter.set_title("Before").unwrap();
        adapter.start_server("127.0.0.1", 0).unwrap();

        let err = adapter.set_title("After").unwrap_err();
        assert!(matches!(
            err,
            ServerError::ConfigurationFrozen {
                operation: "set_title"
            }
        ));
        assert_eq!(adapter.application().config().title, "Before");
        assert!(matches!(
            adapter.add_router_group("/x", "X", RouterGroupOptions::default()),
            Err(ServerError::ConfigurationFrozen { .. })
        ));
        assert!(matches!(
            adapter.start_server("127.0.0.1", 0),
            Err(ServerError::AlreadyStarted)
        ));
    }

    #[test_log::test]
    fn startup_hook_failure_aborts_start() {
        let mut adapter = Adapter::<Inert>::default();
        adapter
            .on_event(ServerEvent::Startup, || Err("no database".into()))
            .unwrap();

        let err = adapter.start_server("127.0.0.1", 0).unwrap_err();
        assert_eq!(err.to_string(), "Startup hook failed: no database");
        assert!(adapter.backend().served.lock().unwrap().is_none());
        assert_eq!(adapter.control().state(), ServerState::Stopped);
    }

    #[test_log::test]
    fn route_conflict_surfaces_from_start_server() {
        let mut adapter = Adapter::<Inert>::default();
        for _ in 0..2 {
            adapter
                .add_api_route(
                    "/items",
                    |_req| async { Ok(HttpResponse::ok()) },
                    RouteOptions::default(),
                )
                .unwrap();
        }

        assert!(matches!(
            adapter.start_server("127.0.0.1", 0),
            Err(ServerError::RouteConflict { .. })
        ));
    }

    #[test_log::test]
    fn stop_handle_uses_the_latest_shutdown_timeout() {
        let mut adapter = Adapter::<Inert>::default();
        let handle = adapter.stop_handle();
        assert_eq!(handle.shutdown_timeout(), Duration::from_secs(30));

        adapter
            .set_shutdown_timeout(Duration::from_millis(250))
            .unwrap();
        assert_eq!(handle.shutdown_timeout(), Duration::from_millis(250));
    }

    #[test_log::test]
    fn shutdown_hooks_run_on_stop() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut adapter = Adapter::<Inert>::default();
        adapter
            .on_event(ServerEvent::Shutdown, {
                let stopped = stopped.clone();
                move || {
                    stopped.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        adapter.stop_server().unwrap();
        assert!(!stopped.load(Ordering::SeqCst));

        adapter.start_server("127.0.0.1", 0).unwrap();
        assert_eq!(adapter.control().state(), ServerState::Running);

        adapter.stop_server().unwrap();
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(adapter.control().state(), ServerState::Stopped);

        stopped.store(false, Ordering::SeqCst);
        adapter.stop_server().unwrap();
        assert!(!stopped.load(Ordering::SeqCst));
    }
}
