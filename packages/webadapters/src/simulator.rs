//! An in-process backend with no sockets.
//!
//! Starting the server installs the materialized plan; requests are then
//! dispatched with [`SimulatorBackend::simulate`] through the same middleware
//! chain, dependencies and exception handlers as the real backends.

use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    HttpRequest, HttpResponse, ServerError, StatusCode,
    adapter::{Backend, ServeOptions, Serving},
    application::{Plan, PlannedRoute},
    contracts::{BackendKind, Capability},
    routing::match_path,
    server::ServerControl,
};

#[derive(Debug, Default, Clone)]
pub struct SimulatorBackend {
    plan: Arc<RwLock<Option<Arc<Plan>>>>,
}

impl Backend for SimulatorBackend {
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
        log::debug!("serve: installing {} simulated route(s)", plan.routes.len());
        *self.plan.write().unwrap_or_else(PoisonError::into_inner) = Some(plan);

        let installed = self.plan.clone();
        Ok(Serving::Detached(Box::new(move || {
            log::debug!("serve: uninstalling simulated routes");
            *installed.write().unwrap_or_else(PoisonError::into_inner) = None;
        })))
    }
}

impl SimulatorBackend {
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.installed().is_some()
    }

    fn installed(&self) -> Option<Arc<Plan>> {
        self.plan
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dispatches `request` on the calling thread, blocking until the
    /// response is ready.
    ///
    /// # Errors
    ///
    /// * [`ServerError::NotRunning`] before `start_server` or after
    ///   `stop_server`
    pub fn simulate(&self, request: HttpRequest) -> Result<HttpResponse, ServerError> {
        futures::executor::block_on(self.dispatch(request))
    }

    /// # Errors
    ///
    /// * [`ServerError::NotRunning`] before `start_server` or after
    ///   `stop_server`
    pub async fn dispatch(&self, mut request: HttpRequest) -> Result<HttpResponse, ServerError> {
        let plan = self.installed().ok_or(ServerError::NotRunning {
            operation: "simulate",
        })?;

        let (route, params) = match resolve(&plan, &request) {
            Resolved::Route(route, params) => (route, params),
            Resolved::MethodNotAllowed(allowed) => {
                log::debug!(
                    "dispatch: {} {} not allowed",
                    request.method(),
                    request.path()
                );
                return Ok(HttpResponse::method_not_allowed(&allowed));
            }
            Resolved::NotFound => {
                log::debug!("dispatch: no route for {}", request.path());
                return Ok(HttpResponse::not_found());
            }
        };

        let size = request.body().map_or(0, bytes::Bytes::len);
        if size > plan.settings.max_body_size {
            log::debug!(
                "dispatch: {size} byte body exceeds the {} byte limit",
                plan.settings.max_body_size
            );
            return Ok(HttpResponse::new(StatusCode::ContentTooLarge));
        }

        log::trace!(
            "dispatch: {} {} -> {}",
            request.method(),
            request.path(),
            route.path
        );
        request.set_path_params(params.into_iter().collect());
        Ok((route.endpoint)(request).await)
    }
}

enum Resolved<'a> {
    Route(&'a PlannedRoute, Vec<(String, String)>),
    MethodNotAllowed(Vec<crate::Method>),
    NotFound,
}

/// Static segments win over parameters, the way the real routers rank them.
fn resolve<'a>(plan: &'a Plan, request: &HttpRequest) -> Resolved<'a> {
    let mut candidates = plan
        .routes
        .iter()
        .filter_map(|route| match_path(&route.path, request.path()).map(|params| (route, params)))
        .collect::<Vec<_>>();

    if candidates.is_empty() {
        return Resolved::NotFound;
    }
    candidates.sort_by_key(|(_, params)| params.len());

    let method = request.method();
    match candidates
        .iter()
        .position(|(route, _)| route.methods.contains(&method))
    {
        Some(index) => {
            let (route, params) = candidates.swap_remove(index);
            Resolved::Route(route, params)
        }
        None => Resolved::MethodNotAllowed(plan.allowed_methods(request.path())),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        IntoHandler as _, Method, RouteOptions, RouterGroupOptions, application::Application,
        routing::Route,
    };

    fn installed(app: &Application) -> SimulatorBackend {
        let backend = SimulatorBackend::default();
        let control = ServerControl::new();
        let options = ServeOptions {
            host: String::new(),
            port: 0,
            workers: None,
            shutdown_timeout: std::time::Duration::ZERO,
        };
        assert!(matches!(
            backend.serve(Arc::new(app.plan().unwrap()), &options, &control),
            Ok(Serving::Detached(_))
        ));
        backend
    }

    fn named(name: &'static str) -> crate::Handler {
        (move |req: HttpRequest| async move {
            let id = req.path_param("id").unwrap_or("-").to_string();
            Ok(HttpResponse::ok().with_body(format!("{name} {id}")))
        })
        .into_handler()
    }

    #[test_log::test]
    fn simulate_before_start_is_not_running() {
        let backend = SimulatorBackend::default();
        let err = backend
            .simulate(HttpRequest::new(Method::Get, "/"))
            .unwrap_err();
        assert_eq!(err.to_string(), "simulate: the server is not running");
    }

    #[test_log::test]
    fn static_segments_win_over_parameters() {
        let mut app = Application::default();
        app.add_group("/users", "Users", RouterGroupOptions::default())
            .unwrap();
        for (path, name) in [("/{id}", "one"), ("/me", "me")] {
            app.add_group_route(
                "test",
                "Users",
                Route::new(path, named(name), RouteOptions::default()),
            )
            .unwrap();
        }
        let backend = installed(&app);

        let res = backend
            .simulate(HttpRequest::new(Method::Get, "/users/me"))
            .unwrap();
        assert_eq!(res.body_text(), Some("me -"));

        let res = backend
            .simulate(HttpRequest::new(Method::Get, "/users/42"))
            .unwrap();
        assert_eq!(res.body_text(), Some("one 42"));
    }

    #[test_log::test]
    fn wrong_method_is_405_and_unknown_path_is_404() {
        let mut app = Application::default();
        app.add_route(Route::new(
            "/items",
            named("items"),
            RouteOptions::default().methods([Method::Get, Method::Post]),
        ));
        let backend = installed(&app);

        let res = backend
            .simulate(HttpRequest::new(Method::Delete, "/items"))
            .unwrap();
        assert_eq!(res.status_code, StatusCode::MethodNotAllowed);
        assert_eq!(res.header("allow"), Some("GET, POST"));

        let res = backend
            .simulate(HttpRequest::new(Method::Get, "/missing"))
            .unwrap();
        assert_eq!(res.status_code, StatusCode::NotFound);
    }

    #[test_log::test]
    fn oversized_body_is_413() {
        let mut app = Application::default();
        app.settings_mut().max_body_size = 16;
        app.add_route(Route::new(
            "/upload",
            named("upload"),
            RouteOptions::with_method(Method::Post),
        ));
        let backend = installed(&app);

        let res = backend
            .simulate(HttpRequest::new(Method::Post, "/upload").with_body(vec![0_u8; 17]))
            .unwrap();
        assert_eq!(res.status_code, StatusCode::ContentTooLarge);

        let res = backend
            .simulate(HttpRequest::new(Method::Post, "/upload").with_body(vec![0_u8; 16]))
            .unwrap();
        assert_eq!(res.status_code, StatusCode::Ok);
    }
}
