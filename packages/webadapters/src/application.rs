//! The registry an adapter owns, and the [`Plan`] it materializes into when
//! the server starts.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    HttpRequest, HttpResponse, IntoHandler as _, Method, ServerError,
    config::{ServerConfig, ServerSettings},
    contracts::{Hook, ServerEvent},
    exception::{ExceptionHandler, ExceptionHandlers, ExceptionKey},
    handler::Endpoint,
    middleware::{Middleware, Pipeline},
    routing::{
        Route, RouteOptions, RouterGroup, RouterGroupOptions, join_path, match_path,
        normalize_prefix, param_count, path_shape,
    },
};

#[derive(Default)]
pub struct Application {
    config: ServerConfig,
    settings: ServerSettings,
    groups: Vec<RouterGroup>,
    group_index: BTreeMap<String, usize>,
    routes: Vec<Route>,
    middleware: Vec<Arc<dyn Middleware>>,
    exceptions: ExceptionHandlers,
    startup_hooks: Vec<Hook>,
    shutdown_hooks: Vec<Hook>,
}

impl Application {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub const fn config_mut(&mut self) -> &mut ServerConfig {
        &mut self.config
    }

    #[must_use]
    pub const fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub const fn settings_mut(&mut self) -> &mut ServerSettings {
        &mut self.settings
    }

    /// # Errors
    ///
    /// * [`ServerError::DuplicateGroup`] if `name` is already taken
    pub fn add_group(
        &mut self,
        prefix: &str,
        name: &str,
        options: RouterGroupOptions,
    ) -> Result<(), ServerError> {
        if self.group_index.contains_key(name) {
            return Err(ServerError::DuplicateGroup {
                name: name.to_string(),
            });
        }

        let group = RouterGroup::new(prefix, name, options);
        log::debug!("add_group: name={name} prefix='{}'", group.prefix());
        self.group_index.insert(name.to_string(), self.groups.len());
        self.groups.push(group);

        Ok(())
    }

    /// # Errors
    ///
    /// * [`ServerError::UnknownGroup`] if no group is named `name`
    pub fn add_group_route(
        &mut self,
        operation: &'static str,
        name: &str,
        route: Route,
    ) -> Result<(), ServerError> {
        let index = *self
            .group_index
            .get(name)
            .ok_or_else(|| ServerError::UnknownGroup {
                operation,
                name: name.to_string(),
            })?;

        log::debug!("{operation}: group={name} path='{}'", route.path);
        self.groups[index].push_route(route);

        Ok(())
    }

    pub fn add_route(&mut self, route: Route) {
        log::debug!("add_route: path='{}'", route.path);
        self.routes.push(route);
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&RouterGroup> {
        self.group_index.get(name).map(|&index| &self.groups[index])
    }

    #[must_use]
    pub fn groups(&self) -> &[RouterGroup] {
        &self.groups
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        log::debug!("add_middleware: name={}", middleware.name());
        self.middleware.push(middleware);
    }

    pub fn set_exception_handler(&mut self, key: ExceptionKey, handler: ExceptionHandler) {
        self.exceptions.insert(key, handler);
    }

    pub fn add_hook(&mut self, event: ServerEvent, hook: Hook) {
        match event {
            ServerEvent::Startup => self.startup_hooks.push(hook),
            ServerEvent::Shutdown => self.shutdown_hooks.push(hook),
        }
    }

    #[must_use]
    pub fn hooks(&self, event: ServerEvent) -> &[Hook] {
        match event {
            ServerEvent::Startup => &self.startup_hooks,
            ServerEvent::Shutdown => &self.shutdown_hooks,
        }
    }

    /// Resolves every route to its full path, composes the request pipeline
    /// and renders the docs routes.
    ///
    /// # Errors
    ///
    /// * [`ServerError::RouteConflict`] if two routes claim the same requests
    /// * [`ServerError::OpenApi`] if the OpenAPI document fails to render
    pub fn plan(&self) -> Result<Plan, ServerError> {
        let pipeline = Pipeline::new(self.middleware.clone(), self.exceptions.clone());
        let global_prefix = normalize_prefix(&self.config.prefix);
        let mut builder = PlanBuilder::default();

        for group in &self.groups {
            let prefix = format!("{global_prefix}{}", group.prefix());
            for route in group.routes() {
                let options = &route.options;
                let mut dependencies = group.options().dependencies.clone();
                dependencies.extend(options.dependencies.iter().cloned());
                let mut tags = group.tags().to_vec();
                tags.extend(options.tags.iter().cloned());

                builder.push(
                    PlannedRoute {
                        path: join_path(&prefix, &route.path),
                        methods: route.methods(),
                        group: Some(group.name().to_string()),
                        endpoint: pipeline.endpoint(
                            route.handler.clone(),
                            dependencies,
                            self.media_type_for(options),
                        ),
                    },
                    RouteDoc::new(
                        options,
                        dedup(tags),
                        group.options().include_in_schema && options.include_in_schema,
                    ),
                )?;
            }
        }

        for route in &self.routes {
            let options = &route.options;
            builder.push(
                PlannedRoute {
                    path: join_path(&global_prefix, &route.path),
                    methods: route.methods(),
                    group: None,
                    endpoint: pipeline.endpoint(
                        route.handler.clone(),
                        options.dependencies.clone(),
                        self.media_type_for(options),
                    ),
                },
                RouteDoc::new(options, dedup(options.tags.clone()), options.include_in_schema),
            )?;
        }

        for (path, response) in self.docs_routes(&builder.docs)? {
            let route = Route::new(
                path,
                (move |_req: HttpRequest| {
                    let response = response.clone();
                    async move { Ok(response) }
                })
                .into_handler(),
                RouteOptions::default().include_in_schema(false),
            );
            builder.push(
                PlannedRoute {
                    path: join_path("", &route.path),
                    methods: route.methods(),
                    group: None,
                    endpoint: pipeline.endpoint(route.handler.clone(), vec![], None),
                },
                RouteDoc::new(&route.options, vec![], false),
            )?;
        }

        log::debug!(
            "plan: {} route(s) across {} group(s) with {:?}",
            builder.routes.len(),
            self.groups.len(),
            pipeline
        );

        Ok(Plan {
            title: self.config.title.clone(),
            routes: builder.routes,
            settings: self.settings.clone(),
        })
    }

    fn media_type_for(&self, options: &RouteOptions) -> Option<String> {
        options
            .media_type
            .clone()
            .or_else(|| self.config.media_type.clone())
    }

    #[cfg(feature = "openapi")]
    fn docs_routes(&self, docs: &[RouteDoc]) -> Result<Vec<(String, HttpResponse)>, ServerError> {
        let settings = &self.config.docs;

        let Some(openapi_url) = settings.openapi_url.as_deref() else {
            if settings.docs_url.is_some() || settings.redoc_url.is_some() {
                log::warn!("plan: docs_url and redoc_url are not served without an openapi_url");
            }
            return Ok(vec![]);
        };

        let openapi_url = join_path("", openapi_url);
        let document = crate::openapi::document(&self.config, docs);
        let mut routes = vec![(
            openapi_url.clone(),
            HttpResponse::ok()
                .with_content_type("application/json")
                .with_body(document.to_json()?),
        )];

        if let Some(url) = settings.docs_url.as_deref() {
            routes.push((
                join_path("", url),
                HttpResponse::html(crate::openapi::rapidoc_html(&openapi_url)),
            ));
        }
        if let Some(url) = settings.redoc_url.as_deref() {
            routes.push((
                join_path("", url),
                HttpResponse::html(crate::openapi::redoc_html(document)),
            ));
        }

        Ok(routes)
    }

    #[cfg(not(feature = "openapi"))]
    #[allow(clippy::unnecessary_wraps)]
    fn docs_routes(&self, _docs: &[RouteDoc]) -> Result<Vec<(String, HttpResponse)>, ServerError> {
        let settings = &self.config.docs;
        if settings.openapi_url.is_some()
            || settings.docs_url.is_some()
            || settings.redoc_url.is_some()
        {
            log::warn!("plan: docs URLs are ignored without the `openapi` feature");
        }
        Ok(vec![])
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("settings", &self.settings)
            .field("groups", &self.groups)
            .field("routes", &self.routes)
            .field("middleware", &self.middleware.len())
            .field("exceptions", &self.exceptions)
            .finish_non_exhaustive()
    }
}

fn dedup(tags: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tags.into_iter().filter(|x| seen.insert(x.clone())).collect()
}

/// A route as published in the OpenAPI document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDoc {
    pub path: String,
    pub methods: Vec<Method>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub operation_id: Option<String>,
    pub tags: Vec<String>,
    pub include_in_schema: bool,
}

impl RouteDoc {
    fn new(options: &RouteOptions, tags: Vec<String>, include_in_schema: bool) -> Self {
        Self {
            path: String::new(),
            methods: vec![],
            summary: options.summary.clone(),
            description: options.description.clone(),
            operation_id: options.operation_id.clone(),
            tags,
            include_in_schema,
        }
    }
}

#[derive(Default)]
struct PlanBuilder {
    routes: Vec<PlannedRoute>,
    docs: Vec<RouteDoc>,
    claimed: BTreeSet<(Method, String)>,
    shapes: BTreeMap<String, String>,
}

impl PlanBuilder {
    fn push(&mut self, route: PlannedRoute, doc: RouteDoc) -> Result<(), ServerError> {
        let shape = path_shape(&route.path);

        if let Some(existing) = self.shapes.get(&shape).filter(|x| **x != route.path) {
            return Err(ServerError::RouteConflict {
                method: route.methods_label(),
                path: route.path.clone(),
                reason: format!("matches the same requests as '{existing}'"),
            });
        }

        for method in &route.methods {
            if !self.claimed.insert((*method, route.path.clone())) {
                return Err(ServerError::RouteConflict {
                    method: method.to_string(),
                    path: route.path.clone(),
                    reason: "registered more than once".to_string(),
                });
            }
        }

        self.shapes.insert(shape, route.path.clone());
        self.docs.push(RouteDoc {
            path: route.path.clone(),
            methods: route.methods.clone(),
            ..doc
        });
        self.routes.push(route);

        Ok(())
    }
}

/// A fully resolved route, ready to be registered with a backend.
#[derive(Clone)]
pub struct PlannedRoute {
    pub path: String,
    pub methods: Vec<Method>,
    pub group: Option<String>,
    pub endpoint: Endpoint,
}

impl PlannedRoute {
    #[must_use]
    pub fn methods_label(&self) -> String {
        self.methods
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl std::fmt::Debug for PlannedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedRoute")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// The materialized configuration handed to a backend.
#[derive(Debug, Clone)]
pub struct Plan {
    pub title: String,
    pub routes: Vec<PlannedRoute>,
    pub settings: ServerSettings,
}

impl Plan {
    /// Routes grouped by full path, fewest path parameters first. Paths with
    /// the same number of parameters keep their registration order. Routers
    /// that take the first matching path rank static segments over
    /// parameters when they register in this order.
    #[must_use]
    pub fn paths(&self) -> Vec<(&str, Vec<&PlannedRoute>)> {
        let mut paths: Vec<(&str, Vec<&PlannedRoute>)> = vec![];
        for route in &self.routes {
            match paths.iter_mut().find(|(path, _)| *path == route.path) {
                Some((_, routes)) => routes.push(route),
                None => paths.push((route.path.as_str(), vec![route])),
            }
        }
        paths.sort_by_key(|(path, _)| param_count(path));
        paths
    }

    /// Every method some route answers on `path`. Empty when no route matches
    /// it at all.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut allowed = self
            .routes
            .iter()
            .filter(|route| match_path(&route.path, path).is_some())
            .flat_map(|route| route.methods.iter().copied())
            .collect::<Vec<_>>();
        allowed.sort();
        allowed.dedup();
        allowed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::IntoHandler;

    fn route(path: &str, options: RouteOptions) -> Route {
        Route::new(
            path,
            (|_req: HttpRequest| async { Ok(HttpResponse::ok()) }).into_handler(),
            options,
        )
    }

    #[test_log::test]
    fn duplicate_group_leaves_original_untouched() {
        let mut app = Application::default();
        app.add_group("/users", "Users", RouterGroupOptions::default())
            .unwrap();
        let err = app
            .add_group("/people", "Users", RouterGroupOptions::default())
            .unwrap_err();

        assert!(matches!(err, ServerError::DuplicateGroup { name } if name == "Users"));
        assert_eq!(app.group("Users").unwrap().prefix(), "/users");
        assert_eq!(app.groups().len(), 1);
    }

    #[test_log::test]
    fn route_in_unknown_group_fails() {
        let mut app = Application::default();
        let err = app
            .add_group_route(
                "add_route_in_router_group",
                "Missing",
                route("/", RouteOptions::default()),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "add_route_in_router_group: no router group named 'Missing'"
        );
    }

    #[test_log::test]
    fn groups_keep_insertion_order() {
        let mut app = Application::default();
        for (prefix, name) in [("/b", "B"), ("/a", "A"), ("/c", "C")] {
            app.add_group(prefix, name, RouterGroupOptions::default())
                .unwrap();
        }
        let names = app
            .groups()
            .iter()
            .map(RouterGroup::name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test_log::test]
    fn plan_joins_global_and_group_prefixes() {
        let mut app = Application::default();
        app.config_mut().prefix = "/api/".to_string();
        app.add_group("/users", "Users", RouterGroupOptions::default())
            .unwrap();
        app.add_group_route("test", "Users", route("/", RouteOptions::default()))
            .unwrap();
        app.add_group_route(
            "test",
            "Users",
            route("/{id}", RouteOptions::with_method(Method::Delete)),
        )
        .unwrap();
        app.add_route(route("/health", RouteOptions::default()));

        let plan = app.plan().unwrap();
        let paths = plan
            .routes
            .iter()
            .map(|x| (x.group.as_deref(), x.path.as_str()))
            .collect::<Vec<_>>();

        assert_eq!(
            paths,
            vec![
                (Some("Users"), "/api/users/"),
                (Some("Users"), "/api/users/{id}"),
                (None, "/api/health"),
            ]
        );
    }

    #[test_log::test]
    fn same_method_and_path_conflicts() {
        let mut app = Application::default();
        app.add_route(route("/items", RouteOptions::default()));
        app.add_route(route("/items", RouteOptions::with_method(Method::Get)));

        let err = app.plan().unwrap_err();
        assert!(matches!(err, ServerError::RouteConflict { method, .. } if method == "GET"));
    }

    #[test_log::test]
    fn same_path_with_different_methods_does_not_conflict() {
        let mut app = Application::default();
        app.add_route(route("/items", RouteOptions::default()));
        app.add_route(route("/items", RouteOptions::with_method(Method::Post)));

        assert_eq!(app.plan().unwrap().routes.len(), 2);
    }

    #[test_log::test]
    fn parameter_name_mismatch_conflicts() {
        let mut app = Application::default();
        app.add_route(route("/items/{id}", RouteOptions::default()));
        app.add_route(route("/items/{name}", RouteOptions::with_method(Method::Post)));

        let err = app.plan().unwrap_err();
        assert!(matches!(err, ServerError::RouteConflict { path, .. } if path == "/items/{name}"));
    }

    #[test_log::test]
    fn paths_rank_static_segments_before_parameters_across_groups() {
        let mut app = Application::default();
        app.add_route(route("/{a}/{b}", RouteOptions::default()));
        app.add_group("/users", "Users", RouterGroupOptions::default())
            .unwrap();
        app.add_group("/users/admin", "Admin", RouterGroupOptions::default())
            .unwrap();
        app.add_group_route("test", "Users", route("/{id}", RouteOptions::default()))
            .unwrap();
        app.add_group_route("test", "Users", route("/admin/list", RouteOptions::default()))
            .unwrap();
        app.add_group_route(
            "test",
            "Users",
            route("/{id}", RouteOptions::with_method(Method::Delete)),
        )
        .unwrap();
        app.add_group_route("test", "Admin", route("/stats", RouteOptions::default()))
            .unwrap();

        let plan = app.plan().unwrap();
        let paths = plan
            .paths()
            .into_iter()
            .map(|(path, routes)| (path, routes.len()))
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                ("/users/admin/list", 1),
                ("/users/admin/stats", 1),
                ("/users/{id}", 2),
                ("/{a}/{b}", 1),
            ]
        );
    }

    #[test_log::test]
    fn allowed_methods_cover_every_matching_path() {
        let mut app = Application::default();
        app.add_route(route("/items/{id}", RouteOptions::with_method(Method::Delete)));
        app.add_route(route("/items/new", RouteOptions::default()));

        let plan = app.plan().unwrap();
        assert_eq!(
            plan.allowed_methods("/items/new"),
            vec![Method::Get, Method::Delete]
        );
        assert_eq!(plan.allowed_methods("/items/7"), vec![Method::Delete]);
        assert_eq!(plan.allowed_methods("/nowhere"), vec![]);
    }

    #[cfg(feature = "openapi")]
    #[test_log::test]
    fn docs_routes_are_planned_only_when_configured() {
        let mut app = Application::default();
        app.add_route(route("/", RouteOptions::default()));
        assert_eq!(app.plan().unwrap().routes.len(), 1);

        app.config_mut().docs.openapi_url = Some("/openapi.json".to_string());
        app.config_mut().docs.docs_url = Some("/docs".to_string());
        app.config_mut().docs.redoc_url = Some("/redoc".to_string());

        let plan = app.plan().unwrap();
        let paths = plan
            .routes
            .iter()
            .map(|x| x.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["/", "/openapi.json", "/docs", "/redoc"]);
    }
}
