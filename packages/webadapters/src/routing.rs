//! Routes, router groups and the path rules every backend shares.
//!
//! Paths use `{name}` segments for parameters on every backend. Group
//! prefixes are normalized to a leading `/` and no trailing `/`, with the
//! root group stored as the empty prefix.

use std::sync::Arc;

use crate::{Error, HttpRequest, Method, handler::Handler};

type DependencyFn = dyn Fn(&HttpRequest) -> Result<(), Error> + Send + Sync;

/// A check run before the route handler. The first dependency that fails
/// short-circuits the request with its error.
#[derive(Clone)]
pub struct Dependency {
    name: String,
    check: Arc<DependencyFn>,
}

impl Dependency {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<(), Error> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Errors
    ///
    /// * If the dependency rejects the request
    pub fn check(&self, req: &HttpRequest) -> Result<(), Error> {
        (self.check)(req)
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RouteOptions {
    pub methods: Vec<Method>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub media_type: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub include_in_schema: bool,
    pub operation_id: Option<String>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            methods: vec![],
            summary: None,
            description: None,
            tags: vec![],
            media_type: None,
            dependencies: vec![],
            include_in_schema: true,
            operation_id: None,
        }
    }
}

impl RouteOptions {
    #[must_use]
    pub fn with_method(method: Method) -> Self {
        Self::default().method(method)
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods.extend(methods);
        self
    }

    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    #[must_use]
    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub const fn include_in_schema(mut self, include: bool) -> Self {
        self.include_in_schema = include;
        self
    }

    #[must_use]
    pub fn operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}

#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub handler: Handler,
    pub options: RouteOptions,
}

impl Route {
    #[must_use]
    pub fn new(path: impl Into<String>, handler: Handler, options: RouteOptions) -> Self {
        Self {
            path: path.into(),
            handler,
            options,
        }
    }

    /// The methods this route answers. No explicit method means `GET`.
    #[must_use]
    pub fn methods(&self) -> Vec<Method> {
        if self.options.methods.is_empty() {
            return vec![Method::Get];
        }
        let mut methods = self.options.methods.clone();
        methods.sort();
        methods.dedup();
        methods
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RouterGroupOptions {
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub include_in_schema: bool,
}

impl Default for RouterGroupOptions {
    fn default() -> Self {
        Self {
            description: None,
            tags: vec![],
            dependencies: vec![],
            include_in_schema: true,
        }
    }
}

impl RouterGroupOptions {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub const fn include_in_schema(mut self, include: bool) -> Self {
        self.include_in_schema = include;
        self
    }
}

/// A named group of routes sharing a path prefix.
#[derive(Debug, Clone)]
pub struct RouterGroup {
    name: String,
    prefix: String,
    options: RouterGroupOptions,
    routes: Vec<Route>,
}

impl RouterGroup {
    #[must_use]
    pub fn new(prefix: &str, name: impl Into<String>, options: RouterGroupOptions) -> Self {
        Self {
            name: name.into(),
            prefix: normalize_prefix(prefix),
            options,
            routes: vec![],
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub const fn options(&self) -> &RouterGroupOptions {
        &self.options
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.options.description.as_deref()
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.options.tags
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub(crate) fn push_route(&mut self, route: Route) {
        self.routes.push(route);
    }
}

/// Leading `/`, no trailing `/`; the root prefix is `""`.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Joins a normalized prefix and a route path. A trailing `/` on the route
/// path is kept, so `("/users", "/")` is `/users/`.
#[must_use]
pub fn join_path(prefix: &str, path: &str) -> String {
    let path = path.trim();
    let joined = if path.is_empty() {
        prefix.to_string()
    } else if path.starts_with('/') {
        format!("{prefix}{path}")
    } else {
        format!("{prefix}/{path}")
    };
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// The path with every `{param}` segment replaced by `{}`. Two paths with the
/// same shape match the same requests.
#[must_use]
pub fn path_shape(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if is_param_segment(segment) {
                "{}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Number of `{param}` segments in a route path.
#[must_use]
pub fn param_count(path: &str) -> usize {
    path.split('/').filter(|x| is_param_segment(x)).count()
}

fn is_param_segment(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}

/// Matches a concrete request path against a route pattern, returning the
/// captured parameters.
#[must_use]
pub fn match_path(pattern: &str, path: &str) -> Option<Vec<(String, String)>> {
    let pattern_segments = pattern.split('/').collect::<Vec<_>>();
    let path_segments = path.split('/').collect::<Vec<_>>();

    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = vec![];

    for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
        if is_param_segment(expected) {
            if actual.is_empty() {
                return None;
            }
            params.push((
                expected[1..expected.len() - 1].to_string(),
                (*actual).to_string(),
            ));
        } else if expected != actual {
            return None;
        }
    }

    Some(params)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn prefixes_are_normalized() {
        assert_eq!(normalize_prefix("/users"), "/users");
        assert_eq!(normalize_prefix("users/"), "/users");
        assert_eq!(normalize_prefix("/api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test_log::test]
    fn join_keeps_trailing_slash_of_route_path() {
        assert_eq!(join_path("/users", "/"), "/users/");
        assert_eq!(join_path("/users", ""), "/users");
        assert_eq!(join_path("/users", "{id}"), "/users/{id}");
        assert_eq!(join_path("", "/health"), "/health");
        assert_eq!(join_path("", ""), "/");
    }

    #[test_log::test]
    fn shape_ignores_parameter_names() {
        assert_eq!(path_shape("/users/{id}"), path_shape("/users/{name}"));
        assert_eq!(path_shape("/users/{id}/posts"), "/users/{}/posts");
        assert!(path_shape("/users/{id}") != path_shape("/users/me"));
        assert_eq!(param_count("/users/{id}/posts/{post}"), 2);
        assert_eq!(param_count("/users/me"), 0);
    }

    #[test_log::test]
    fn match_path_captures_parameters() {
        assert_eq!(
            match_path("/users/{id}/posts/{post}", "/users/7/posts/9"),
            Some(vec![
                ("id".to_string(), "7".to_string()),
                ("post".to_string(), "9".to_string()),
            ])
        );
        assert_eq!(match_path("/users/", "/users/"), Some(vec![]));
        assert_eq!(match_path("/users/", "/users"), None);
        assert_eq!(match_path("/users/{id}", "/users/"), None);
    }

    #[test_log::test]
    fn route_without_methods_answers_get() {
        let route = Route::new(
            "/",
            crate::IntoHandler::into_handler(|_req: HttpRequest| async {
                Ok(crate::HttpResponse::ok())
            }),
            RouteOptions::default(),
        );
        assert_eq!(route.methods(), vec![Method::Get]);
    }
}
