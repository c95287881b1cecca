//! The axum backend.
//!
//! Every planned path becomes one axum route carrying a method router, so
//! group prefixes are already folded into the paths. The server runs on a
//! dedicated multi-threaded tokio runtime owned by the calling thread.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{
        ConnectInfo, DefaultBodyLimit, FromRequest as _, RawPathParams, Request,
        rejection::RawPathParamsRejection,
    },
    http::{HeaderMap, HeaderName, HeaderValue},
    response::Response,
    routing::{MethodFilter, MethodRouter},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer, ExposeHeaders},
};
use webadapters_cors::{AllOrSome, Cors};

use crate::{
    Error, HttpRequest, HttpResponse, Method, ServerError,
    adapter::{Backend, ServeOptions, Serving},
    application::Plan,
    contracts::{BackendKind, Capability},
    handler::Endpoint,
    server::ServerControl,
};

#[derive(Debug, Default)]
pub struct AxumBackend;

impl Backend for AxumBackend {
    const KIND: BackendKind = BackendKind::Axum;

    fn supports(capability: Capability) -> bool {
        matches!(
            capability,
            Capability::Listener
                | Capability::Workers
                | Capability::Cors
                | Capability::Compression
                | Capability::OpenApi
        )
    }

    fn serve(
        &self,
        plan: Arc<Plan>,
        options: &ServeOptions,
        control: &ServerControl,
    ) -> Result<Serving, ServerError> {
        let router = router(&plan)?;

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("webadapters-axum");
        if let Some(workers) = options.workers {
            builder.worker_threads(workers.max(1));
        }
        let runtime = builder.build()?;

        runtime.block_on(async {
            let listener = TcpListener::bind((options.host.as_str(), options.port))
                .await
                .map_err(|source| ServerError::Bind {
                    addr: options.addr(),
                    source,
                })?;
            let local_addr = listener.local_addr()?;
            log::debug!("serve: axum listening on {local_addr}");

            let token = CancellationToken::new();
            control.mark_running(
                Some(local_addr),
                Box::new({
                    let token = token.clone();
                    move || token.cancel()
                }),
            );

            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.clone().cancelled_owned());

            let grace = options.shutdown_timeout;
            tokio::select! {
                result = server.into_future() => result?,
                () = drain_deadline(&token, grace) => {
                    log::warn!("serve: connections still open {grace:?} after shutdown, closing them");
                }
            }
            log::debug!("serve: axum server stopped");

            Ok(Serving::Finished)
        })
    }
}

async fn drain_deadline(token: &CancellationToken, grace: Duration) {
    token.cancelled().await;
    tokio::time::sleep(grace).await;
}

/// # Errors
///
/// * [`ServerError::Materialize`] if a method or path is rejected by axum
pub fn router(plan: &Plan) -> Result<Router, ServerError> {
    let mut paths: BTreeMap<&str, MethodRouter> = BTreeMap::new();

    for route in &plan.routes {
        let mut methods = paths
            .remove(route.path.as_str())
            .unwrap_or_else(MethodRouter::new);

        for method in &route.methods {
            let filter = MethodFilter::try_from(http::Method::from(*method))
                .map_err(|e| materialize(format!("{method} {}: {e}", route.path)))?;
            let endpoint = route.endpoint.clone();
            methods = methods.on(
                filter,
                move |params: Result<RawPathParams, RawPathParamsRejection>, request: Request| {
                    let endpoint = endpoint.clone();
                    async move { dispatch(&endpoint, params, request).await }
                },
            );
        }

        paths.insert(route.path.as_str(), methods);
    }

    // axum reports invalid or overlapping paths by panicking.
    let mut router = std::panic::catch_unwind(AssertUnwindSafe(|| {
        paths
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| {
                router.route(path, methods)
            })
    }))
    .map_err(|e| {
        materialize(
            e.downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| e.downcast_ref::<&str>().copied())
                .unwrap_or("invalid route table"),
        )
    })?
    .layer(DefaultBodyLimit::max(plan.settings.max_body_size));

    if plan.settings.compress {
        router = router.layer(CompressionLayer::new());
    }
    if let Some(cors) = &plan.settings.cors {
        router = router.layer(cors_layer(cors)?);
    }

    Ok(router)
}

fn materialize(message: impl Into<String>) -> ServerError {
    ServerError::Materialize {
        backend: BackendKind::Axum,
        message: message.into(),
    }
}

async fn dispatch(
    endpoint: &Endpoint,
    params: Result<RawPathParams, RawPathParamsRejection>,
    request: Request,
) -> Response {
    match to_request(params, request).await {
        Ok(request) => into_axum(endpoint(request).await),
        Err(e) => into_axum(e.into_response()),
    }
}

async fn to_request(
    params: Result<RawPathParams, RawPathParamsRejection>,
    request: Request,
) -> Result<HttpRequest, Error> {
    let method = Method::try_from(request.method()).map_err(Error::bad_request)?;
    let uri = request.uri();
    let mut req =
        HttpRequest::new(method, uri.path()).with_query_string(uri.query().unwrap_or_default());

    for (name, value) in request.headers() {
        match value.to_str() {
            Ok(value) => req = req.with_header(name.as_str(), value),
            Err(_) => log::debug!("to_request: skipping non-ASCII header '{name}'"),
        }
    }

    match params {
        Ok(params) => {
            for (name, value) in &params {
                req = req.with_path_param(name, value);
            }
        }
        Err(RawPathParamsRejection::InvalidUtf8InPathParam(e)) => {
            return Err(Error::bad_request(e));
        }
        Err(e) => log::trace!("to_request: no path params: {e}"),
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        req = req.with_remote_addr(addr.to_string());
    }

    // Honors the `DefaultBodyLimit` layer; an oversized body is rejected
    // with 413.
    let body = Bytes::from_request(request, &())
        .await
        .map_err(|e| Error::from_http_status_code_u16(e.status().as_u16(), e))?;
    if !body.is_empty() {
        req = req.with_body(body);
    }

    Ok(req)
}

fn append_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::try_from(name),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
        }
        _ => log::warn!("into_axum: skipping invalid header '{name}'"),
    }
}

fn into_axum(res: HttpResponse) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(location) = &res.location {
        append_header(&mut headers, "location", location);
    }
    if let Some(content_type) = &res.content_type {
        append_header(&mut headers, "content-type", content_type);
    }
    for (name, value) in &res.headers {
        append_header(&mut headers, name, value);
    }

    let body = res
        .body
        .map_or_else(Body::empty, |x| Body::from(x.into_bytes()));
    let mut response = Response::new(body);
    *response.status_mut() = res.status_code.into();
    *response.headers_mut() = headers;
    response
}

/// tower-http refuses wildcards together with credentials, so "any" mirrors
/// the request instead when credentials are allowed.
fn cors_layer(cors: &Cors) -> Result<CorsLayer, ServerError> {
    let credentials = cors.supports_credentials;
    let mut layer = CorsLayer::new();

    layer = match &cors.allowed_origins {
        AllOrSome::All if credentials => layer.allow_origin(AllowOrigin::mirror_request()),
        AllOrSome::All => layer.allow_origin(Any),
        AllOrSome::Some(origins) => layer.allow_origin(
            origins
                .iter()
                .map(|x| HeaderValue::from_str(x))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| materialize(format!("CORS origin: {e}")))?,
        ),
    };

    layer = match &cors.allowed_methods {
        AllOrSome::All if credentials => layer.allow_methods(AllowMethods::mirror_request()),
        AllOrSome::All => layer.allow_methods(Any),
        AllOrSome::Some(methods) => layer.allow_methods(
            methods
                .iter()
                .map(|x| http::Method::from(*x))
                .collect::<Vec<_>>(),
        ),
    };

    layer = match &cors.allowed_headers {
        AllOrSome::All if credentials => layer.allow_headers(AllowHeaders::mirror_request()),
        AllOrSome::All => layer.allow_headers(Any),
        AllOrSome::Some(headers) => layer.allow_headers(header_names(headers)?),
    };

    layer = match &cors.expose_headers {
        AllOrSome::All if credentials => {
            log::debug!("cors_layer: cannot expose every header with credentials, exposing none");
            layer
        }
        AllOrSome::All => layer.expose_headers(ExposeHeaders::any()),
        AllOrSome::Some(headers) => layer.expose_headers(header_names(headers)?),
    };

    if credentials {
        layer = layer.allow_credentials(true);
    }
    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(Duration::from_secs(u64::from(max_age)));
    }

    Ok(layer)
}

fn header_names(headers: &[String]) -> Result<Vec<HeaderName>, ServerError> {
    headers
        .iter()
        .map(|x| HeaderName::try_from(x.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| materialize(format!("CORS header: {e}")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{StatusCode, config::ServerSettings};

    fn plan_with(settings: ServerSettings) -> Plan {
        Plan {
            title: "Test".to_string(),
            routes: vec![],
            settings,
        }
    }

    #[test_log::test]
    fn responses_keep_status_headers_and_body() {
        let res = into_axum(
            HttpResponse::new(StatusCode::Created)
                .with_location("/items/1")
                .with_content_type("application/json")
                .with_header("X-Request-Id", "42")
                .with_body("{}"),
        );

        assert_eq!(res.status().as_u16(), 201);
        assert_eq!(res.headers()["location"], "/items/1");
        assert_eq!(res.headers()["content-type"], "application/json");
        assert_eq!(res.headers()["x-request-id"], "42");
    }

    #[test_log::test]
    fn invalid_response_headers_are_skipped() {
        let res = into_axum(HttpResponse::ok().with_header("bad header", "x"));
        assert_eq!(res.status().as_u16(), 200);
        assert!(res.headers().is_empty());
    }

    #[test_log::test]
    fn permissive_cors_with_credentials_is_accepted_by_tower_http() {
        let settings = ServerSettings {
            cors: Some(Cors::permissive().support_credentials()),
            compress: true,
            ..ServerSettings::default()
        };
        assert!(router(&plan_with(settings)).is_ok());
    }

    #[test_log::test]
    fn invalid_cors_origin_fails_to_materialize() {
        let settings = ServerSettings {
            cors: Some(Cors::default().allow_origin("https://bad\norigin")),
            ..ServerSettings::default()
        };
        let err = router(&plan_with(settings)).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Materialize {
                backend: BackendKind::Axum,
                ..
            }
        ));
    }
}
