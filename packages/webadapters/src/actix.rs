//! The actix-web backend.
//!
//! actix serves the first resource whose path matches and never falls back to
//! a later one, so group prefixes are folded into flat full-path resources
//! registered fewest parameters first. Each resource is guarded by its
//! methods; a request no resource accepts reaches the default service, which
//! answers 405 or 404. The server runs on an actix `System` owned by the
//! calling thread.

use std::{sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponseBuilder, HttpServer, Resource, guard,
    http::header::{CONTENT_TYPE, LOCATION},
    middleware::{Compress, Condition},
    web,
};
use webadapters_cors::{AllOrSome, Cors};

use crate::{
    Error, HttpRequest, HttpResponse, Method, ServerError,
    adapter::{Backend, ServeOptions, Serving},
    application::{Plan, PlannedRoute},
    contracts::{BackendKind, Capability},
    handler::Endpoint,
    server::ServerControl,
};

#[derive(Debug, Default)]
pub struct ActixBackend;

impl Backend for ActixBackend {
    const KIND: BackendKind = BackendKind::Actix;

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
        let factory = move || {
            let cors = plan.settings.cors.as_ref().map(actix_cors);
            App::new()
                .configure(|cfg| register(cfg, &plan))
                .wrap(Condition::new(plan.settings.compress, Compress::default()))
                .wrap(Condition::new(cors.is_some(), cors.unwrap_or_default()))
        };

        actix_web::rt::System::new().block_on(async move {
            let mut server = HttpServer::new(factory)
                .disable_signals()
                .shutdown_timeout(whole_seconds(options.shutdown_timeout));
            if let Some(workers) = options.workers {
                server = server.workers(workers);
            }

            let server = server
                .bind((options.host.as_str(), options.port))
                .map_err(|source| ServerError::Bind {
                    addr: options.addr(),
                    source,
                })?;
            let local_addr = server.addrs().first().copied();
            log::debug!("serve: actix listening on {local_addr:?}");

            let server = server.run();
            let handle = server.handle();
            control.mark_running(
                local_addr,
                Box::new(move || {
                    // The stop command is sent eagerly; the returned future
                    // only waits for its completion.
                    drop(handle.stop(true));
                }),
            );

            server.await?;
            log::debug!("serve: actix server stopped");

            Ok(Serving::Finished)
        })
    }
}

/// actix only takes whole seconds; any fraction rounds up.
fn whole_seconds(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

fn register(cfg: &mut web::ServiceConfig, plan: &Arc<Plan>) {
    cfg.app_data(web::PayloadConfig::new(plan.settings.max_body_size));

    for (path, routes) in plan.paths() {
        cfg.service(resource(path, &routes));
    }

    let plan = plan.clone();
    cfg.default_service(web::to(move |req: actix_web::HttpRequest| {
        let allowed = plan.allowed_methods(req.path());
        async move {
            if allowed.is_empty() {
                into_actix(HttpResponse::not_found())
            } else {
                into_actix(HttpResponse::method_not_allowed(&allowed))
            }
        }
    }));
}

/// One resource holding a route per method, guarded so that a request for
/// another method moves on to the next matching resource.
fn resource(path: &str, routes: &[&PlannedRoute]) -> Resource {
    let methods = routes
        .iter()
        .flat_map(|route| route.methods.iter().map(|x| actix_web::http::Method::from(*x)))
        .collect::<Vec<_>>();
    let mut resource = web::resource(path).guard(guard::fn_guard(move |ctx| {
        methods.contains(&ctx.head().method)
    }));

    for route in routes {
        for method in &route.methods {
            let endpoint = route.endpoint.clone();
            resource = resource.route(web::route().method((*method).into()).to(
                move |req: actix_web::HttpRequest, body: web::Bytes| {
                    let endpoint = endpoint.clone();
                    async move { dispatch(&endpoint, &req, body).await }
                },
            ));
        }
    }

    resource
}

async fn dispatch(
    endpoint: &Endpoint,
    req: &actix_web::HttpRequest,
    body: web::Bytes,
) -> actix_web::HttpResponse {
    match to_request(req, body) {
        Ok(request) => into_actix(endpoint(request).await),
        Err(e) => into_actix(e.into_response()),
    }
}

fn to_request(req: &actix_web::HttpRequest, body: web::Bytes) -> Result<HttpRequest, Error> {
    let method = Method::try_from(req.method()).map_err(Error::bad_request)?;
    let mut request = HttpRequest::new(method, req.path()).with_query_string(req.query_string());

    for (name, value) in req.headers() {
        match value.to_str() {
            Ok(value) => request = request.with_header(name.as_str(), value),
            Err(_) => log::debug!("to_request: skipping non-ASCII header '{name}'"),
        }
    }
    for (name, value) in req.match_info().iter() {
        request = request.with_path_param(name, value);
    }
    if let Some(addr) = req.peer_addr() {
        request = request.with_remote_addr(addr.to_string());
    }
    if !body.is_empty() {
        request = request.with_body(body);
    }

    Ok(request)
}

fn into_actix(res: HttpResponse) -> actix_web::HttpResponse {
    let mut builder = HttpResponseBuilder::new(res.status_code.into());
    if let Some(location) = res.location {
        builder.insert_header((LOCATION, location));
    }
    if let Some(content_type) = res.content_type {
        builder.insert_header((CONTENT_TYPE, content_type));
    }
    for (name, value) in res.headers {
        builder.append_header((name, value));
    }

    match res.body {
        Some(body) => builder.body(body.into_bytes()),
        None => builder.finish(),
    }
}

fn actix_cors(cors: &Cors) -> actix_cors::Cors {
    let mut actix = actix_cors::Cors::default().max_age(cors.max_age.map(|x| x as usize));

    actix = match &cors.allowed_origins {
        AllOrSome::All => actix.allow_any_origin(),
        AllOrSome::Some(origins) => origins
            .iter()
            .fold(actix, |actix, origin| actix.allowed_origin(origin)),
    };
    actix = match &cors.allowed_methods {
        AllOrSome::All => actix.allow_any_method(),
        AllOrSome::Some(methods) => actix.allowed_methods(methods.iter().map(AsRef::as_ref)),
    };
    actix = match &cors.allowed_headers {
        AllOrSome::All => actix.allow_any_header(),
        AllOrSome::Some(headers) => actix.allowed_headers(headers),
    };
    actix = match &cors.expose_headers {
        AllOrSome::All => actix.expose_any_header(),
        AllOrSome::Some(headers) => actix.expose_headers(headers),
    };

    if cors.supports_credentials {
        actix = actix.supports_credentials();
    }

    actix
}

#[cfg(test)]
mod tests {
    use actix_web::test::{TestRequest, call_service, init_service, read_body};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        IntoHandler as _, RouteOptions, RouterGroupOptions, application::Application,
        routing::Route,
    };

    fn echo(name: &'static str) -> crate::Handler {
        (move |req: HttpRequest| async move {
            let id = req.path_param("id").unwrap_or_default().to_string();
            Ok(HttpResponse::ok().with_body(format!("{name}:{id}")))
        })
        .into_handler()
    }

    fn plan() -> Arc<Plan> {
        let mut app = Application::default();
        app.add_group("/users", "Users", RouterGroupOptions::default())
            .unwrap();
        for (path, name, options) in [
            ("/", "list", RouteOptions::default()),
            ("/{id}", "get", RouteOptions::default()),
            ("/me", "me", RouteOptions::default()),
            ("/{id}", "delete", RouteOptions::with_method(Method::Delete)),
        ] {
            app.add_group_route("test", "Users", Route::new(path, echo(name), options))
                .unwrap();
        }
        app.add_route(Route::new("/users/export", echo("export"), RouteOptions::default()));
        Arc::new(app.plan().unwrap())
    }

    /// A root route with two parameters, and a group nested under another
    /// group's prefix.
    fn overlapping_plan() -> Arc<Plan> {
        let mut app = Application::default();
        app.add_route(Route::new("/{a}/{b}", echo("root-ab"), RouteOptions::default()));
        app.add_group("/users", "Users", RouterGroupOptions::default())
            .unwrap();
        app.add_group("/users/admin", "Admin", RouterGroupOptions::default())
            .unwrap();
        for (group, path, name) in [
            ("Users", "/{id}", "users-id"),
            ("Users", "/admin/list", "users-admin-list"),
            ("Admin", "/stats", "admin-stats"),
        ] {
            app.add_group_route(
                "test",
                group,
                Route::new(path, echo(name), RouteOptions::default()),
            )
            .unwrap();
        }
        Arc::new(app.plan().unwrap())
    }

    #[test_log::test(actix_web::test)]
    async fn routes_resolve_by_full_path() {
        let plan = plan();
        let app = init_service(App::new().configure(|cfg| register(cfg, &plan))).await;

        for (method, uri, expected) in [
            (actix_web::http::Method::GET, "/users/", "list:"),
            (actix_web::http::Method::GET, "/users/7", "get:7"),
            (actix_web::http::Method::GET, "/users/me", "me:"),
            (actix_web::http::Method::DELETE, "/users/7", "delete:7"),
            (actix_web::http::Method::GET, "/users/export", "export:"),
        ] {
            let res = call_service(
                &app,
                TestRequest::default()
                    .method(method.clone())
                    .uri(uri)
                    .to_request(),
            )
            .await;
            assert_eq!(res.status().as_u16(), 200, "{method} {uri}");
            assert_eq!(read_body(res).await, expected.as_bytes());
        }
    }

    #[test_log::test(actix_web::test)]
    async fn overlapping_prefixes_pick_the_most_specific_route() {
        let plan = overlapping_plan();
        let app = init_service(App::new().configure(|cfg| register(cfg, &plan))).await;

        for (uri, expected) in [
            ("/users/7", "users-id:7"),
            ("/users/admin/list", "users-admin-list:"),
            ("/users/admin/stats", "admin-stats:"),
            ("/posts/7", "root-ab:"),
        ] {
            let res = call_service(&app, TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(res.status().as_u16(), 200, "{uri}");
            assert_eq!(read_body(res).await, expected.as_bytes(), "{uri}");
        }
    }

    #[cfg(feature = "simulator")]
    #[test_log::test(actix_web::test)]
    async fn overlapping_prefixes_resolve_like_the_simulator() {
        use crate::simulator::SimulatorBackend;

        let plan = overlapping_plan();
        let app = init_service(App::new().configure(|cfg| register(cfg, &plan))).await;

        let simulator = SimulatorBackend::default();
        let options = ServeOptions {
            host: String::new(),
            port: 0,
            workers: None,
            shutdown_timeout: Duration::ZERO,
        };
        assert!(
            simulator
                .serve(plan.clone(), &options, &ServerControl::new())
                .is_ok()
        );

        for uri in [
            "/users/7",
            "/users/admin/list",
            "/users/admin/stats",
            "/posts/7",
            "/users/admin/list/extra",
        ] {
            let res = call_service(&app, TestRequest::get().uri(uri).to_request()).await;
            let status = res.status().as_u16();
            let body = read_body(res).await;

            let simulated = simulator
                .dispatch(HttpRequest::new(Method::Get, uri))
                .await
                .unwrap();
            assert_eq!(status, u16::from(simulated.status_code), "{uri}");
            assert_eq!(
                body,
                simulated
                    .body
                    .map(crate::HttpResponseBody::into_bytes)
                    .unwrap_or_default(),
                "{uri}"
            );
        }
    }

    #[test_log::test(actix_web::test)]
    async fn unmatched_method_and_path() {
        let plan = plan();
        let app = init_service(App::new().configure(|cfg| register(cfg, &plan))).await;

        let res = call_service(&app, TestRequest::post().uri("/users/7").to_request()).await;
        assert_eq!(res.status().as_u16(), 405);
        assert_eq!(
            res.headers().get("allow").unwrap().to_str().unwrap(),
            "GET, DELETE"
        );

        let res = call_service(&app, TestRequest::get().uri("/nowhere").to_request()).await;
        assert_eq!(res.status().as_u16(), 404);
    }

    #[test_log::test(actix_web::test)]
    async fn oversized_body_is_413() {
        let mut app = Application::default();
        app.settings_mut().max_body_size = 16;
        app.add_route(Route::new(
            "/upload",
            echo("upload"),
            RouteOptions::with_method(Method::Post),
        ));
        let plan = Arc::new(app.plan().unwrap());
        let app = init_service(App::new().configure(|cfg| register(cfg, &plan))).await;

        let res = call_service(
            &app,
            TestRequest::post()
                .uri("/upload")
                .set_payload(vec![0_u8; 17])
                .to_request(),
        )
        .await;
        assert_eq!(res.status().as_u16(), 413);

        let res = call_service(
            &app,
            TestRequest::post()
                .uri("/upload")
                .set_payload(vec![0_u8; 16])
                .to_request(),
        )
        .await;
        assert_eq!(res.status().as_u16(), 200);
    }

    #[test_log::test]
    fn sub_second_shutdown_timeouts_round_up() {
        assert_eq!(whole_seconds(Duration::ZERO), 0);
        assert_eq!(whole_seconds(Duration::from_millis(500)), 1);
        assert_eq!(whole_seconds(Duration::from_secs(2)), 2);
        assert_eq!(whole_seconds(Duration::from_millis(2001)), 3);
    }

    #[test_log::test]
    fn neutral_response_headers_carry_over() {
        let res = into_actix(
            HttpResponse::temporary_redirect()
                .with_location("/login")
                .with_header("X-Trace", "abc"),
        );
        assert_eq!(res.status().as_u16(), 307);
        assert_eq!(
            res.headers().get(LOCATION).unwrap().to_str().unwrap(),
            "/login"
        );
        assert_eq!(res.headers().get("x-trace").unwrap().to_str().unwrap(), "abc");
    }
}
