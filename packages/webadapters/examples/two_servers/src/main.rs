#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Serves the same user API from an actix server and an axum server at once.
//!
//! Both servers are configured through the same calls; only the backend
//! identifier differs. The OpenAPI document is published at `/openapi.json`
//! with `RapiDoc` at `/docs` and Redoc at `/redoc`.
//!
//! # Usage
//!
//! ```sh
//! cargo run --package webadapters_two_servers_example -- --config server.toml
//!
//! curl http://localhost:8000/users/
//! curl http://localhost:8001/users/1
//! curl -X POST -d '{"name": "Ada"}' http://localhost:8001/users/
//! ```
//!
//! Press Ctrl+C to stop both servers.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use webadapters::{
    BackendKind, Error, HttpRequest, HttpResponse, Method, RequestLogger, RouteOptions,
    RouterGroupOptions, ServerConfig, ServerError, ServerEvent, StatusCode, WebServer,
    contracts::{
        ServerDocs as _, ServerLifecycle as _, ServerMiddlewares as _, ServerRouting as _,
    },
    cors::Cors,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one API on actix and axum side by side")]
struct Args {
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "ACTIX_PORT", default_value_t = 8000)]
    actix_port: u16,

    #[arg(long, env = "AXUM_PORT", default_value_t = 8001)]
    axum_port: u16,

    /// TOML file holding the API metadata and docs URLs.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Ctrlc(#[from] ctrlc::Error),
}

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
}

fn load_config(path: Option<&Path>) -> Result<ServerConfig, AppError> {
    let mut config = match path {
        Some(path) => {
            log::debug!("load_config: reading {}", path.display());
            toml::from_str(&std::fs::read_to_string(path)?)?
        }
        None => ServerConfig {
            title: "Two Servers".to_string(),
            ..ServerConfig::default()
        },
    };

    if config.docs.openapi_url.is_none() {
        config.docs.openapi_url = Some("/openapi.json".to_string());
    }

    Ok(config)
}

async fn list_users(_req: HttpRequest) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::json(&json!([
        {"id": 1, "name": "Ada"},
        {"id": 2, "name": "Grace"},
    ])))
}

async fn get_user(req: HttpRequest) -> Result<HttpResponse, Error> {
    let id = req
        .path_param("id")
        .unwrap_or_default()
        .parse::<u64>()
        .map_err(Error::bad_request)?;

    Ok(HttpResponse::json(&json!({"id": id, "name": "Ada"})))
}

async fn create_user(req: HttpRequest) -> Result<HttpResponse, Error> {
    let user: NewUser = req.parse_json()?;
    log::info!("create_user: {}", user.name);

    Ok(HttpResponse::new(StatusCode::Created)
        .with_location("/users/3")
        .with_content_type("application/json")
        .with_body(json!({"id": 3, "name": user.name})))
}

fn build(backend: BackendKind, config: ServerConfig) -> Result<WebServer, ServerError> {
    let mut server = WebServer::with_config(backend, config)?;

    server.add_middleware(RequestLogger)?;
    server.set_cors(Cors::permissive())?;
    server.set_compression(true)?;
    server.set_docs_url(Some("/docs"))?;
    server.set_redoc_url(Some("/redoc"))?;
    server.on_event(ServerEvent::Startup, move || {
        log::info!("{backend} server is starting");
        Ok(())
    })?;
    server.on_event(ServerEvent::Shutdown, move || {
        log::info!("{backend} server has shut down");
        Ok(())
    })?;

    server.add_router_group(
        "/users",
        "UserController",
        RouterGroupOptions::default()
            .tag("users")
            .description("User accounts"),
    )?;
    server.add_route_in_router_group(
        "UserController",
        "/",
        list_users,
        RouteOptions::default().summary("List users"),
    )?;
    server.add_route_in_router_group(
        "UserController",
        "/",
        create_user,
        RouteOptions::with_method(Method::Post).summary("Create a user"),
    )?;
    server.add_route_in_router_group(
        "UserController",
        "/{id}",
        get_user,
        RouteOptions::default().summary("Fetch one user"),
    )?;

    Ok(server)
}

fn main() -> Result<(), AppError> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let actix = build(BackendKind::Actix, config.clone())?.spawn(&args.host, args.actix_port)?;
    let axum = build(BackendKind::Axum, config)?.spawn(&args.host, args.axum_port)?;

    for task in [&actix, &axum] {
        if let Some(addr) = task.local_addr() {
            log::info!("{} listening on http://{addr}", task.server().backend());
        }
    }

    let handles = [actix.server().stop_handle(), axum.server().stop_handle()];
    ctrlc::set_handler(move || {
        log::info!("Stopping servers");
        for handle in &handles {
            handle.stop();
        }
    })?;

    actix.join()?;
    axum.join()?;

    Ok(())
}
