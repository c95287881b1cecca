use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Error, HttpRequest, HttpResponse};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

pub type RouteHandler = dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync;

/// A shared route handler.
pub type Handler = Arc<RouteHandler>;

pub type EndpointFuture = Pin<Box<dyn Future<Output = HttpResponse> + Send>>;

/// A handler that has passed through the middleware chain and the exception
/// handlers. It always produces a response.
pub type Endpoint = Arc<dyn Fn(HttpRequest) -> EndpointFuture + Send + Sync>;

/// Trait for converting functions into route handlers
///
/// Implemented for every `Fn(HttpRequest) -> impl Future<Output =
/// Result<HttpResponse, Error>>`, so plain `async` closures can be registered
/// directly.
pub trait IntoHandler {
    fn into_handler(self) -> Handler;
}

impl<F, Fut> IntoHandler for F
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    fn into_handler(self) -> Handler {
        Arc::new(move |req: HttpRequest| -> HandlerFuture { Box::pin((self)(req)) })
    }
}
