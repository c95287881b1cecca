//! Framework-neutral middleware and the request pipeline built around each
//! route handler.
//!
//! Middleware registered first is the outermost: it sees the request first
//! and the response last. Handler and dependency errors are offered to the
//! exception handlers before the middleware sees the result; errors raised by
//! middleware itself are offered once more at the outermost level. Whatever
//! is still unclaimed renders as its status code and a plain text message.

use std::{future::Future, sync::Arc, time::Instant};

use crate::{
    Error, HttpRequest, HttpResponse,
    exception::ExceptionHandlers,
    handler::{Endpoint, EndpointFuture, Handler, HandlerFuture},
    routing::Dependency,
};

pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn handle(&self, req: HttpRequest, next: Next) -> HandlerFuture;
}

/// The rest of the chain after the current middleware.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    endpoint: Handler,
}

impl Next {
    pub fn run(self, req: HttpRequest) -> HandlerFuture {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                log::trace!("run: entering middleware '{}'", middleware.name());
                middleware.handle(
                    req,
                    Self {
                        index: self.index + 1,
                        ..self
                    },
                )
            }
            None => (self.endpoint)(req),
        }
    }
}

pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

/// Builds a middleware from an `async` closure taking the request and the
/// rest of the chain.
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(HttpRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(HttpRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, req: HttpRequest, next: Next) -> HandlerFuture {
        Box::pin((self.f)(req, next))
    }
}

/// Logs method, path, status and latency of every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn name(&self) -> &str {
        "request_logger"
    }

    fn handle(&self, req: HttpRequest, next: Next) -> HandlerFuture {
        let method = req.method();
        let path = req.path().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = next.run(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(res) => {
                    log::info!("{method} {path} {} {elapsed:?}", res.status_code.as_u16());
                }
                Err(e) => {
                    log::info!(
                        "{method} {path} {} {elapsed:?} ({e})",
                        e.status_code().as_u16()
                    );
                }
            }
            result
        })
    }
}

/// The middleware chain and exception handlers shared by every route of one
/// server.
#[derive(Clone)]
pub struct Pipeline {
    middleware: Arc<[Arc<dyn Middleware>]>,
    exceptions: Arc<ExceptionHandlers>,
}

impl Pipeline {
    #[must_use]
    pub fn new(middleware: Vec<Arc<dyn Middleware>>, exceptions: ExceptionHandlers) -> Self {
        Self {
            middleware: middleware.into(),
            exceptions: Arc::new(exceptions),
        }
    }

    /// Wraps a route handler with its dependencies, the exception handlers
    /// and the middleware chain.
    #[must_use]
    pub fn endpoint(
        &self,
        handler: Handler,
        dependencies: Vec<Dependency>,
        media_type: Option<String>,
    ) -> Endpoint {
        let inner = guarded(handler, dependencies.into(), self.exceptions.clone());
        let chain = self.middleware.clone();
        let exceptions = self.exceptions.clone();

        Arc::new(move |req: HttpRequest| -> EndpointFuture {
            let head = (!chain.is_empty() && !exceptions.is_empty()).then(|| req.clone());
            let next = Next {
                chain: chain.clone(),
                index: 0,
                endpoint: inner.clone(),
            };
            let exceptions = exceptions.clone();
            let media_type = media_type.clone();

            Box::pin(async move {
                let response = match next.run(req).await {
                    Ok(res) => res,
                    Err(e) => match head {
                        Some(head) => exceptions
                            .recover(&head, e)
                            .unwrap_or_else(Error::into_response),
                        None => e.into_response(),
                    },
                };
                with_default_media_type(response, media_type.as_deref())
            })
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "middleware",
                &self.middleware.iter().map(|x| x.name()).collect::<Vec<_>>(),
            )
            .field("exceptions", &self.exceptions)
            .finish()
    }
}

fn guarded(
    handler: Handler,
    dependencies: Arc<[Dependency]>,
    exceptions: Arc<ExceptionHandlers>,
) -> Handler {
    Arc::new(move |req: HttpRequest| -> HandlerFuture {
        let handler = handler.clone();
        let dependencies = dependencies.clone();
        let exceptions = exceptions.clone();

        Box::pin(async move {
            let head = (!exceptions.is_empty()).then(|| req.clone());
            let result = match dependencies.iter().try_for_each(|x| x.check(&req)) {
                Ok(()) => handler(req).await,
                Err(e) => Err(e),
            };
            match (result, head) {
                (Err(e), Some(head)) => exceptions.recover(&head, e),
                (result, _) => result,
            }
        })
    })
}

fn with_default_media_type(mut response: HttpResponse, media_type: Option<&str>) -> HttpResponse {
    if response.content_type.is_none() && response.body.is_some() {
        response.content_type = media_type.map(ToString::to_string);
    }
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{IntoHandler as _, Method, StatusCode, exception::ExceptionKey};

    fn recording(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Middleware> {
        Arc::new(from_fn(name, move |req, next: Next| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{name}:in"));
                let res = next.run(req).await;
                log.lock().unwrap().push(format!("{name}:out"));
                res
            }
        }))
    }

    fn ok_handler() -> Handler {
        (|_req: HttpRequest| async { Ok(HttpResponse::ok().with_body("ok")) }).into_handler()
    }

    fn failing_handler() -> Handler {
        (|_req: HttpRequest| async { Err(Error::not_found("gone")) }).into_handler()
    }

    #[test_log::test]
    fn first_registered_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(vec![]));
        let pipeline = Pipeline::new(
            vec![
                recording("a", log.clone()),
                recording("b", log.clone()),
                recording("c", log.clone()),
            ],
            ExceptionHandlers::default(),
        );

        let endpoint = pipeline.endpoint(ok_handler(), vec![], None);
        let res = block_on(endpoint(HttpRequest::new(Method::Get, "/")));

        assert_eq!(res.status_code, StatusCode::Ok);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:in", "b:in", "c:in", "c:out", "b:out", "a:out"]
        );
    }

    #[test_log::test]
    fn unhandled_errors_render_as_plain_text() {
        let pipeline = Pipeline::new(vec![], ExceptionHandlers::default());
        let endpoint = pipeline.endpoint(failing_handler(), vec![], None);
        let res = block_on(endpoint(HttpRequest::new(Method::Get, "/")));

        assert_eq!(res.status_code, StatusCode::NotFound);
        assert_eq!(res.body_text(), Some("gone"));
    }

    #[test_log::test]
    fn middleware_sees_responses_from_exception_handlers() {
        let seen = Arc::new(Mutex::new(None));
        let observer: Arc<dyn Middleware> = Arc::new(from_fn("observer", {
            let seen = seen.clone();
            move |req, next: Next| {
                let seen = seen.clone();
                async move {
                    let res = next.run(req).await;
                    *seen.lock().unwrap() = res.as_ref().ok().map(|x| x.status_code);
                    res
                }
            }
        }));

        let mut exceptions = ExceptionHandlers::default();
        exceptions.insert(
            ExceptionKey::Status(StatusCode::NotFound),
            Arc::new(|_req: &HttpRequest, _err: &Error| HttpResponse::new(StatusCode::Gone)),
        );

        let pipeline = Pipeline::new(vec![observer], exceptions);
        let endpoint = pipeline.endpoint(failing_handler(), vec![], None);
        let res = block_on(endpoint(HttpRequest::new(Method::Get, "/")));

        assert_eq!(res.status_code, StatusCode::Gone);
        assert_eq!(*seen.lock().unwrap(), Some(StatusCode::Gone));
    }

    #[test_log::test]
    fn failing_dependency_short_circuits_the_handler() {
        let called = Arc::new(Mutex::new(false));
        let handler = {
            let called = called.clone();
            (move |_req: HttpRequest| {
                let called = called.clone();
                async move {
                    *called.lock().unwrap() = true;
                    Ok(HttpResponse::ok())
                }
            })
            .into_handler()
        };
        let auth = Dependency::new("auth", |req| match req.header("authorization") {
            Some(_) => Ok(()),
            None => Err(Error::unauthorized("missing credentials")),
        });

        let pipeline = Pipeline::new(vec![], ExceptionHandlers::default());
        let endpoint = pipeline.endpoint(handler, vec![auth], None);

        let res = block_on(endpoint(HttpRequest::new(Method::Get, "/")));
        assert_eq!(res.status_code, StatusCode::Unauthorized);
        assert!(!*called.lock().unwrap());

        let res = block_on(endpoint(
            HttpRequest::new(Method::Get, "/").with_header("Authorization", "Bearer x"),
        ));
        assert_eq!(res.status_code, StatusCode::Ok);
        assert!(*called.lock().unwrap());
    }

    #[test_log::test]
    fn default_media_type_only_fills_in_missing_content_type() {
        let pipeline = Pipeline::new(vec![], ExceptionHandlers::default());

        let endpoint =
            pipeline.endpoint(ok_handler(), vec![], Some("application/json".to_string()));
        let res = block_on(endpoint(HttpRequest::new(Method::Get, "/")));
        assert_eq!(res.content_type.as_deref(), Some("application/json"));

        let html = (|_req: HttpRequest| async { Ok(HttpResponse::html("<p></p>")) }).into_handler();
        let endpoint = pipeline.endpoint(html, vec![], Some("application/json".to_string()));
        let res = block_on(endpoint(HttpRequest::new(Method::Get, "/")));
        assert_eq!(
            res.content_type.as_deref(),
            Some("text/html; charset=utf-8")
        );
    }
}
