use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Method, Request, Response};
use thiserror::Error;

/// Error type for route registration
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouterError {
    /// The path is already taken for this method, or overlaps an existing route
    #[error("Route conflict for {method} {path}: {reason}")]
    Conflict {
        method: String,
        path: String,
        reason: String,
    },

    /// The route table lock was poisoned by a panicking writer
    #[error("Route table lock poisoned")]
    Poisoned,
}

/// ProxyHandler defines the port for anything a router can dispatch a request to
#[async_trait]
pub trait ProxyHandler: Send + Sync + 'static {
    /// Serve one request. Failures are expressed as HTTP responses.
    async fn serve(&self, req: Request<AxumBody>) -> Response<AxumBody>;
}

/// A shared, type-erased handler. Cloning bumps a reference count.
pub type BoxedHandler = Arc<dyn ProxyHandler>;

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ProxyHandler for FnHandler<F>
where
    F: Fn(Request<AxumBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<AxumBody>> + Send + 'static,
{
    async fn serve(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        (self.0)(req).await
    }
}

/// Turn an async function or closure into a [`BoxedHandler`].
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(Request<AxumBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<AxumBody>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A handler-wrapping constructor attached to a route.
///
/// A chain of middleware is applied with the first constructor as the
/// outermost wrapper: `[a, b]` around `h` serves requests as `a(b(h))`.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>);

impl Middleware {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        Self(Arc::new(constructor))
    }

    /// Wrap a single handler.
    pub fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        (self.0)(handler)
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Middleware")
    }
}

/// Apply `middleware` around `handler`, first entry outermost.
pub fn chain(middleware: &[Middleware], handler: BoxedHandler) -> BoxedHandler {
    middleware
        .iter()
        .rev()
        .fold(handler, |inner, layer| layer.wrap(inner))
}

/// Router defines the port routes are registered against.
///
/// Registration takes `&self`: a router is shared behind an `Arc` while it
/// serves traffic, so implementations own their synchronisation.
pub trait Router: Send + Sync + 'static {
    /// Register `handler` for exactly one method on `path`.
    fn handle(
        &self,
        method: Method,
        path: &str,
        handler: BoxedHandler,
        middleware: &[Middleware],
    ) -> Result<(), RouterError>;

    /// Register `handler` for every method on `path`.
    fn any(
        &self,
        path: &str,
        handler: BoxedHandler,
        middleware: &[Middleware],
    ) -> Result<(), RouterError>;
}
