//! Reusable route middleware.
//!
//! Each function returns a [`Middleware`] constructor that can be attached to
//! a [`RouterDefinition`](crate::core::RouterDefinition). Constructors are
//! stateless apart from their captured configuration.
use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{
    Request, Response,
    header::{HeaderName, HeaderValue},
};

use crate::ports::router::{BoxedHandler, Middleware, ProxyHandler};

struct RequestTiming {
    inner: BoxedHandler,
}

#[async_trait]
impl ProxyHandler for RequestTiming {
    async fn serve(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let start = Instant::now();
        let method = req.method().clone();
        let uri = req.uri().clone();

        tracing::debug!("Started processing {} {}", method, uri);
        let response = self.inner.serve(req).await;

        tracing::info!(
            http.method = %method,
            http.path = uri.path(),
            http.status_code = response.status().as_u16(),
            elapsed = ?start.elapsed(),
            "Completed request"
        );
        response
    }
}

/// Log method, path, status and latency of every request.
pub fn request_timing() -> Middleware {
    Middleware::new(|inner| Arc::new(RequestTiming { inner }))
}

struct ResponseHeader {
    inner: BoxedHandler,
    name: HeaderName,
    value: HeaderValue,
}

#[async_trait]
impl ProxyHandler for ResponseHeader {
    async fn serve(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let mut response = self.inner.serve(req).await;
        response
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
        response
    }
}

/// Set a fixed header on every response, replacing any upstream value.
pub fn response_header(name: HeaderName, value: HeaderValue) -> Middleware {
    Middleware::new(move |inner| {
        Arc::new(ResponseHeader {
            inner,
            name: name.clone(),
            value: value.clone(),
        })
    })
}

struct StripRequestHeader {
    inner: BoxedHandler,
    name: HeaderName,
}

#[async_trait]
impl ProxyHandler for StripRequestHeader {
    async fn serve(&self, mut req: Request<AxumBody>) -> Response<AxumBody> {
        req.headers_mut().remove(&self.name);
        self.inner.serve(req).await
    }
}

/// Drop a request header before it reaches the handler.
pub fn strip_request_header(name: HeaderName) -> Middleware {
    Middleware::new(move |inner| {
        Arc::new(StripRequestHeader {
            inner,
            name: name.clone(),
        })
    })
}

struct RequestHeader {
    inner: BoxedHandler,
    name: HeaderName,
    value: HeaderValue,
}

#[async_trait]
impl ProxyHandler for RequestHeader {
    async fn serve(&self, mut req: Request<AxumBody>) -> Response<AxumBody> {
        req.headers_mut()
            .insert(self.name.clone(), self.value.clone());
        self.inner.serve(req).await
    }
}

/// Set a fixed header on every request before it reaches the handler.
pub fn request_header(name: HeaderName, value: HeaderValue) -> Middleware {
    Middleware::new(move |inner| {
        Arc::new(RequestHeader {
            inner,
            name: name.clone(),
            value: value.clone(),
        })
    })
}

struct StripResponseHeader {
    inner: BoxedHandler,
    name: HeaderName,
}

#[async_trait]
impl ProxyHandler for StripResponseHeader {
    async fn serve(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let mut response = self.inner.serve(req).await;
        response.headers_mut().remove(&self.name);
        response
    }
}

/// Drop a header from every response.
pub fn strip_response_header(name: HeaderName) -> Middleware {
    Middleware::new(move |inner| {
        Arc::new(StripResponseHeader {
            inner,
            name: name.clone(),
        })
    })
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;

    use super::*;
    use crate::ports::router::{chain, handler_fn};

    fn echo_header(name: &'static str) -> BoxedHandler {
        handler_fn(move |req: Request<AxumBody>| async move {
            let seen = req
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("absent")
                .to_string();
            Response::new(AxumBody::from(seen))
        })
    }

    #[tokio::test]
    async fn test_response_header_overrides_upstream() {
        let upstream = handler_fn(|_req| async {
            Response::builder()
                .header("x-served-by", "upstream")
                .body(AxumBody::empty())
                .unwrap()
        });
        let handler = chain(
            &[response_header(
                HeaderName::from_static("x-served-by"),
                HeaderValue::from_static("gateway"),
            )],
            upstream,
        );

        let response = handler.serve(Request::new(AxumBody::empty())).await;
        assert_eq!(response.headers()["x-served-by"], "gateway");
    }

    #[tokio::test]
    async fn test_strip_request_header() {
        use http_body_util::BodyExt;

        let handler = chain(
            &[strip_request_header(HeaderName::from_static("authorization"))],
            echo_header("authorization"),
        );
        let req = Request::builder()
            .header("authorization", "Bearer secret")
            .body(AxumBody::empty())
            .unwrap();

        let response = handler.serve(req).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"absent");
    }

    #[tokio::test]
    async fn test_request_header_replaces_client_value() {
        use http_body_util::BodyExt;

        let handler = chain(
            &[request_header(
                HeaderName::from_static("x-tenant"),
                HeaderValue::from_static("internal"),
            )],
            echo_header("x-tenant"),
        );
        let req = Request::builder()
            .header("x-tenant", "spoofed")
            .body(AxumBody::empty())
            .unwrap();

        let response = handler.serve(req).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"internal");
    }

    #[tokio::test]
    async fn test_strip_response_header() {
        let upstream = handler_fn(|_req| async {
            Response::builder()
                .header("server", "legacy/1.0")
                .header("content-type", "text/plain")
                .body(AxumBody::empty())
                .unwrap()
        });
        let handler = chain(
            &[strip_response_header(HeaderName::from_static("server"))],
            upstream,
        );

        let response = handler.serve(Request::new(AxumBody::empty())).await;
        assert!(response.headers().get("server").is_none());
        assert_eq!(response.headers()["content-type"], "text/plain");
    }

    #[tokio::test]
    async fn test_request_timing_passes_response_through() {
        let handler = chain(
            &[request_timing()],
            handler_fn(|_req| async {
                let mut response = Response::new(AxumBody::empty());
                *response.status_mut() = StatusCode::CREATED;
                response
            }),
        );

        let response = handler.serve(Request::new(AxumBody::empty())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
