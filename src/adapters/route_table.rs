//! Radix-tree route table.
//!
//! One tree per HTTP method plus one catch-all tree for routes registered
//! with [`Router::any`]. A method-specific route wins over a catch-all
//! route on the same path. Registration and lookup can interleave: the
//! table is shared behind an `Arc` while it serves traffic.
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use axum::body::Body as AxumBody;
use hyper::{Method, Request, Response, StatusCode};
use matchit::Router as MatchitRouter;

use crate::{
    core::listen_path::ListenPathMatcher,
    ports::router::{BoxedHandler, Middleware, Router, RouterError, chain},
};

/// Path parameters captured by the route that matched a request.
///
/// Inserted into the request extensions before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub HashMap<String, String>);

/// One registered route. `method` is `None` for catch-all routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub method: Option<Method>,
    pub path: String,
}

/// Result of a successful lookup
pub struct RouteMatch {
    pub handler: BoxedHandler,
    pub params: HashMap<String, String>,
}

#[derive(Default)]
struct Trees {
    by_method: HashMap<Method, MatchitRouter<BoxedHandler>>,
    any: MatchitRouter<BoxedHandler>,
    entries: Vec<RouteEntry>,
}

/// The gateway's concrete [`Router`].
#[derive(Default)]
pub struct RouteTable {
    trees: RwLock<Trees>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a listen path into matchit syntax.
    ///
    /// A trailing wildcard (`/v1/*`, `/v1/*rest`) becomes a named catch-all
    /// (`/v1/{*path}`, `/v1/{*rest}`). `{param}` segments pass through.
    /// Catch-alls never match an empty remainder, so [`insert`](Self::insert)
    /// binds the bare `/v1/` separately.
    pub fn to_matchit_path(listen_path: &str) -> String {
        let matcher = ListenPathMatcher::new();
        if !matcher.matches(listen_path) {
            return listen_path.to_string();
        }
        let name = matcher.wildcard_name(listen_path).unwrap_or("path");
        format!("{}/{{*{name}}}", matcher.extract(listen_path))
    }

    fn insert(
        &self,
        method: Option<Method>,
        path: &str,
        handler: BoxedHandler,
        middleware: &[Middleware],
    ) -> Result<(), RouterError> {
        let route = Self::to_matchit_path(path);
        let handler = chain(middleware, handler);
        let matcher = ListenPathMatcher::new();
        let empty_rest = matcher
            .matches(path)
            .then(|| format!("{}/", matcher.extract(path)));

        let mut trees = self.trees.write().map_err(|_| RouterError::Poisoned)?;
        let tree = match &method {
            Some(method) => trees.by_method.entry(method.clone()).or_default(),
            None => &mut trees.any,
        };
        tree.insert(route.as_str(), handler.clone())
            .map_err(|e| RouterError::Conflict {
                method: method
                    .as_ref()
                    .map_or_else(|| "ANY".to_string(), Method::to_string),
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        // An explicit route on the bare prefix keeps precedence
        if let Some(bare) = empty_rest {
            if let Err(e) = tree.insert(bare.as_str(), handler) {
                tracing::debug!(route = %bare, error = %e, "Bare wildcard prefix already bound");
            }
        }

        tracing::debug!(
            method = method.as_ref().map_or("ANY", Method::as_str),
            listen_path = path,
            route = %route,
            "Route added"
        );
        trees.entries.push(RouteEntry {
            method,
            path: path.to_string(),
        });
        Ok(())
    }

    /// Find the handler for `method` + `path`, preferring method-specific
    /// routes over catch-all routes.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let trees = self.trees.read().unwrap_or_else(PoisonError::into_inner);
        let matched = trees
            .by_method
            .get(method)
            .and_then(|tree| tree.at(path).ok())
            .or_else(|| trees.any.at(path).ok())?;

        Some(RouteMatch {
            handler: matched.value.clone(),
            params: matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        })
    }

    /// True when some other method has a route for `path`.
    fn path_known(&self, path: &str) -> bool {
        let trees = self.trees.read().unwrap_or_else(PoisonError::into_inner);
        trees.by_method.values().any(|tree| tree.at(path).is_ok())
    }

    /// Route one request: `404` for unknown paths, `405` when only other
    /// methods are registered for the path.
    pub async fn dispatch(&self, mut req: Request<AxumBody>) -> Response<AxumBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        match self.lookup(&method, &path) {
            Some(RouteMatch { handler, params }) => {
                req.extensions_mut().insert(PathParams(params));
                handler.serve(req).await
            }
            None => {
                let status = if self.path_known(&path) {
                    StatusCode::METHOD_NOT_ALLOWED
                } else {
                    StatusCode::NOT_FOUND
                };
                tracing::debug!(%method, path = %path, status = status.as_u16(), "No route");
                let mut response = Response::new(AxumBody::from(
                    status.canonical_reason().unwrap_or_default(),
                ));
                *response.status_mut() = status;
                response
            }
        }
    }

    /// Registered routes in registration order.
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    pub fn len(&self) -> usize {
        self.trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Router for RouteTable {
    fn handle(
        &self,
        method: Method,
        path: &str,
        handler: BoxedHandler,
        middleware: &[Middleware],
    ) -> Result<(), RouterError> {
        self.insert(Some(method), path, handler, middleware)
    }

    fn any(
        &self,
        path: &str,
        handler: BoxedHandler,
        middleware: &[Middleware],
    ) -> Result<(), RouterError> {
        self.insert(None, path, handler, middleware)
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use hyper::header::{HeaderName, HeaderValue};

    use super::*;
    use crate::adapters::middleware::response_header;
    use crate::ports::router::handler_fn;

    fn text(body: &'static str) -> BoxedHandler {
        handler_fn(move |_req| async move { Response::new(AxumBody::from(body)) })
    }

    async fn body_of(response: Response<AxumBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn request(method: Method, path: &str) -> Request<AxumBody> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(AxumBody::empty())
            .unwrap()
    }

    #[test]
    fn test_to_matchit_path() {
        assert_eq!(RouteTable::to_matchit_path("/users"), "/users");
        assert_eq!(RouteTable::to_matchit_path("/users/{id}"), "/users/{id}");
        assert_eq!(RouteTable::to_matchit_path("/v1/*"), "/v1/{*path}");
        assert_eq!(RouteTable::to_matchit_path("/v1/*rest"), "/v1/{*rest}");
        assert_eq!(RouteTable::to_matchit_path("/*"), "/{*path}");
    }

    #[tokio::test]
    async fn test_method_route_wins_over_any() {
        let table = RouteTable::new();
        table.any("/users", text("any"), &[]).unwrap();
        table
            .handle(Method::GET, "/users", text("get"), &[])
            .unwrap();

        assert_eq!(body_of(table.dispatch(request(Method::GET, "/users")).await).await, "get");
        assert_eq!(
            body_of(table.dispatch(request(Method::DELETE, "/users")).await).await,
            "any"
        );
    }

    #[tokio::test]
    async fn test_wildcard_captures_rest() {
        let table = RouteTable::new();
        let handler = handler_fn(|req: Request<AxumBody>| async move {
            let params = req.extensions().get::<PathParams>().cloned().unwrap_or_default();
            let rest = params.0.get("path").cloned().unwrap_or_default();
            Response::new(AxumBody::from(rest))
        });
        table
            .handle(Method::GET, "/v1/*", handler, &[])
            .unwrap();

        let response = table.dispatch(request(Method::GET, "/v1/users/42")).await;
        assert_eq!(body_of(response).await, "users/42");

        let response = table.dispatch(request(Method::GET, "/v1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wildcard_serves_empty_rest() {
        let table = RouteTable::new();
        let handler = handler_fn(|req: Request<AxumBody>| async move {
            let params = req.extensions().get::<PathParams>().cloned().unwrap_or_default();
            Response::new(AxumBody::from(format!("params={}", params.0.len())))
        });
        table
            .handle(Method::GET, "/v1/*", handler, &[])
            .unwrap();
        table.any("/*", text("root"), &[]).unwrap();

        let response = table.dispatch(request(Method::GET, "/v1/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "params=0");

        assert_eq!(body_of(table.dispatch(request(Method::GET, "/")).await).await, "root");
        assert_eq!(body_of(table.dispatch(request(Method::GET, "/x")).await).await, "root");
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_bare_prefix_keeps_its_handler() {
        let table = RouteTable::new();
        table
            .handle(Method::GET, "/v1/", text("exact"), &[])
            .unwrap();
        table
            .handle(Method::GET, "/v1/*", text("wildcard"), &[])
            .unwrap();

        assert_eq!(body_of(table.dispatch(request(Method::GET, "/v1/")).await).await, "exact");
        assert_eq!(
            body_of(table.dispatch(request(Method::GET, "/v1/a")).await).await,
            "wildcard"
        );
    }

    #[tokio::test]
    async fn test_unknown_method_is_405() {
        let table = RouteTable::new();
        table
            .handle(Method::POST, "/orders", text("post"), &[])
            .unwrap();

        let response = table.dispatch(request(Method::GET, "/orders")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let response = table.dispatch(request(Method::GET, "/nothing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let table = RouteTable::new();
        table
            .handle(Method::GET, "/users", text("a"), &[])
            .unwrap();
        let err = table
            .handle(Method::GET, "/users", text("b"), &[])
            .unwrap_err();
        assert!(matches!(err, RouterError::Conflict { .. }));

        // Same path under another method is a separate tree
        table
            .handle(Method::POST, "/users", text("c"), &[])
            .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_middleware_is_applied_per_route() {
        let table = RouteTable::new();
        let middleware = [response_header(
            HeaderName::from_static("x-route"),
            HeaderValue::from_static("users"),
        )];
        table
            .handle(Method::GET, "/users", text("get"), &middleware)
            .unwrap();
        table
            .handle(Method::GET, "/plain", text("plain"), &[])
            .unwrap();

        let response = table.dispatch(request(Method::GET, "/users")).await;
        assert_eq!(response.headers()["x-route"], "users");
        let response = table.dispatch(request(Method::GET, "/plain")).await;
        assert!(!response.headers().contains_key("x-route"));
    }

    #[test]
    fn test_routes_are_listed_in_order() {
        let table = RouteTable::new();
        table.any("/a", text("a"), &[]).unwrap();
        table
            .handle(Method::PUT, "/b", text("b"), &[])
            .unwrap();

        assert_eq!(
            table.routes(),
            vec![
                RouteEntry {
                    method: None,
                    path: "/a".to_string()
                },
                RouteEntry {
                    method: Some(Method::PUT),
                    path: "/b".to_string()
                },
            ]
        );
    }
}
