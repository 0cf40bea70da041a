//! Balanced reverse proxy bound to a single definition.
//!
//! Every request elects one upstream target through the definition's
//! balancer, is rewritten to point at it and is handed to the configured
//! [`Transport`]. Upstream failures never escape as errors: they become
//! `502 Bad Gateway` responses.
use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::{body::Body as AxumBody, extract::ConnectInfo};
use hyper::{
    HeaderMap, Request, Response, StatusCode, Uri,
    header::{self, HeaderName, HeaderValue},
};
use thiserror::Error;
use tracing::Instrument;

use crate::{
    adapters::http_transport::HttpTransport,
    config::{Definition, Target},
    core::{
        balancer::{Balancer, BalancerError},
        listen_path::ListenPathMatcher,
    },
    ports::{router::ProxyHandler, transport::Transport},
    tracing_setup,
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

// Connection-scoped headers that must not be forwarded (RFC 9110 §7.6.1)
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Reasons a request could not be turned into an upstream request
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Could not elect an upstream target: {0}")]
    Balancer(#[from] BalancerError),

    #[error("Invalid upstream target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Could not build upstream URI: {0}")]
    InvalidUri(String),
}

/// Request handler forwarding to the upstreams of one definition.
pub struct BalancedReverseProxy {
    definition: Arc<Definition>,
    balancer: Box<dyn Balancer>,
    listen_prefix: String,
    /// Outbound transport. Defaults to a shared pooled HTTP client; replace
    /// it before the handler is registered.
    pub transport: Arc<dyn Transport>,
}

impl BalancedReverseProxy {
    pub fn new(definition: Arc<Definition>, balancer: Box<dyn Balancer>) -> Self {
        let matcher = ListenPathMatcher::new();
        let listen_prefix = if matcher.matches(&definition.listen_path) {
            matcher.extract(&definition.listen_path)
        } else {
            definition.listen_path.clone()
        };

        Self {
            definition,
            balancer,
            listen_prefix,
            transport: HttpTransport::shared_default(),
        }
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Rewrite `req` so that it targets `target`.
    fn upstream_request(
        &self,
        req: Request<AxumBody>,
        target: &Target,
    ) -> Result<Request<AxumBody>, ProxyError> {
        let target_uri: Uri = target
            .target
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidTarget {
                target: target.target.clone(),
                reason: e.to_string(),
            })?;
        let (Some(scheme), Some(authority)) = (target_uri.scheme(), target_uri.authority())
        else {
            return Err(ProxyError::InvalidTarget {
                target: target.target.clone(),
                reason: "target must be an absolute URL".to_string(),
            });
        };

        let (mut parts, body) = req.into_parts();

        let mut path = parts.uri.path().to_string();
        if self.definition.strip_path {
            path = strip_listen_prefix(&path, &self.listen_prefix);
        }
        if self.definition.append_path {
            path = single_joining_slash(target_uri.path(), &path);
        }
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        parts.uri = Uri::builder()
            .scheme(scheme.clone())
            .authority(authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::InvalidUri(e.to_string()))?;

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let headers = &mut parts.headers;
        remove_hop_by_hop(headers);
        add_forwarded_headers(headers, client_addr);

        if !self.definition.preserve_host {
            let host = HeaderValue::from_str(authority.as_str()).map_err(|e| {
                ProxyError::InvalidTarget {
                    target: target.target.clone(),
                    reason: e.to_string(),
                }
            })?;
            headers.insert(header::HOST, host);
        }

        Ok(Request::from_parts(parts, body))
    }
}

#[async_trait]
impl ProxyHandler for BalancedReverseProxy {
    async fn serve(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let target = match self.balancer.elect(&self.definition.upstreams.targets) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(
                    listen_path = %self.definition.listen_path,
                    error = %e,
                    "Could not elect an upstream target"
                );
                return bad_gateway();
            }
        };

        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let upstream_req = match self.upstream_request(req, target) {
            Ok(upstream_req) => upstream_req,
            Err(e) => {
                tracing::error!(target = %target.target, error = %e, "Could not rewrite request");
                return bad_gateway();
            }
        };

        let span = tracing_setup::create_upstream_span(&target.target, &method, &path);
        let result = self
            .transport
            .round_trip(upstream_req)
            .instrument(span.clone())
            .await;

        match result {
            Ok(response) => {
                span.record("http.status_code", response.status().as_u16());
                response
            }
            Err(e) => {
                span.record("http.status_code", StatusCode::BAD_GATEWAY.as_u16());
                tracing::error!(target = %target.target, error = %e, "Upstream request failed");
                bad_gateway()
            }
        }
    }
}

fn bad_gateway() -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from("Bad Gateway"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

/// Remove `prefix` from `path` on a segment boundary; `/users` never strips `/usersx`.
fn strip_listen_prefix(path: &str, prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

fn single_joining_slash(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn remove_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by Connection are hop-by-hop as well
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarded_headers(headers: &mut HeaderMap, client_ip: Option<std::net::IpAddr>) {
    if let Some(ip) = client_ip {
        let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Some(host) = headers.get(header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}
