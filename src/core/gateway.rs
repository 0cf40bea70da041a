use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use axum::body::Body as AxumBody;
use hyper::{
    Request, Response,
    header::{HeaderName, HeaderValue},
};
use tracing::Instrument;

use crate::{
    adapters::{
        middleware::{
            request_header, request_timing, response_header, strip_request_header,
            strip_response_header,
        },
        route_table::RouteTable,
    },
    config::{Definition, GatewayConfig, HeaderActions, TransportConfig},
    core::{
        register::{Register, RegisterError},
        route_definition::RouterDefinition,
    },
    ports::router::Middleware,
    tracing_setup,
};

/// Summary of one reload
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// Definitions bound to the new table
    pub registered: usize,
    /// Definitions skipped because `active` is false
    pub inactive: usize,
    /// Definitions that failed, keyed by listen path
    pub failed: Vec<(String, RegisterError)>,
}

/// Serves traffic from the current route table and rebuilds it on reload.
///
/// A reload builds a fresh [`RouteTable`], installs it on the register,
/// binds every active definition and only then publishes the table.
/// In-flight requests keep the table they started on.
pub struct GatewayService {
    register: Register<RouteTable>,
    table: ArcSwap<RouteTable>,
    reload_lock: Mutex<()>,
}

impl GatewayService {
    pub fn new(transport: &TransportConfig) -> Self {
        Self {
            register: Register::from_config(transport),
            table: ArcSwap::from_pointee(RouteTable::new()),
            reload_lock: Mutex::new(()),
        }
    }

    /// Create a service and load `config` into it.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let service = Self::new(&config.transport);
        service.reload(config);
        service
    }

    /// Rebuild the route table from `config`.
    ///
    /// Transport tuning is fixed when the service is created; only the
    /// definitions are picked up again.
    pub fn reload(&self, config: &GatewayConfig) -> ReloadReport {
        // Concurrent reloads would interleave update_router and add
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let table = Arc::new(RouteTable::new());
        self.register.update_router(table.clone());

        let mut report = ReloadReport::default();
        for definition in &config.apis {
            if !definition.active {
                tracing::debug!(listen_path = %definition.listen_path, "Skipping inactive definition");
                report.inactive += 1;
                continue;
            }

            let route = RouterDefinition {
                middleware: route_middleware(definition),
                definition: Arc::new(definition.clone()),
            };
            match self.register.add(&route) {
                Ok(()) => report.registered += 1,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        name = %definition.name,
                        listen_path = %definition.listen_path,
                        "Could not register definition"
                    );
                    report.failed.push((definition.listen_path.clone(), e));
                }
            }
        }

        self.table.store(table);
        tracing::info!(
            registered = report.registered,
            inactive = report.inactive,
            failed = report.failed.len(),
            routes = self.table.load().len(),
            "Route table reloaded"
        );
        report
    }

    /// Route one request through the current table.
    pub async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let table = self.table.load_full();
        let span = tracing_setup::create_request_span(req.method().as_str(), req.uri().path());
        table.dispatch(req).instrument(span).await
    }

    /// The table currently serving traffic.
    pub fn route_table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    pub fn register(&self) -> &Register<RouteTable> {
        &self.register
    }
}

/// Middleware for one definition: request timing outermost, then the
/// configured request and response header actions. Removals run before adds
/// so a header listed in both ends up with the configured value.
fn route_middleware(definition: &Definition) -> Vec<Middleware> {
    let mut middleware = vec![request_timing()];
    push_header_actions(
        &mut middleware,
        &definition.request_headers,
        strip_request_header,
        request_header,
        &definition.listen_path,
    );
    push_header_actions(
        &mut middleware,
        &definition.response_headers,
        strip_response_header,
        response_header,
        &definition.listen_path,
    );
    middleware
}

fn push_header_actions(
    middleware: &mut Vec<Middleware>,
    actions: &HeaderActions,
    remove: fn(HeaderName) -> Middleware,
    add: fn(HeaderName, HeaderValue) -> Middleware,
    listen_path: &str,
) {
    for name in &actions.remove {
        match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => middleware.push(remove(name)),
            Err(e) => {
                tracing::warn!(%listen_path, header = %name, error = %e, "Ignoring invalid header name")
            }
        }
    }
    for (name, value) in &actions.add {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => middleware.push(add(name, value)),
            _ => tracing::warn!(%listen_path, header = %name, "Ignoring invalid header"),
        }
    }
}
