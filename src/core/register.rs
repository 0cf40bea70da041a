//! Route registration binder.
//!
//! [`Register`] turns one [`RouterDefinition`] into live routes on the
//! currently installed router:
//!
//! 1. a balancer is built from `upstreams.balancing`; an unknown name fails
//!    the whole definition before the router is touched,
//! 2. a [`BalancedReverseProxy`] is built for the definition, with a
//!    transport made from the register's fixed tuning values plus the
//!    definition's `insecure_skip_verify`,
//! 3. a wildcard listen path (`/v1/*`) first binds its literal prefix
//!    (`/v1`),
//! 4. the full listen path is always bound.
//!
//! Binding a path that does not start with `/` is logged and skipped, and
//! `add` still succeeds. Only balancer, method and router failures are
//! returned. Callers may rely on that asymmetry.
//!
//! # Router swaps
//! The router reference lives in an [`ArcSwapOption`]. `update_router` is a
//! single atomic store; `add` loads one snapshot up front and uses it for
//! every registration of the call, so one definition never ends up split
//! across two routers and no lock is held while registering.
use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use hyper::Method;
use thiserror::Error;

use crate::{
    adapters::{http_transport::HttpTransport, route_table::RouteTable},
    config::{Definition, TransportConfig},
    core::{
        balancer::{Balancer, BalancerError, BalancerFactory},
        listen_path::ListenPathMatcher,
        reverse_proxy::BalancedReverseProxy,
        route_definition::RouterDefinition,
    },
    ports::{
        router::{BoxedHandler, Middleware, Router, RouterError},
        transport::TransportParams,
    },
};

/// Method token registering a route for every HTTP method
pub const METHOD_ALL: &str = "ALL";

/// Error type for [`Register::add`]
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegisterError {
    /// The definition names an unknown balancing strategy
    #[error("Could not create a balancer")]
    Balancer(#[source] BalancerError),

    /// `add` was called before any router was installed
    #[error("No router installed, call update_router before add")]
    NoRouter,

    /// A method token is not a valid HTTP method
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    /// The router rejected a registration
    #[error("Could not register route")]
    Route(#[from] RouterError),
}

/// Named construction options of a [`Register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOption {
    IdleConnectionsPerHost(usize),
    CloseIdleConnsPeriod(Duration),
    FlushInterval(Duration),
}

impl TransportConfig {
    /// Register options carrying this configuration.
    pub fn register_options(&self) -> [RegisterOption; 3] {
        [
            RegisterOption::IdleConnectionsPerHost(self.idle_connections_per_host),
            RegisterOption::CloseIdleConnsPeriod(self.close_idle_conns_period),
            RegisterOption::FlushInterval(self.flush_interval),
        ]
    }
}

/// Binds proxy definitions to the active router.
pub struct Register<R: Router = RouteTable> {
    router: ArcSwapOption<R>,
    idle_connections_per_host: usize,
    close_idle_conns_period: Duration,
    flush_interval: Duration,
}

impl<R: Router> Default for Register<R> {
    fn default() -> Self {
        Self::new([])
    }
}

impl<R: Router> From<&TransportConfig> for Register<R> {
    fn from(config: &TransportConfig) -> Self {
        Self::new(config.register_options())
    }
}

impl<R: Router> Register<R> {
    /// Create a register with no router installed. Options not given stay zero.
    pub fn new(options: impl IntoIterator<Item = RegisterOption>) -> Self {
        let mut register = Self {
            router: ArcSwapOption::empty(),
            idle_connections_per_host: 0,
            close_idle_conns_period: Duration::ZERO,
            flush_interval: Duration::ZERO,
        };

        for option in options {
            match option {
                RegisterOption::IdleConnectionsPerHost(n) => register.idle_connections_per_host = n,
                RegisterOption::CloseIdleConnsPeriod(d) => register.close_idle_conns_period = d,
                RegisterOption::FlushInterval(d) => register.flush_interval = d,
            }
        }
        register
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::from(config)
    }

    /// Replace the router used by every later `add`.
    ///
    /// Routes already bound on the previous router stay there.
    pub fn update_router(&self, router: Arc<R>) {
        self.router.store(Some(router));
    }

    /// The router currently installed, if any.
    pub fn router(&self) -> Option<Arc<R>> {
        self.router.load_full()
    }

    /// Transport parameters for the handler of `definition`.
    pub fn transport_params(&self, definition: &Definition) -> TransportParams {
        TransportParams {
            insecure_skip_verify: definition.insecure_skip_verify,
            flush_interval: self.flush_interval,
            close_idle_conns_period: self.close_idle_conns_period,
            idle_connections_per_host: self.idle_connections_per_host,
        }
    }

    /// Register a new route.
    pub fn add(&self, route: &RouterDefinition) -> Result<(), RegisterError> {
        let router = self.router.load_full().ok_or(RegisterError::NoRouter)?;
        let definition = &route.definition;

        tracing::debug!(
            balancing_alg = %definition.upstreams.balancing,
            "Using a load balancing algorithm"
        );
        let balancer = BalancerFactory::create(&definition.upstreams.balancing).map_err(|e| {
            tracing::error!(
                error = %e,
                listen_path = %definition.listen_path,
                "Could not create a balancer"
            );
            RegisterError::Balancer(e)
        })?;

        let handler: BoxedHandler = Arc::new(self.build_handler(definition.clone(), balancer));

        let matcher = ListenPathMatcher::new();
        if matcher.matches(&definition.listen_path) {
            self.do_register(
                router.as_ref(),
                &matcher.extract(&definition.listen_path),
                &handler,
                &definition.methods,
                &route.middleware,
            )?;
        }

        self.do_register(
            router.as_ref(),
            &definition.listen_path,
            &handler,
            &definition.methods,
            &route.middleware,
        )
    }

    fn build_handler(
        &self,
        definition: Arc<Definition>,
        balancer: Box<dyn Balancer>,
    ) -> BalancedReverseProxy {
        let params = self.transport_params(&definition);
        let mut handler = BalancedReverseProxy::new(definition, balancer);
        handler.transport = Arc::new(HttpTransport::new(params));
        handler
    }

    fn do_register(
        &self,
        router: &R,
        listen_path: &str,
        handler: &BoxedHandler,
        methods: &[String],
        middleware: &[Middleware],
    ) -> Result<(), RegisterError> {
        tracing::debug!(listen_path, "Registering a route");

        if !listen_path.starts_with('/') {
            tracing::error!(
                listen_path,
                "Route listen path must begin with '/'. Skipping invalid route."
            );
            return Ok(());
        }

        for method in methods {
            let method = method.to_uppercase();
            if method == METHOD_ALL {
                router.any(listen_path, handler.clone(), middleware)?;
            } else {
                let parsed = Method::from_bytes(method.as_bytes())
                    .map_err(|_| RegisterError::InvalidMethod(method.clone()))?;
                router.handle(parsed, listen_path, handler.clone(), middleware)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{config::Target, ports::transport::Transport};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Handle(Method, String),
        Any(String),
    }

    #[derive(Default)]
    struct RecordingRouter {
        calls: Mutex<Vec<Call>>,
        handlers: Mutex<Vec<BoxedHandler>>,
    }

    impl RecordingRouter {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Router for RecordingRouter {
        fn handle(
            &self,
            method: Method,
            path: &str,
            handler: BoxedHandler,
            _middleware: &[Middleware],
        ) -> Result<(), RouterError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Handle(method, path.to_string()));
            self.handlers.lock().unwrap().push(handler);
            Ok(())
        }

        fn any(
            &self,
            path: &str,
            handler: BoxedHandler,
            _middleware: &[Middleware],
        ) -> Result<(), RouterError> {
            self.calls.lock().unwrap().push(Call::Any(path.to_string()));
            self.handlers.lock().unwrap().push(handler);
            Ok(())
        }
    }

    fn route(listen_path: &str, methods: &[&str]) -> RouterDefinition {
        let mut definition = Definition::new(listen_path);
        definition.methods = methods.iter().map(|m| m.to_string()).collect();
        definition.upstreams.targets = vec![Target::new("http://upstream:8080")];
        RouterDefinition::new(definition)
    }

    fn register_with_router() -> (Register<RecordingRouter>, Arc<RecordingRouter>) {
        let register = Register::default();
        let router = Arc::new(RecordingRouter::default());
        register.update_router(router.clone());
        (register, router)
    }

    #[tokio::test]
    async fn test_add_without_router_fails() {
        let register: Register<RecordingRouter> = Register::default();
        let err = register.add(&route("/users", &["GET"])).unwrap_err();
        assert!(matches!(err, RegisterError::NoRouter));
    }

    #[tokio::test]
    async fn test_unknown_balancer_registers_nothing() {
        let (register, router) = register_with_router();
        let mut route = route("/users/*", &["GET", "ALL"]);
        Arc::make_mut(&mut route.definition).upstreams.balancing = "fastest".to_string();

        let err = register.add(&route).unwrap_err();
        assert!(matches!(
            err,
            RegisterError::Balancer(BalancerError::NotFound(ref name)) if name == "fastest"
        ));
        assert_eq!(err.to_string(), "Could not create a balancer");
        assert!(std::error::Error::source(&err).is_some());
        assert!(router.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_listen_path_is_skipped_but_ok() {
        let (register, router) = register_with_router();
        register.add(&route("users", &["GET", "POST"])).unwrap();
        assert!(router.calls().is_empty());
    }

    #[tokio::test]
    async fn test_methods_are_normalized_and_sentinel_is_independent() {
        let (register, router) = register_with_router();
        register.add(&route("/users", &["get", "POST", "all"])).unwrap();

        assert_eq!(
            router.calls(),
            vec![
                Call::Handle(Method::GET, "/users".to_string()),
                Call::Handle(Method::POST, "/users".to_string()),
                Call::Any("/users".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_methods_is_a_no_op() {
        let (register, router) = register_with_router();
        register.add(&route("/users", &[])).unwrap();
        assert!(router.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_methods_register_twice() {
        let (register, router) = register_with_router();
        register.add(&route("/users", &["GET", "get"])).unwrap();
        assert_eq!(router.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_method_token_is_returned() {
        let (register, router) = register_with_router();
        let err = register.add(&route("/users", &["GET", "NOT A METHOD"])).unwrap_err();
        assert!(matches!(err, RegisterError::InvalidMethod(ref m) if m == "NOT A METHOD"));
        assert_eq!(router.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_wildcard_binds_prefix_then_full_path_with_same_handler() {
        let (register, router) = register_with_router();
        register.add(&route("/v1/*", &["GET"])).unwrap();

        assert_eq!(
            router.calls(),
            vec![
                Call::Handle(Method::GET, "/v1".to_string()),
                Call::Handle(Method::GET, "/v1/*".to_string()),
            ]
        );
        let handlers = router.handlers.lock().unwrap();
        assert!(Arc::ptr_eq(&handlers[0], &handlers[1]));
    }

    #[tokio::test]
    async fn test_root_wildcard_skips_empty_prefix() {
        let (register, router) = register_with_router();
        register.add(&route("/*", &["GET"])).unwrap();
        assert_eq!(
            router.calls(),
            vec![Call::Handle(Method::GET, "/*".to_string())]
        );
    }

    #[tokio::test]
    async fn test_update_router_redirects_later_adds() {
        let (register, first) = register_with_router();
        register.add(&route("/a", &["GET"])).unwrap();

        let second = Arc::new(RecordingRouter::default());
        register.update_router(second.clone());
        register.add(&route("/b", &["GET"])).unwrap();

        assert_eq!(first.calls(), vec![Call::Handle(Method::GET, "/a".to_string())]);
        assert_eq!(second.calls(), vec![Call::Handle(Method::GET, "/b".to_string())]);
    }

    #[tokio::test]
    async fn test_router_errors_propagate() {
        struct Refusing;
        impl Router for Refusing {
            fn handle(
                &self,
                method: Method,
                path: &str,
                _: BoxedHandler,
                _: &[Middleware],
            ) -> Result<(), RouterError> {
                Err(RouterError::Conflict {
                    method: method.to_string(),
                    path: path.to_string(),
                    reason: "taken".to_string(),
                })
            }
            fn any(&self, _: &str, _: BoxedHandler, _: &[Middleware]) -> Result<(), RouterError> {
                Ok(())
            }
        }

        let register = Register::default();
        register.update_router(Arc::new(Refusing));
        let err = register.add(&route("/users", &["GET"])).unwrap_err();
        assert!(matches!(err, RegisterError::Route(RouterError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_transport_params_mix_definition_and_register() {
        let combos = [
            (0usize, Duration::ZERO, Duration::ZERO, false),
            (8, Duration::from_secs(30), Duration::from_millis(100), true),
            (500, Duration::from_secs(90), Duration::ZERO, false),
            (1, Duration::ZERO, Duration::from_secs(1), true),
        ];

        for (idle, close, flush, insecure) in combos {
            let register: Register<RecordingRouter> = Register::new([
                RegisterOption::IdleConnectionsPerHost(idle),
                RegisterOption::CloseIdleConnsPeriod(close),
                RegisterOption::FlushInterval(flush),
            ]);
            let mut definition = Definition::new("/users");
            definition.insecure_skip_verify = insecure;

            let handler = register.build_handler(
                Arc::new(definition),
                BalancerFactory::create("rr").unwrap(),
            );
            assert_eq!(
                handler.transport.params(),
                TransportParams {
                    insecure_skip_verify: insecure,
                    flush_interval: flush,
                    close_idle_conns_period: close,
                    idle_connections_per_host: idle,
                }
            );
        }
    }

    #[test]
    fn test_from_config_uses_transport_config() {
        let config = TransportConfig {
            idle_connections_per_host: 3,
            close_idle_conns_period: Duration::from_secs(5),
            flush_interval: Duration::from_millis(10),
        };
        let register: Register<RecordingRouter> = Register::from_config(&config);
        let params = register.transport_params(&Definition::new("/"));

        assert_eq!(params.idle_connections_per_host, 3);
        assert_eq!(params.close_idle_conns_period, Duration::from_secs(5));
        assert_eq!(params.flush_interval, Duration::from_millis(10));
        assert!(!params.insecure_skip_verify);
    }
}
