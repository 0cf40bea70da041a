//! Portico - dynamic route registration for a load-balancing HTTP gateway.
//!
//! Portico turns declarative proxy definitions into live routes. Each
//! definition names a listen path, the HTTP methods it answers and a pool of
//! upstream targets; the [`Register`] builds a balanced reverse proxy for it
//! and binds that proxy on whichever router is currently installed.
//!
//! # Features
//! - Exact and wildcard listen paths (`/users`, `/v1/*`); a wildcard path also
//!   answers its bare prefix
//! - Case-insensitive method lists with an `ALL` catch-all
//! - Round-robin, weighted and random upstream balancing
//! - Per-definition transports with shared pool tuning and optional
//!   certificate verification bypass
//! - Per-route middleware chains
//! - Atomic router swaps: rebuild the route table and replace it without
//!   pausing traffic
//! - Live configuration hot-reload & validation
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::{Definition, Register, RouteTable, RouterDefinition, Target};
//!
//! # fn main() -> Result<(), portico::RegisterError> {
//! let register: Register = Register::new([]);
//! register.update_router(Arc::new(RouteTable::new()));
//!
//! let mut definition = Definition::new("/users/*");
//! definition.upstreams.targets = vec![Target::new("http://users.internal:8080")];
//! register.add(&RouterDefinition::new(definition))?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Traits live in `ports`, their implementations in `adapters`, and the
//! registration logic in `core`. Prefer the re-exports below over reaching
//! into internal modules.
//!
//! # Error Handling
//! Library operations return domain error types built with `thiserror`.
//! Configuration loading and the binary use `eyre::Result` with context
//! attached through `WrapErr`.
pub mod config;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use adapters::{FileConfigProvider, HttpTransport, PathParams, RouteEntry, RouteTable};
pub use config::{Definition, GatewayConfig, Target, TransportConfig, Upstreams};
pub use core::{
    BalancedReverseProxy, Balancer, BalancerError, BalancerFactory, GatewayService,
    ListenPathMatcher, METHOD_ALL, Register, RegisterError, RegisterOption, RouterDefinition,
};
pub use ports::{
    router::{BoxedHandler, Middleware, ProxyHandler, Router, RouterError, handler_fn},
    transport::{Transport, TransportError, TransportParams},
};
