pub mod file_config_provider;
pub mod http_transport;
pub mod middleware;
pub mod route_table;

/// Re-export commonly used types from adapters
pub use file_config_provider::FileConfigProvider;
pub use http_transport::HttpTransport;
pub use middleware::*;
pub use route_table::{PathParams, RouteEntry, RouteTable};
