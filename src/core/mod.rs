pub mod balancer;
pub mod gateway;
pub mod listen_path;
pub mod register;
pub mod reverse_proxy;
pub mod route_definition;

pub use balancer::{Balancer, BalancerError, BalancerFactory};
pub use gateway::{GatewayService, ReloadReport};
pub use listen_path::ListenPathMatcher;
pub use register::{METHOD_ALL, Register, RegisterError, RegisterOption};
pub use reverse_proxy::{BalancedReverseProxy, ProxyError};
pub use route_definition::RouterDefinition;
