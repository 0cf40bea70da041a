pub mod config_provider;
pub mod router;
pub mod transport;
