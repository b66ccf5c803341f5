//! Protocol translation, account pooling, and request orchestration for the
//! upstream proxy. See individual modules for component-level documentation.

pub mod account;
pub mod balancer;
pub mod compressor;
pub mod config;
pub mod error;
pub mod estimator;
pub mod executor;
pub mod retry;
pub mod router;
pub mod signature_cache;
pub mod translators;
pub mod tree;
pub mod upstream;
pub mod usage;

pub use error::ProxyError;
pub use executor::{Executor, ExecutorConfig, TokenRefresher};
