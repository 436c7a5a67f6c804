//! Liveness probing for materialized resources.

mod checker;
mod http;

pub use checker::{check_with_retry, HealthChecker};
pub use http::HttpProbe;
