//! HTTP surface of the units gateway

mod middleware;
mod router;
mod server;

pub use middleware::{CONTENT_SECURITY_POLICY, rate_limit_middleware, security_headers_middleware};
pub use router::{AppState, RefreshParams, create_router};
pub use server::Gateway;
