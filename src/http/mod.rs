//! HTTP surface: the rate limiting middleware and a standalone server.

mod middleware;
mod response;
mod server;

pub use middleware::{rate_limit_middleware, rate_limited, GateState};
pub use server::HttpServer;
