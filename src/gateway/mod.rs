//! HTTP surface of the balance service

pub mod auth;
mod router;
mod server;

pub use auth::{auth_middleware, rate_limit_middleware};
pub use router::{AppState, create_router};
pub use server::{Gateway, resolver_settings};
