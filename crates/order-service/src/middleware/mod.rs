//! HTTP 中间件

mod auth;

pub use auth::{AuthenticatedUser, auth_middleware};
