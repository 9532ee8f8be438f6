//! HTTP API: configuration, authentication, routing, and request/response mapping.

pub mod app;
pub mod authz;
pub mod settings;
pub mod context;
pub mod middleware;
