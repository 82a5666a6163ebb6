//! HTTP API: configuration, routing, the authorization pipeline, and
//! request/response mapping.

pub mod app;
pub mod config;
pub mod context;
pub mod cookie;
pub mod middleware;
