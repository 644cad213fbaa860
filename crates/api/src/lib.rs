//! HTTP/websocket surface of the support chat.

pub mod adapters;
pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
pub mod transport;
