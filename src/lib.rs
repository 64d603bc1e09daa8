//! minco backend: bearer-token authentication gates in front of a small task API.

pub mod config;
pub mod error;
pub mod identity;
pub mod security;
pub mod server;
pub mod tasks;
