//! Single-use file proxy: token registry and the HTTP endpoint that redeems tokens.

pub mod registry;
pub mod server;

pub use registry::TokenRegistry;
pub use server::{ProxyError, ProxyState, router, start_proxy_server};
