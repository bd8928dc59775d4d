pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod kube;
pub mod session;
pub mod store;

pub use http::{build_router, AppState};
