//! API server and routes

pub mod extractors;
pub mod middleware;
mod server;
pub mod types;

pub use server::ApiServer;
