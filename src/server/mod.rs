pub mod config;
mod export_routes;
mod http_layers;
#[allow(clippy::module_inception)]
pub mod server;
pub mod state;
mod upload_routes;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
