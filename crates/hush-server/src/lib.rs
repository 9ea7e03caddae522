pub mod auth;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod server;
pub mod sharing;
pub mod slug;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub sharing: sharing::SharingService,
    /// Bearer token required on project routes.
    pub api_key: String,
}

pub use error::SharingError;
pub use server::{read_key_file, resolve_api_key, resolve_data_dir, router, run, ServerConfig};
pub use sharing::SharingService;
