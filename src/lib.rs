pub mod api;
pub mod config;
pub mod error;
pub mod security;
pub mod transport;
pub mod utils;

pub use error::{GatewayError, Result};
pub use security::credential_store::{CredentialStore, Credentials};
pub use security::token_refresh::SessionEvent;
pub use transport::gateway::Gateway;
pub use transport::{ApiRequest, ApiResponse};

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
