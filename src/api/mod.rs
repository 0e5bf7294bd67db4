//! Typed wrappers over the backend's REST surface. All calls go through the
//! [`Gateway`](crate::transport::gateway::Gateway), so they inherit signing
//! and transparent token refresh.

pub mod admin;
pub mod auth;
pub mod movies;
pub mod tmdb;
pub mod watchlist;

use serde::{Deserialize, Serialize};

fn first_page() -> u32 {
    1
}

/// Paginated listing as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page")]
    pub pages: u32,
}
