//! Common API utilities and shared types

use serde::Deserialize;

/// Default page number (1-indexed)
pub fn default_page() -> i64 {
    1
}

/// Default page size for the public user listing
pub fn default_limit() -> i64 {
    10
}

/// Pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}
