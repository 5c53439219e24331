//! API module
//!
//! HTTP endpoints over the SEPA pipeline and customer accounts.

pub mod middleware;
pub mod routes;

pub use routes::{build_router, create_router, AppState};
