//! sepa_ledger Library
//!
//! Banking front end over an external double-entry ledger: SEPA transfers
//! routed through suspense accounts, and a CDC dispatcher feeding audit and
//! banking handlers. Re-exports modules for integration testing.

pub mod accounts;
pub mod api;
pub mod audit;
pub mod cdc;
pub mod config;
pub mod db;
pub mod directory;
pub mod domain;
pub mod handlers;
pub mod jobs;
pub mod ledger;
pub mod sepa;

mod error;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorResponse};
