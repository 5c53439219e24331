//! System account directory and its durable stores

pub mod error;
pub mod postgres;
pub mod service;
pub mod store;

pub use crate::domain::{is_customer_account, is_system_account};
pub use error::DirectoryError;
pub use postgres::PgDirectoryStore;
pub use service::SystemAccountDirectory;
pub use store::{DirectoryDocument, DirectoryEntry, DirectoryStore, FileDirectoryStore, DOCUMENT_VERSION};
