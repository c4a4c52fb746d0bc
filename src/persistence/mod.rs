//! Persistence backends for the digest and monitor store contracts.

pub mod error;
pub mod sqlite;

pub use sqlite::SqliteStateRepository;
