// Core infrastructure modules
pub mod config;
pub mod core;

// Backend implementations
pub mod backends;

// Shared fixtures for unit and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backends::connect;
pub use crate::core::db::{
    Command, Connection, ConnectionOptions, ConnectionState, DataTable, Transfer, TransferExt,
    TransferOutcome,
};
pub use crate::core::{DbError, Result};
