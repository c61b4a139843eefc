/// Core Module for dbbridge
///
/// This module contains the fundamental components shared by every backend:
/// the database layer and error handling.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbError, Result};
