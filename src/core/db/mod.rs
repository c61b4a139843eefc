/// Database Module
///
/// This module provides the backend-independent database layer of dbbridge,
/// organized into focused submodules.
///
/// ## Architecture
///
/// - **Row Model** (`table.rs`): `DataTable`, column metadata and the column-name sanitizer
/// - **Templating** (`command.rs`): insert-command templates and value sanitizers
/// - **Contract** (`connection.rs`): the `Connection` trait and its value types
/// - **Sessions** (`session.rs`, `engine/`): worker threads owning native handles
/// - **State machine** (`link.rs`): lifecycle, ephemeral calls and cursor bookkeeping
/// - **Transfer** (`transfer.rs`): moving rows between two connections
///
/// ## Error Handling
///
/// All operations return the crate-wide `DbError`.
pub mod command;
pub mod connection;
pub mod engine;
pub mod link;
pub mod session;
pub mod table;
pub mod transfer;

pub use command::*;
pub use connection::*;
pub use table::*;
pub use transfer::*;
