/// Native Engines
///
/// Each engine owns a native driver and knows how to serve session requests
/// over it. Backends pick an engine and configure it; they never touch
/// native handles themselves.
#[cfg(feature = "odbc")]
pub mod odbc;
pub mod sqlite;
