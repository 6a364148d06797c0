//! SheetSync binaries: configuration loading and the HTTP surface.
//!
//! The replication engines live in `sheetsync-core`.

pub mod config;
pub mod server;
