//! Multi-branch block header chain store with reorg support.
//!
//! Headers are kept as fixed 112-byte records in a small set of
//! append-only files: one main chain plus zero or more forks, each
//! rooted at the height where it diverged from its parent. A fork that
//! outgrows its parent's branch swaps places with it, so the file named
//! `blockchain_headers` always holds whatever branch is currently
//! longest.

pub mod arith;
pub mod config;
pub mod error;
pub mod header;
pub mod network;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use header::Header;
pub use network::NetworkParams;
pub use store::{Blockchain, Registry};
