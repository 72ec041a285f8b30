//! # DHL Parcel MCP
//!
//! Parcel tracking for the DHL eCommerce consumer API, exposed to AI
//! assistants over MCP (Model Context Protocol).
//!
//! The crate authenticates with carrier account credentials, keeps a cached
//! snapshot of the account's parcels, and serves them as MCP resources and
//! tools: a full listing, single-parcel lookup by id or barcode, filtered
//! views, and concise per-parcel summaries.

pub mod cache;
pub mod client;
pub mod error;
pub mod filter;
pub mod mcp;
pub mod session;
pub mod types;

pub use error::{DhlError, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
