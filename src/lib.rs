//! pollkv: single-threaded in-memory key-value server
//!
//! Clients speak a little-endian length-prefixed binary protocol over TCP.
//! Keys hold either a byte string or a sorted set.
//!
//! # Architecture
//!
//! - One mio event loop owns every connection and the whole key space
//! - Pipelined requests are answered in order; a connection stops reading
//!   while its responses are unsent
//! - Hash indexes resize progressively so no insert pays for a full rehash
//! - Sorted sets pair a hash index with a rank-augmented AVL tree
//! - Large values are freed on a small background worker pool

/// Configuration management for the server
pub mod config;

/// Error types and result aliases
pub mod error;

/// Background worker threads
pub mod io;

/// Per-connection protocol state
pub mod network;

/// Wire framing, commands and replies
pub mod protocol;

/// Core server implementation
pub mod server;

/// In-memory data structures
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use server::Server;
