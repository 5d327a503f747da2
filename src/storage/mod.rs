//! In-memory data structures. Everything here is owned by the event-loop
//! thread and is never shared.

pub mod avl;
pub mod hash;
pub mod hash_index;
pub mod keyspace;
pub mod zset;

pub use hash_index::{HashIndex, IndexPolicy};
pub use keyspace::{KeyTtl, Keyspace, Value};
pub use zset::{InsertOutcome, SortedSet};
