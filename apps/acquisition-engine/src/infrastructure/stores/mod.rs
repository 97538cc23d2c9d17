//! Session Stores
//!
//! Adapters for the local and remote persistence ports.

mod file;
mod memory;
mod rest;

pub use file::FileLocalStore;
pub use memory::{InMemoryLocalStore, InMemoryRemoteStore};
pub use rest::RestRemoteStore;
