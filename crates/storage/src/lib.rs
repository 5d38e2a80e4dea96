//! Storage abstraction and implementations for rota.
//!
//! This crate provides a trait-based storage interface with an in-memory
//! backend and a file-per-entity JSON backend.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;

pub use trait_::{Storage, StorageError, Result};
pub use memory::MemoryStorage;
pub use json_storage::JsonStorage;
