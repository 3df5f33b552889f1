//! Task persistence for the MediaCraft task system.
//!
//! This crate provides:
//! - The `TaskStore` contract the scheduler runs against
//! - `JsonFileStore`, flat-file JSON persistence with atomic writes
//! - `MemoryStore`, an in-memory implementation for tests

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use store::TaskStore;
