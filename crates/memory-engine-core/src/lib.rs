//! # Memory Engine Core
//!
//! Runtime-agnostic logic for Memory Engine: data models, chunking, the
//! storage abstraction, embedding orchestration, and the vector / keyword /
//! hybrid ranking algorithms.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Concrete storage
//! backends that need a database and embedding providers that need the
//! network live in the `memory-engine` app crate.

pub mod chunk;
pub mod embedding;
pub mod embedding_manager;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{MemoryError, Result};
