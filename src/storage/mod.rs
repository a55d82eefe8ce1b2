//! Durable storage: the object store abstraction, its SQLite and in-memory
//! backends, and the job key layout built on top of them.

mod database;
pub mod jobs;
mod object_store;

pub use database::Database;
pub use object_store::{ListPage, MemoryObjectStore, ObjectStore};
