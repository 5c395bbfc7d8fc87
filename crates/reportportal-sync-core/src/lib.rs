//! # reportportal-sync core
//!
//! Runtime-free building blocks of the sync engine: entity models, the
//! entity-to-document transformer, the storage and embedding traits, the
//! vector helpers, and in-memory store implementations.
//!
//! Nothing in this crate performs network or filesystem I/O. The binary
//! crate supplies the HTTP fetcher, the SQLite stores, and the orchestrator.

pub mod embedding;
pub mod models;
pub mod run;
pub mod store;
pub mod transform;
