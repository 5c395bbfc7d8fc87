//! # ReportPortal Sync
//!
//! Mirrors ReportPortal entities into a local vector store so they can be
//! searched semantically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌─────────────┐   ┌────────────┐
//! │ ReportPortal │──▶│  Fetcher   │──▶│ Transform + │──▶│   SQLite   │
//! │   REST API   │   │ rate/retry │   │    Embed    │   │ vec + ckpt │
//! └──────────────┘   └────────────┘   └─────────────┘   └─────┬──────┘
//!                                                             │
//!                                                       ┌─────▼──────┐
//!                                                       │    CLI     │
//!                                                       │  (rpsync)  │
//!                                                       └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rpsync init                       # create database
//! rpsync sync run --full            # mirror everything
//! rpsync sync run                   # incremental from checkpoints
//! rpsync storage search "login timeout" --entity-type log
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Sync error taxonomy |
//! | [`rate_limit`] | Shared request budget |
//! | [`retry`] | Retry policy and backoff |
//! | [`fetcher`] | Paged HTTP fetcher |
//! | [`embedding`] | Embedding providers and batching |
//! | [`sqlite_store`] | SQLite vector and checkpoint stores |
//! | [`strategy`] | Full vs incremental sync |
//! | [`orchestrator`] | Runs sync units end to end |
//! | [`progress`] | Progress reporting on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! Data models, the transformer and the store traits live in
//! [`reportportal_sync_core`] and are re-exported as [`core`].

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod sqlite_store;
pub mod status;
pub mod storage_cmd;
pub mod strategy;
pub mod sync_cmd;

pub use reportportal_sync_core as core;
