// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable execution and checkpoint persistence for the workflow
//! orchestrator.
//!
//! This crate has no dependency on `workflow-orchestrator-core` — it only
//! describes the [`StateStore`] contract and a SQLite-backed
//! implementation of it. The core crate's `CheckpointSink`/`WorkflowLoader`
//! traits are bridged to a `StateStore` by an adapter living in whichever
//! crate depends on both (the CLI), keeping this crate's dependency graph
//! acyclic.

pub mod models;
pub mod sqlite;
pub mod store;

pub use models::{CheckpointRecord, ExecutionRecord, ExecutionStats, RunStatus};
pub use sqlite::SqliteStateStore;
pub use store::{StateStore, StoreError};

pub type Result<T> = store::Result<T>;
