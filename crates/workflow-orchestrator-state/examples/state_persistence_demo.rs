// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Demonstrates the `StateStore` lifecycle against an in-memory database:
//! create a run, checkpoint it a couple of times, mark it completed, then
//! read the history back.

use serde_json::json;
use uuid::Uuid;
use workflow_orchestrator_state::{CheckpointRecord, ExecutionRecord, RunStatus, SqliteStateStore, StateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = SqliteStateStore::new(":memory:").await?;

    let run_id = Uuid::new_v4();
    let record = ExecutionRecord::new(run_id, "send-welcome-email");
    store.create_execution(&record).await?;
    println!("started run {run_id}");

    store
        .save_checkpoint(&CheckpointRecord::new(run_id, "lookup-user", json!({"userId": "u-1"})))
        .await?;
    store
        .save_checkpoint(&CheckpointRecord::new(run_id, "send-email", json!({"userId": "u-1", "sent": true})))
        .await?;

    store
        .update_execution(run_id, RunStatus::Completed, json!({"userId": "u-1", "sent": true}), None)
        .await?;

    let history = store.get_checkpoints(run_id).await?;
    println!("{} checkpoints recorded", history.len());

    let resolved = store.resolve_prefix(&run_id.to_string()[..8]).await?;
    assert_eq!(resolved, run_id);

    let stats = store.get_stats().await?;
    println!("stats: {stats:?}");

    store.close().await;
    Ok(())
}
