// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bridges a [`StateStore`] to the core crate's [`CheckpointSink`]
//! contract. Lives here rather than in `workflow-orchestrator-state`
//! because it depends on both crates — keeping the state crate's own
//! dependency graph free of a cycle back onto core.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;
use workflow_orchestrator_core::dispatcher::CheckpointSink;
use workflow_orchestrator_core::error::{OrchestratorError, Result};
use workflow_orchestrator_state::{CheckpointRecord, StateStore};

pub struct StateStoreCheckpointSink {
    store: Arc<dyn StateStore>,
}

impl StateStoreCheckpointSink {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CheckpointSink for StateStoreCheckpointSink {
    async fn save_checkpoint(&self, run_id: Uuid, step_id: &str, variables: serde_json::Value) -> Result<()> {
        self.store
            .save_checkpoint(&CheckpointRecord::new(run_id, step_id, variables))
            .await
            .map_err(|err| OrchestratorError::Store(err.to_string()))
    }
}
