// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A minimal filesystem-backed [`WorkflowLoader`]: reads a YAML document
//! from disk and parses it with `serde_yaml` against the core crate's
//! `Workflow` model. This is a CLI convenience for the `workflow` step
//! kind's nested-call support, not a stand-in for a real workflow
//! authoring/parsing surface — that parser is out of scope here, per the
//! same boundary that keeps the real adapter library out of
//! `workflow-orchestrator-actions`.

use async_trait::async_trait;
use std::path::PathBuf;
use workflow_orchestrator_core::dispatcher::WorkflowLoader;
use workflow_orchestrator_core::error::{OrchestratorError, Result};
use workflow_orchestrator_core::workflow::Workflow;

pub struct YamlFileLoader {
    base_dir: PathBuf,
}

impl YamlFileLoader {
    /// `base_dir` anchors relative `workflowPath` values from a `workflow`
    /// step — the same directory the top-level workflow file was read
    /// from, so nested calls can sit alongside it.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }
}

#[async_trait]
impl WorkflowLoader for YamlFileLoader {
    async fn load(&self, path: &str) -> Result<Workflow> {
        let resolved = self.base_dir.join(path);
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|err| OrchestratorError::other(format!("reading workflow file '{}': {err}", resolved.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|err| OrchestratorError::other(format!("parsing workflow file '{}': {err}", resolved.display())))
    }
}
