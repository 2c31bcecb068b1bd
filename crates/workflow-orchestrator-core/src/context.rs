// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The in-process, per-run execution context: inputs, layered variables,
//! step metadata, and the cancellation signal.
//!
//! Variables are modeled as a stack of frames (a layered environment).
//! Frame 0 is the persistent base: it only grows or rebinds existing
//! keys. Control-flow executors that introduce scoped temporaries (loop locals,
//! `error` in `catch`, parallel-branch isolation) push an additional frame
//! before running their body and pop it via [`FrameGuard`] on every exit
//! path, so the temporaries never leak into the base map.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Terminal/in-flight status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Last observed result metadata for a step, keyed by step id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepMetadataEntry {
    pub duration_ms: u64,
    pub status: String,
}

/// An explicit cancellation signal threaded through the context and every
/// blocking operation (sleeps, adapter calls). Cheap to clone; all clones
/// share the same underlying flag.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Triggers cancellation. Idempotent: a second call is a harmless no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. Intended for `select!`
    /// alongside sleeps and adapter calls.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that pops a variable frame on drop, regardless of how the
/// scope is exited (normal return, `?`, or panic unwind).
pub struct FrameGuard {
    context: ExecutionContext,
    active: bool,
}

impl FrameGuard {
    fn new(context: ExecutionContext) -> Self {
        Self { context, active: true }
    }

    /// Releases the frame early; `Drop` becomes a no-op afterwards.
    pub fn release(mut self) {
        self.pop();
        self.active = false;
    }

    fn pop(&mut self) {
        if self.active {
            let mut frames = self.context.variables.write();
            frames.pop();
            self.active = false;
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.pop();
    }
}

/// The mutable, in-process state of one workflow run.
///
/// Cheap to clone: internally `Arc`-backed, so cloning an `ExecutionContext`
/// gives a handle to the same run, not an independent copy. Use
/// [`ExecutionContext::fork`] to create the deep-cloned, independent
/// context a `parallel` branch needs.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub started_at: DateTime<Utc>,
    status: Arc<parking_lot::RwLock<RunStatus>>,
    current_step_index: Arc<AtomicUsize>,
    inputs: Arc<HashMap<String, Value>>,
    variables: Arc<parking_lot::RwLock<Vec<HashMap<String, Value>>>>,
    step_metadata: Arc<DashMap<String, StepMetadataEntry>>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid, workflow_id: impl Into<String>, inputs: HashMap<String, Value>) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            started_at: Utc::now(),
            status: Arc::new(parking_lot::RwLock::new(RunStatus::Running)),
            current_step_index: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(inputs),
            variables: Arc::new(parking_lot::RwLock::new(vec![HashMap::new()])),
            step_metadata: Arc::new(DashMap::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Builds a context sharing an existing cancellation signal rather than
    /// minting a new one — used when a `workflow`-kind step starts a
    /// nested run that must still observe the parent's cancellation.
    pub fn new_with_cancellation(
        run_id: Uuid,
        workflow_id: impl Into<String>,
        inputs: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            started_at: Utc::now(),
            status: Arc::new(parking_lot::RwLock::new(RunStatus::Running)),
            current_step_index: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(inputs),
            variables: Arc::new(parking_lot::RwLock::new(vec![HashMap::new()])),
            step_metadata: Arc::new(DashMap::new()),
            cancellation,
        }
    }

    pub fn inputs(&self) -> &HashMap<String, Value> {
        &self.inputs
    }

    pub fn status(&self) -> RunStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: RunStatus) {
        *self.status.write() = status;
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index.load(Ordering::SeqCst)
    }

    pub fn set_current_step_index(&self, idx: usize) {
        self.current_step_index.store(idx, Ordering::SeqCst);
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn record_step_metadata(&self, step_id: impl Into<String>, duration_ms: u64, status: impl Into<String>) {
        self.step_metadata.insert(
            step_id.into(),
            StepMetadataEntry { duration_ms, status: status.into() },
        );
    }

    pub fn step_metadata_snapshot(&self) -> HashMap<String, StepMetadataEntry> {
        self.step_metadata
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Flattens all frames into a single map, later (more nested) frames
    /// shadowing earlier ones. This is the view handed to the template
    /// resolver and condition evaluator.
    pub fn variables_flat(&self) -> HashMap<String, Value> {
        let frames = self.variables.read();
        let mut out = HashMap::new();
        for frame in frames.iter() {
            for (k, v) in frame {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Binds a value into the persistent base frame (frame 0). This is what
    /// the dispatcher uses for a step's declared output-variable name: the
    /// spec requires `variables` to only grow or rebind existing keys.
    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        let mut frames = self.variables.write();
        frames[0].insert(key.into(), value);
    }

    pub fn get_variable(&self, key: &str) -> Option<Value> {
        let frames = self.variables.read();
        for frame in frames.iter().rev() {
            if let Some(v) = frame.get(key) {
                return Some(v.clone());
            }
        }
        None
    }

    /// Pushes a new scoped frame pre-populated with loop/try locals and
    /// returns a guard that pops it on drop. Used by control-flow
    /// executors that must remove their introduced variables on every
    /// exit path (success, failure, or early return).
    pub fn push_scope(&self, locals: HashMap<String, Value>) -> FrameGuard {
        {
            let mut frames = self.variables.write();
            frames.push(locals);
        }
        FrameGuard::new(self.clone())
    }

    /// Creates an isolated branch context for a `parallel` step: a deep
    /// clone of the current flattened variables as that branch's sole
    /// (single-frame) base, sharing `inputs` but writing to nobody else's
    /// state. `run_id`/`workflow_id`/`started_at`/cancellation token carry
    /// over so cancellation of the parent run reaches the branch.
    pub fn fork(&self) -> Self {
        let base = self.variables_flat();
        Self {
            run_id: self.run_id,
            workflow_id: self.workflow_id.clone(),
            started_at: self.started_at,
            status: Arc::new(parking_lot::RwLock::new(self.status())),
            current_step_index: Arc::new(AtomicUsize::new(0)),
            inputs: self.inputs.clone(),
            variables: Arc::new(parking_lot::RwLock::new(vec![base])),
            step_metadata: Arc::new(DashMap::new()),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Merges a completed branch's final variables into `self` under
    /// `branches.<branch_id>`, leaving `self`'s pre-fork variables
    /// untouched (siblings never observe each other's writes).
    pub fn merge_branch(&self, branch_id: &str, branch: &ExecutionContext) {
        let branch_vars = branch.variables_flat();
        let mut frames = self.variables.write();
        let branches = frames[0]
            .entry("branches".to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = branches {
            map.insert(branch_id.to_string(), serde_json::to_value(branch_vars).unwrap_or(Value::Null));
        }
    }
}
