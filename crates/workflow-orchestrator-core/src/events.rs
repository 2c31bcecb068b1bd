// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event observer interface.
//!
//! A small observer trait rather than a list of callback closures: emissions
//! are fire-and-forget (the dispatcher never awaits meaningful work from an
//! observer) and observers must not throw — a panicking observer is caught
//! and logged, never propagated.

use crate::dispatcher::StepResult;
use crate::workflow::{Step, Workflow};
use std::sync::Arc;
use uuid::Uuid;

/// Consumer of step/run lifecycle events. Default method bodies are no-ops
/// so embedders only implement what they care about.
pub trait Observer: Send + Sync {
    fn on_workflow_start(&self, _run_id: Uuid, _workflow: &Workflow) {}
    fn on_step_start(&self, _run_id: Uuid, _step: &Step) {}
    fn on_step_complete(&self, _run_id: Uuid, _result: &StepResult) {}
    fn on_step_error(&self, _run_id: Uuid, _step: &Step, _error: &str) {}
    fn on_workflow_complete(&self, _run_id: Uuid, _status: crate::context::RunStatus) {}
}

/// A multi-consumer fan-out: emissions go to every registered observer in
/// registration order. A panic inside one observer is caught with
/// `catch_unwind` so it can't take down the run or block its siblings.
#[derive(Clone, Default)]
pub struct ObserverChannel {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn on_workflow_start(&self, run_id: Uuid, workflow: &Workflow) {
        for o in &self.observers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| o.on_workflow_start(run_id, workflow)));
        }
    }

    pub fn on_step_start(&self, run_id: Uuid, step: &Step) {
        for o in &self.observers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| o.on_step_start(run_id, step)));
        }
    }

    pub fn on_step_complete(&self, run_id: Uuid, result: &StepResult) {
        for o in &self.observers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| o.on_step_complete(run_id, result)));
        }
    }

    pub fn on_step_error(&self, run_id: Uuid, step: &Step, error: &str) {
        for o in &self.observers {
            let _ =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| o.on_step_error(run_id, step, error)));
        }
    }

    pub fn on_workflow_complete(&self, run_id: Uuid, status: crate::context::RunStatus) {
        for o in &self.observers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                o.on_workflow_complete(run_id, status)
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunStatus;
    use crate::dispatcher::{StepResult, StepStatus};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingObserver {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Observer for RecordingObserver {
        fn on_step_complete(&self, _run_id: Uuid, result: &StepResult) {
            self.events.lock().push(result.step_id.clone());
        }
    }

    struct PanickingObserver;

    impl Observer for PanickingObserver {
        fn on_step_complete(&self, _run_id: Uuid, _result: &StepResult) {
            panic!("observer blew up");
        }
    }

    #[test]
    fn panicking_observer_does_not_block_siblings() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut channel = ObserverChannel::new();
        channel.register(Arc::new(PanickingObserver));
        channel.register(Arc::new(RecordingObserver { events: events.clone() }));

        let result = StepResult {
            step_id: "s1".to_string(),
            status: StepStatus::Completed,
            output: serde_json::Value::Null,
            error: None,
            retry_count: 0,
            started_at: chrono::Utc::now(),
            completed_at: chrono::Utc::now(),
            duration_ms: 0,
        };
        channel.on_step_complete(Uuid::new_v4(), &result);
        assert_eq!(*events.lock(), vec!["s1".to_string()]);
        let _ = RunStatus::Completed;
    }
}
