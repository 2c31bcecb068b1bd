// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference leaf-action implementations satisfying the core crate's
//! `ActionExecutor` contract: `log` (writes a structured tracing event)
//! and `http` (issues an HTTP request through an adapter the registry
//! hands back). Embedders register their own actions the same way —
//! these exist to make a workflow runnable out of the box and to show the
//! shape an action implementation takes.

pub mod http;
pub mod log;

pub use http::HttpAction;
pub use log::LogAction;

use workflow_orchestrator_core::ActionRouter;

/// Builds an [`ActionRouter`] with every action this crate provides
/// registered under its canonical name. Embedders that only need the
/// defaults can start here and layer their own actions on top with
/// `ActionRouter::builder()` directly.
pub fn default_actions() -> ActionRouter {
    ActionRouter::builder()
        .register("log", std::sync::Arc::new(LogAction))
        .register("http", std::sync::Arc::new(HttpAction::default()))
        .build()
}
