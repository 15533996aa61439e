//! The `ToolExecutor` capability (spec §6): dispatches a named tool call
//! against the infrastructure-monitoring backend and returns its result.
//!
//! Concrete tools (`pulse_query`, `pulse_storage`, `pulse_discovery`, ...)
//! are implemented entirely outside this crate; the engine only needs a
//! single dispatch entrypoint and the list of tool definitions to advertise
//! to the provider.

use crate::error::ExecutorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A tool's advertised name, description and JSON-Schema input shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Raw outcome of one tool invocation, before the dispatcher wraps it into a
/// `ToolResult` tied to a specific `tool_use_id`.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub content: Vec<String>,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: vec![content.into()],
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: vec![content.into()],
            is_error: true,
        }
    }

    pub fn joined_content(&self) -> String {
        self.content.join("\n")
    }
}

/// The backend capability consumed by `ToolDispatcher`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, name: &str, input: Value) -> Result<ToolOutcome, ExecutorError>;
}

/// Registry of tool definitions advertised to the provider. Does not own
/// execution — that's `ToolExecutor`'s job — it only tracks the schema each
/// name maps to, the way `querymt_agent::tools::ToolRegistry` tracks
/// in-process `Tool` trait objects.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    defs: HashMap<String, Arc<ToolDef>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ToolDef) -> &mut Self {
        self.defs.insert(def.name.clone(), Arc::new(def));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDef>> {
        self.defs.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.defs.values().map(|d| (**d).clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.defs.keys().map(|s| s.as_str()).collect()
    }
}
