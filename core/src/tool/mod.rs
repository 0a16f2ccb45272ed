//! Dynamic tool registry
//!
//! Tools are registered by plugins, invoked from cognition's tool loop or a
//! CALL_TOOL intent, and isolated so one failing tool cannot take the tick
//! down. Side-effectful tools carry a per-turn call budget.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VigilError};
use crate::port::llm::ToolSpec;

/// A structured tool result fed back into cognition
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: serde_json::Value,
    /// Ask cognition to re-enter on the smart path next tick
    pub escalate_to_smart: bool,
}

impl ToolOutput {
    pub fn ok(content: serde_json::Value) -> Self {
        Self {
            content,
            escalate_to_smart: false,
        }
    }

    pub fn escalating(content: serde_json::Value) -> Self {
        Self {
            content,
            escalate_to_smart: true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments
    fn parameters(&self) -> serde_json::Value;

    /// Side-effectful tools count against `max_calls_per_turn`
    fn has_side_effects(&self) -> bool {
        false
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput>;
}

/// Statistics about the tool registry
#[derive(Debug, Clone)]
pub struct ToolRegistryStats {
    pub total_tools: usize,
    pub enabled_tools: usize,
    pub disabled_tools: usize,
    pub tool_names: Vec<String>,
}

/// Registry managing tool lifecycle.
///
/// Cloning is cheap; all clones share the same tool set.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
    disabled: Arc<RwLock<HashMap<String, String>>>,
    /// Per-call deadline applied around `execute`
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            disabled: Arc::new(RwLock::new(HashMap::new())),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Register a tool; re-registering re-enables it
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().insert(name.clone(), tool);
        self.disabled.write().remove(&name);
        tracing::debug!(tool = %name, "tool registered");
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.disabled.write().remove(name);
        self.tools.write().remove(name).is_some()
    }

    /// Disable with a reason; the tool stays registered
    pub fn disable(&self, name: &str, reason: impl Into<String>) {
        self.disabled.write().insert(name.to_string(), reason.into());
    }

    pub fn enable(&self, name: &str) {
        self.disabled.write().remove(name);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        if let Some(reason) = self.disabled.read().get(name) {
            return Err(VigilError::ToolDisabled {
                name: name.to_string(),
                reason: reason.clone(),
            });
        }
        self.tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VigilError::ToolNotFound {
                name: name.to_string(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        !self.disabled.read().contains_key(name) && self.tools.read().contains_key(name)
    }

    /// Tool definitions for the LLM request
    pub fn specs(&self) -> Vec<ToolSpec> {
        let disabled = self.disabled.read();
        self.tools
            .read()
            .values()
            .filter(|t| !disabled.contains_key(t.name()))
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Execute with the registry deadline and error isolation
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput> {
        let tool = self.get(name)?;
        match tokio::time::timeout(self.timeout, tool.execute(args)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(VigilError::ToolFailed {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(VigilError::ToolFailed {
                name: name.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            }),
        }
    }

    /// Does invoking this tool count against the side-effect budget?
    pub fn has_side_effects(&self, name: &str) -> bool {
        self.tools
            .read()
            .get(name)
            .is_some_and(|t| t.has_side_effects())
    }

    pub fn stats(&self) -> ToolRegistryStats {
        let tools = self.tools.read();
        let disabled = self.disabled.read();
        ToolRegistryStats {
            total_tools: tools.len(),
            enabled_tools: tools.len().saturating_sub(disabled.len()),
            disabled_tools: disabled.len(),
            tool_names: tools.keys().cloned().collect(),
        }
    }
}
