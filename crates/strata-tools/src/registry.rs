use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ToolError;
use crate::tool::{Tool, ToolCaller, ToolInfo};

/// In-process [`ToolCaller`] backed by a name-keyed map.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`ToolError::AlreadyRegistered`] if a tool with the same name exists.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.info().name.clone();
        let mut tools = self.tools.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered { name });
        }
        tracing::debug!(tool = %name, "registered tool");
        tools.insert(name, tool);
        Ok(())
    }

    /// Descriptions of every registered tool, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ToolInfo> {
        let tools = self.tools.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut infos: Vec<ToolInfo> = tools.values().map(|t| t.info().clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl ToolCaller for ToolRegistry {
    fn get_tool(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        let tools = self.tools.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        tools.get(name).cloned().ok_or_else(|| ToolError::NotFound {
            name: name.to_owned(),
        })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.list().into_iter().map(|t| t.name).collect();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}
