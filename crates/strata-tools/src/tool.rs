use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

fn default_kind() -> String {
    "string".into()
}

impl ToolParameter {
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_kind(),
            description: String::new(),
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolInfo {
    /// First parameter marked as required, if any.
    #[must_use]
    pub fn first_required(&self) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.required)
    }

    #[must_use]
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }
}

/// Outcome of a tool call. `success == false` is a soft failure reported by
/// the tool itself, distinct from a transport-level [`ToolError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait Tool: Send + Sync {
    fn info(&self) -> &ToolInfo;

    /// Run the tool with JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when the call cannot be delivered or times out.
    fn execute(&self, args: ToolArgs) -> BoxFuture<'_, Result<ToolResult, ToolError>>;
}

/// Resolves tools by name.
pub trait ToolCaller: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if no tool with `name` is available.
    fn get_tool(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_required_skips_optional() {
        let info = ToolInfo {
            name: "convert".into(),
            description: String::new(),
            parameters: vec![
                ToolParameter::optional("format"),
                ToolParameter::required("source"),
                ToolParameter::required("dest"),
            ],
        };
        assert_eq!(info.first_required().map(|p| p.name.as_str()), Some("source"));
        assert!(info.has_parameter("format"));
        assert!(!info.has_parameter("path"));
    }

    #[test]
    fn tool_result_builders() {
        let ok = ToolResult::ok("text").with_metadata("title", "Report");
        assert!(ok.success);
        assert_eq!(ok.metadata["title"], serde_json::json!("Report"));

        let failed = ToolResult::failed("bad input");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("bad input"));
    }

    #[test]
    fn tool_info_deserializes_type_field() {
        let info: ToolInfo = serde_json::from_str(
            r#"{"name":"parse","parameters":[{"name":"file_path","type":"string","required":true}]}"#,
        )
        .unwrap();
        assert_eq!(info.parameters[0].kind, "string");
        assert!(info.parameters[0].required);
    }
}
