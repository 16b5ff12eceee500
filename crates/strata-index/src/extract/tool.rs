use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strata_llm::BoxFuture;
use strata_tools::{ToolArgs, ToolCaller, ToolInfo};

use super::{Extraction, Extractor};
use crate::document::Document;
use crate::error::{ExtractionError, RagError, Result};

const DEFAULT_PRIORITY: i32 = 8;
const COMMON_PATH_ARGS: [&str; 4] = ["file_path", "path", "input", "document"];

/// Which external tools parse which files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExtractorConfig {
    /// Tool names, tried in order.
    pub tools: Vec<String>,
    /// Lowercase extensions with the dot (".pdf"). Empty accepts every file.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Only consulted when `extensions` is empty.
    #[serde(default)]
    pub mime_types: Vec<String>,
    /// Zero selects the default of 8.
    #[serde(default)]
    pub priority: i32,
    /// Local directory that the tool sees under `path_prefix`.
    #[serde(default)]
    pub local_base_path: Option<PathBuf>,
    #[serde(default)]
    pub path_prefix: Option<String>,
}

/// Delegates parsing to external tools such as document-conversion services.
pub struct ToolExtractor {
    caller: Arc<dyn ToolCaller>,
    config: ToolExtractorConfig,
    name: String,
    priority: i32,
}

impl ToolExtractor {
    /// # Errors
    ///
    /// Returns a configuration error when no tool names are given.
    pub fn new(caller: Arc<dyn ToolCaller>, mut config: ToolExtractorConfig) -> Result<Self> {
        if config.tools.is_empty() {
            return Err(RagError::Config(
                "at least one parser tool name is required".into(),
            ));
        }
        for ext in &mut config.extensions {
            *ext = ext.to_ascii_lowercase();
            if !ext.starts_with('.') {
                ext.insert(0, '.');
            }
        }
        let priority = if config.priority == 0 {
            DEFAULT_PRIORITY
        } else {
            config.priority
        };
        Ok(Self {
            name: format!("ToolExtractor:{}", config.tools.join(",")),
            caller,
            config,
            priority,
        })
    }

    fn has_tool(&self) -> bool {
        self.config
            .tools
            .iter()
            .any(|t| self.caller.get_tool(t).is_ok())
    }

    /// Map a local path into the tool's view of the filesystem.
    fn remap(&self, path: &Path) -> String {
        if let (Some(base), Some(prefix)) = (&self.config.local_base_path, &self.config.path_prefix)
            && let Ok(rel) = path.strip_prefix(base)
        {
            let rel = rel.to_string_lossy();
            if rel.is_empty() {
                return prefix.clone();
            }
            return format!("{}/{rel}", prefix.trim_end_matches('/'));
        }
        path.to_string_lossy().into_owned()
    }
}

fn path_argument(info: &ToolInfo) -> &str {
    if info.parameters.is_empty() {
        return "file_path";
    }
    if let Some(p) = info.first_required() {
        return &p.name;
    }
    COMMON_PATH_ARGS
        .iter()
        .find(|name| info.has_parameter(name))
        .copied()
        .unwrap_or("file_path")
}

fn metadata_str<'a>(meta: &'a std::collections::HashMap<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| meta.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

impl Extractor for ToolExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_extract(&self, path: &Path, mime_type: &str) -> bool {
        if !self.config.extensions.is_empty() {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e.to_ascii_lowercase()))
                .unwrap_or_default();
            if !self.config.extensions.contains(&ext) {
                return false;
            }
        } else if !self.config.mime_types.is_empty()
            && !self.config.mime_types.iter().any(|m| m == mime_type)
        {
            return false;
        }
        self.has_tool()
    }

    fn extract<'a>(
        &'a self,
        doc: &'a Document,
    ) -> BoxFuture<'a, std::result::Result<Option<Extraction>, ExtractionError>> {
        Box::pin(async move {
            let path = doc.file_path();
            let local = path.to_string_lossy().into_owned();
            let remote = self.remap(&path);
            if remote != local {
                tracing::debug!(local_path = %local, remote_path = %remote, "remapped path for tool");
            }

            for tool_name in &self.config.tools {
                let Ok(tool) = self.caller.get_tool(tool_name) else {
                    continue;
                };
                let mut args = ToolArgs::new();
                args.insert(path_argument(tool.info()).to_owned(), json!(remote));

                let result = match tool.execute(args).await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::debug!(tool = %tool_name, path = %local, "tool execution error: {e}");
                        continue;
                    }
                };
                if !result.success {
                    tracing::debug!(
                        tool = %tool_name,
                        path = %local,
                        error = result.error.as_deref().unwrap_or(""),
                        "tool reported failure, trying next"
                    );
                    continue;
                }

                let content = if result.content.is_empty() {
                    metadata_str(&result.metadata, &["content", "text"]).unwrap_or_default()
                } else {
                    &result.content
                };
                let content = content.trim();
                if content.is_empty() {
                    tracing::debug!(tool = %tool_name, path = %local, "tool returned empty content");
                    continue;
                }

                let title = metadata_str(&result.metadata, &["title", "document_title"])
                    .map(str::to_owned)
                    .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()));
                let author =
                    metadata_str(&result.metadata, &["author", "document_author"]).map(str::to_owned);

                let mut metadata: std::collections::HashMap<String, Value> = result
                    .metadata
                    .iter()
                    .filter(|(_, v)| v.is_string())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                metadata.remove("content");
                metadata.remove("text");
                metadata.insert("file_path".into(), json!(local));
                metadata.insert("file_size".into(), json!(doc.size));
                metadata.insert("extractor".into(), json!("tool"));
                metadata.insert("tool".into(), json!(tool_name));

                return Ok(Some(Extraction {
                    content: content.to_owned(),
                    title,
                    author,
                    metadata,
                }));
            }

            Err(ExtractionError::new(
                self.name.clone(),
                local.clone(),
                format!(
                    "all parser tools failed for file {local} (tried tools: {})",
                    self.config.tools.join(", ")
                ),
            ))
        })
    }
}

impl std::fmt::Debug for ToolExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExtractor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
