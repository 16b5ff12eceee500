//! Contract for calling named external tools, such as document parsers
//! running behind a tool server.

pub mod error;
pub mod registry;
pub mod tool;

pub use error::ToolError;
pub use registry::ToolRegistry;
pub use tool::{BoxFuture, Tool, ToolArgs, ToolCaller, ToolInfo, ToolParameter, ToolResult};
