#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{name}' not found")]
    NotFound { name: String },

    #[error("tool '{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[error("invalid arguments for '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    #[error("tool call failed: {name}: {message}")]
    Execution { name: String, message: String },

    #[error("tool call timed out after {timeout_secs}s: {name}")]
    Timeout { name: String, timeout_secs: u64 },
}
