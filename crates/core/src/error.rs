/// Raised by the session configuration builder before any connection attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Missing required dynamic variable: {0}")]
    MissingDynamicVariable(String),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A tool invocation named a tool this client does not implement.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown tool: {0}")]
pub struct UnknownToolError(pub String);
