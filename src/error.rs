/// Failures surfaced by the AI integrations. None of them are fatal to the host UI.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Microphone access was refused or no capture device could be opened.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    /// The realtime or chat transport failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// A dispatched command's consumer failed.
    #[error("tool `{tool}` failed: {reason}")]
    ToolExecution { tool: String, reason: String },
}

impl AgentError {
    /// The message shown to the user next to the voice control.
    pub fn user_message(&self) -> &'static str {
        match self {
            AgentError::PermissionDenied(_) => "Microphone access denied",
            AgentError::Transport(_) => "Connection Error",
            AgentError::ToolExecution { .. } => "Action failed",
        }
    }
}
