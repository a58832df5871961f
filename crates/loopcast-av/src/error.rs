//! Error types for loopcast-av.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by frame sources and encoder processes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame source could not be loaded.
    #[error("failed to load frame {id}: {message}")]
    Source { id: String, message: String },

    /// The frames directory does not exist or is not readable.
    #[error("frames directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The encoder process could not be started.
    #[error("failed to spawn {tool}: {source}")]
    ProcessSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The encoder process exited while the pipeline still needed it.
    #[error("{tool} exited unexpectedly: {status}")]
    ProcessExited { tool: String, status: String },

    /// One of the encoder's pipes is gone.
    #[error("{tool} {pipe} pipe closed")]
    PipeClosed { tool: String, pipe: &'static str },

    /// The encoder stopped reading and its input queue filled up.
    #[error("{tool} is not reading its input: {queued} frames queued")]
    InputOverrun { tool: String, queued: usize },

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a frame source error.
    pub fn load_failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a process exited error.
    pub fn process_exited(tool: impl Into<String>, status: impl Into<String>) -> Self {
        Self::ProcessExited {
            tool: tool.into(),
            status: status.into(),
        }
    }

    /// Whether the error comes from the encoder process rather than a source.
    pub fn is_process(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound { .. }
                | Self::ProcessSpawn { .. }
                | Self::ProcessExited { .. }
                | Self::PipeClosed { .. }
                | Self::InputOverrun { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::load_failed("a.png", "unsupported format");
        assert_eq!(err.to_string(), "failed to load frame a.png: unsupported format");
        assert!(!err.is_process());

        let err = Error::process_exited("ffmpeg", "exit status: 1");
        assert_eq!(err.to_string(), "ffmpeg exited unexpectedly: exit status: 1");
        assert!(err.is_process());
    }
}
