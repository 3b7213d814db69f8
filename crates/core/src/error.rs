use thiserror::Error;

/// Errors that can escape a build. Per-link parse and fetch failures are
/// handled where they happen and never show up here.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{target} target does not implement {operation}")]
    Unsupported {
        target: &'static str,
        operation: &'static str,
    },

    #[error("missing {0} parameter")]
    MissingInput(&'static str),

    #[error("invalid {name} parameter: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn unsupported(target: &'static str, operation: &'static str) -> Self {
        BuildError::Unsupported { target, operation }
    }

    pub fn invalid(name: &'static str, reason: impl ToString) -> Self {
        BuildError::InvalidParameter {
            name,
            reason: reason.to_string(),
        }
    }

    /// Whether the caller supplied bad input, as opposed to an internal failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BuildError::MissingInput(_) | BuildError::InvalidParameter { .. }
        )
    }
}
