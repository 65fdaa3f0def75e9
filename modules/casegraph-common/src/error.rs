use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaseGraphError>;

#[derive(Error, Debug)]
pub enum CaseGraphError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsafe query rejected: {0}")]
    UnsafeQuery(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaseGraphError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    /// Missing node in a case. The message only names the key, never the case it
    /// might exist in, so callers cannot probe other cases through error text.
    pub fn node_not_found(key: &str) -> Self {
        Self::NotFound(format!("node '{key}' not found"))
    }

    /// HTTP status the outer API layer maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidArgument(_) => 400,
            Self::UnsafeQuery(_) => 400,
            Self::UpstreamUnavailable(_) => 503,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }
}

impl From<anyhow::Error> for CaseGraphError {
    fn from(e: anyhow::Error) -> Self {
        Self::UpstreamUnavailable(format!("{e:#}"))
    }
}

impl From<serde_json::Error> for CaseGraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(CaseGraphError::node_not_found("p1").status_code(), 404);
        assert_eq!(CaseGraphError::invalid("bad").status_code(), 400);
        assert_eq!(CaseGraphError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn node_not_found_names_only_the_key() {
        let msg = CaseGraphError::node_not_found("p1").to_string();
        assert_eq!(msg, "Not found: node 'p1' not found");
    }
}
