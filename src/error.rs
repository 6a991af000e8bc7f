use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("[{scac}] authentication failed: {message}")]
    Auth { scac: String, message: String },

    /// Retries exhausted on timeouts, connection failures, 5xx or 429.
    #[error("transient API failure: {0}")]
    TransientApi(String),

    /// Non-retryable failure of the HTTP layer itself.
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("export of {entity} failed: {message}")]
    Export { entity: String, message: String },

    #[error("malformed page {page} for {entity}: {message}")]
    MalformedPage {
        entity: String,
        page: u32,
        message: String,
    },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("load into {table} failed: {source}")]
    Load {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("artifact {path}: {message}")]
    Artifact { path: String, message: String },

    #[error(transparent)]
    Db(#[from] duckdb::Error),
}

impl IngestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::Config(_) => FailureKind::Config,
            IngestError::Auth { .. } => FailureKind::Auth,
            IngestError::TransientApi(_) | IngestError::Http(_) | IngestError::Export { .. } => {
                FailureKind::Export
            }
            IngestError::MalformedPage { .. } => FailureKind::MalformedPage,
            IngestError::MalformedRecord(_) => FailureKind::MalformedRecord,
            IngestError::Load { .. } | IngestError::Db(_) => FailureKind::Load,
            IngestError::Artifact { .. } => FailureKind::Artifact,
        }
    }

    pub(crate) fn artifact(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        IngestError::Artifact {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}

/// The category a failed tenant/entity pair is reported under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Config,
    Auth,
    Export,
    MalformedPage,
    MalformedRecord,
    Load,
    Artifact,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Config => "config",
            FailureKind::Auth => "auth",
            FailureKind::Export => "export",
            FailureKind::MalformedPage => "malformed page",
            FailureKind::MalformedRecord => "malformed record",
            FailureKind::Load => "load",
            FailureKind::Artifact => "artifact",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds() {
        let e = IngestError::Auth {
            scac: "ABCD".into(),
            message: "HTTP 401".into(),
        };
        assert_eq!(e.kind(), FailureKind::Auth);
        assert_eq!(e.to_string(), "[ABCD] authentication failed: HTTP 401");
        assert_eq!(
            IngestError::TransientApi("HTTP 503".into()).kind(),
            FailureKind::Export
        );
        assert_eq!(FailureKind::MalformedPage.to_string(), "malformed page");
    }
}
