/// Errors surfaced by the RBAC engine.
///
/// Validation and manageability failures are never retried; only the
/// token-material polling loop retries, and only on the [`is_transient`]
/// classes. Optimistic-concurrency conflicts on grant/revoke/update surface to
/// the caller, who is responsible for re-fetching and retrying.
///
/// [`is_transient`]: Error::is_transient
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    /// An API error from the underlying store that maps to none of the
    /// domain-level variants.
    #[error("store error (code {code}): {message}")]
    Store { code: u16, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a retry may reasonably succeed. Timeouts, throttling, server
    /// errors, and write conflicts are transient; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Store { code, .. } => matches!(code, 408 | 429 | 500 | 503 | 504),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Conflict("stale".into()).is_transient());
        for code in [408, 429, 500, 503, 504] {
            assert!(Error::Store {
                code,
                message: String::new(),
            }
            .is_transient());
        }
        assert!(!Error::Store {
            code: 403,
            message: String::new(),
        }
        .is_transient());
        assert!(!Error::not_found("Secret", "kargo", "t").is_transient());
        assert!(!Error::BadRequest("nope".into()).is_transient());
    }
}
