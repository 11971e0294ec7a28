use thiserror::Error;

/// The transport-facing classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced row does not exist (404-equivalent).
    NotFound,
    /// Uniqueness or quota conflict; the caller may retry with adjusted
    /// input, the services never retry on their own (409-equivalent).
    Conflict,
    /// The request is malformed or ineligible (400-equivalent).
    Validation,
    /// The storage layer failed; nothing was committed (500-equivalent).
    Storage,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Postgres(_) | Error::Internal(_) => ErrorKind::Storage,
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Error::NotFound(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Error::Conflict(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal(reason.into())
    }
}

/// True when the error is a Postgres unique-constraint violation.
pub(crate) fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
}

/// Result type for till-service operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::internal("x").kind(), ErrorKind::Storage);
    }

    #[test]
    fn reason_strings_render_directly() {
        let err = Error::validation("order subtotal is below the NT$500 minimum");
        assert_eq!(err.to_string(), "order subtotal is below the NT$500 minimum");
    }
}
