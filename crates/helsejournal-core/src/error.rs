use thiserror::Error;

/// Errors surfaced by archive operations.
///
/// Every public operation returns one of these kinds; nothing in the engine
/// panics or raises past this boundary. Text extraction failures are not
/// represented here: they degrade to an unprocessed document.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Bad size, type or input. Raised before any storage write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The owner already stored these exact bytes.
    #[error("document already exists (fingerprint {fingerprint})")]
    Duplicate { fingerprint: String },

    #[error("{0} not found")]
    NotFound(String),

    /// A share link is expired, exhausted or revoked. The cause is
    /// deliberately not carried.
    #[error("share link is no longer available")]
    Gone,

    #[error("not authorized to modify this resource")]
    Forbidden,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store error: {0}")]
    Store(String),
}

impl ArchiveError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Machine-readable code used by the HTTP layer and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_request",
            Self::Duplicate { .. } => "duplicate",
            Self::NotFound(_) => "not_found",
            Self::Gone => "gone",
            Self::Forbidden => "forbidden",
            Self::Io(_) | Self::Store(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_message_does_not_leak_cause() {
        let msg = ArchiveError::Gone.to_string();
        assert!(!msg.contains("expired"));
        assert!(!msg.contains("revoked"));
        assert!(!msg.contains("views"));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ArchiveError::validation("x").code(), "bad_request");
        assert_eq!(ArchiveError::not_found("document").code(), "not_found");
        assert_eq!(
            ArchiveError::Duplicate {
                fingerprint: "ab".into()
            }
            .code(),
            "duplicate"
        );
    }
}
