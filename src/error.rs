//! The error taxonomy shared by every component.

/// The category of an [`Error`], used to decide how it surfaces to callers.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself was malformed.
    InvalidInput,
    /// The credential is invalid or expired.
    Auth,
    /// The credential is valid but lacks the required scope.
    AccessDenied,
    /// The resource is absent or not accessible.
    NotFound,
    /// Any unclassified network, parse or archive failure.
    Transport,
}

/// An error raised by the upstream clients.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request itself was malformed.
    #[error("{0}")]
    InvalidInput(String),

    /// The credential is invalid or expired.
    #[error("{0}")]
    Auth(String),

    /// The credential is valid but lacks the required scope.
    #[error("{0}")]
    AccessDenied(String),

    /// The resource is absent or not accessible.
    #[error("{0}")]
    NotFound(String),

    /// The HTTP transport failed or returned an unclassified status.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A payload could not be parsed as JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A downloaded archive could not be read.
    #[cfg(feature = "workflow")]
    #[error("malformed archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A downloaded archive does not match its published digest.
    #[error("broken artifact: expected digest {expected}, got {actual}")]
    DigestMismatch {
        /// The digest published alongside the artifact.
        expected: String,
        /// The digest of the downloaded bytes.
        actual: String,
    },

    /// The session RPC peer failed or returned an error.
    #[error("session RPC failed: {0}")]
    Rpc(String),
}

impl Error {
    /// Returns the [`ErrorKind`] this error is classified as.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Auth(_) => ErrorKind::Auth,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Transport,
        }
    }
}

/// A [`Result`] with [`Error`] as its error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
