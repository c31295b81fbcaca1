use thiserror::Error;

/// Error returned by a single attempt of a remote operation.
///
/// `Server` carries the set of numeric error codes reported by the service for
/// one failed request (a single response can stack several errors). The
/// classifier works on that code set alone.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("server error {codes:?}: {message}")]
    Server { codes: Vec<i32>, message: String },

    /// The operation exceeded its time budget without the server reporting a
    /// code. Always treated as transient.
    #[error("operation timed out")]
    Timeout,

    /// Client-side driver failure with no server code attached.
    #[error("driver error: {0}")]
    Driver(String),

    /// The configured retry or polling ceiling was hit.
    #[error("retry budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Shutdown was requested while the trial was suspended.
    #[error("shutdown requested")]
    Interrupted,
}

impl ServiceError {
    pub fn server(codes: Vec<i32>, message: impl Into<String>) -> Self {
        ServiceError::Server {
            codes,
            message: message.into(),
        }
    }

    /// The first code of the response, the one the server reports as primary.
    pub fn primary_code(&self) -> Option<i32> {
        match self {
            ServiceError::Server { codes, .. } => codes.first().copied(),
            _ => None,
        }
    }
}
