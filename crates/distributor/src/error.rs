//! Error types for distributor requests.

use std::io;
use thiserror::Error;

/// Errors that can occur while talking to the distributor.
#[derive(Debug, Error)]
pub enum DistributorError {
    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure reported outside reqwest.
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        /// The I/O error kind of the failure.
        kind: io::ErrorKind,
        /// Human-readable context.
        message: String,
    },

    /// HTTP status error.
    #[error("HTTP status {status} for {url}")]
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The distributor answered with an empty or `null` body.
    #[error("empty response from {endpoint}")]
    EmptyResponse {
        /// Endpoint path.
        endpoint: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// JSON parse error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The request could not be signed.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// I/O error kinds that indicate a transient network condition.
const TRANSIENT_IO_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::TimedOut,
];

impl DistributorError {
    /// Build a transport error from an I/O error kind.
    pub fn transport(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Only timeouts, connection reset/refused/aborted, broken pipes and
    /// empty responses qualify. Status codes, malformed bodies and signing
    /// failures are permanent for the request that produced them.
    pub fn is_transient(&self) -> bool {
        match self {
            DistributorError::Http(e) => {
                e.is_timeout() || e.is_connect() || source_is_transient_io(e)
            }
            DistributorError::Transport { kind, .. } => TRANSIENT_IO_KINDS.contains(kind),
            DistributorError::EmptyResponse { .. } => true,
            DistributorError::HttpStatus { .. }
            | DistributorError::InvalidResponse(_)
            | DistributorError::Json(_)
            | DistributorError::UrlParse(_)
            | DistributorError::Signing(_) => false,
        }
    }
}

fn source_is_transient_io(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if TRANSIENT_IO_KINDS.contains(&io_err.kind()) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kinds() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
        ] {
            assert!(DistributorError::transport(kind, "x").is_transient(), "{kind:?}");
        }
        assert!(!DistributorError::transport(io::ErrorKind::PermissionDenied, "x").is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(DistributorError::EmptyResponse {
            endpoint: "/receipt".into()
        }
        .is_transient());
        assert!(!DistributorError::HttpStatus {
            url: "http://d/receipt".into(),
            status: 500
        }
        .is_transient());
        assert!(!DistributorError::InvalidResponse("bad".into()).is_transient());
        assert!(!DistributorError::Signing("no key".into()).is_transient());
    }

    #[test]
    fn test_io_source_chain() {
        #[derive(Debug)]
        struct Wrapper(io::Error);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "wrapped")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }
        #[derive(Debug)]
        struct Outer(Wrapper);
        impl std::fmt::Display for Outer {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "outer")
            }
        }
        impl std::error::Error for Outer {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let reset = Outer(Wrapper(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(source_is_transient_io(&reset));
        let denied = Outer(Wrapper(io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!source_is_transient_io(&denied));
    }
}
