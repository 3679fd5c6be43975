//! Error types for Relay

use std::fmt;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error used as the cause of transport failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for Relay
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend lookup failed
    #[error("Failed to resolve backend for service '{service}': {message}")]
    Resolution {
        /// Logical service name that was looked up
        service: String,
        /// Failure description
        message: String,
    },

    /// A resolver produced something that is not a usable authority
    #[error("Invalid proxy target: {0}")]
    InvalidTarget(String),

    /// The pooled client could not be built for a resolved target
    #[error("Failed to initialize proxy engine: {0}")]
    Initialization(String),

    /// The outbound call failed
    #[error(transparent)]
    Forward(#[from] ForwardError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Resolution { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidTarget(_) | Error::Initialization(_) => StatusCode::BAD_GATEWAY,
            Error::Forward(e)
                if matches!(
                    e.kind(),
                    ForwardErrorKind::Timeout | ForwardErrorKind::Saturated
                ) =>
            {
                StatusCode::GATEWAY_TIMEOUT
            }
            Error::Forward(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error was caused by network I/O against the backend.
    ///
    /// An I/O-classed failure means the pooled client may hold broken
    /// connections, so the engine that produced it gets recycled.
    pub fn is_io(&self) -> bool {
        match self {
            Error::Forward(e) => e.is_io(),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Create a resolution error
    pub fn resolution(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Resolution {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// What went wrong during an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardErrorKind {
    /// Could not connect to the backend
    Connect,
    /// The backend did not answer within the read timeout
    Timeout,
    /// Connection failed mid-exchange
    Io,
    /// The outbound request could not be built
    Request,
    /// The per-host connection limit stayed full for the whole read timeout
    Saturated,
}

impl fmt::Display for ForwardErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Timeout => write!(f, "timeout"),
            Self::Io => write!(f, "io"),
            Self::Request => write!(f, "request"),
            Self::Saturated => write!(f, "saturated"),
        }
    }
}

/// Failure of a single forwarded call, wrapping the underlying cause
#[derive(Debug, thiserror::Error)]
#[error("Failed to forward request ({kind}): {cause}")]
pub struct ForwardError {
    kind: ForwardErrorKind,
    #[source]
    cause: BoxError,
}

impl ForwardError {
    /// Create a forward error of the given kind
    pub fn new(kind: ForwardErrorKind, cause: impl Into<BoxError>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    /// Connection to the backend could not be established
    pub fn connect(cause: impl Into<BoxError>) -> Self {
        Self::new(ForwardErrorKind::Connect, cause)
    }

    /// Backend response headers did not arrive in time
    pub fn timeout(cause: impl Into<BoxError>) -> Self {
        Self::new(ForwardErrorKind::Timeout, cause)
    }

    /// Transport failure after the connection was established
    pub fn io(cause: impl Into<BoxError>) -> Self {
        Self::new(ForwardErrorKind::Io, cause)
    }

    /// Outbound request could not be constructed
    pub fn request(cause: impl Into<BoxError>) -> Self {
        Self::new(ForwardErrorKind::Request, cause)
    }

    /// Error kind
    pub fn kind(&self) -> ForwardErrorKind {
        self.kind
    }

    /// No connection slot freed up before the read timeout
    pub fn saturated(cause: impl Into<BoxError>) -> Self {
        Self::new(ForwardErrorKind::Saturated, cause)
    }

    /// Underlying cause
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Whether this failure is network-classed
    pub fn is_io(&self) -> bool {
        matches!(
            self.kind,
            ForwardErrorKind::Connect | ForwardErrorKind::Timeout | ForwardErrorKind::Io
        )
    }
}
