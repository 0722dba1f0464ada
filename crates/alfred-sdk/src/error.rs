use std::fmt;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for SDK operations.
#[derive(Debug)]
pub enum Error {
    /// Resource not found (session, project, etc.).
    NotFound(String),
    /// Invalid input parameters or configuration.
    InvalidInput(String),
    /// Error from the checkpoint/archive store.
    Index(alfred_index::Error),
    /// Error from the underlying runtime layer.
    Runtime(alfred_runtime::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Index(err) => write!(f, "{}", err),
            Error::Runtime(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Index(err) => Some(err),
            Error::Runtime(err) => Some(err),
            _ => None,
        }
    }
}

impl From<alfred_index::Error> for Error {
    fn from(err: alfred_index::Error) -> Self {
        Error::Index(err)
    }
}

impl From<alfred_runtime::Error> for Error {
    fn from(err: alfred_runtime::Error) -> Self {
        Error::Runtime(err)
    }
}
