use std::fmt;

/// Result type for alfred-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Database/index layer error
    Index(alfred_index::Error),

    /// Subagent layer error
    Agent(alfred_agents::Error),

    /// Manager Graph (C4) node failure
    Graph(alfred_engine::GraphError),

    /// IO operation failed
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Invalid operation or state
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Index(err) => write!(f, "index error: {}", err),
            Error::Agent(err) => write!(f, "agent error: {}", err),
            Error::Graph(err) => write!(f, "graph error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Index(err) => Some(err),
            Error::Agent(err) => Some(err),
            Error::Graph(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Config(_) | Error::InvalidOperation(_) => None,
        }
    }
}

impl From<alfred_index::Error> for Error {
    fn from(err: alfred_index::Error) -> Self {
        Error::Index(err)
    }
}

impl From<alfred_agents::Error> for Error {
    fn from(err: alfred_agents::Error) -> Self {
        Error::Agent(err)
    }
}

impl From<alfred_engine::GraphError> for Error {
    fn from(err: alfred_engine::GraphError) -> Self {
        Error::Graph(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
