use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors a subagent (C7-C10) can raise while draining its input stream or
/// ticking its timers. Every variant is something `Subagent::consume_batch`/
/// `tick` can recover from on the next call — a subagent never panics its
/// worker loop (§5 cancellation & timeouts).
#[derive(Debug)]
pub enum Error {
    /// The external collaborator (Planner, mail API, classifier) failed.
    Collaborator(String),
    /// The durable store (`alfred-index`) failed.
    Index(alfred_index::Error),
    /// A value read from a stream/control channel couldn't be decoded.
    Decode(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Collaborator(msg) => write!(f, "external collaborator error: {msg}"),
            Error::Index(err) => write!(f, "index error: {err}"),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Index(err) => Some(err),
            Error::Collaborator(_) | Error::Decode(_) => None,
        }
    }
}

impl From<alfred_index::Error> for Error {
    fn from(err: alfred_index::Error) -> Self {
        Error::Index(err)
    }
}
