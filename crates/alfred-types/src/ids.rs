use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of the user a whiteboard, checkpoint, or subagent state belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.trim().is_empty() {
            Self("test-user".to_string())
        } else {
            Self(id)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Identifier of a conversation/session thread. Mandatory on every whiteboard
/// append; writers that cannot supply one get the deterministic system thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Thread used for internal writes that have no natural conversation (see
    /// Open Question 3: thread_id is mandatory at append).
    pub const SYSTEM: &'static str = "system";

    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic whiteboard entry id, modeled on the `<unix-ms>-<seq>` shape of a
/// Redis Stream entry id so that `after_id` comparisons are a total order and
/// `"$"` (tail-from-now) has an unambiguous meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WbId {
    pub millis: u64,
    pub seq: u64,
}

impl WbId {
    pub const ZERO: WbId = WbId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Smallest id strictly greater than `self`, used to build the next
    /// candidate when two appends land in the same millisecond.
    pub fn next_seq(&self) -> Self {
        Self {
            millis: self.millis,
            seq: self.seq + 1,
        }
    }
}

impl fmt::Display for WbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for WbId {
    type Err = ParseWbIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = s.split_once('-').ok_or(ParseWbIdError)?;
        let millis: u64 = millis.parse().map_err(|_| ParseWbIdError)?;
        let seq: u64 = seq.parse().map_err(|_| ParseWbIdError)?;
        Ok(Self { millis, seq })
    }
}

impl From<WbId> for String {
    fn from(id: WbId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for WbId {
    type Error = ParseWbIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseWbIdError;

impl fmt::Display for ParseWbIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed whiteboard id, expected `<millis>-<seq>`")
    }
}

impl std::error::Error for ParseWbIdError {}
