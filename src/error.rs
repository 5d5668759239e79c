use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::extract::Field;

/// Failure decoding a single raw field value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Percent-decoding failed: {0}")]
    Encoding(String),

    #[error("Expected an integer, found '{0}'")]
    Format(String),

    #[error("Expected {expected} values, found {found} in '{row}'")]
    Arity {
        expected: usize,
        found: usize,
        row: String,
    },

    #[error("More than one live row: '{first}' and '{second}'")]
    Ambiguous { first: String, second: String },
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::Encoding(_) => ErrorKind::Encoding,
            DecodeError::Format(_) => ErrorKind::Format,
            DecodeError::Arity { .. } => ErrorKind::Arity,
            DecodeError::Ambiguous { .. } => ErrorKind::Ambiguous,
        }
    }
}

/// An error attached to a poll. None of these are fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Malformed XML: {0}")]
    Parse(String),

    #[error("No <{0}> node")]
    MissingNode(Field),

    #[error("<{0}> has no value attribute")]
    MissingValue(Field),

    #[error("<{field}>: {source}")]
    Field {
        field: Field,
        #[source]
        source: DecodeError,
    },

    #[error("Failed to fetch status page: {0}")]
    Fetch(String),

    #[error("Timed out fetching status page: {0}")]
    Timeout(String),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::Parse(_) => ErrorKind::ParseFailure,
            PollError::MissingNode(_) | PollError::MissingValue(_) => ErrorKind::Structural,
            PollError::Field { source, .. } => source.kind(),
            PollError::Fetch(_) => ErrorKind::Fetch,
            PollError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// The field this error is attributable to, if any.
    pub fn field(&self) -> Option<Field> {
        match self {
            PollError::MissingNode(field)
            | PollError::MissingValue(field)
            | PollError::Field { field, .. } => Some(*field),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PollError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PollError::Timeout(err.to_string())
        } else {
            PollError::Fetch(err.to_string())
        }
    }
}

impl Serialize for PollError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PollError", 3)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("field", &self.field().map(Field::node_name))?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Coarse error classification, used as the `kind` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Encoding,
    Format,
    Arity,
    Ambiguous,
    Structural,
    ParseFailure,
    Fetch,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Encoding => "encoding",
            ErrorKind::Format => "format",
            ErrorKind::Arity => "arity",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::Structural => "structural",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Timeout => "timeout",
        }
    }
}
