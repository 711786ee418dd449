//! Error types shared across the viewer core

use thiserror::Error;

use crate::model::{LayerId, NoteId, PartId, PinId};

/// Failure reported by a persistence collaborator (pin, note or config store)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store understood the request and refused it
    #[error("rejected by store ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("storage I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether the outcome of the request is unknown.
    ///
    /// An ambiguous failure may or may not have been applied by the store, so
    /// the local copy has to be re-fetched before it can be trusted again.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            StoreError::Unreachable(_) | StoreError::Timeout | StoreError::Decode(_)
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Failure while fetching or decoding a part asset
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    #[error("failed to fetch {source_ref}: {reason}")]
    Fetch { source_ref: String, reason: String },
    #[error("failed to decode {source_ref}: {reason}")]
    Decode { source_ref: String, reason: String },
    #[error("asset {0} contains no renderable geometry")]
    Empty(String),
}

/// Failure of a pin operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PinError {
    #[error("pin placement requires edit mode")]
    ReadOnly,
    #[error("no placement candidate; click on the model first")]
    NoCandidate,
    #[error("pin label must not be empty")]
    EmptyLabel,
    #[error("no pin is being edited")]
    NotEditing,
    #[error("unknown pin {0}")]
    UnknownPin(PinId),
    #[error("pin store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a note operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NoteError {
    #[error("note body must not be empty")]
    EmptyBody,
    #[error("no placement candidate; click on the model first")]
    NoCandidate,
    #[error("unknown note {0}")]
    UnknownNote(NoteId),
    #[error("note store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a viewer lifecycle operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewerError {
    #[error("edit mode requires an edit grant")]
    EditNotPermitted,
    #[error("viewer is not mounted")]
    NotMounted,
    #[error("viewer is already mounted on {0}")]
    AlreadyMounted(String),
    #[error("invalid camera position for model {0}")]
    InvalidCamera(String),
    #[error("unknown part {0}")]
    UnknownPart(PartId),
    #[error("unknown layer {0}")]
    UnknownLayer(LayerId),
}

/// Failure while loading or saving viewer configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_classification() {
        assert!(StoreError::Timeout.is_ambiguous());
        assert!(StoreError::Unreachable("offline".into()).is_ambiguous());
        assert!(!StoreError::NotFound("p1".into()).is_ambiguous());
        assert!(!StoreError::Rejected {
            status: 403,
            message: "forbidden".into()
        }
        .is_ambiguous());
    }
}
