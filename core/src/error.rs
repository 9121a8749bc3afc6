/// Error types for the social graph and messaging core
use crate::types::RelationshipStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("cannot send a friend request to yourself")]
    SelfRequest,

    #[error("relationship already exists ({0})")]
    AlreadyRelated(RelationshipStatus),

    #[error("no pending friend request")]
    NoPendingRequest,

    #[error("not friends")]
    NotFriends,

    #[error("message text is empty")]
    EmptyMessage,

    #[error("cannot send a message to yourself")]
    SelfMessage,
}

impl RinkError {
    /// Caller assumed a state that does not hold (show an actionable message)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RinkError::SelfRequest
                | RinkError::AlreadyRelated(_)
                | RinkError::NoPendingRequest
                | RinkError::NotFriends
                | RinkError::EmptyMessage
                | RinkError::SelfMessage
        )
    }

    /// Store unreachable or slow; the sync layer recovers from these
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RinkError::Io(_) | RinkError::Storage(_) | RinkError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RinkError>;
