use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Join the chat before doing that")]
    NotJoined,
    #[error("Group {0} not found")]
    NotFound(String),
    #[error("Not a member of group {0}")]
    NotAMember(String),
    #[error("Already a member of group {0}")]
    AlreadyMember(String),
    #[error("{0}")]
    Validation(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Machine-readable tag sent alongside the error text.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    NotJoined,
    NotFound,
    NotAMember,
    AlreadyMember,
    Validation,
    BadRequest,
}

impl RouterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::NotJoined => ErrorCode::NotJoined,
            RouterError::NotFound(_) => ErrorCode::NotFound,
            RouterError::NotAMember(_) => ErrorCode::NotAMember,
            RouterError::AlreadyMember(_) => ErrorCode::AlreadyMember,
            RouterError::Validation(_) => ErrorCode::Validation,
            RouterError::BadRequest(_) => ErrorCode::BadRequest,
        }
    }
}
