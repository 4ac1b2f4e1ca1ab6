//! # Error Taxonomy
//!
//! Every failure path in the voting core maps onto one of these kinds. All
//! precondition failures are raised before anything is mutated, so only
//! `Storage` ever follows an attempted write.

use thiserror::Error;

/// Failures of a vote or an administrative poll operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("poll not found")]
    NotFound,
    #[error("voting for this poll has not started yet")]
    NotYetOpen,
    #[error("voting for this poll has ended")]
    Closed,
    #[error("this identity has already voted in this poll")]
    DuplicateVote,
    #[error("option index {index} is out of range for a poll with {options} options")]
    InvalidOption { index: i64, options: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("missing or invalid credential")]
    Unauthorized,
    #[error("insufficient role for this operation")]
    Forbidden,
}

/// Failures reported by a `PollStore` backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store call timed out")]
    Timeout,
}

/// Failures of credential verification or role authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("invalid credential")]
    Invalid,
    #[error("role not permitted")]
    Forbidden,
}

impl From<StoreError> for VoteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => VoteError::NotFound,
            StoreError::Backend(msg) => VoteError::Storage(msg),
            StoreError::Timeout => VoteError::Storage("store call timed out".to_string()),
        }
    }
}

impl From<AuthError> for VoteError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing | AuthError::Invalid => VoteError::Unauthorized,
            AuthError::Forbidden => VoteError::Forbidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_vote_errors() {
        assert_eq!(VoteError::from(StoreError::NotFound), VoteError::NotFound);
        assert!(matches!(
            VoteError::from(StoreError::Timeout),
            VoteError::Storage(_)
        ));
        assert_eq!(
            VoteError::from(StoreError::Backend("disk".into())),
            VoteError::Storage("disk".into())
        );
    }

    #[test]
    fn test_auth_errors_map_to_vote_errors() {
        assert_eq!(VoteError::from(AuthError::Missing), VoteError::Unauthorized);
        assert_eq!(VoteError::from(AuthError::Invalid), VoteError::Unauthorized);
        assert_eq!(VoteError::from(AuthError::Forbidden), VoteError::Forbidden);
    }
}
