use iron::status::{self, Status};
use thiserror::Error;

/// Outcome of a repository operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostError {
    #[error("{0}")]
    Validation(String),
    #[error("Post ID not found")]
    NotFound(u64),
    /// A path segment that is not a post id at all.
    #[error("Post ID not found")]
    InvalidId(String),
    #[error("No post IDs left to assign")]
    IdsExhausted,
}

impl PostError {
    pub fn status(&self) -> Status {
        match *self {
            PostError::Validation(_) => status::BadRequest,
            PostError::NotFound(_) | PostError::InvalidId(_) => status::NotFound,
            PostError::IdsExhausted => status::InternalServerError,
        }
    }
}
