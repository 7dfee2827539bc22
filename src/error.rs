use thiserror::Error;

use crate::grant::GrantError;
use crate::viewer::ViewerError;

#[derive(Debug, Error)]
pub enum PresentError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("viewer does not belong to user")]
    ViewerMismatch,

    #[error("present {0} already received")]
    AlreadyClaimed(i64),

    #[error("grant failed: {0}")]
    Grant(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("failed to get request time")]
    ClockUnavailable,
}

pub type Result<T> = std::result::Result<T, PresentError>;

impl PresentError {
    /// HTTP status the request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            PresentError::InvalidArgument(_) => 400,
            PresentError::NotFound(_) => 404,
            PresentError::ViewerMismatch | PresentError::AlreadyClaimed(_) => 409,
            PresentError::Grant(_) | PresentError::Store(_) | PresentError::ClockUnavailable => {
                500
            }
        }
    }

    /// Nothing is left applied when these come back, so the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PresentError::Grant(_) | PresentError::Store(_))
    }
}

impl From<GrantError> for PresentError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::UserNotFound(id) => PresentError::NotFound(format!("user {id}")),
            GrantError::ItemNotFound(id) => PresentError::NotFound(format!("item {id}")),
            GrantError::InvalidItemType { item_id, item_type } => PresentError::InvalidArgument(
                format!("item {item_id} is not of type {}", item_type.as_str()),
            ),
            GrantError::InvalidAmount { item_id, amount } => PresentError::InvalidArgument(
                format!("cannot grant {amount} of item {item_id}"),
            ),
            GrantError::Store(err) => PresentError::Store(err),
            GrantError::Other(msg) => PresentError::Grant(msg),
        }
    }
}

impl From<ViewerError> for PresentError {
    fn from(err: ViewerError) -> Self {
        match err {
            ViewerError::NotFound => PresentError::NotFound("user device".into()),
            ViewerError::Mismatch => PresentError::ViewerMismatch,
            ViewerError::Store(err) => PresentError::Store(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemType;

    #[test]
    fn grant_errors_map_to_client_classes() {
        let e: PresentError = GrantError::ItemNotFound(9).into();
        assert_eq!(e.status_code(), 404);
        let e: PresentError = GrantError::InvalidItemType {
            item_id: 9,
            item_type: ItemType::Card,
        }
        .into();
        assert_eq!(e.status_code(), 400);
        let e: PresentError = GrantError::Other("boom".into()).into();
        assert_eq!(e.status_code(), 500);
        assert!(e.is_retryable());
    }

    #[test]
    fn viewer_errors_map() {
        assert!(matches!(
            PresentError::from(ViewerError::Mismatch),
            PresentError::ViewerMismatch
        ));
        assert_eq!(PresentError::from(ViewerError::NotFound).status_code(), 404);
    }
}
