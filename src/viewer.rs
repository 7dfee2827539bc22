//! Checks that the viewer (device) making a request is bound to the user.

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use crate::db::Pool;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("user device not found")]
    NotFound,
    #[error("user device belongs to another user")]
    Mismatch,
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

#[async_trait]
pub trait ViewerVerifier: Send + Sync {
    async fn verify(&self, user_id: i64, viewer_id: &str) -> Result<(), ViewerError>;
}

/// Looks the viewer up in `user_devices` by platform id.
#[derive(Debug, Clone)]
pub struct SqliteViewerVerifier {
    pool: Pool,
}

impl SqliteViewerVerifier {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ViewerVerifier for SqliteViewerVerifier {
    #[instrument(skip_all, fields(user_id = user_id))]
    async fn verify(&self, user_id: i64, viewer_id: &str) -> Result<(), ViewerError> {
        let owner = sqlx::query_scalar::<_, i64>("SELECT user_id FROM user_devices WHERE platform_id = ?")
            .bind(viewer_id)
            .fetch_optional(&self.pool)
            .await?;
        match owner {
            None => Err(ViewerError::NotFound),
            Some(owner) if owner != user_id => Err(ViewerError::Mismatch),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn verify_device_binding() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        db::create_user(&pool, 1, 0).await.unwrap();
        db::create_user(&pool, 2, 0).await.unwrap();
        db::register_device(&pool, 1, "viewer-1", 0).await.unwrap();

        let verifier = SqliteViewerVerifier::new(pool);
        verifier.verify(1, "viewer-1").await.unwrap();
        assert!(matches!(
            verifier.verify(2, "viewer-1").await,
            Err(ViewerError::Mismatch)
        ));
        assert!(matches!(
            verifier.verify(1, "nope").await,
            Err(ViewerError::NotFound)
        ));
    }
}
