use tracing::instrument;

use crate::db::{self, Pool};
use crate::error::{PresentError, Result};
use crate::model::PresentPage;

/// Presents shown per page when the config does not say otherwise.
pub const PRESENT_COUNT_PER_PAGE: i64 = 100;

/// List one page (1-based) of the user's pending presents, newest first.
///
/// The page and the total count are two separate reads, so `is_next` may be
/// computed against a slightly newer snapshot than the page itself.
#[instrument(skip_all, fields(user_id = user_id, page_index = page_index))]
pub async fn list(pool: &Pool, user_id: i64, page_index: i64, page_size: i64) -> Result<PresentPage> {
    if page_index < 1 {
        return Err(PresentError::InvalidArgument(
            "index number (n) should be more than or equal to 1".into(),
        ));
    }
    if page_size < 1 {
        return Err(PresentError::InvalidArgument("page size must be positive".into()));
    }
    let offset = (page_index - 1)
        .checked_mul(page_size)
        .ok_or_else(|| PresentError::InvalidArgument("index number (n) is too large".into()))?;

    let presents = db::list_pending_presents(pool, user_id, page_size, offset).await?;
    let total = db::count_pending_presents(pool, user_id).await?;

    Ok(PresentPage {
        presents,
        is_next: total > offset.saturating_add(page_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewPresent;
    use crate::model::ItemType;

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed(pool: &Pool, user_id: i64, created_at: i64) -> i64 {
        let present = NewPresent {
            user_id,
            sent_at: created_at,
            item_type: ItemType::Exp,
            item_id: 4,
            amount: 1,
            present_message: String::new(),
            created_at,
        };
        db::insert_present(pool, &present).await.unwrap().id
    }

    #[tokio::test]
    async fn rejects_page_zero_before_touching_the_store() {
        let pool = setup_pool().await;
        pool.close().await;
        // A closed pool fails every query, so InvalidArgument proves no query ran.
        assert!(matches!(
            list(&pool, 1, 0, 10).await,
            Err(PresentError::InvalidArgument(_))
        ));
        assert!(matches!(
            list(&pool, 1, -3, 10).await,
            Err(PresentError::InvalidArgument(_))
        ));
        assert!(matches!(list(&pool, 1, 1, 10).await, Err(PresentError::Store(_))));
    }

    #[tokio::test]
    async fn pages_are_complete_and_ordered() {
        let pool = setup_pool().await;
        let mut expected = Vec::new();
        // Two presents per timestamp to exercise the id tie-break.
        for created_at in [30, 10, 20] {
            let a = seed(&pool, 1, created_at).await;
            let b = seed(&pool, 1, created_at).await;
            expected.push((created_at, a));
            expected.push((created_at, b));
        }
        seed(&pool, 2, 40).await;
        expected.sort_by(|x, y| y.0.cmp(&x.0).then(x.1.cmp(&y.1)));
        let expected: Vec<i64> = expected.into_iter().map(|(_, id)| id).collect();

        let mut seen = Vec::new();
        let mut page_index = 1;
        loop {
            let page = list(&pool, 1, page_index, 4).await.unwrap();
            assert!(page.presents.len() <= 4);
            seen.extend(page.presents.iter().map(|p| p.id));
            if !page.is_next {
                break;
            }
            page_index += 1;
        }
        assert_eq!(page_index, 2);
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_next_page() {
        let pool = setup_pool().await;
        for t in 0..4 {
            seed(&pool, 1, t).await;
        }
        let page = list(&pool, 1, 2, 2).await.unwrap();
        assert_eq!(page.presents.len(), 2);
        assert!(!page.is_next);
        let page = list(&pool, 1, 3, 2).await.unwrap();
        assert!(page.presents.is_empty());
        assert!(!page.is_next);
    }
}
