use super::model::{NewPresent, PresentRow};
use crate::model::{CampaignMaster, ItemType, ReceiptMarker, RewardRecord};
use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

pub type Pool = SqlitePool;
pub type Tx<'c> = Transaction<'c, Sqlite>;

const PRESENT_COLUMNS: &str = "id, user_id, sent_at, item_type, item_id, amount, present_message, created_at, updated_at, deleted_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let options = connect_options(database_url)?;
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// WAL plus a busy timeout lets competing writers queue instead of failing.
/// For file databases a leading `~/` is expanded and the parent directory created.
fn connect_options(database_url: &str) -> Result<SqliteConnectOptions> {
    if !database_url.starts_with("sqlite:") {
        bail!("unsupported database url {database_url}");
    }
    let mut options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {database_url}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let filename = options.clone().get_filename();
    if let Some(rest) = filename.to_str().and_then(|f| f.strip_prefix("~/")) {
        let home = std::env::var("HOME").context("HOME is not set")?;
        options = options.filename(Path::new(&home).join(rest));
    }

    let filename = options.clone().get_filename();
    if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(options)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// --- campaigns and receipt history ---

#[instrument(skip_all)]
pub async fn active_campaigns<'e, E>(conn: E, at: i64) -> sqlx::Result<Vec<CampaignMaster>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, CampaignMaster>(
        "SELECT id, registered_start_at, registered_end_at, item_type, item_id, amount, present_message \
         FROM present_all_masters WHERE registered_start_at <= ? AND registered_end_at >= ?",
    )
    .bind(at)
    .bind(at)
    .fetch_all(conn)
    .await
}

/// Campaign ids among `campaign_ids` the user already received.
/// An empty result means none were received; failures stay errors.
#[instrument(skip_all)]
pub async fn received_campaign_ids<'e, E>(
    conn: E,
    user_id: i64,
    campaign_ids: &[i64],
) -> sqlx::Result<Vec<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if campaign_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT present_all_id FROM user_present_all_received_history WHERE user_id = ",
    );
    qb.push_bind(user_id);
    qb.push(" AND present_all_id IN (");
    let mut ids = qb.separated(", ");
    for id in campaign_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(conn).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Insert receipt markers, skipping those that already exist.
/// Returns the campaign ids whose marker this call actually wrote.
#[instrument(skip_all)]
pub async fn insert_receipts_tx(
    tx: &mut Tx<'_>,
    markers: &[ReceiptMarker],
) -> sqlx::Result<Vec<i64>> {
    if markers.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(
        "INSERT INTO user_present_all_received_history (user_id, present_all_id, received_at, created_at, updated_at) ",
    );
    qb.push_values(markers, |mut row, m| {
        row.push_bind(m.user_id)
            .push_bind(m.present_all_id)
            .push_bind(m.received_at)
            .push_bind(m.created_at)
            .push_bind(m.updated_at);
    });
    qb.push(" ON CONFLICT (user_id, present_all_id) DO NOTHING RETURNING present_all_id");
    let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&mut **tx).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[instrument(skip_all)]
pub async fn insert_campaign(pool: &Pool, campaign: &CampaignMaster, created_at: i64) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO present_all_masters (id, registered_start_at, registered_end_at, item_type, item_id, amount, present_message, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(campaign.id)
    .bind(campaign.registered_start_at)
    .bind(campaign.registered_end_at)
    .bind(campaign.item_type)
    .bind(campaign.item_id)
    .bind(campaign.amount)
    .bind(&campaign.present_message)
    .bind(created_at)
    .fetch_one(pool)
    .await
    .context("failed to insert campaign")?;
    Ok(id)
}

// --- presents ---

/// Batch insert pending presents and return them with their assigned ids.
#[instrument(skip_all)]
pub async fn insert_presents_tx(
    tx: &mut Tx<'_>,
    presents: &[NewPresent],
) -> sqlx::Result<Vec<RewardRecord>> {
    if presents.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(
        "INSERT INTO user_presents (user_id, sent_at, item_type, item_id, amount, present_message, created_at, updated_at) ",
    );
    qb.push_values(presents, |mut row, p| {
        row.push_bind(p.user_id)
            .push_bind(p.sent_at)
            .push_bind(p.item_type)
            .push_bind(p.item_id)
            .push_bind(p.amount)
            .push_bind(p.present_message.clone())
            .push_bind(p.created_at)
            .push_bind(p.created_at);
    });
    qb.push(" RETURNING ");
    qb.push(PRESENT_COLUMNS);
    let rows: Vec<PresentRow> = qb.build_query_as().fetch_all(&mut **tx).await?;
    let mut presents: Vec<RewardRecord> = rows.into_iter().map(RewardRecord::from).collect();
    // RETURNING order is unspecified.
    presents.sort_by_key(|p| p.id);
    Ok(presents)
}

/// Insert a single present outside the campaign path (other granting flows).
#[instrument(skip_all)]
pub async fn insert_present(pool: &Pool, present: &NewPresent) -> Result<RewardRecord> {
    let mut tx = pool.begin().await?;
    let mut inserted = insert_presents_tx(&mut tx, std::slice::from_ref(present)).await?;
    tx.commit().await?;
    inserted.pop().context("insert returned no row")
}

#[instrument(skip_all)]
pub async fn fetch_present(pool: &Pool, id: i64) -> sqlx::Result<Option<RewardRecord>> {
    let row = sqlx::query_as::<_, PresentRow>(&format!(
        "SELECT {PRESENT_COLUMNS} FROM user_presents WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(RewardRecord::from))
}

#[instrument(skip_all)]
pub async fn list_pending_presents(
    pool: &Pool,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<RewardRecord>> {
    let rows = sqlx::query_as::<_, PresentRow>(&format!(
        "SELECT {PRESENT_COLUMNS} FROM user_presents \
         WHERE user_id = ? AND deleted_at IS NULL \
         ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(RewardRecord::from).collect())
}

#[instrument(skip_all)]
pub async fn count_pending_presents(pool: &Pool, user_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_presents WHERE user_id = ? AND deleted_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// Pending presents of `user_id` among `ids`, ordered by id.
#[instrument(skip_all)]
pub async fn fetch_pending_presents(
    pool: &Pool,
    user_id: i64,
    ids: &[i64],
) -> sqlx::Result<Vec<RewardRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
    qb.push(PRESENT_COLUMNS);
    qb.push(" FROM user_presents WHERE user_id = ");
    qb.push_bind(user_id);
    qb.push(" AND deleted_at IS NULL AND id IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(*id);
    }
    sep.push_unseparated(") ORDER BY id");
    let rows: Vec<PresentRow> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(RewardRecord::from).collect())
}

/// Soft-delete still-pending presents among `ids`.
/// Returns the ids this statement moved out of pending.
#[instrument(skip_all)]
pub async fn mark_presents_claimed_tx(
    tx: &mut Tx<'_>,
    ids: &[i64],
    at: i64,
) -> sqlx::Result<Vec<i64>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE user_presents SET deleted_at = ");
    qb.push_bind(at);
    qb.push(", updated_at = ");
    qb.push_bind(at);
    qb.push(" WHERE deleted_at IS NULL AND id IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(*id);
    }
    sep.push_unseparated(") RETURNING id");
    let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&mut **tx).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// --- users, devices and item masters ---

#[instrument(skip_all)]
pub async fn create_user(pool: &Pool, user_id: i64, at: i64) -> Result<()> {
    sqlx::query("INSERT INTO users (id, isu_coin, created_at, updated_at) VALUES (?, 0, ?, ?)")
        .bind(user_id)
        .bind(at)
        .bind(at)
        .execute(pool)
        .await
        .context("failed to create user")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn register_device(pool: &Pool, user_id: i64, platform_id: &str, at: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_devices (user_id, platform_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(platform_id)
    .bind(at)
    .bind(at)
    .execute(pool)
    .await
    .context("failed to register device")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_item_master(pool: &Pool, id: i64, item_type: ItemType, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO item_masters (id, item_type, name) VALUES (?, ?, ?)")
        .bind(id)
        .bind(item_type)
        .bind(name)
        .execute(pool)
        .await
        .context("failed to insert item master")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn marker(user_id: i64, present_all_id: i64) -> ReceiptMarker {
        ReceiptMarker {
            user_id,
            present_all_id,
            received_at: 10,
            created_at: 10,
            updated_at: 10,
        }
    }

    #[test]
    fn connect_options_create_parent_dir() {
        let td = tempfile::tempdir().unwrap();
        let db_path = td.path().join("nested").join("present.db");
        let options = connect_options(&format!("sqlite://{}", db_path.display())).unwrap();
        assert_eq!(&*options.get_filename(), db_path.as_path());
        assert!(td.path().join("nested").exists());
    }

    #[test]
    fn connect_options_accept_memory_and_reject_other_schemes() {
        connect_options("sqlite::memory:").unwrap();
        assert!(connect_options("postgres://localhost/db").is_err());
    }

    #[tokio::test]
    async fn unknown_item_type_codes_are_rejected_by_the_store() {
        let pool = setup_pool().await;
        let present = sqlx::query(
            "INSERT INTO user_presents (user_id, sent_at, item_type, item_id, amount, created_at, updated_at) \
             VALUES (1, 1, 9, 1, 1, 1, 1)",
        )
        .execute(&pool)
        .await;
        assert!(present.is_err());

        let campaign = sqlx::query(
            "INSERT INTO present_all_masters (id, registered_start_at, registered_end_at, item_type, item_id, amount, created_at) \
             VALUES (1, 0, 10, 0, 1, 1, 0)",
        )
        .execute(&pool)
        .await;
        assert!(campaign.is_err());

        let item = sqlx::query("INSERT INTO item_masters (id, item_type, name) VALUES (1, 5, 'x')")
            .execute(&pool)
            .await;
        assert!(item.is_err());

        // Known codes still go in.
        insert_item_master(&pool, 1, ItemType::Exp, "book").await.unwrap();
        assert_eq!(count_pending_presents(&pool, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn receipt_insert_skips_existing_markers() {
        let pool = setup_pool().await;

        let mut tx = pool.begin().await.unwrap();
        let first = insert_receipts_tx(&mut tx, &[marker(1, 100), marker(1, 101)])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(first.len(), 2);

        let mut tx = pool.begin().await.unwrap();
        let second = insert_receipts_tx(&mut tx, &[marker(1, 101), marker(1, 102)])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(second, vec![102]);

        let mut tx = pool.begin().await.unwrap();
        let mut received = received_campaign_ids(&mut *tx, 1, &[100, 101, 102, 103])
            .await
            .unwrap();
        received.sort();
        assert_eq!(received, vec![100, 101, 102]);
        let none = received_campaign_ids(&mut *tx, 2, &[100]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn claimed_update_only_touches_pending_rows() {
        let pool = setup_pool().await;
        let new = NewPresent {
            user_id: 7,
            sent_at: 1,
            item_type: ItemType::Coin,
            item_id: 1,
            amount: 10,
            present_message: "hi".into(),
            created_at: 1,
        };
        let a = insert_present(&pool, &new).await.unwrap();
        let b = insert_present(&pool, &new).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let claimed = mark_presents_claimed_tx(&mut tx, &[a.id], 5).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(claimed, vec![a.id]);

        let mut tx = pool.begin().await.unwrap();
        let claimed = mark_presents_claimed_tx(&mut tx, &[a.id, b.id], 6)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(claimed, vec![b.id]);

        let a_after = fetch_present(&pool, a.id).await.unwrap().unwrap();
        assert_eq!(a_after.state.deleted_at(), Some(5));
        assert_eq!(count_pending_presents(&pool, 7).await.unwrap(), 0);
    }
}
