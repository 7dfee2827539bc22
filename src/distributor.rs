//! Campaign fan-out: copies every active "present-all" campaign into the
//! user's present box, at most once per user and campaign.

use std::collections::HashSet;

use sqlx::{Executor, Sqlite};
use tracing::{debug, info, instrument};

use crate::db::{self, NewPresent, Pool, Tx};
use crate::error::Result;
use crate::model::{CampaignMaster, ReceiptMarker, RewardRecord};

/// Distribute in a transaction of its own.
///
/// Campaigns and receipts are read on the pool; the transaction then opens
/// with the marker insert so the write lock is taken up front.
#[instrument(skip_all, fields(user_id = user_id, request_at = request_at))]
pub async fn distribute(pool: &Pool, user_id: i64, request_at: i64) -> Result<Vec<RewardRecord>> {
    let campaigns = db::active_campaigns(pool, request_at).await?;
    let received = received_among(pool, user_id, &campaigns).await?;
    let pending = unreceived(&campaigns, &received);
    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let mut tx = pool.begin().await?;
    let presents = materialize(&mut tx, user_id, &pending, request_at).await?;
    if presents.is_empty() {
        // Every marker was written by a concurrent call; nothing to commit.
        return Ok(presents);
    }
    tx.commit().await?;
    info!(count = presents.len(), "distributed campaign presents");
    Ok(presents)
}

/// Distribute inside a transaction owned by the caller (e.g. the login flow).
/// Nothing is committed here.
pub async fn distribute_tx(
    tx: &mut Tx<'_>,
    user_id: i64,
    request_at: i64,
) -> Result<Vec<RewardRecord>> {
    let campaigns = db::active_campaigns(&mut **tx, request_at).await?;
    let received = received_among(&mut **tx, user_id, &campaigns).await?;
    let pending = unreceived(&campaigns, &received);
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    materialize(tx, user_id, &pending, request_at).await
}

async fn received_among<'e, E>(
    conn: E,
    user_id: i64,
    campaigns: &[CampaignMaster],
) -> Result<HashSet<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if campaigns.is_empty() {
        return Ok(HashSet::new());
    }
    let campaign_ids: Vec<i64> = campaigns.iter().map(|c| c.id).collect();
    let received = db::received_campaign_ids(conn, user_id, &campaign_ids).await?;
    Ok(received.into_iter().collect())
}

fn unreceived<'a>(campaigns: &'a [CampaignMaster], received: &HashSet<i64>) -> Vec<&'a CampaignMaster> {
    campaigns
        .iter()
        .filter(|c| !received.contains(&c.id))
        .collect()
}

/// Write markers, then presents for the campaigns whose marker this call wrote.
async fn materialize(
    tx: &mut Tx<'_>,
    user_id: i64,
    pending: &[&CampaignMaster],
    request_at: i64,
) -> Result<Vec<RewardRecord>> {
    let markers: Vec<ReceiptMarker> = pending
        .iter()
        .map(|c| ReceiptMarker {
            user_id,
            present_all_id: c.id,
            received_at: request_at,
            created_at: request_at,
            updated_at: request_at,
        })
        .collect();

    // The unique key decides which campaigns this call owns.
    let inserted: HashSet<i64> = db::insert_receipts_tx(tx, &markers)
        .await?
        .into_iter()
        .collect();
    if inserted.len() < pending.len() {
        debug!(
            skipped = pending.len() - inserted.len(),
            "campaign already received by a concurrent call"
        );
    }

    let presents: Vec<NewPresent> = pending
        .iter()
        .filter(|c| inserted.contains(&c.id))
        .map(|c| present_for(c, user_id, request_at))
        .collect();

    Ok(db::insert_presents_tx(tx, &presents).await?)
}

fn present_for(campaign: &CampaignMaster, user_id: i64, request_at: i64) -> NewPresent {
    NewPresent {
        user_id,
        sent_at: request_at,
        item_type: campaign.item_type,
        item_id: campaign.item_id,
        amount: campaign.amount,
        present_message: campaign.present_message.clone(),
        created_at: request_at,
    }
}
