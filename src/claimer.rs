//! Receiving presents: soft-delete the chosen presents and grant their items
//! in one transaction.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info, instrument, warn};

use crate::db::{self, Pool};
use crate::error::{PresentError, Result};
use crate::grant::{GrantRequest, ItemGranter};
use crate::model::{ClaimOutcome, ClaimState, UpdatedResources};
use crate::viewer::ViewerVerifier;

/// Claim `present_ids` for `user_id`.
///
/// Ids that are unknown, belong to another user or were already received are
/// ignored; if none remain the call succeeds with nothing granted. Either every
/// remaining present is claimed and granted, or nothing is.
#[instrument(skip_all, fields(user_id = user_id, request_at = request_at))]
pub async fn claim(
    pool: &Pool,
    viewers: &dyn ViewerVerifier,
    granter: &dyn ItemGranter,
    user_id: i64,
    viewer_id: &str,
    present_ids: &[i64],
    request_at: i64,
) -> Result<ClaimOutcome> {
    if present_ids.is_empty() {
        return Err(PresentError::InvalidArgument("presentIds is empty".into()));
    }
    let ids: Vec<i64> = present_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

    viewers.verify(user_id, viewer_id).await?;

    let mut presents = db::fetch_pending_presents(pool, user_id, &ids).await?;
    if presents.is_empty() {
        return Ok(ClaimOutcome {
            updated_resources: UpdatedResources::new(request_at),
        });
    }

    let mut tx = pool.begin().await?;

    // The update is the first statement so the write lock is taken up front.
    let pending_ids: Vec<i64> = presents.iter().map(|p| p.id).collect();
    let claimed: HashSet<i64> = db::mark_presents_claimed_tx(&mut tx, &pending_ids, request_at)
        .await?
        .into_iter()
        .collect();
    if claimed.len() < presents.len() {
        debug!(
            lost = presents.len() - claimed.len(),
            "presents received concurrently; skipping them"
        );
        presents.retain(|p| claimed.contains(&p.id));
    }

    let mut resources = UpdatedResources::new(request_at);
    for present in presents.iter_mut() {
        // Unreachable while the read and the update both filter on
        // `deleted_at IS NULL`; a claimed record must never be granted.
        if !present.state.is_pending() {
            return Err(PresentError::AlreadyClaimed(present.id));
        }
        present.state = ClaimState::Claimed { at: request_at };
        present.updated_at = request_at;

        let present_id = present.id;
        let req = GrantRequest {
            user_id: present.user_id,
            item_id: present.item_id,
            item_type: present.item_type,
            amount: present.amount,
            at: request_at,
        };
        let granted = granter.grant(&mut tx, req).await.map_err(|err| {
            warn!(?err, present_id, "grant failed; rolling back claim");
            PresentError::from(err)
        })?;
        resources.absorb(granted);
    }

    tx.commit().await?;
    info!(count = presents.len(), "presents received");

    resources.user_presents = presents;
    Ok(ClaimOutcome {
        updated_resources: resources,
    })
}
