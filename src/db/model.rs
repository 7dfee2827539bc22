//! Row models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{ClaimState, ItemType, RewardRecord};

/// Raw `user_presents` row; `deleted_at` is lifted into [`ClaimState`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PresentRow {
    pub id: i64,
    pub user_id: i64,
    pub sent_at: i64,
    pub item_type: ItemType,
    pub item_id: i64,
    pub amount: i64,
    pub present_message: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl From<PresentRow> for RewardRecord {
    fn from(row: PresentRow) -> Self {
        RewardRecord {
            id: row.id,
            user_id: row.user_id,
            sent_at: row.sent_at,
            item_type: row.item_type,
            item_id: row.item_id,
            amount: row.amount,
            present_message: row.present_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            state: ClaimState::from_deleted_at(row.deleted_at),
        }
    }
}

/// Present about to be inserted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewPresent {
    pub user_id: i64,
    pub sent_at: i64,
    pub item_type: ItemType,
    pub item_id: i64,
    pub amount: i64,
    pub present_message: String,
    pub created_at: i64,
}
