//! Turning a present into inventory.
//!
//! [`ItemGranter`] runs inside the claimer's transaction so a failed claim
//! leaves no inventory change behind. [`SqliteItemGranter`] is the stock
//! implementation over the `users`, `item_masters`, `user_items` and
//! `user_cards` tables.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::Tx;
use crate::model::{Granted, ItemType, UserCard, UserCoins, UserItem};

/// Upper bound on cards minted by one grant; each card is its own row.
pub const MAX_CARDS_PER_GRANT: i64 = 100;

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("item {0} not found")]
    ItemNotFound(i64),
    #[error("item {item_id} is not a {}", .item_type.as_str())]
    InvalidItemType { item_id: i64, item_type: ItemType },
    #[error("cannot grant {amount} of item {item_id}")]
    InvalidAmount { item_id: i64, amount: i64 },
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

/// A single item grant request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantRequest {
    pub user_id: i64,
    pub item_id: i64,
    pub item_type: ItemType,
    pub amount: i64,
    pub at: i64,
}

#[async_trait]
pub trait ItemGranter: Send + Sync {
    async fn grant(&self, tx: &mut Tx<'_>, req: GrantRequest) -> Result<Granted, GrantError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteItemGranter;

#[async_trait]
impl ItemGranter for SqliteItemGranter {
    #[instrument(skip_all, fields(user_id = req.user_id, item_id = req.item_id, item_type = req.item_type.as_str()))]
    async fn grant(&self, tx: &mut Tx<'_>, req: GrantRequest) -> Result<Granted, GrantError> {
        ensure_user(tx, req.user_id).await?;
        let granted = match req.item_type {
            ItemType::Coin => grant_coins(tx, req).await?,
            ItemType::Card => {
                ensure_item_type(tx, req.item_id, req.item_type).await?;
                grant_cards(tx, req).await?
            }
            ItemType::Enhance | ItemType::Exp => {
                ensure_item_type(tx, req.item_id, req.item_type).await?;
                grant_items(tx, req).await?
            }
        };
        debug!(amount = req.amount, "granted");
        Ok(granted)
    }
}

async fn ensure_user(tx: &mut Tx<'_>, user_id: i64) -> Result<(), GrantError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
    found.map(|_| ()).ok_or(GrantError::UserNotFound(user_id))
}

async fn ensure_item_type(tx: &mut Tx<'_>, item_id: i64, wanted: ItemType) -> Result<(), GrantError> {
    let code = sqlx::query_scalar::<_, i64>("SELECT item_type FROM item_masters WHERE id = ?")
        .bind(item_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(GrantError::ItemNotFound(item_id))?;
    if code != wanted.code() {
        return Err(GrantError::InvalidItemType {
            item_id,
            item_type: wanted,
        });
    }
    Ok(())
}

async fn grant_coins(tx: &mut Tx<'_>, req: GrantRequest) -> Result<Granted, GrantError> {
    let user = sqlx::query_as::<_, UserCoins>(
        "UPDATE users SET isu_coin = isu_coin + ?, updated_at = ? WHERE id = ? \
         RETURNING id, isu_coin, updated_at",
    )
    .bind(req.amount)
    .bind(req.at)
    .bind(req.user_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(Granted::Coin(user))
}

async fn grant_cards(tx: &mut Tx<'_>, req: GrantRequest) -> Result<Granted, GrantError> {
    if !(1..=MAX_CARDS_PER_GRANT).contains(&req.amount) {
        return Err(GrantError::InvalidAmount {
            item_id: req.item_id,
            amount: req.amount,
        });
    }
    let mut cards = Vec::new();
    for _ in 0..req.amount {
        let card = sqlx::query_as::<_, UserCard>(
            "INSERT INTO user_cards (user_id, card_id, level, created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?) \
             RETURNING id, user_id, card_id, level, created_at, updated_at",
        )
        .bind(req.user_id)
        .bind(req.item_id)
        .bind(req.at)
        .bind(req.at)
        .fetch_one(&mut **tx)
        .await?;
        cards.push(card);
    }
    Ok(Granted::Cards(cards))
}

async fn grant_items(tx: &mut Tx<'_>, req: GrantRequest) -> Result<Granted, GrantError> {
    let item = sqlx::query_as::<_, UserItem>(
        "INSERT INTO user_items (user_id, item_id, item_type, amount, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, item_id) DO UPDATE SET amount = amount + excluded.amount, updated_at = excluded.updated_at \
         RETURNING id, user_id, item_id, item_type, amount, created_at, updated_at",
    )
    .bind(req.user_id)
    .bind(req.item_id)
    .bind(req.item_type)
    .bind(req.amount)
    .bind(req.at)
    .bind(req.at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(Granted::Item(item))
}
