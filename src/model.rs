use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Kind of item a present grants. Stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i64", try_from = "i64")]
#[repr(i64)]
pub enum ItemType {
    Coin = 1,
    Card = 2,
    Enhance = 3,
    Exp = 4,
}

impl ItemType {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ItemType::Coin),
            2 => Some(ItemType::Card),
            3 => Some(ItemType::Enhance),
            4 => Some(ItemType::Exp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Coin => "coin",
            ItemType::Card => "card",
            ItemType::Enhance => "enhance",
            ItemType::Exp => "exp",
        }
    }
}

impl From<ItemType> for i64 {
    fn from(value: ItemType) -> Self {
        value.code()
    }
}

impl TryFrom<i64> for ItemType {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        ItemType::from_code(value).ok_or_else(|| format!("unknown item type {value}"))
    }
}

/// Whether a present is still waiting to be received.
///
/// Backed by the nullable `deleted_at` column: `NULL` is `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimState {
    #[default]
    Pending,
    Claimed { at: i64 },
}

impl ClaimState {
    pub fn from_deleted_at(deleted_at: Option<i64>) -> Self {
        match deleted_at {
            Some(at) => ClaimState::Claimed { at },
            None => ClaimState::Pending,
        }
    }

    pub fn deleted_at(self) -> Option<i64> {
        match self {
            ClaimState::Pending => None,
            ClaimState::Claimed { at } => Some(at),
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, ClaimState::Pending)
    }
}

impl Serialize for ClaimState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.deleted_at().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClaimState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<i64>::deserialize(deserializer).map(ClaimState::from_deleted_at)
    }
}

/// A present sitting in (or taken out of) a user's present box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRecord {
    pub id: i64,
    pub user_id: i64,
    pub sent_at: i64,
    pub item_type: ItemType,
    pub item_id: i64,
    pub amount: i64,
    pub present_message: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(rename = "deletedAt")]
    pub state: ClaimState,
}

/// Campaign that hands the same present to every user while its window is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CampaignMaster {
    pub id: i64,
    pub registered_start_at: i64,
    pub registered_end_at: i64,
    pub item_type: ItemType,
    pub item_id: i64,
    pub amount: i64,
    pub present_message: String,
}

impl CampaignMaster {
    /// Both window bounds are inclusive.
    pub fn is_active_at(&self, at: i64) -> bool {
        self.registered_start_at <= at && at <= self.registered_end_at
    }
}

/// Marks that a user already got the present of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptMarker {
    pub user_id: i64,
    pub present_all_id: i64,
    pub received_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One page of pending presents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentPage {
    pub presents: Vec<RewardRecord>,
    pub is_next: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserCoins {
    pub id: i64,
    pub isu_coin: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserCard {
    pub id: i64,
    pub user_id: i64,
    pub card_id: i64,
    pub level: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserItem {
    pub id: i64,
    pub user_id: i64,
    pub item_id: i64,
    pub item_type: ItemType,
    pub amount: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Inventory change produced by a single grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Granted {
    Coin(UserCoins),
    Cards(Vec<UserCard>),
    Item(UserItem),
}

/// Everything a claim changed, in the shape the client merges into its cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedResources {
    pub now: i64,
    pub user: Option<UserCoins>,
    pub user_cards: Vec<UserCard>,
    pub user_items: Vec<UserItem>,
    pub user_presents: Vec<RewardRecord>,
}

impl UpdatedResources {
    pub fn new(now: i64) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    /// Fold a grant in. Later coin and item states replace earlier ones.
    pub fn absorb(&mut self, granted: Granted) {
        match granted {
            Granted::Coin(user) => self.user = Some(user),
            Granted::Cards(cards) => self.user_cards.extend(cards),
            Granted::Item(item) => {
                match self.user_items.iter_mut().find(|i| i.id == item.id) {
                    Some(existing) => *existing = item,
                    None => self.user_items.push(item),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub updated_resources: UpdatedResources,
}

impl ClaimOutcome {
    pub fn presents(&self) -> &[RewardRecord] {
        &self.updated_resources.user_presents
    }
}
