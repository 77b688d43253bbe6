use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::wallet_types::{Amount, Currency, OwnerId};

pub type ContentId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContentShareBook {
    pub content_id: ContentId,
    pub issuer_id: OwnerId,
    pub currency: Currency,
    pub total_shares: u64,
    pub available_shares: u64,
    pub reference_price: Amount,
    pub dividend_pool: Amount,
    pub distributions: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShareHolding {
    pub owner_id: OwnerId,
    pub content_id: ContentId,
    pub owned_shares: u64,
    /// Shares locked behind active listings; still owned until sold.
    pub committed_shares: u64,
    /// Weighted average purchase price. Display only.
    pub cost_basis: f64,
}

impl ShareHolding {
    pub fn new(owner_id: OwnerId, content_id: ContentId) -> Self {
        Self {
            owner_id,
            content_id,
            owned_shares: 0,
            committed_shares: 0,
            cost_basis: 0.0,
        }
    }

    pub fn free_shares(&self) -> u64 {
        self.owned_shares.saturating_sub(self.committed_shares)
    }

    pub fn is_empty(&self) -> bool {
        self.owned_shares == 0 && self.committed_shares == 0
    }
}

/// Holdings of one content item captured under its guard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub book: ContentShareBook,
    pub holdings: Vec<ShareHolding>,
}

impl BookSnapshot {
    pub fn owned_total(&self) -> u64 {
        self.holdings.iter().map(|h| h.owned_shares).sum()
    }
}

/// Result of a primary purchase or a sale back to the book.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BookTrade {
    pub content_id: ContentId,
    pub owner_id: OwnerId,
    pub quantity: u64,
    pub unit_price: Amount,
    pub total_price: Amount,
    pub available_shares: u64,
    pub replayed: bool,
}

/// One dividend distribution. `credits` sum with `remainder` to `pool`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Distribution {
    pub id: Uuid,
    pub content_id: ContentId,
    pub epoch: u64,
    pub pool: Amount,
    pub credits: Vec<(OwnerId, Amount)>,
    pub remainder: Amount,
    pub reserve_owner_id: OwnerId,
    pub distributed_at: DateTime<Utc>,
}

impl Distribution {
    pub fn total_credited(&self) -> Amount {
        self.credits.iter().map(|(_, amount)| amount).sum::<Amount>() + self.remainder
    }
}
