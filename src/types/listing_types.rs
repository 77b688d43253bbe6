use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::share_types::ContentId;
use crate::types::wallet_types::{Amount, OwnerId};

pub type ListingId = u64;
pub type OfferId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Fulfilled,
    Cancelled,
    Expired,
}

impl ListingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ListingStatus::Active)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShareListing {
    pub id: ListingId,
    pub content_id: ContentId,
    pub owner_id: OwnerId,
    pub quantity: u64,
    pub remaining_quantity: u64,
    pub ask_price: Amount,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ShareListing {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ListingStatus::Active && self.expires_at <= now
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Withdrawn,
}

impl OfferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShareOffer {
    pub id: OfferId,
    pub content_id: ContentId,
    pub buyer_id: OwnerId,
    pub seller_id: Option<OwnerId>,
    pub listing_id: Option<ListingId>,
    pub quantity: u64,
    pub bid_price: Amount,
    pub status: OfferStatus,
    pub accepted_by: Option<OwnerId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ShareOffer {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Pending && self.expires_at <= now
    }
}

/// Settlement of shares between two holders at a fixed price.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Fill {
    pub content_id: ContentId,
    pub listing_id: Option<ListingId>,
    pub offer_id: Option<OfferId>,
    pub seller_id: OwnerId,
    pub buyer_id: OwnerId,
    pub quantity: u64,
    pub unit_price: Amount,
    pub total_price: Amount,
    pub reference_id: String,
    pub replayed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_listings: Vec<ListingId>,
    pub expired_offers: Vec<OfferId>,
    pub closed_markets: Vec<u64>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_listings.is_empty()
            && self.expired_offers.is_empty()
            && self.closed_markets.is_empty()
    }
}
