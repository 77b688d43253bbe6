use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::forecast_types::{ForecastSide, MarketId, Metric, PositionId};
use crate::types::ledger_types::LedgerReason;
use crate::types::listing_types::{ListingId, OfferId};
use crate::types::share_types::ContentId;
use crate::types::wallet_types::{Amount, Currency, OwnerId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    BookOpened(BookOpenedEvent),
    SharesPurchased(BookTradeEvent),
    SharesRedeemed(BookTradeEvent),
    ListingCreated(ListingEvent),
    ListingFilled(ListingFilledEvent),
    ListingFulfilled(ListingEvent),
    ListingCancelled(ListingEvent),
    ListingExpired(ListingEvent),
    OfferCreated(OfferEvent),
    OfferAccepted(OfferAcceptedEvent),
    OfferRejected(OfferEvent),
    OfferWithdrawn(OfferEvent),
    OfferExpired(OfferEvent),
    DividendAccrued(DividendAccruedEvent),
    DividendDistributed(DividendDistributedEvent),
    ForecastOpened(ForecastOpenedEvent),
    ForecastPositionPlaced(ForecastPositionEvent),
    ForecastClosed(ForecastMarketEvent),
    ForecastResolved(ForecastResolvedEvent),
    ForecastVoided(ForecastMarketEvent),
    BalanceChanged(BalanceChangedEvent),
    IntegrityViolation(IntegrityViolationEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookOpenedEvent {
    pub content_id: ContentId,
    pub issuer_id: OwnerId,
    pub total_shares: u64,
    pub reference_price: Amount,
    pub currency: Currency,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookTradeEvent {
    pub content_id: ContentId,
    pub owner_id: OwnerId,
    pub quantity: u64,
    pub unit_price: Amount,
    pub available_shares: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingEvent {
    pub listing_id: ListingId,
    pub content_id: ContentId,
    pub owner_id: OwnerId,
    pub remaining_quantity: u64,
    pub ask_price: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingFilledEvent {
    pub listing_id: ListingId,
    pub content_id: ContentId,
    pub seller_id: OwnerId,
    pub buyer_id: OwnerId,
    pub quantity: u64,
    pub unit_price: Amount,
    pub remaining_quantity: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferEvent {
    pub offer_id: OfferId,
    pub content_id: ContentId,
    pub buyer_id: OwnerId,
    pub quantity: u64,
    pub bid_price: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferAcceptedEvent {
    pub offer_id: OfferId,
    pub content_id: ContentId,
    pub buyer_id: OwnerId,
    pub seller_id: OwnerId,
    pub quantity: u64,
    pub bid_price: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DividendAccruedEvent {
    pub content_id: ContentId,
    pub amount: Amount,
    pub dividend_pool: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DividendDistributedEvent {
    pub distribution_id: Uuid,
    pub content_id: ContentId,
    pub pool: Amount,
    pub holders: usize,
    pub remainder: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastOpenedEvent {
    pub market_id: MarketId,
    pub content_id: ContentId,
    pub metric: Metric,
    pub target_value: u64,
    pub expires_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPositionEvent {
    pub market_id: MarketId,
    pub position_id: PositionId,
    pub owner_id: OwnerId,
    pub side: ForecastSide,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastMarketEvent {
    pub market_id: MarketId,
    pub content_id: ContentId,
    pub pool_over: Amount,
    pub pool_under: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastResolvedEvent {
    pub market_id: MarketId,
    pub content_id: ContentId,
    pub observed_value: u64,
    pub winning_side: ForecastSide,
    pub total_paid: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceChangedEvent {
    pub owner_id: OwnerId,
    pub currency: Currency,
    pub delta: Amount,
    pub balance: Amount,
    pub reason: LedgerReason,
    pub reference_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityViolationEvent {
    pub content_id: ContentId,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}
