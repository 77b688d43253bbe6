use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::forecast_types::{ForecastSide, MarketId, Metric};
use crate::types::listing_types::{ListingId, OfferId};
use crate::types::share_types::ContentId;
use crate::types::wallet_types::{Amount, Currency, OwnerId};

/// Validation code that maps a field error onto `ExchangeError::InvalidAmount`.
pub const INVALID_AMOUNT: &str = "invalid_amount";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OpenBookRequest {
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
    #[validate(range(min = 1, message = "Issuer ID must be greater than 0"))]
    pub issuer_id: OwnerId,
    #[validate(range(min = 1, code = "invalid_amount", message = "Total shares must be greater than 0"))]
    pub total_shares: u64,
    #[validate(range(min = 1, code = "invalid_amount", message = "Reference price must be greater than 0"))]
    pub reference_price: Amount,
    #[serde(default)]
    pub currency: Option<Currency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DepositRequest {
    #[validate(range(min = 1, message = "Owner ID must be greater than 0"))]
    pub owner_id: OwnerId,
    pub currency: Currency,
    #[validate(range(min = 1, code = "invalid_amount", message = "Amount must be greater than 0"))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WithdrawRequest {
    #[validate(range(min = 1, message = "Owner ID must be greater than 0"))]
    pub owner_id: OwnerId,
    pub currency: Currency,
    #[validate(range(min = 1, code = "invalid_amount", message = "Amount must be greater than 0"))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BuySharesRequest {
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
    #[validate(range(min = 1, message = "Buyer ID must be greater than 0"))]
    pub buyer_id: OwnerId,
    #[validate(range(min = 1, code = "invalid_amount", message = "Quantity must be greater than 0"))]
    pub quantity: u64,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SellToBookRequest {
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
    #[validate(range(min = 1, message = "Seller ID must be greater than 0"))]
    pub seller_id: OwnerId,
    #[validate(range(min = 1, code = "invalid_amount", message = "Quantity must be greater than 0"))]
    pub quantity: u64,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateListingRequest {
    #[validate(range(min = 1, message = "Owner ID must be greater than 0"))]
    pub owner_id: OwnerId,
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
    #[validate(range(min = 1, code = "invalid_amount", message = "Quantity must be greater than 0"))]
    pub quantity: u64,
    #[validate(range(min = 1, code = "invalid_amount", message = "Ask price must be greater than 0"))]
    pub ask_price: Amount,
    #[validate(range(min = 1, message = "TTL must be at least one second"))]
    pub ttl_secs: i64,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FulfillListingRequest {
    #[validate(range(min = 1, message = "Listing ID must be greater than 0"))]
    pub listing_id: ListingId,
    #[validate(range(min = 1, message = "Buyer ID must be greater than 0"))]
    pub buyer_id: OwnerId,
    #[validate(range(min = 1, code = "invalid_amount", message = "Quantity must be greater than 0"))]
    pub quantity: u64,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelListingRequest {
    #[validate(range(min = 1, message = "Listing ID must be greater than 0"))]
    pub listing_id: ListingId,
    #[validate(range(min = 1, message = "Owner ID must be greater than 0"))]
    pub owner_id: OwnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOfferRequest {
    #[validate(range(min = 1, message = "Buyer ID must be greater than 0"))]
    pub buyer_id: OwnerId,
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
    #[validate(range(min = 1, code = "invalid_amount", message = "Quantity must be greater than 0"))]
    pub quantity: u64,
    #[validate(range(min = 1, code = "invalid_amount", message = "Bid price must be greater than 0"))]
    pub bid_price: Amount,
    #[validate(range(min = 1, message = "TTL must be at least one second"))]
    pub ttl_secs: i64,
    #[serde(default)]
    #[validate(range(min = 1, message = "Seller ID must be greater than 0"))]
    pub seller_id: Option<OwnerId>,
    #[serde(default)]
    #[validate(range(min = 1, message = "Listing ID must be greater than 0"))]
    pub listing_id: Option<ListingId>,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcceptOfferRequest {
    #[validate(range(min = 1, message = "Offer ID must be greater than 0"))]
    pub offer_id: OfferId,
    #[validate(range(min = 1, message = "Seller ID must be greater than 0"))]
    pub seller_id: OwnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RejectOfferRequest {
    #[validate(range(min = 1, message = "Offer ID must be greater than 0"))]
    pub offer_id: OfferId,
    #[validate(range(min = 1, message = "Seller ID must be greater than 0"))]
    pub seller_id: OwnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WithdrawOfferRequest {
    #[validate(range(min = 1, message = "Offer ID must be greater than 0"))]
    pub offer_id: OfferId,
    #[validate(range(min = 1, message = "Buyer ID must be greater than 0"))]
    pub buyer_id: OwnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccrueDividendRequest {
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
    #[validate(range(min = 1, code = "invalid_amount", message = "Amount must be greater than 0"))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DistributeDividendRequest {
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateForecastRequest {
    #[validate(range(min = 1, message = "Content ID must be greater than 0"))]
    pub content_id: ContentId,
    pub metric: Metric,
    pub target_value: u64,
    #[validate(range(min = 1.0, message = "Odds must be at least 1.0"))]
    pub odds: f64,
    #[serde(default)]
    pub currency: Option<Currency>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlacePositionRequest {
    #[validate(range(min = 1, message = "Market ID must be greater than 0"))]
    pub market_id: MarketId,
    #[validate(range(min = 1, message = "Owner ID must be greater than 0"))]
    pub owner_id: OwnerId,
    pub side: ForecastSide,
    #[validate(range(min = 1, code = "invalid_amount", message = "Stake must be greater than 0"))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128, message = "Reference ID must be 1-128 characters"))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResolveForecastRequest {
    #[validate(range(min = 1, message = "Market ID must be greater than 0"))]
    pub market_id: MarketId,
    pub observed_value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelForecastRequest {
    #[validate(range(min = 1, message = "Market ID must be greater than 0"))]
    pub market_id: MarketId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWalletRequest {
    pub owner_id: OwnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookRequest {
    pub content_id: ContentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHoldingRequest {
    pub owner_id: OwnerId,
    pub content_id: ContentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetListingRequest {
    pub listing_id: ListingId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOfferRequest {
    pub offer_id: OfferId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetForecastRequest {
    pub market_id: MarketId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeContentRequest {
    pub content_id: ContentId,
}
