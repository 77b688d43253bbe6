use thiserror::Error;
use validator::ValidationErrors;

use crate::types::forecast_types::{ForecastStatus, MarketId};
use crate::types::listing_types::{ListingId, ListingStatus, OfferId, OfferStatus};
use crate::types::request_types::INVALID_AMOUNT;
use crate::types::share_types::ContentId;
use crate::types::wallet_types::{Amount, Currency, OwnerId};

pub type Result<T> = std::result::Result<T, ExchangeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("insufficient {currency} balance for owner {owner_id}: available {available}, required {required}")]
    InsufficientBalance {
        owner_id: OwnerId,
        currency: Currency,
        available: Amount,
        required: Amount,
    },
    #[error("owner {owner_id} has {available} free shares of content {content_id}, required {required}")]
    InsufficientShares {
        owner_id: OwnerId,
        content_id: ContentId,
        available: u64,
        required: u64,
    },
    #[error("content {content_id} has {available} shares available, requested {requested}")]
    Oversell {
        content_id: ContentId,
        available: u64,
        requested: u64,
    },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("listing {0} already fulfilled")]
    ListingAlreadyFulfilled(ListingId),
    #[error("listing {listing_id} is {status:?}")]
    ListingClosed {
        listing_id: ListingId,
        status: ListingStatus,
    },
    #[error("offer {offer_id} already {status:?}")]
    OfferAlreadyResolved { offer_id: OfferId, status: OfferStatus },
    #[error("forecast market {market_id} is {status:?}")]
    MarketNotOpen {
        market_id: MarketId,
        status: ForecastStatus,
    },
    #[error("forecast market {0} has not expired yet")]
    MarketNotExpired(MarketId),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("owner {owner_id} may not act on {subject}")]
    Forbidden { owner_id: OwnerId, subject: String },
    #[error("timed out waiting for {0}")]
    Busy(String),
    #[error("integrity violation on content {content_id}: {detail}")]
    IntegrityViolation { content_id: ContentId, detail: String },
}

impl ExchangeError {
    /// Only lock timeouts are safe to retry with the same reference.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Busy(_))
    }

    pub fn status_code(&self) -> i32 {
        match self {
            ExchangeError::InvalidAmount(_) | ExchangeError::InvalidRequest(_) => 400,
            ExchangeError::Forbidden { .. } => 403,
            ExchangeError::NotFound(_) => 404,
            ExchangeError::InsufficientBalance { .. }
            | ExchangeError::InsufficientShares { .. }
            | ExchangeError::Oversell { .. }
            | ExchangeError::ListingAlreadyFulfilled(_)
            | ExchangeError::ListingClosed { .. }
            | ExchangeError::OfferAlreadyResolved { .. }
            | ExchangeError::MarketNotOpen { .. }
            | ExchangeError::MarketNotExpired(_)
            | ExchangeError::AlreadyExists(_) => 409,
            ExchangeError::IntegrityViolation { .. } => 423,
            ExchangeError::Busy(_) => 503,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::InsufficientBalance { .. } => "insufficient_balance",
            ExchangeError::InsufficientShares { .. } => "insufficient_shares",
            ExchangeError::Oversell { .. } => "oversell",
            ExchangeError::InvalidAmount(_) => "invalid_amount",
            ExchangeError::InvalidRequest(_) => "invalid_request",
            ExchangeError::ListingAlreadyFulfilled(_) => "listing_already_fulfilled",
            ExchangeError::ListingClosed { .. } => "listing_closed",
            ExchangeError::OfferAlreadyResolved { .. } => "offer_already_resolved",
            ExchangeError::MarketNotOpen { .. } => "market_not_open",
            ExchangeError::MarketNotExpired(_) => "market_not_expired",
            ExchangeError::NotFound(_) => "not_found",
            ExchangeError::AlreadyExists(_) => "already_exists",
            ExchangeError::Forbidden { .. } => "forbidden",
            ExchangeError::Busy(_) => "busy",
            ExchangeError::IntegrityViolation { .. } => "integrity_violation",
        }
    }
}

impl From<ValidationErrors> for ExchangeError {
    fn from(errors: ValidationErrors) -> Self {
        let amount_error = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .any(|e| e.code == INVALID_AMOUNT);

        if amount_error {
            ExchangeError::InvalidAmount(errors.to_string())
        } else {
            ExchangeError::InvalidRequest(errors.to_string())
        }
    }
}
