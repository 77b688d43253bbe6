use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::share_types::ContentId;
use crate::types::wallet_types::{Amount, Currency, OwnerId};

pub type MarketId = u64;
pub type PositionId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Views,
    Likes,
    Shares,
    Comments,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSide {
    Over,
    Under,
}

impl ForecastSide {
    /// `Over` wins only on a strictly greater observation; a tie goes to `Under`.
    pub fn winner(observed_value: u64, target_value: u64) -> ForecastSide {
        if observed_value > target_value {
            ForecastSide::Over
        } else {
            ForecastSide::Under
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForecastStatus {
    Open,
    Closed,
    Resolved,
    Void,
}

impl ForecastStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, ForecastStatus::Resolved | ForecastStatus::Void)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ForecastMarket {
    pub id: MarketId,
    pub content_id: ContentId,
    pub metric: Metric,
    pub target_value: u64,
    /// Multiplier quoted at creation. Settlement is pari-mutuel regardless.
    pub odds: f64,
    pub currency: Currency,
    pub expires_at: DateTime<Utc>,
    pub status: ForecastStatus,
    pub pool_over: Amount,
    pub pool_under: Amount,
    pub observed_value: Option<u64>,
    pub winning_side: Option<ForecastSide>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl ForecastMarket {
    pub fn pool(&self, side: ForecastSide) -> Amount {
        match side {
            ForecastSide::Over => self.pool_over,
            ForecastSide::Under => self.pool_under,
        }
    }

    /// None when the two pools together do not fit an `Amount`.
    pub fn total_pool(&self) -> Option<Amount> {
        self.pool_over.checked_add(self.pool_under)
    }

    /// Gross return per unit staked on `side` if it wins with the current pools.
    pub fn implied_odds(&self, side: ForecastSide) -> Option<f64> {
        let side_pool = self.pool(side);
        if side_pool <= 0 {
            return None;
        }
        Some(self.total_pool()? as f64 / side_pool as f64)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ForecastStatus::Open && self.expires_at <= now
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ForecastPosition {
    pub id: PositionId,
    pub market_id: MarketId,
    pub owner_id: OwnerId,
    pub side: ForecastSide,
    pub amount: Amount,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
    pub settled: bool,
    pub payout: Option<Amount>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ForecastResolution {
    pub market: ForecastMarket,
    pub payouts: Vec<(PositionId, OwnerId, Amount)>,
    pub remainder: Amount,
    pub total_paid: Amount,
    pub replayed: bool,
}
