use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::wallet_types::{Amount, Currency, OwnerId};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    SharePurchase,
    ShareSale,
    Dividend,
    ForecastStake,
    ForecastPayout,
    ForecastRefund,
    Deposit,
    Withdrawal,
    Adjustment,
}

impl LedgerReason {
    /// Reason recorded on the receiving side of a transfer.
    pub fn counterpart(self) -> LedgerReason {
        match self {
            LedgerReason::SharePurchase => LedgerReason::ShareSale,
            LedgerReason::ShareSale => LedgerReason::SharePurchase,
            other => other,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub currency: Currency,
    pub delta: Amount,
    pub reason: LedgerReason,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey {
            reference_id: self.reference_id.clone(),
            reason: self.reason,
            owner_id: self.owner_id,
        }
    }
}

/// Idempotency key: one entry per `(reference_id, reason, owner_id)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub reference_id: String,
    pub reason: LedgerReason,
    pub owner_id: OwnerId,
}

impl EntryKey {
    pub fn new(reference_id: impl Into<String>, reason: LedgerReason, owner_id: OwnerId) -> Self {
        Self {
            reference_id: reference_id.into(),
            reason,
            owner_id,
        }
    }
}

/// An entry that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub owner_id: OwnerId,
    pub currency: Currency,
    pub delta: Amount,
    pub reason: LedgerReason,
    pub reference_id: String,
}

impl PendingEntry {
    pub fn credit(
        owner_id: OwnerId,
        currency: Currency,
        amount: Amount,
        reason: LedgerReason,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            currency,
            delta: amount,
            reason,
            reference_id: reference_id.into(),
        }
    }

    pub fn debit(
        owner_id: OwnerId,
        currency: Currency,
        amount: Amount,
        reason: LedgerReason,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            currency,
            delta: -amount,
            reason,
            reference_id: reference_id.into(),
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.reference_id.clone(), self.reason, self.owner_id)
    }
}
