use serde::{Deserialize, Serialize};

use crate::types::share_types::ContentId;
use crate::types::wallet_types::{Amount, Currency, OwnerId};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub owner_id: OwnerId,
    pub currency: Currency,
    pub cached: Amount,
    pub folded: Amount,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NegativeBalance {
    pub owner_id: OwnerId,
    pub currency: Currency,
    pub balance: Amount,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentIssue {
    pub content_id: ContentId,
    pub detail: String,
}

/// Consistency check across the ledger and every share book.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub ledger_entries: usize,
    pub balance_mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<NegativeBalance>,
    pub share_violations: Vec<ContentIssue>,
    pub suspended: Vec<ContentIssue>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.balance_mismatches.is_empty()
            && self.negative_balances.is_empty()
            && self.share_violations.is_empty()
            && self.suspended.is_empty()
    }
}
