use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::error::{ExchangeError, Result};
use crate::store::clock::Clock;
use crate::types::ledger_types::{EntryKey, LedgerEntry, PendingEntry};
use crate::types::wallet_types::{Amount, Currency, OwnerId, WalletKey};

#[derive(Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    index: HashMap<EntryKey, usize>,
    balances: HashMap<WalletKey, Amount>,
}

/// Append-only record of every balance change. Cached balances move only through `append`.
pub struct Ledger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            clock,
        }
    }

    pub fn append(&self, entry: PendingEntry) -> Result<LedgerEntry> {
        let mut applied = self.append_batch(vec![entry])?;
        applied
            .pop()
            .ok_or_else(|| ExchangeError::InvalidRequest("empty ledger batch".into()))
    }

    /// Appends all entries or none. Entries whose key is already present are returned as
    /// they were first recorded and do not move balances again.
    pub fn append_batch(&self, batch: Vec<PendingEntry>) -> Result<Vec<LedgerEntry>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::with_capacity(batch.len());
        for entry in &batch {
            if entry.delta == 0 {
                return Err(ExchangeError::InvalidAmount(format!(
                    "zero delta for owner {} ({:?})",
                    entry.owner_id, entry.reason
                )));
            }
            if !seen.insert(entry.key()) {
                return Err(ExchangeError::InvalidRequest(format!(
                    "duplicate ledger key {:?} in one batch",
                    entry.key()
                )));
            }
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut projected: HashMap<WalletKey, (Amount, Amount)> = HashMap::new();
        for entry in batch.iter().filter(|e| !state.index.contains_key(&e.key())) {
            let key = (entry.owner_id, entry.currency);
            let current = state.balances.get(&key).copied().unwrap_or(0);
            let slot = projected.entry(key).or_insert((current, 0));
            slot.1 = slot.1.checked_add(entry.delta).ok_or_else(|| {
                ExchangeError::InvalidAmount(format!("delta overflow for owner {}", entry.owner_id))
            })?;
        }
        for (&(owner_id, currency), &(current, delta)) in &projected {
            let next = current.checked_add(delta).ok_or_else(|| {
                ExchangeError::InvalidAmount(format!("balance overflow for owner {}", owner_id))
            })?;
            if next < 0 {
                return Err(ExchangeError::InsufficientBalance {
                    owner_id,
                    currency,
                    available: current,
                    required: -delta,
                });
            }
        }

        let created_at = self.clock.now();
        let mut applied = Vec::with_capacity(batch.len());
        for entry in batch {
            let key = entry.key();
            if let Some(&pos) = state.index.get(&key) {
                applied.push(state.entries[pos].clone());
                continue;
            }

            let recorded = LedgerEntry {
                id: Uuid::new_v4(),
                owner_id: entry.owner_id,
                currency: entry.currency,
                delta: entry.delta,
                reason: entry.reason,
                reference_id: entry.reference_id,
                created_at,
            };
            *state
                .balances
                .entry((recorded.owner_id, recorded.currency))
                .or_insert(0) += recorded.delta;
            let pos = state.entries.len();
            state.index.insert(key, pos);
            state.entries.push(recorded.clone());
            applied.push(recorded);
        }

        Ok(applied)
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .contains_key(key)
    }

    pub fn entry(&self, key: &EntryKey) -> Option<LedgerEntry> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.index.get(key).map(|&pos| state.entries[pos].clone())
    }

    pub fn balance_of(&self, owner_id: OwnerId, currency: Currency) -> Amount {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .balances
            .get(&(owner_id, currency))
            .copied()
            .unwrap_or(0)
    }

    /// Balance rebuilt from the entries alone, ignoring the cache.
    pub fn recompute_balance(&self, owner_id: OwnerId, currency: Currency) -> Amount {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id && e.currency == currency)
            .map(|e| e.delta)
            .sum()
    }

    /// Wallets whose cached balance disagrees with the fold over entries, as
    /// `(key, cached, folded)`.
    pub fn reconcile(&self) -> Vec<(WalletKey, Amount, Amount)> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut folded: HashMap<WalletKey, Amount> = HashMap::new();
        for entry in &state.entries {
            *folded.entry((entry.owner_id, entry.currency)).or_insert(0) += entry.delta;
        }

        let mut keys: Vec<WalletKey> = folded.keys().chain(state.balances.keys()).copied().collect();
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| {
                let cached = state.balances.get(&key).copied().unwrap_or(0);
                let fold = folded.get(&key).copied().unwrap_or(0);
                (cached != fold).then_some((key, cached, fold))
            })
            .collect()
    }

    pub fn balances(&self) -> Vec<(WalletKey, Amount)> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut balances: Vec<(WalletKey, Amount)> =
            state.balances.iter().map(|(k, v)| (*k, *v)).collect();
        balances.sort();
        balances
    }

    pub fn entries_for(&self, owner_id: OwnerId) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn entries_by_reference(&self, reference_id: &str) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|e| e.reference_id == reference_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::clock::SystemClock;
    use crate::types::ledger_types::LedgerReason;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(SystemClock))
    }

    #[test]
    fn replayed_key_does_not_move_balance() {
        let ledger = ledger();
        let first = ledger
            .append(PendingEntry::credit(1, Currency::Gems, 50, LedgerReason::Deposit, "dep-1"))
            .unwrap();
        let second = ledger
            .append(PendingEntry::credit(1, Currency::Gems, 50, LedgerReason::Deposit, "dep-1"))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(ledger.balance_of(1, Currency::Gems), 50);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn overdraft_rejects_whole_batch() {
        let ledger = ledger();
        ledger
            .append(PendingEntry::credit(1, Currency::Keys, 10, LedgerReason::Deposit, "dep"))
            .unwrap();

        let err = ledger
            .append_batch(vec![
                PendingEntry::credit(2, Currency::Keys, 15, LedgerReason::ShareSale, "t-1"),
                PendingEntry::debit(1, Currency::Keys, 15, LedgerReason::SharePurchase, "t-1"),
            ])
            .unwrap_err();

        assert!(matches!(err, ExchangeError::InsufficientBalance { available: 10, required: 15, .. }));
        assert_eq!(ledger.balance_of(2, Currency::Keys), 0);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn zero_delta_is_invalid() {
        let err = ledger()
            .append(PendingEntry::credit(1, Currency::Points, 0, LedgerReason::Deposit, "z"))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidAmount(_)));
    }

    #[test]
    fn cache_matches_fold_after_offsetting_correction() {
        let ledger = ledger();
        ledger
            .append(PendingEntry::credit(3, Currency::Points, 100, LedgerReason::Deposit, "d"))
            .unwrap();
        ledger
            .append(PendingEntry::debit(3, Currency::Points, 30, LedgerReason::Adjustment, "fix-1"))
            .unwrap();

        assert_eq!(ledger.balance_of(3, Currency::Points), 70);
        assert_eq!(ledger.recompute_balance(3, Currency::Points), 70);
        assert!(ledger.reconcile().is_empty());
        assert_eq!(ledger.entries_by_reference("fix-1").len(), 1);
    }
}
