use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::error::{ExchangeError, Result};
use crate::services::event_publisher::EventBus;
use crate::store::ledger::Ledger;
use crate::store::locks::{KeyGuard, KeyedLocks};
use crate::types::event_types::{BalanceChangedEvent, ExchangeEvent};
use crate::types::ledger_types::{LedgerEntry, LedgerReason, PendingEntry};
use crate::types::wallet_types::{Amount, Currency, OwnerId, Wallet, WalletKey};

pub(crate) fn check_amount(amount: Amount) -> Result<()> {
    if amount <= 0 {
        return Err(ExchangeError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Balance mutations per `(owner, currency)`, each recorded in the ledger.
pub struct WalletStore {
    ledger: Arc<Ledger>,
    locks: KeyedLocks<WalletKey>,
    lock_timeout: Duration,
    events: EventBus,
}

impl WalletStore {
    pub fn new(ledger: Arc<Ledger>, lock_timeout: Duration, events: EventBus) -> Self {
        Self {
            ledger,
            locks: KeyedLocks::new("wallet"),
            lock_timeout,
            events,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub async fn lock<I>(&self, keys: I) -> Result<Vec<KeyGuard>>
    where
        I: IntoIterator<Item = WalletKey>,
    {
        self.locks.acquire_many(keys, self.lock_timeout).await
    }

    pub async fn debit(
        &self,
        owner_id: OwnerId,
        currency: Currency,
        amount: Amount,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<LedgerEntry> {
        check_amount(amount)?;
        let _guard = self
            .locks
            .acquire(&(owner_id, currency), self.lock_timeout)
            .await?;
        self.post_one(PendingEntry::debit(owner_id, currency, amount, reason, reference_id))
    }

    pub async fn credit(
        &self,
        owner_id: OwnerId,
        currency: Currency,
        amount: Amount,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<LedgerEntry> {
        check_amount(amount)?;
        let _guard = self
            .locks
            .acquire(&(owner_id, currency), self.lock_timeout)
            .await?;
        self.post_one(PendingEntry::credit(owner_id, currency, amount, reason, reference_id))
    }

    /// Debit and credit recorded as one ledger batch.
    pub async fn transfer(
        &self,
        from: OwnerId,
        to: OwnerId,
        currency: Currency,
        amount: Amount,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let entries = Self::transfer_entries(from, to, currency, amount, reason, reference_id)?;
        let _guards = self.lock([(from, currency), (to, currency)]).await?;
        self.post(entries)
    }

    pub fn transfer_entries(
        from: OwnerId,
        to: OwnerId,
        currency: Currency,
        amount: Amount,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Vec<PendingEntry>> {
        check_amount(amount)?;
        if from == to {
            return Err(ExchangeError::InvalidRequest(format!(
                "owner {} cannot transfer to itself",
                from
            )));
        }
        Ok(vec![
            PendingEntry::debit(from, currency, amount, reason, reference_id),
            PendingEntry::credit(to, currency, amount, reason.counterpart(), reference_id),
        ])
    }

    /// Appends `batch` to the ledger. The caller holds the guard of every wallet it touches.
    pub fn post(&self, batch: Vec<PendingEntry>) -> Result<Vec<LedgerEntry>> {
        let fresh: Vec<bool> = batch.iter().map(|e| !self.ledger.contains(&e.key())).collect();
        let applied = self.ledger.append_batch(batch)?;

        for (entry, is_fresh) in applied.iter().zip(fresh) {
            if !is_fresh {
                debug!(
                    "Ledger replay ignored: owner={} reason={:?} ref={}",
                    entry.owner_id, entry.reason, entry.reference_id
                );
                continue;
            }
            let balance = self.ledger.balance_of(entry.owner_id, entry.currency);
            info!(
                "Balance updated: owner={} currency={} delta={} balance={} reason={:?}",
                entry.owner_id, entry.currency, entry.delta, balance, entry.reason
            );
            self.events.publish(ExchangeEvent::BalanceChanged(BalanceChangedEvent {
                owner_id: entry.owner_id,
                currency: entry.currency,
                delta: entry.delta,
                balance,
                reason: entry.reason,
                reference_id: entry.reference_id.clone(),
                timestamp: entry.created_at,
            }));
        }

        Ok(applied)
    }

    fn post_one(&self, entry: PendingEntry) -> Result<LedgerEntry> {
        self.post(vec![entry])?
            .pop()
            .ok_or_else(|| ExchangeError::InvalidRequest("empty ledger batch".into()))
    }

    /// Pre-check used before committing to a multi-step operation.
    pub fn ensure_funds(&self, owner_id: OwnerId, currency: Currency, required: Amount) -> Result<()> {
        let available = self.balance_of(owner_id, currency);
        if available < required {
            return Err(ExchangeError::InsufficientBalance {
                owner_id,
                currency,
                available,
                required,
            });
        }
        Ok(())
    }

    pub fn balance_of(&self, owner_id: OwnerId, currency: Currency) -> Amount {
        self.ledger.balance_of(owner_id, currency)
    }

    pub fn wallet(&self, owner_id: OwnerId) -> Wallet {
        let balances: BTreeMap<Currency, Amount> = Currency::ALL
            .iter()
            .map(|&c| (c, self.ledger.balance_of(owner_id, c)))
            .collect();
        Wallet { owner_id, balances }
    }
}
