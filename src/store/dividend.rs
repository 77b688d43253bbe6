use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use uuid::Uuid;

use crate::error::{ExchangeError, Result};
use crate::services::event_publisher::EventBus;
use crate::store::clock::Clock;
use crate::store::registry::ShareRegistry;
use crate::store::wallet::{check_amount, WalletStore};
use crate::types::event_types::{DividendAccruedEvent, DividendDistributedEvent, ExchangeEvent};
use crate::types::ledger_types::{LedgerReason, PendingEntry};
use crate::types::share_types::{ContentId, ContentShareBook, Distribution};
use crate::types::wallet_types::{Amount, OwnerId};

pub struct DividendDistributor {
    registry: Arc<ShareRegistry>,
    wallets: Arc<WalletStore>,
    clock: Arc<dyn Clock>,
    reserve_owner_id: OwnerId,
    events: EventBus,
}

/// Splits `pool` by `owned / total_shares`, flooring each share. The second value is
/// what flooring left over.
pub fn allocate(pool: Amount, total_shares: u64, holdings: &[(OwnerId, u64)]) -> (Vec<(OwnerId, Amount)>, Amount) {
    if pool <= 0 || total_shares == 0 {
        return (Vec::new(), pool.max(0));
    }

    let mut credits = Vec::with_capacity(holdings.len());
    let mut paid: Amount = 0;
    for &(owner_id, owned) in holdings {
        let share = (pool as u128 * owned as u128 / total_shares as u128) as Amount;
        if share > 0 {
            credits.push((owner_id, share));
            paid += share;
        }
    }
    (credits, pool - paid)
}

impl DividendDistributor {
    pub fn new(
        registry: Arc<ShareRegistry>,
        wallets: Arc<WalletStore>,
        clock: Arc<dyn Clock>,
        reserve_owner_id: OwnerId,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            wallets,
            clock,
            reserve_owner_id,
            events,
        }
    }

    /// Adds to the pool. A repeated `reference_id` leaves the pool as it is.
    pub async fn accrue(
        &self,
        content_id: ContentId,
        amount: Amount,
        reference_id: &str,
    ) -> Result<ContentShareBook> {
        check_amount(amount)?;
        let _content = self.registry.lock(content_id).await?;

        let (book, applied) = self.registry.transact(
            content_id,
            |state| {
                if !state.record_accrual(reference_id) {
                    return Ok((state.book.clone(), false));
                }
                state.book.dividend_pool = state
                    .book
                    .dividend_pool
                    .checked_add(amount)
                    .ok_or_else(|| ExchangeError::InvalidAmount("dividend pool overflows".into()))?;
                Ok((state.book.clone(), true))
            },
            |_, _| Ok(()),
        )?;

        if applied {
            info!(
                "Dividend accrued: content={} amount={} pool={}",
                content_id, amount, book.dividend_pool
            );
            self.events.publish(ExchangeEvent::DividendAccrued(DividendAccruedEvent {
                content_id,
                amount,
                dividend_pool: book.dividend_pool,
                timestamp: self.clock.now(),
            }));
        } else {
            debug!("Accrual {} already applied to content {}", reference_id, content_id);
        }
        Ok(book)
    }

    /// Pays the pool out to holders as of this instant. Holdings are read under the
    /// content guard, so no trade lands halfway through.
    pub async fn distribute(&self, content_id: ContentId) -> Result<Distribution> {
        let _content = self.registry.lock(content_id).await?;
        let snapshot = self.registry.snapshot(content_id)?;
        let book = &snapshot.book;

        let epoch = book.distributions + 1;
        let mut distribution = Distribution {
            id: Uuid::new_v4(),
            content_id,
            epoch,
            pool: book.dividend_pool,
            credits: Vec::new(),
            remainder: 0,
            reserve_owner_id: self.reserve_owner_id,
            distributed_at: self.clock.now(),
        };
        if book.dividend_pool == 0 {
            debug!("Dividend pool of content {} is empty, nothing to distribute", content_id);
            return Ok(distribution);
        }

        let holdings: Vec<(OwnerId, u64)> = snapshot
            .holdings
            .iter()
            .map(|h| (h.owner_id, h.owned_shares))
            .collect();
        let (credits, remainder) = allocate(book.dividend_pool, book.total_shares, &holdings);
        distribution.credits = credits;
        distribution.remainder = remainder;

        let mut payouts: BTreeMap<OwnerId, Amount> = distribution.credits.iter().copied().collect();
        if remainder > 0 {
            *payouts.entry(self.reserve_owner_id).or_insert(0) += remainder;
        }
        let reference_id = format!("dividend:{}:{}", content_id, epoch);
        let entries: Vec<PendingEntry> = payouts
            .iter()
            .map(|(&owner_id, &amount)| {
                PendingEntry::credit(owner_id, book.currency, amount, LedgerReason::Dividend, &reference_id)
            })
            .collect();

        let _wallets = self
            .wallets
            .lock(payouts.keys().map(|&owner_id| (owner_id, book.currency)))
            .await?;
        let pool = book.dividend_pool;
        self.registry.transact(
            content_id,
            |state| {
                state.book.dividend_pool -= pool;
                state.book.distributions = epoch;
                Ok(())
            },
            |_, _| self.wallets.post(entries).map(|_| ()),
        )?;

        info!(
            "Dividend distributed: content={} epoch={} pool={} holders={} remainder={}",
            content_id,
            epoch,
            pool,
            distribution.credits.len(),
            remainder
        );
        self.events.publish(ExchangeEvent::DividendDistributed(DividendDistributedEvent {
            distribution_id: distribution.id,
            content_id,
            pool,
            holders: distribution.credits.len(),
            remainder,
            timestamp: self.clock.now(),
        }));
        Ok(distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::clock::SystemClock;
    use crate::store::ledger::Ledger;
    use crate::types::wallet_types::Currency;
    use std::time::Duration;

    const RESERVE: OwnerId = 0;

    #[test]
    fn allocation_floors_and_reports_remainder() {
        let (credits, remainder) = allocate(101, 100, &[(1, 33), (2, 33), (3, 33)]);
        assert_eq!(credits, vec![(1, 33), (2, 33), (3, 33)]);
        assert_eq!(remainder, 2);

        let (credits, remainder) = allocate(10, 100, &[(1, 5)]);
        assert!(credits.is_empty());
        assert_eq!(remainder, 10);
    }

    async fn distributor() -> (DividendDistributor, Arc<ShareRegistry>, Arc<WalletStore>) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = EventBus::new(64);
        let timeout = Duration::from_millis(200);
        let wallets = Arc::new(WalletStore::new(
            Arc::new(Ledger::new(clock.clone())),
            timeout,
            events.clone(),
        ));
        let registry = Arc::new(ShareRegistry::new(
            wallets.clone(),
            clock.clone(),
            timeout,
            events.clone(),
        ));
        registry.open_book(1, 9, 100, 1, Currency::Keys).unwrap();
        for owner in [1, 2] {
            wallets
                .credit(owner, Currency::Keys, 50, LedgerReason::Deposit, "seed")
                .await
                .unwrap();
            registry.buy_shares(1, owner, 25, "seed").await.unwrap();
        }
        let distributor =
            DividendDistributor::new(registry.clone(), wallets.clone(), clock, RESERVE, events);
        (distributor, registry, wallets)
    }

    #[tokio::test]
    async fn distribution_conserves_pool() {
        let (distributor, registry, wallets) = distributor().await;
        distributor.accrue(1, 30, "rev-1").await.unwrap();
        distributor.accrue(1, 30, "rev-1").await.unwrap();
        distributor.accrue(1, 9, "rev-2").await.unwrap();

        let distribution = distributor.distribute(1).await.unwrap();

        assert_eq!(distribution.pool, 39);
        assert_eq!(distribution.credits, vec![(1, 9), (2, 9)]);
        assert_eq!(distribution.remainder, 21);
        assert_eq!(distribution.total_credited(), 39);
        assert_eq!(wallets.balance_of(1, Currency::Keys), 34);
        assert_eq!(wallets.balance_of(RESERVE, Currency::Keys), 21);
        let book = registry.book(1).unwrap();
        assert_eq!((book.dividend_pool, book.distributions), (0, 1));
    }

    #[tokio::test]
    async fn empty_pool_is_a_no_op() {
        let (distributor, registry, wallets) = distributor().await;
        let ledger_len = wallets.ledger().len();

        let distribution = distributor.distribute(1).await.unwrap();

        assert_eq!(distribution.pool, 0);
        assert!(distribution.credits.is_empty());
        assert_eq!(wallets.ledger().len(), ledger_len);
        assert_eq!(registry.book(1).unwrap().distributions, 0);
    }
}
