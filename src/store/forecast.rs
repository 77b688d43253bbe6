use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::error::{ExchangeError, Result};
use crate::services::event_publisher::EventBus;
use crate::store::clock::Clock;
use crate::store::locks::{KeyGuard, KeyedLocks};
use crate::store::wallet::{check_amount, WalletStore};
use crate::types::event_types::{
    ExchangeEvent, ForecastMarketEvent, ForecastOpenedEvent, ForecastPositionEvent,
    ForecastResolvedEvent,
};
use crate::types::forecast_types::{
    ForecastMarket, ForecastPosition, ForecastResolution, ForecastSide, ForecastStatus, MarketId,
    PositionId,
};
use crate::types::ledger_types::{LedgerReason, PendingEntry};
use crate::types::request_types::{CreateForecastRequest, PlacePositionRequest};
use crate::types::wallet_types::{Amount, Currency, OwnerId};

/// The part of a market a transaction rewrites as a whole.
#[derive(Debug, Clone)]
struct MarketHead {
    market: ForecastMarket,
    remainder: Amount,
}

/// Position changes staged by a transaction and applied once it commits.
enum PositionChange {
    Unchanged,
    Open(ForecastPosition),
    Settle(HashMap<PositionId, Amount>),
}

#[derive(Debug)]
struct MarketState {
    head: MarketHead,
    positions: Vec<ForecastPosition>,
    /// `(owner, reference)` to index in `positions`.
    refs: HashMap<(OwnerId, String), usize>,
}

impl MarketState {
    fn apply(&mut self, change: PositionChange) {
        match change {
            PositionChange::Unchanged => {}
            PositionChange::Open(position) => {
                self.refs
                    .insert((position.owner_id, position.reference_id.clone()), self.positions.len());
                self.positions.push(position);
            }
            PositionChange::Settle(payouts) => {
                for position in self.positions.iter_mut() {
                    position.settled = true;
                    position.payout = Some(payouts.get(&position.id).copied().unwrap_or(0));
                }
            }
        }
    }

    fn by_ref(&self, key: &(OwnerId, String)) -> Option<&ForecastPosition> {
        self.refs.get(key).and_then(|&i| self.positions.get(i))
    }

    fn resolution(&self, replayed: bool) -> ForecastResolution {
        let payouts: Vec<(PositionId, OwnerId, Amount)> = self
            .positions
            .iter()
            .filter_map(|p| p.payout.filter(|a| *a > 0).map(|a| (p.id, p.owner_id, a)))
            .collect();
        let total_paid = payouts.iter().map(|(_, _, a)| a).sum::<Amount>() + self.head.remainder;
        ForecastResolution {
            market: self.head.market.clone(),
            payouts,
            remainder: self.head.remainder,
            total_paid,
            replayed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Observed(u64),
    Cancelled,
}

/// Pari-mutuel split of the losing pool. Each winner gets its stake back plus a floored
/// share of the losing pool; the second value is what flooring left over.
pub fn pari_mutuel(stakes: &[(PositionId, Amount)], winning_pool: Amount, losing_pool: Amount) -> (Vec<(PositionId, Amount)>, Amount) {
    if winning_pool <= 0 {
        return (Vec::new(), losing_pool.max(0));
    }
    let mut paid_from_losers: Amount = 0;
    let payouts = stakes
        .iter()
        .map(|&(id, stake)| {
            let winnings = (stake as i128 * losing_pool as i128 / winning_pool as i128) as Amount;
            paid_from_losers = paid_from_losers.saturating_add(winnings);
            (id, stake.saturating_add(winnings))
        })
        .collect();
    (payouts, losing_pool.saturating_sub(paid_from_losers))
}

pub struct ForecastBook {
    markets: RwLock<HashMap<MarketId, Arc<Mutex<MarketState>>>>,
    locks: KeyedLocks<MarketId>,
    lock_timeout: Duration,
    wallets: Arc<WalletStore>,
    clock: Arc<dyn Clock>,
    default_currency: Currency,
    reserve_owner_id: OwnerId,
    events: EventBus,
    next_market_id: AtomicU64,
    next_position_id: AtomicU64,
}

impl ForecastBook {
    pub fn new(
        wallets: Arc<WalletStore>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
        default_currency: Currency,
        reserve_owner_id: OwnerId,
        events: EventBus,
    ) -> Self {
        Self {
            markets: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new("market"),
            lock_timeout,
            wallets,
            clock,
            default_currency,
            reserve_owner_id,
            events,
            next_market_id: AtomicU64::new(1),
            next_position_id: AtomicU64::new(1),
        }
    }

    fn cell(&self, market_id: MarketId) -> Result<Arc<Mutex<MarketState>>> {
        self.markets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&market_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("forecast market {}", market_id)))
    }

    fn read<T>(&self, market_id: MarketId, f: impl FnOnce(&MarketState) -> T) -> Result<T> {
        let cell = self.cell(market_id)?;
        let state = cell.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&state))
    }

    async fn lock(&self, market_id: MarketId) -> Result<KeyGuard> {
        self.cell(market_id)?;
        self.locks.acquire(&market_id, self.lock_timeout).await
    }

    /// Copy-on-write update of a market's head. `change` lands on the positions only
    /// after `settle` succeeds. Caller holds the market guard.
    fn transact<T, M, S>(&self, market_id: MarketId, change: PositionChange, mutate: M, settle: S) -> Result<T>
    where
        M: FnOnce(&mut MarketHead) -> Result<T>,
        S: FnOnce(&T) -> Result<()>,
    {
        let cell = self.cell(market_id)?;
        let mut state = cell.lock().unwrap_or_else(PoisonError::into_inner);
        let mut head = state.head.clone();
        let value = mutate(&mut head)?;
        settle(&value)?;
        state.head = head;
        state.apply(change);
        Ok(value)
    }

    pub fn create_market(&self, req: &CreateForecastRequest) -> Result<ForecastMarket> {
        if !req.odds.is_finite() || req.odds < 1.0 {
            return Err(ExchangeError::InvalidAmount(format!("odds {} out of range", req.odds)));
        }
        let now = self.clock.now();
        if req.expires_at <= now {
            return Err(ExchangeError::InvalidRequest(format!(
                "expiry {} is not in the future",
                req.expires_at
            )));
        }

        let market = ForecastMarket {
            id: self.next_market_id.fetch_add(1, Ordering::Relaxed),
            content_id: req.content_id,
            metric: req.metric,
            target_value: req.target_value,
            odds: req.odds,
            currency: req.currency.unwrap_or(self.default_currency),
            expires_at: req.expires_at,
            status: ForecastStatus::Open,
            pool_over: 0,
            pool_under: 0,
            observed_value: None,
            winning_side: None,
            created_at: now,
            settled_at: None,
        };
        self.markets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                market.id,
                Arc::new(Mutex::new(MarketState {
                    head: MarketHead {
                        market: market.clone(),
                        remainder: 0,
                    },
                    positions: Vec::new(),
                    refs: HashMap::new(),
                })),
            );

        info!(
            "Forecast market {} opened: content={} {:?} target={} expires={}",
            market.id, market.content_id, market.metric, market.target_value, market.expires_at
        );
        self.events.publish(ExchangeEvent::ForecastOpened(ForecastOpenedEvent {
            market_id: market.id,
            content_id: market.content_id,
            metric: market.metric,
            target_value: market.target_value,
            expires_at: market.expires_at,
            timestamp: self.clock.now(),
        }));
        Ok(market)
    }

    pub async fn place_position(&self, req: &PlacePositionRequest) -> Result<ForecastPosition> {
        check_amount(req.amount)?;
        let _market = self.lock(req.market_id).await?;

        let ref_key = (req.owner_id, req.reference_id.clone());
        if let Some(existing) = self.read(req.market_id, |s| s.by_ref(&ref_key).cloned())? {
            return Ok(existing);
        }

        let market = self.close_if_due(req.market_id)?;
        if market.status != ForecastStatus::Open {
            return Err(ExchangeError::MarketNotOpen {
                market_id: market.id,
                status: market.status,
            });
        }

        let position = ForecastPosition {
            id: self.next_position_id.fetch_add(1, Ordering::Relaxed),
            market_id: market.id,
            owner_id: req.owner_id,
            side: req.side,
            amount: req.amount,
            reference_id: req.reference_id.clone(),
            created_at: self.clock.now(),
            settled: false,
            payout: None,
        };
        let stake = PendingEntry::debit(
            req.owner_id,
            market.currency,
            req.amount,
            LedgerReason::ForecastStake,
            format!("forecast:{}:{}", market.id, req.reference_id),
        );

        let _wallet = self.wallets.lock([(req.owner_id, market.currency)]).await?;
        self.transact(
            market.id,
            PositionChange::Open(position.clone()),
            |head| {
                let pool = match position.side {
                    ForecastSide::Over => &mut head.market.pool_over,
                    ForecastSide::Under => &mut head.market.pool_under,
                };
                *pool = pool
                    .checked_add(position.amount)
                    .ok_or_else(|| ExchangeError::InvalidAmount("forecast pool overflows".into()))?;
                if head.market.total_pool().is_none() {
                    return Err(ExchangeError::InvalidAmount("combined forecast pools overflow".into()));
                }
                Ok(())
            },
            |_| self.wallets.post(vec![stake]).map(|_| ()),
        )?;

        info!(
            "Forecast position {} on market {}: owner={} {:?} stake={}",
            position.id, position.market_id, position.owner_id, position.side, position.amount
        );
        self.events.publish(ExchangeEvent::ForecastPositionPlaced(ForecastPositionEvent {
            market_id: position.market_id,
            position_id: position.id,
            owner_id: position.owner_id,
            side: position.side,
            amount: position.amount,
            timestamp: self.clock.now(),
        }));
        Ok(position)
    }

    /// Settles an expired market against the observed metric. Resolving a settled
    /// market returns the original outcome.
    pub async fn resolve(&self, market_id: MarketId, observed_value: u64) -> Result<ForecastResolution> {
        let _market = self.lock(market_id).await?;

        let settled = self.read(market_id, |s| {
            s.head.market.status.is_settled().then(|| s.resolution(true))
        })?;
        if let Some(resolution) = settled {
            return Ok(resolution);
        }
        let market = self.close_if_due(market_id)?;
        if market.status == ForecastStatus::Open {
            return Err(ExchangeError::MarketNotExpired(market_id));
        }

        self.settle(market_id, Outcome::Observed(observed_value)).await
    }

    /// Voids an unsettled market and refunds every stake.
    pub async fn cancel_market(&self, market_id: MarketId) -> Result<ForecastResolution> {
        let _market = self.lock(market_id).await?;

        let market = self.read(market_id, |s| s.head.market.clone())?;
        if market.status.is_settled() {
            return Err(ExchangeError::MarketNotOpen {
                market_id,
                status: market.status,
            });
        }
        self.settle(market_id, Outcome::Cancelled).await
    }

    /// Caller holds the market guard.
    async fn settle(&self, market_id: MarketId, outcome: Outcome) -> Result<ForecastResolution> {
        let (market, stakes): (ForecastMarket, Vec<(PositionId, OwnerId, ForecastSide, Amount)>) =
            self.read(market_id, |s| {
                let stakes = s
                    .positions
                    .iter()
                    .map(|p| (p.id, p.owner_id, p.side, p.amount))
                    .collect();
                (s.head.market.clone(), stakes)
            })?;
        let total_pool = market.total_pool().ok_or_else(|| ExchangeError::IntegrityViolation {
            content_id: market.content_id,
            detail: format!("market {} pools overflow", market_id),
        })?;

        let winner = match outcome {
            Outcome::Observed(observed) => Some(ForecastSide::winner(observed, market.target_value)),
            Outcome::Cancelled => None,
        };
        let void = winner.map_or(true, |side| market.pool(side) == 0);

        let (payouts, remainder, reason): (HashMap<PositionId, Amount>, Amount, LedgerReason) =
            match winner {
                Some(side) if !void => {
                    let winning: Vec<(PositionId, Amount)> = stakes
                        .iter()
                        .filter(|(_, _, s, _)| *s == side)
                        .map(|&(id, _, _, amount)| (id, amount))
                        .collect();
                    let losing_pool = total_pool - market.pool(side);
                    let (payouts, remainder) = pari_mutuel(&winning, market.pool(side), losing_pool);
                    (payouts.into_iter().collect(), remainder, LedgerReason::ForecastPayout)
                }
                _ => (
                    stakes.iter().map(|&(id, _, _, amount)| (id, amount)).collect(),
                    0,
                    LedgerReason::ForecastRefund,
                ),
            };

        let paid = payouts
            .values()
            .try_fold(remainder, |acc, amount| acc.checked_add(*amount));
        if paid != Some(total_pool) {
            return Err(ExchangeError::IntegrityViolation {
                content_id: market.content_id,
                detail: format!("market {} would pay {:?} from a pool of {}", market_id, paid, total_pool),
            });
        }

        let mut entries: Vec<PendingEntry> = stakes
            .iter()
            .filter_map(|&(id, owner_id, _, _)| {
                payouts.get(&id).filter(|a| **a > 0).map(|&amount| {
                    PendingEntry::credit(
                        owner_id,
                        market.currency,
                        amount,
                        reason,
                        format!("forecast:{}:position:{}", market_id, id),
                    )
                })
            })
            .collect();
        if remainder > 0 {
            entries.push(PendingEntry::credit(
                self.reserve_owner_id,
                market.currency,
                remainder,
                LedgerReason::ForecastPayout,
                format!("forecast:{}:remainder", market_id),
            ));
        }

        let recipients: BTreeSet<OwnerId> = entries.iter().map(|e| e.owner_id).collect();
        let _wallets = self
            .wallets
            .lock(recipients.into_iter().map(|owner_id| (owner_id, market.currency)))
            .await?;

        let now = self.clock.now();
        self.transact(
            market_id,
            PositionChange::Settle(payouts),
            |head| {
                head.remainder = remainder;
                head.market.status = if void {
                    ForecastStatus::Void
                } else {
                    ForecastStatus::Resolved
                };
                if let Outcome::Observed(observed) = outcome {
                    head.market.observed_value = Some(observed);
                }
                head.market.winning_side = winner.filter(|_| !void);
                head.market.settled_at = Some(now);
                Ok(())
            },
            |_| self.wallets.post(entries).map(|_| ()),
        )?;
        let resolution = self.read(market_id, |s| s.resolution(false))?;

        let market = &resolution.market;
        match (market.status, market.winning_side, market.observed_value) {
            (ForecastStatus::Resolved, Some(winning_side), Some(observed_value)) => {
                info!(
                    "Forecast market {} resolved: observed={} winner={:?} paid={} remainder={}",
                    market_id, observed_value, winning_side, resolution.total_paid, remainder
                );
                self.events.publish(ExchangeEvent::ForecastResolved(ForecastResolvedEvent {
                    market_id,
                    content_id: market.content_id,
                    observed_value,
                    winning_side,
                    total_paid: resolution.total_paid,
                    timestamp: self.clock.now(),
                }));
            }
            _ => {
                info!(
                    "Forecast market {} void, {} refunded",
                    market_id, resolution.total_paid
                );
                self.events.publish(ExchangeEvent::ForecastVoided(self.market_event(market)));
            }
        }
        Ok(resolution)
    }

    /// Moves an open market past its deadline to closed. Caller holds the market guard.
    fn close_if_due(&self, market_id: MarketId) -> Result<ForecastMarket> {
        let now = self.clock.now();
        let (market, closed) = self.transact(
            market_id,
            PositionChange::Unchanged,
            |head| {
                let due = head.market.is_due(now);
                if due {
                    head.market.status = ForecastStatus::Closed;
                }
                Ok((head.market.clone(), due))
            },
            |_| Ok(()),
        )?;
        if closed {
            warn!("Forecast market {} closed at expiry", market_id);
            self.events.publish(ExchangeEvent::ForecastClosed(self.market_event(&market)));
        }
        Ok(market)
    }

    pub async fn close_due(&self, now: DateTime<Utc>) -> Vec<MarketId> {
        let mut due: Vec<MarketId> = self
            .markets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, cell)| {
                cell.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .head
                    .market
                    .is_due(now)
            })
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();

        let mut closed = Vec::with_capacity(due.len());
        for market_id in due {
            let _market = match self.lock(market_id).await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("Sweep skipped forecast market {}: {}", market_id, e);
                    continue;
                }
            };
            match self.close_if_due(market_id) {
                Ok(market) if market.status == ForecastStatus::Closed => closed.push(market_id),
                Ok(_) => {}
                Err(e) => warn!("Forecast market {} not closed: {}", market_id, e),
            }
        }
        closed
    }

    pub async fn market(&self, market_id: MarketId) -> Result<ForecastMarket> {
        let market = self.read(market_id, |s| s.head.market.clone())?;
        if !market.is_due(self.clock.now()) {
            return Ok(market);
        }
        let _market = self.lock(market_id).await?;
        self.close_if_due(market_id)
    }

    pub fn positions(&self, market_id: MarketId) -> Result<Vec<ForecastPosition>> {
        self.read(market_id, |s| s.positions.clone())
    }

    pub fn implied_odds(&self, market_id: MarketId, side: ForecastSide) -> Result<Option<f64>> {
        self.read(market_id, |s| s.head.market.implied_odds(side))
    }

    fn market_event(&self, market: &ForecastMarket) -> ForecastMarketEvent {
        ForecastMarketEvent {
            market_id: market.id,
            content_id: market.content_id,
            pool_over: market.pool_over,
            pool_under: market.pool_under,
            timestamp: self.clock.now(),
        }
    }

    pub fn markets(&self) -> Vec<ForecastMarket> {
        let mut markets: Vec<ForecastMarket> = self
            .markets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|cell| cell.lock().unwrap_or_else(PoisonError::into_inner).head.market.clone())
            .collect();
        markets.sort_by_key(|m| m.id);
        markets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::clock::ManualClock;
    use crate::store::ledger::Ledger;
    use crate::types::forecast_types::Metric;

    const RESERVE: OwnerId = 0;

    struct Fixture {
        book: ForecastBook,
        wallets: Arc<WalletStore>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(stakers: &[OwnerId]) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let events = EventBus::new(64);
        let wallets = Arc::new(WalletStore::new(
            Arc::new(Ledger::new(clock.clone())),
            Duration::from_millis(200),
            events.clone(),
        ));
        for &owner in stakers {
            wallets
                .credit(owner, Currency::Points, 1_000, LedgerReason::Deposit, "seed")
                .await
                .unwrap();
        }
        let book = ForecastBook::new(
            wallets.clone(),
            clock.clone(),
            Duration::from_millis(200),
            Currency::Points,
            RESERVE,
            events,
        );
        Fixture { book, wallets, clock }
    }

    fn open(fx: &Fixture, target_value: u64) -> MarketId {
        fx.book
            .create_market(&CreateForecastRequest {
                content_id: 1,
                metric: Metric::Views,
                target_value,
                odds: 2.0,
                currency: None,
                expires_at: fx.clock.now() + chrono::Duration::hours(1),
            })
            .unwrap()
            .id
    }

    async fn stake(fx: &Fixture, market_id: MarketId, owner_id: OwnerId, side: ForecastSide, amount: Amount) {
        fx.book
            .place_position(&PlacePositionRequest {
                market_id,
                owner_id,
                side,
                amount,
                reference_id: format!("stake-{}-{}", owner_id, amount),
            })
            .await
            .unwrap();
    }

    #[test]
    fn pari_mutuel_floors_winnings() {
        let (payouts, remainder) = pari_mutuel(&[(1, 1), (2, 2)], 3, 10);
        assert_eq!(payouts, vec![(1, 4), (2, 8)]);
        assert_eq!(remainder, 1);
    }

    #[tokio::test]
    async fn resolve_before_expiry_is_rejected() {
        let fx = fixture(&[1]).await;
        let id = open(&fx, 100);
        stake(&fx, id, 1, ForecastSide::Over, 10).await;

        let err = fx.book.resolve(id, 500).await.unwrap_err();
        assert_eq!(err, ExchangeError::MarketNotExpired(id));
    }

    #[tokio::test]
    async fn tie_goes_to_under_and_remainder_to_reserve() {
        let fx = fixture(&[1, 2, 3, 4]).await;
        let id = open(&fx, 100);
        stake(&fx, id, 1, ForecastSide::Under, 1).await;
        stake(&fx, id, 2, ForecastSide::Under, 2).await;
        stake(&fx, id, 3, ForecastSide::Over, 6).await;
        stake(&fx, id, 4, ForecastSide::Over, 4).await;
        fx.clock.advance(chrono::Duration::hours(2));

        let resolution = fx.book.resolve(id, 100).await.unwrap();

        assert_eq!(resolution.market.winning_side, Some(ForecastSide::Under));
        assert_eq!(resolution.total_paid, 13);
        assert_eq!(resolution.remainder, 1);
        assert_eq!(fx.wallets.balance_of(1, Currency::Points), 1_000 - 1 + 4);
        assert_eq!(fx.wallets.balance_of(2, Currency::Points), 1_000 - 2 + 8);
        assert_eq!(fx.wallets.balance_of(3, Currency::Points), 1_000 - 6);
        assert_eq!(fx.wallets.balance_of(RESERVE, Currency::Points), 1);

        let replay = fx.book.resolve(id, 0).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.total_paid, 13);
        assert_eq!(fx.wallets.balance_of(1, Currency::Points), 1_003);
    }

    #[tokio::test]
    async fn closed_market_rejects_positions() {
        let fx = fixture(&[1]).await;
        let id = open(&fx, 100);
        fx.clock.advance(chrono::Duration::hours(2));

        let err = fx
            .book
            .place_position(&PlacePositionRequest {
                market_id: id,
                owner_id: 1,
                side: ForecastSide::Over,
                amount: 5,
                reference_id: "late".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::MarketNotOpen { status: ForecastStatus::Closed, .. }));
        assert_eq!(fx.wallets.balance_of(1, Currency::Points), 1_000);
    }

    #[tokio::test]
    async fn cancelled_market_refunds_everyone() {
        let fx = fixture(&[1, 2]).await;
        let id = open(&fx, 100);
        stake(&fx, id, 1, ForecastSide::Over, 30).await;
        stake(&fx, id, 2, ForecastSide::Under, 20).await;

        let resolution = fx.book.cancel_market(id).await.unwrap();

        assert_eq!(resolution.market.status, ForecastStatus::Void);
        assert_eq!(resolution.total_paid, 50);
        assert_eq!(fx.wallets.balance_of(1, Currency::Points), 1_000);
        assert_eq!(fx.wallets.balance_of(2, Currency::Points), 1_000);
        assert!(matches!(
            fx.book.cancel_market(id).await.unwrap_err(),
            ExchangeError::MarketNotOpen { status: ForecastStatus::Void, .. }
        ));
    }

    #[tokio::test]
    async fn repeated_stake_reference_is_not_charged_twice() {
        let fx = fixture(&[1]).await;
        let id = open(&fx, 100);
        stake(&fx, id, 1, ForecastSide::Over, 25).await;
        stake(&fx, id, 1, ForecastSide::Over, 25).await;

        let market = fx.book.market(id).await.unwrap();
        assert_eq!(market.pool_over, 25);
        assert_eq!(fx.wallets.balance_of(1, Currency::Points), 975);
        assert_eq!(fx.book.implied_odds(id, ForecastSide::Over).unwrap(), Some(1.0));
        assert_eq!(fx.book.implied_odds(id, ForecastSide::Under).unwrap(), None);
    }

    #[tokio::test]
    async fn unfunded_stake_leaves_no_position() {
        let fx = fixture(&[1]).await;
        let id = open(&fx, 100);
        stake(&fx, id, 1, ForecastSide::Over, 400).await;

        let err = fx
            .book
            .place_position(&PlacePositionRequest {
                market_id: id,
                owner_id: 1,
                side: ForecastSide::Under,
                amount: 700,
                reference_id: "too-much".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));
        assert_eq!(fx.book.positions(id).unwrap().len(), 1);
        let market = fx.book.market(id).await.unwrap();
        assert_eq!((market.pool_over, market.pool_under), (400, 0));
    }

    #[tokio::test]
    async fn stake_replay_resolves_among_many_positions() {
        let fx = fixture(&[1]).await;
        let id = open(&fx, 100);
        for n in 1..=500 {
            stake(&fx, id, 1, ForecastSide::Over, 1).await;
            fx.book
                .place_position(&PlacePositionRequest {
                    market_id: id,
                    owner_id: 1,
                    side: ForecastSide::Under,
                    amount: 1,
                    reference_id: format!("u-{}", n),
                })
                .await
                .unwrap();
        }

        let replay = fx
            .book
            .place_position(&PlacePositionRequest {
                market_id: id,
                owner_id: 1,
                side: ForecastSide::Under,
                amount: 1,
                reference_id: "u-250".into(),
            })
            .await
            .unwrap();

        assert_eq!(replay.reference_id, "u-250");
        assert_eq!(fx.book.positions(id).unwrap().len(), 501);
        assert_eq!(fx.wallets.balance_of(1, Currency::Points), 1_000 - 501);
    }

    #[tokio::test]
    async fn combined_pools_cannot_overflow() {
        let fx = fixture(&[]).await;
        for owner in [5, 6] {
            fx.wallets
                .credit(owner, Currency::Points, Amount::MAX, LedgerReason::Deposit, "seed")
                .await
                .unwrap();
        }
        let id = open(&fx, 100);
        stake(&fx, id, 5, ForecastSide::Over, Amount::MAX).await;

        let err = fx
            .book
            .place_position(&PlacePositionRequest {
                market_id: id,
                owner_id: 6,
                side: ForecastSide::Under,
                amount: Amount::MAX,
                reference_id: "max".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::InvalidAmount(_)));
        assert_eq!(fx.wallets.balance_of(6, Currency::Points), Amount::MAX);
        assert_eq!(fx.book.implied_odds(id, ForecastSide::Over).unwrap(), Some(1.0));
        assert_eq!(fx.book.positions(id).unwrap().len(), 1);

        let refund = fx.book.cancel_market(id).await.unwrap();
        assert_eq!(refund.total_paid, Amount::MAX);
        assert_eq!(fx.wallets.balance_of(5, Currency::Points), Amount::MAX);
    }
}
