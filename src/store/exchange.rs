use std::sync::Arc;

use log::{info, warn};
use tokio::sync::broadcast;
use validator::Validate;

use crate::config::ExchangeConfig;
use crate::error::Result;
use crate::services::event_publisher::EventBus;
use crate::store::clock::{Clock, SystemClock};
use crate::store::dividend::DividendDistributor;
use crate::store::forecast::ForecastBook;
use crate::store::ledger::Ledger;
use crate::store::listing::ListingEngine;
use crate::store::registry::ShareRegistry;
use crate::store::wallet::WalletStore;
use crate::types::audit_types::{AuditReport, BalanceMismatch, ContentIssue, NegativeBalance};
use crate::types::event_types::ExchangeEvent;
use crate::types::forecast_types::{
    ForecastMarket, ForecastPosition, ForecastResolution, ForecastSide, MarketId,
};
use crate::types::ledger_types::{LedgerEntry, LedgerReason};
use crate::types::listing_types::{Fill, ListingId, OfferId, ShareListing, ShareOffer, SweepReport};
use crate::types::request_types::*;
use crate::types::share_types::{
    BookSnapshot, BookTrade, ContentId, ContentShareBook, Distribution, ShareHolding,
};
use crate::types::wallet_types::{Amount, Currency, OwnerId, Wallet};

/// Entry point for every exchange operation. Requests are validated before any guard
/// is taken.
pub struct Exchange {
    config: ExchangeConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    ledger: Arc<Ledger>,
    wallets: Arc<WalletStore>,
    registry: Arc<ShareRegistry>,
    listings: ListingEngine,
    dividends: DividendDistributor,
    forecasts: ForecastBook,
}

impl Exchange {
    pub fn new(config: ExchangeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ExchangeConfig, clock: Arc<dyn Clock>) -> Self {
        let events = EventBus::new(config.event_buffer);
        let ledger = Arc::new(Ledger::new(clock.clone()));
        let wallets = Arc::new(WalletStore::new(
            ledger.clone(),
            config.lock_timeout,
            events.clone(),
        ));
        let registry = Arc::new(ShareRegistry::new(
            wallets.clone(),
            clock.clone(),
            config.lock_timeout,
            events.clone(),
        ));
        let listings = ListingEngine::new(
            registry.clone(),
            wallets.clone(),
            clock.clone(),
            events.clone(),
        );
        let dividends = DividendDistributor::new(
            registry.clone(),
            wallets.clone(),
            clock.clone(),
            config.reserve_owner_id,
            events.clone(),
        );
        let forecasts = ForecastBook::new(
            wallets.clone(),
            clock.clone(),
            config.lock_timeout,
            config.forecast_currency,
            config.reserve_owner_id,
            events.clone(),
        );

        Self {
            config,
            clock,
            events,
            ledger,
            wallets,
            registry,
            listings,
            dividends,
            forecasts,
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    // Wallets

    pub async fn deposit(&self, req: &DepositRequest) -> Result<LedgerEntry> {
        req.validate()?;
        self.wallets
            .credit(req.owner_id, req.currency, req.amount, LedgerReason::Deposit, &req.reference_id)
            .await
    }

    pub async fn withdraw(&self, req: &WithdrawRequest) -> Result<LedgerEntry> {
        req.validate()?;
        self.wallets
            .debit(
                req.owner_id,
                req.currency,
                req.amount,
                LedgerReason::Withdrawal,
                &req.reference_id,
            )
            .await
    }

    pub fn wallet(&self, owner_id: OwnerId) -> Wallet {
        self.wallets.wallet(owner_id)
    }

    pub fn balance_of(&self, owner_id: OwnerId, currency: Currency) -> Amount {
        self.wallets.balance_of(owner_id, currency)
    }

    // Share books

    pub fn open_book(&self, req: &OpenBookRequest) -> Result<ContentShareBook> {
        req.validate()?;
        self.registry.open_book(
            req.content_id,
            req.issuer_id,
            req.total_shares,
            req.reference_price,
            req.currency.unwrap_or(self.config.share_currency),
        )
    }

    pub async fn buy_shares(&self, req: &BuySharesRequest) -> Result<BookTrade> {
        req.validate()?;
        self.registry
            .buy_shares(req.content_id, req.buyer_id, req.quantity, &req.reference_id)
            .await
    }

    pub async fn sell_to_book(&self, req: &SellToBookRequest) -> Result<BookTrade> {
        req.validate()?;
        self.registry
            .sell_to_book(req.content_id, req.seller_id, req.quantity, &req.reference_id)
            .await
    }

    pub fn book(&self, content_id: ContentId) -> Result<ContentShareBook> {
        self.registry.book(content_id)
    }

    pub fn snapshot(&self, content_id: ContentId) -> Result<BookSnapshot> {
        self.registry.snapshot(content_id)
    }

    pub fn holding(&self, owner_id: OwnerId, content_id: ContentId) -> Result<ShareHolding> {
        self.registry.holding(owner_id, content_id)
    }

    pub fn holdings_of(&self, owner_id: OwnerId) -> Vec<ShareHolding> {
        self.registry.holdings_of(owner_id)
    }

    pub async fn resume_content(&self, content_id: ContentId) -> Result<ContentShareBook> {
        self.registry.resume(content_id).await
    }

    // Listings and offers

    pub async fn create_listing(&self, req: &CreateListingRequest) -> Result<ShareListing> {
        req.validate()?;
        self.listings.create_listing(req).await
    }

    pub async fn fulfill_listing(&self, req: &FulfillListingRequest) -> Result<Fill> {
        req.validate()?;
        self.listings.fulfill_listing(req).await
    }

    pub async fn cancel_listing(&self, req: &CancelListingRequest) -> Result<ShareListing> {
        req.validate()?;
        self.listings.cancel_listing(req).await
    }

    pub async fn listing(&self, listing_id: ListingId) -> Result<ShareListing> {
        self.listings.listing(listing_id).await
    }

    pub async fn create_offer(&self, req: &CreateOfferRequest) -> Result<ShareOffer> {
        req.validate()?;
        self.listings.create_offer(req).await
    }

    pub async fn accept_offer(&self, req: &AcceptOfferRequest) -> Result<Fill> {
        req.validate()?;
        self.listings.accept_offer(req).await
    }

    pub async fn reject_offer(&self, req: &RejectOfferRequest) -> Result<ShareOffer> {
        req.validate()?;
        self.listings.reject_offer(req).await
    }

    pub async fn withdraw_offer(&self, req: &WithdrawOfferRequest) -> Result<ShareOffer> {
        req.validate()?;
        self.listings.withdraw_offer(req).await
    }

    pub async fn offer(&self, offer_id: OfferId) -> Result<ShareOffer> {
        self.listings.offer(offer_id).await
    }

    // Dividends

    pub async fn accrue_dividend(&self, req: &AccrueDividendRequest) -> Result<ContentShareBook> {
        req.validate()?;
        self.dividends
            .accrue(req.content_id, req.amount, &req.reference_id)
            .await
    }

    pub async fn distribute_dividend(&self, req: &DistributeDividendRequest) -> Result<Distribution> {
        req.validate()?;
        self.dividends.distribute(req.content_id).await
    }

    // Forecasts

    pub fn create_forecast(&self, req: &CreateForecastRequest) -> Result<ForecastMarket> {
        req.validate()?;
        self.forecasts.create_market(req)
    }

    pub async fn place_forecast(&self, req: &PlacePositionRequest) -> Result<ForecastPosition> {
        req.validate()?;
        self.forecasts.place_position(req).await
    }

    pub async fn resolve_forecast(&self, req: &ResolveForecastRequest) -> Result<ForecastResolution> {
        req.validate()?;
        self.forecasts.resolve(req.market_id, req.observed_value).await
    }

    pub async fn cancel_forecast(&self, req: &CancelForecastRequest) -> Result<ForecastResolution> {
        req.validate()?;
        self.forecasts.cancel_market(req.market_id).await
    }

    pub async fn forecast(&self, market_id: MarketId) -> Result<ForecastMarket> {
        self.forecasts.market(market_id).await
    }

    pub fn forecasts(&self) -> Vec<ForecastMarket> {
        self.forecasts.markets()
    }

    pub fn forecast_positions(&self, market_id: MarketId) -> Result<Vec<ForecastPosition>> {
        self.forecasts.positions(market_id)
    }

    pub fn implied_odds(&self, market_id: MarketId, side: ForecastSide) -> Result<Option<f64>> {
        self.forecasts.implied_odds(market_id, side)
    }

    // Maintenance

    /// Expires due listings and offers and closes due forecast markets.
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let (expired_listings, expired_offers) = self.listings.expire_due(now).await;
        let closed_markets = self.forecasts.close_due(now).await;

        let report = SweepReport {
            expired_listings,
            expired_offers,
            closed_markets,
        };
        if !report.is_empty() {
            info!(
                "Sweep: {} listings, {} offers expired, {} markets closed",
                report.expired_listings.len(),
                report.expired_offers.len(),
                report.closed_markets.len()
            );
        }
        report
    }

    pub fn audit(&self) -> AuditReport {
        let balance_mismatches = self
            .ledger
            .reconcile()
            .into_iter()
            .map(|((owner_id, currency), cached, folded)| BalanceMismatch {
                owner_id,
                currency,
                cached,
                folded,
            })
            .collect();
        let negative_balances = self
            .ledger
            .balances()
            .into_iter()
            .filter(|(_, balance)| *balance < 0)
            .map(|((owner_id, currency), balance)| NegativeBalance {
                owner_id,
                currency,
                balance,
            })
            .collect();
        let to_issues = |items: Vec<(ContentId, String)>| {
            items
                .into_iter()
                .map(|(content_id, detail)| ContentIssue { content_id, detail })
                .collect::<Vec<_>>()
        };

        let report = AuditReport {
            ledger_entries: self.ledger.len(),
            balance_mismatches,
            negative_balances,
            share_violations: to_issues(self.registry.verify_all()),
            suspended: to_issues(self.registry.suspended()),
        };
        if !report.is_clean() {
            warn!("Audit found issues: {:?}", report);
        }
        report
    }
}
