use std::sync::Arc;

use chrono::Duration;
use share_exchange::config::ExchangeConfig;
use share_exchange::store::clock::{Clock, ManualClock};
use share_exchange::types::event_types::ExchangeEvent;
use share_exchange::types::forecast_types::{ForecastSide, ForecastStatus, Metric};
use share_exchange::types::listing_types::ListingStatus;
use share_exchange::types::request_types::*;
use share_exchange::types::wallet_types::{Amount, Currency, OwnerId};
use share_exchange::{Exchange, ExchangeError};

const ISSUER: OwnerId = 100;
const RESERVE: OwnerId = 0;
const CONTENT: u64 = 1;

fn exchange() -> (Arc<Exchange>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let exchange = Exchange::with_clock(ExchangeConfig::default(), clock.clone());
    (Arc::new(exchange), clock)
}

async fn deposit(exchange: &Exchange, owner_id: OwnerId, currency: Currency, amount: Amount) {
    exchange
        .deposit(&DepositRequest {
            owner_id,
            currency,
            amount,
            reference_id: format!("seed-{}-{}", owner_id, currency),
        })
        .await
        .unwrap();
}

fn open_book(exchange: &Exchange, total_shares: u64, reference_price: Amount) {
    exchange
        .open_book(&OpenBookRequest {
            content_id: CONTENT,
            issuer_id: ISSUER,
            total_shares,
            reference_price,
            currency: None,
        })
        .unwrap();
}

fn buy(owner_id: OwnerId, quantity: u64, reference_id: &str) -> BuySharesRequest {
    BuySharesRequest {
        content_id: CONTENT,
        buyer_id: owner_id,
        quantity,
        reference_id: reference_id.into(),
    }
}

fn total_balance(exchange: &Exchange, owners: &[OwnerId], currency: Currency) -> Amount {
    owners.iter().map(|&o| exchange.balance_of(o, currency)).sum()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_buyers_never_oversell() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 100, 1);
    deposit(&exchange, 1, Currency::Keys, 100).await;
    deposit(&exchange, 2, Currency::Keys, 100).await;

    let handles: Vec<_> = [1, 2]
        .into_iter()
        .map(|buyer| {
            let exchange = exchange.clone();
            tokio::spawn(async move { exchange.buy_shares(&buy(buyer, 60, "race")).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    let failure = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(
        failure,
        ExchangeError::Oversell {
            available: 40,
            requested: 60,
            ..
        }
    ));
    assert_eq!(exchange.book(CONTENT).unwrap().available_shares, 40);
    assert!(exchange.audit().is_clean());
}

#[tokio::test]
async fn partial_listing_fill_updates_holdings() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 100, 5);
    deposit(&exchange, 1, Currency::Keys, 50).await;
    deposit(&exchange, 2, Currency::Keys, 50).await;
    exchange.buy_shares(&buy(1, 10, "b-1")).await.unwrap();

    let listing = exchange
        .create_listing(&CreateListingRequest {
            owner_id: 1,
            content_id: CONTENT,
            quantity: 10,
            ask_price: 5,
            ttl_secs: 600,
            reference_id: "l-1".into(),
        })
        .await
        .unwrap();
    let fill = exchange
        .fulfill_listing(&FulfillListingRequest {
            listing_id: listing.id,
            buyer_id: 2,
            quantity: 4,
            reference_id: "f-1".into(),
        })
        .await
        .unwrap();

    assert_eq!(fill.total_price, 20);
    let listing = exchange.listing(listing.id).await.unwrap();
    assert_eq!(listing.remaining_quantity, 6);
    assert_eq!(listing.status, ListingStatus::Active);
    let holding = exchange.holding(2, CONTENT).unwrap();
    assert_eq!(holding.owned_shares, 4);
    assert_eq!(holding.cost_basis, 5.0);
    assert_eq!(exchange.balance_of(2, Currency::Keys), 30);
    assert_eq!(exchange.balance_of(1, Currency::Keys), 20);
}

#[tokio::test]
async fn dividend_remainder_goes_to_reserve() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 100, 1);
    for holder in [1, 2, 3] {
        deposit(&exchange, holder, Currency::Keys, 33).await;
        exchange
            .buy_shares(&buy(holder, 33, &format!("b-{}", holder)))
            .await
            .unwrap();
    }

    exchange
        .accrue_dividend(&AccrueDividendRequest {
            content_id: CONTENT,
            amount: 101,
            reference_id: "rev-1".into(),
        })
        .await
        .unwrap();
    let distribution = exchange
        .distribute_dividend(&DistributeDividendRequest { content_id: CONTENT })
        .await
        .unwrap();

    assert_eq!(distribution.credits, vec![(1, 33), (2, 33), (3, 33)]);
    assert_eq!(distribution.remainder, 2);
    for holder in [1, 2, 3] {
        assert_eq!(exchange.balance_of(holder, Currency::Keys), 33);
    }
    assert_eq!(exchange.balance_of(RESERVE, Currency::Keys), 2);
    assert_eq!(exchange.book(CONTENT).unwrap().dividend_pool, 0);
}

async fn forecast_market(exchange: &Exchange, target_value: u64) -> u64 {
    exchange
        .create_forecast(&CreateForecastRequest {
            content_id: CONTENT,
            metric: Metric::Views,
            target_value,
            odds: 2.0,
            currency: None,
            expires_at: chrono::Utc::now() + Duration::hours(1),
        })
        .unwrap()
        .id
}

async fn stake(exchange: &Exchange, market_id: u64, owner_id: OwnerId, side: ForecastSide, amount: Amount) {
    deposit(exchange, owner_id, Currency::Points, amount).await;
    exchange
        .place_forecast(&PlacePositionRequest {
            market_id,
            owner_id,
            side,
            amount,
            reference_id: format!("stake-{}", owner_id),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn winning_side_splits_the_losing_pool() {
    let (exchange, clock) = exchange();
    let market_id = forecast_market(&exchange, 1_000).await;
    stake(&exchange, market_id, 1, ForecastSide::Over, 60).await;
    stake(&exchange, market_id, 2, ForecastSide::Over, 40).await;
    stake(&exchange, market_id, 3, ForecastSide::Under, 20).await;
    stake(&exchange, market_id, 4, ForecastSide::Under, 30).await;

    clock.advance(Duration::hours(2));
    let resolution = exchange
        .resolve_forecast(&ResolveForecastRequest {
            market_id,
            observed_value: 400,
        })
        .await
        .unwrap();

    assert_eq!(resolution.market.status, ForecastStatus::Resolved);
    assert_eq!(resolution.market.winning_side, Some(ForecastSide::Under));
    assert_eq!(resolution.total_paid, 150);
    assert_eq!(exchange.balance_of(3, Currency::Points), 60);
    assert_eq!(exchange.balance_of(4, Currency::Points), 90);
    assert_eq!(exchange.balance_of(1, Currency::Points), 0);
    assert_eq!(exchange.balance_of(RESERVE, Currency::Points), 0);

    let replay = exchange
        .resolve_forecast(&ResolveForecastRequest {
            market_id,
            observed_value: 400,
        })
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(exchange.balance_of(4, Currency::Points), 90);
}

#[tokio::test]
async fn empty_winning_pool_voids_and_refunds() {
    let (exchange, clock) = exchange();
    let market_id = forecast_market(&exchange, 10).await;
    stake(&exchange, market_id, 1, ForecastSide::Over, 25).await;
    stake(&exchange, market_id, 2, ForecastSide::Over, 75).await;

    clock.advance(Duration::hours(2));
    let resolution = exchange
        .resolve_forecast(&ResolveForecastRequest {
            market_id,
            observed_value: 10,
        })
        .await
        .unwrap();

    assert_eq!(resolution.market.status, ForecastStatus::Void);
    assert_eq!(exchange.balance_of(1, Currency::Points), 25);
    assert_eq!(exchange.balance_of(2, Currency::Points), 75);
    assert!(exchange
        .forecast_positions(market_id)
        .unwrap()
        .iter()
        .all(|p| p.settled));
}

#[tokio::test]
async fn replayed_requests_post_once() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 10, 3);
    deposit(&exchange, 1, Currency::Keys, 30).await;
    deposit(&exchange, 1, Currency::Keys, 30).await;
    assert_eq!(exchange.balance_of(1, Currency::Keys), 30);

    let first = exchange.buy_shares(&buy(1, 2, "b-1")).await.unwrap();
    let entries = exchange.ledger().len();
    let second = exchange.buy_shares(&buy(1, 2, "b-1")).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(exchange.ledger().len(), entries);
    assert_eq!(exchange.book(CONTENT).unwrap().available_shares, 8);
    assert_eq!(exchange.balance_of(1, Currency::Keys), 24);
}

#[tokio::test]
async fn failed_operations_leave_no_trace() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 10, 3);
    deposit(&exchange, 1, Currency::Keys, 5).await;
    let entries = exchange.ledger().len();

    let err = exchange.buy_shares(&buy(1, 2, "b-1")).await.unwrap_err();
    assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));

    let err = exchange
        .withdraw(&WithdrawRequest {
            owner_id: 1,
            currency: Currency::Keys,
            amount: 6,
            reference_id: "w-1".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));

    assert_eq!(exchange.ledger().len(), entries);
    assert_eq!(exchange.book(CONTENT).unwrap().available_shares, 10);
    assert_eq!(exchange.holding(1, CONTENT).unwrap().owned_shares, 0);
}

#[tokio::test]
async fn trading_conserves_currency_and_shares() {
    let (exchange, clock) = exchange();
    open_book(&exchange, 50, 2);
    let owners = [RESERVE, 1, 2, 3, ISSUER];
    for owner in [1, 2, 3] {
        deposit(&exchange, owner, Currency::Keys, 200).await;
    }

    exchange.buy_shares(&buy(1, 20, "b-1")).await.unwrap();
    exchange.buy_shares(&buy(2, 10, "b-2")).await.unwrap();
    let listing = exchange
        .create_listing(&CreateListingRequest {
            owner_id: 1,
            content_id: CONTENT,
            quantity: 8,
            ask_price: 4,
            ttl_secs: 60,
            reference_id: "l-1".into(),
        })
        .await
        .unwrap();
    exchange
        .fulfill_listing(&FulfillListingRequest {
            listing_id: listing.id,
            buyer_id: 3,
            quantity: 5,
            reference_id: "f-1".into(),
        })
        .await
        .unwrap();
    let offer = exchange
        .create_offer(&CreateOfferRequest {
            buyer_id: 3,
            content_id: CONTENT,
            quantity: 2,
            bid_price: 3,
            ttl_secs: 60,
            seller_id: Some(2),
            listing_id: None,
            reference_id: "o-1".into(),
        })
        .await
        .unwrap();
    exchange
        .accept_offer(&AcceptOfferRequest {
            offer_id: offer.id,
            seller_id: 2,
        })
        .await
        .unwrap();
    exchange
        .sell_to_book(&SellToBookRequest {
            content_id: CONTENT,
            seller_id: 2,
            quantity: 3,
            reference_id: "s-1".into(),
        })
        .await
        .unwrap();
    exchange
        .accrue_dividend(&AccrueDividendRequest {
            content_id: CONTENT,
            amount: 17,
            reference_id: "rev-1".into(),
        })
        .await
        .unwrap();
    exchange
        .distribute_dividend(&DistributeDividendRequest { content_id: CONTENT })
        .await
        .unwrap();

    clock.advance(Duration::minutes(5));
    let report = exchange.sweep_expired().await;
    assert_eq!(report.expired_listings, vec![listing.id]);

    assert_eq!(total_balance(&exchange, &owners, Currency::Keys), 600 + 17);
    let snapshot = exchange.snapshot(CONTENT).unwrap();
    assert_eq!(snapshot.book.available_shares + snapshot.owned_total(), 50);
    assert_eq!(exchange.holding(1, CONTENT).unwrap().committed_shares, 0);
    assert!(exchange.audit().is_clean());
}

#[tokio::test]
async fn committed_events_reach_subscribers() {
    let (exchange, clock) = exchange();
    clock.advance(Duration::days(30));
    let mut events = exchange.subscribe();
    open_book(&exchange, 10, 1);
    deposit(&exchange, 1, Currency::Keys, 5).await;
    exchange.buy_shares(&buy(1, 5, "b-1")).await.unwrap();

    let mut purchased = None;
    let mut balance_stamps = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            ExchangeEvent::SharesPurchased(trade) => purchased = Some(trade),
            ExchangeEvent::BalanceChanged(change) => balance_stamps.push(change.timestamp),
            _ => {}
        }
    }
    let trade = purchased.unwrap();
    assert_eq!((trade.owner_id, trade.quantity, trade.available_shares), (1, 5, 5));
    assert_eq!(trade.timestamp, clock.now());
    assert!(!balance_stamps.is_empty());
    assert!(balance_stamps.iter().all(|t| *t == clock.now()));
}

async fn listed_shares(exchange: &Exchange, seller: OwnerId, quantity: u64, ttl_secs: i64) -> u64 {
    deposit(exchange, seller, Currency::Keys, quantity as Amount).await;
    exchange
        .buy_shares(&buy(seller, quantity, "inventory"))
        .await
        .unwrap();
    exchange
        .create_listing(&CreateListingRequest {
            owner_id: seller,
            content_id: CONTENT,
            quantity,
            ask_price: 2,
            ttl_secs,
            reference_id: "listing".into(),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_on_one_listing_fill_once() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 100, 1);
    let listing_id = listed_shares(&exchange, 1, 5, 600).await;

    let mut offers = Vec::new();
    for buyer in [2, 3] {
        deposit(&exchange, buyer, Currency::Keys, 20).await;
        let offer = exchange
            .create_offer(&CreateOfferRequest {
                buyer_id: buyer,
                content_id: CONTENT,
                quantity: 4,
                bid_price: 5,
                ttl_secs: 600,
                seller_id: None,
                listing_id: Some(listing_id),
                reference_id: format!("bid-{}", buyer),
            })
            .await
            .unwrap();
        offers.push(offer.id);
    }

    let handles: Vec<_> = offers
        .into_iter()
        .map(|offer_id| {
            let exchange = exchange.clone();
            tokio::spawn(async move {
                exchange
                    .accept_offer(&AcceptOfferRequest { offer_id, seller_id: 1 })
                    .await
            })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.into_iter().find_map(|r| r.err()).unwrap();
    assert_eq!(failure, ExchangeError::ListingAlreadyFulfilled(listing_id));
    let listing = exchange.listing(listing_id).await.unwrap();
    assert_eq!(listing.remaining_quantity, 1);
    let seller = exchange.holding(1, CONTENT).unwrap();
    assert_eq!((seller.owned_shares, seller.committed_shares), (1, 1));
    assert_eq!(total_balance(&exchange, &[1, 2, 3, ISSUER], Currency::Keys), 45);
    assert!(exchange.audit().is_clean());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_fill_has_one_winner() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 100, 1);
    let listing_id = listed_shares(&exchange, 1, 5, 600).await;
    deposit(&exchange, 2, Currency::Keys, 10).await;

    let fill = {
        let exchange = exchange.clone();
        tokio::spawn(async move {
            exchange
                .fulfill_listing(&FulfillListingRequest {
                    listing_id,
                    buyer_id: 2,
                    quantity: 5,
                    reference_id: "all".into(),
                })
                .await
        })
    };
    let cancel = {
        let exchange = exchange.clone();
        tokio::spawn(async move {
            exchange
                .cancel_listing(&CancelListingRequest { listing_id, owner_id: 1 })
                .await
        })
    };
    let (fill, cancel) = (fill.await.unwrap(), cancel.await.unwrap());

    match (fill, cancel) {
        (Ok(fill), Err(err)) => {
            assert_eq!(err, ExchangeError::ListingAlreadyFulfilled(listing_id));
            assert_eq!(fill.quantity, 5);
            assert_eq!(exchange.holding(2, CONTENT).unwrap().owned_shares, 5);
        }
        (Err(err), Ok(cancelled)) => {
            assert!(matches!(
                err,
                ExchangeError::ListingClosed { status: ListingStatus::Cancelled, .. }
            ));
            assert_eq!(cancelled.status, ListingStatus::Cancelled);
            assert_eq!(exchange.balance_of(2, Currency::Keys), 10);
        }
        other => panic!("expected exactly one winner, got {:?}", other),
    }
    assert_eq!(exchange.holding(1, CONTENT).unwrap().committed_shares, 0);
    assert!(exchange.audit().is_clean());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distribution_snapshot_never_straddles_a_purchase() {
    let (exchange, _clock) = exchange();
    open_book(&exchange, 100, 1);
    deposit(&exchange, 1, Currency::Keys, 50).await;
    deposit(&exchange, 2, Currency::Keys, 50).await;
    exchange.buy_shares(&buy(1, 50, "b-1")).await.unwrap();
    exchange
        .accrue_dividend(&AccrueDividendRequest {
            content_id: CONTENT,
            amount: 100,
            reference_id: "rev-1".into(),
        })
        .await
        .unwrap();

    let distribute = {
        let exchange = exchange.clone();
        tokio::spawn(async move {
            exchange
                .distribute_dividend(&DistributeDividendRequest { content_id: CONTENT })
                .await
        })
    };
    let purchase = {
        let exchange = exchange.clone();
        tokio::spawn(async move { exchange.buy_shares(&buy(2, 50, "b-2")).await })
    };
    let distribution = distribute.await.unwrap().unwrap();
    purchase.await.unwrap().unwrap();

    match distribution.credits.as_slice() {
        [(1, 50)] => {
            assert_eq!(distribution.remainder, 50);
            assert_eq!(exchange.balance_of(2, Currency::Keys), 0);
        }
        [(1, 50), (2, 50)] => {
            assert_eq!(distribution.remainder, 0);
            assert_eq!(exchange.balance_of(2, Currency::Keys), 50);
        }
        other => panic!("distribution saw a partial purchase: {:?}", other),
    }
    assert_eq!(distribution.total_credited(), 100);
    assert_eq!(exchange.balance_of(1, Currency::Keys), 50);
    assert!(exchange.audit().is_clean());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_and_lazy_expiry_close_once() {
    let (exchange, clock) = exchange();
    open_book(&exchange, 100, 1);
    let listing_id = listed_shares(&exchange, 1, 5, 60).await;
    let market_id = forecast_market(&exchange, 10).await;
    let mut events = exchange.subscribe();
    clock.advance(Duration::hours(2));

    let sweep = {
        let exchange = exchange.clone();
        tokio::spawn(async move { exchange.sweep_expired().await })
    };
    let read_listing = {
        let exchange = exchange.clone();
        tokio::spawn(async move { exchange.listing(listing_id).await })
    };
    let read_market = {
        let exchange = exchange.clone();
        tokio::spawn(async move { exchange.forecast(market_id).await })
    };
    sweep.await.unwrap();
    let listing = read_listing.await.unwrap().unwrap();
    let market = read_market.await.unwrap().unwrap();

    assert_eq!(listing.status, ListingStatus::Expired);
    assert_eq!(market.status, ForecastStatus::Closed);
    let (mut expired, mut closed) = (0, 0);
    while let Ok(event) = events.try_recv() {
        match event {
            ExchangeEvent::ListingExpired(_) => expired += 1,
            ExchangeEvent::ForecastClosed(_) => closed += 1,
            _ => {}
        }
    }
    assert_eq!((expired, closed), (1, 1));
    let seller = exchange.holding(1, CONTENT).unwrap();
    assert_eq!((seller.owned_shares, seller.committed_shares), (5, 0));
    assert!(exchange.audit().is_clean());
}
