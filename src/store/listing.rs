use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::error::{ExchangeError, Result};
use crate::services::event_publisher::EventBus;
use crate::store::clock::Clock;
use crate::store::registry::ShareRegistry;
use crate::store::wallet::WalletStore;
use crate::types::event_types::{
    ExchangeEvent, ListingEvent, ListingFilledEvent, OfferAcceptedEvent, OfferEvent,
};
use crate::types::ledger_types::LedgerReason;
use crate::types::listing_types::{
    Fill, ListingId, ListingStatus, OfferId, OfferStatus, ShareListing, ShareOffer,
};
use crate::types::request_types::{
    AcceptOfferRequest, CancelListingRequest, CreateListingRequest, CreateOfferRequest,
    FulfillListingRequest, RejectOfferRequest, WithdrawOfferRequest,
};
use crate::types::share_types::ContentId;
use crate::types::wallet_types::{Amount, Currency, OwnerId};

type RefKey = (OwnerId, String);

#[derive(Default)]
struct EngineState {
    listings: HashMap<ListingId, ShareListing>,
    offers: HashMap<OfferId, ShareOffer>,
    listing_refs: HashMap<RefKey, ListingId>,
    offer_refs: HashMap<RefKey, OfferId>,
    fills: HashMap<RefKey, Fill>,
}

struct FillPlan {
    content_id: ContentId,
    currency: Currency,
    seller_id: OwnerId,
    buyer_id: OwnerId,
    quantity: u64,
    unit_price: Amount,
    /// Listing consumed by the fill and its remaining quantity before it.
    listing: Option<(ListingId, u64)>,
    offer_id: Option<OfferId>,
    reference_id: String,
}

/// Peer-to-peer asks and bids. Every transition on a listing or offer happens under
/// its content item's guard.
pub struct ListingEngine {
    registry: Arc<ShareRegistry>,
    wallets: Arc<WalletStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: Mutex<EngineState>,
    next_listing_id: AtomicU64,
    next_offer_id: AtomicU64,
}

fn expiry(now: DateTime<Utc>, ttl_secs: i64) -> Result<DateTime<Utc>> {
    Duration::try_seconds(ttl_secs)
        .filter(|ttl| *ttl > Duration::zero())
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| ExchangeError::InvalidRequest(format!("invalid ttl {}s", ttl_secs)))
}

fn trade_value(unit_price: Amount, quantity: u64) -> Result<Amount> {
    i64::try_from(quantity)
        .ok()
        .and_then(|q| q.checked_mul(unit_price))
        .filter(|total| *total > 0)
        .ok_or_else(|| {
            ExchangeError::InvalidAmount(format!("{} x {} is not a valid total", quantity, unit_price))
        })
}

impl ListingEngine {
    pub fn new(
        registry: Arc<ShareRegistry>,
        wallets: Arc<WalletStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            wallets,
            clock,
            events,
            state: Mutex::new(EngineState::default()),
            next_listing_id: AtomicU64::new(1),
            next_offer_id: AtomicU64::new(1),
        }
    }

    fn listing_event(&self, listing: &ShareListing) -> ListingEvent {
        ListingEvent {
            listing_id: listing.id,
            content_id: listing.content_id,
            owner_id: listing.owner_id,
            remaining_quantity: listing.remaining_quantity,
            ask_price: listing.ask_price,
            timestamp: self.clock.now(),
        }
    }

    fn offer_event(&self, offer: &ShareOffer) -> OfferEvent {
        OfferEvent {
            offer_id: offer.id,
            content_id: offer.content_id,
            buyer_id: offer.buyer_id,
            quantity: offer.quantity,
            bid_price: offer.bid_price,
            timestamp: self.clock.now(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn listing_snapshot(&self, listing_id: ListingId) -> Result<ShareListing> {
        self.with_state(|st| st.listings.get(&listing_id).cloned())
            .ok_or_else(|| ExchangeError::NotFound(format!("listing {}", listing_id)))
    }

    fn offer_snapshot(&self, offer_id: OfferId) -> Result<ShareOffer> {
        self.with_state(|st| st.offers.get(&offer_id).cloned())
            .ok_or_else(|| ExchangeError::NotFound(format!("offer {}", offer_id)))
    }

    pub async fn create_listing(&self, req: &CreateListingRequest) -> Result<ShareListing> {
        trade_value(req.ask_price, req.quantity)?;
        let _content = self.registry.lock(req.content_id).await?;

        let ref_key = (req.owner_id, req.reference_id.clone());
        if let Some(existing) = self.with_state(|st| {
            st.listing_refs
                .get(&ref_key)
                .and_then(|id| st.listings.get(id))
                .cloned()
        }) {
            return Ok(existing);
        }

        let now = self.clock.now();
        let listing = ShareListing {
            id: self.next_listing_id.fetch_add(1, Ordering::Relaxed),
            content_id: req.content_id,
            owner_id: req.owner_id,
            quantity: req.quantity,
            remaining_quantity: req.quantity,
            ask_price: req.ask_price,
            status: ListingStatus::Active,
            created_at: now,
            expires_at: expiry(now, req.ttl_secs)?,
        };

        self.registry.transact(
            req.content_id,
            |state| state.commit_shares(req.owner_id, req.quantity),
            |_, _| {
                self.with_state(|st| {
                    st.listing_refs.insert(ref_key, listing.id);
                    st.listings.insert(listing.id, listing.clone());
                });
                Ok(())
            },
        )?;

        info!(
            "Listing {} created: content={} owner={} qty={} ask={}",
            listing.id, listing.content_id, listing.owner_id, listing.quantity, listing.ask_price
        );
        self.events.publish(ExchangeEvent::ListingCreated(self.listing_event(&listing)));
        Ok(listing)
    }

    pub async fn fulfill_listing(&self, req: &FulfillListingRequest) -> Result<Fill> {
        if req.quantity == 0 {
            return Err(ExchangeError::InvalidAmount("quantity must be positive".into()));
        }
        let content_id = self.listing_snapshot(req.listing_id)?.content_id;
        let _content = self.registry.lock(content_id).await?;

        let reference_id = format!(
            "listing:{}:{}:{}",
            req.listing_id, req.buyer_id, req.reference_id
        );
        if let Some(fill) = self.with_state(|st| {
            st.fills.get(&(req.buyer_id, reference_id.clone())).cloned()
        }) {
            return Ok(Fill {
                replayed: true,
                ..fill
            });
        }

        let listing = self.usable_listing(req.listing_id)?;
        if req.buyer_id == listing.owner_id {
            return Err(ExchangeError::InvalidRequest(format!(
                "owner {} cannot buy its own listing",
                req.buyer_id
            )));
        }
        if req.quantity > listing.remaining_quantity {
            return Err(ExchangeError::Oversell {
                content_id,
                available: listing.remaining_quantity,
                requested: req.quantity,
            });
        }

        let currency = self.registry.book(content_id)?.currency;
        self.settle_fill(FillPlan {
            content_id,
            currency,
            seller_id: listing.owner_id,
            buyer_id: req.buyer_id,
            quantity: req.quantity,
            unit_price: listing.ask_price,
            listing: Some((listing.id, listing.remaining_quantity)),
            offer_id: None,
            reference_id,
        })
        .await
    }

    pub async fn cancel_listing(&self, req: &CancelListingRequest) -> Result<ShareListing> {
        let content_id = self.listing_snapshot(req.listing_id)?.content_id;
        let _content = self.registry.lock(content_id).await?;

        let listing = self.listing_snapshot(req.listing_id)?;
        if listing.owner_id != req.owner_id {
            return Err(ExchangeError::Forbidden {
                owner_id: req.owner_id,
                subject: format!("listing {}", req.listing_id),
            });
        }
        if listing.status == ListingStatus::Cancelled {
            return Ok(listing);
        }
        let listing = self.usable_listing(req.listing_id)?;

        let cancelled = self.close_listing(&listing, ListingStatus::Cancelled)?;
        info!(
            "Listing {} cancelled, {} shares released to owner {}",
            listing.id, listing.remaining_quantity, listing.owner_id
        );
        self.events.publish(ExchangeEvent::ListingCancelled(self.listing_event(&cancelled)));
        Ok(cancelled)
    }

    /// Reads a listing, expiring it first if its deadline has passed.
    pub async fn listing(&self, listing_id: ListingId) -> Result<ShareListing> {
        let listing = self.listing_snapshot(listing_id)?;
        if !listing.is_due(self.clock.now()) {
            return Ok(listing);
        }

        let _content = self.registry.lock(listing.content_id).await?;
        let listing = self.listing_snapshot(listing_id)?;
        if listing.is_due(self.clock.now()) {
            return self.expire_listing(&listing);
        }
        Ok(listing)
    }

    pub async fn create_offer(&self, req: &CreateOfferRequest) -> Result<ShareOffer> {
        let total = trade_value(req.bid_price, req.quantity)?;
        let book = self.registry.book(req.content_id)?;

        let mut seller_id = req.seller_id;
        if let Some(listing_id) = req.listing_id {
            let listing = self.listing_snapshot(listing_id)?;
            if listing.content_id != req.content_id {
                return Err(ExchangeError::InvalidRequest(format!(
                    "listing {} is not for content {}",
                    listing_id, req.content_id
                )));
            }
            if seller_id.is_some_and(|s| s != listing.owner_id) {
                return Err(ExchangeError::InvalidRequest(format!(
                    "listing {} is not owned by the targeted seller",
                    listing_id
                )));
            }
            seller_id = Some(listing.owner_id);
        }
        if seller_id == Some(req.buyer_id) {
            return Err(ExchangeError::InvalidRequest(format!(
                "owner {} cannot bid on its own shares",
                req.buyer_id
            )));
        }
        self.wallets.ensure_funds(req.buyer_id, book.currency, total)?;

        let _content = self.registry.lock(req.content_id).await?;
        let ref_key = (req.buyer_id, req.reference_id.clone());
        if let Some(existing) = self.with_state(|st| {
            st.offer_refs
                .get(&ref_key)
                .and_then(|id| st.offers.get(id))
                .cloned()
        }) {
            return Ok(existing);
        }
        if let Some(listing_id) = req.listing_id {
            self.usable_listing(listing_id)?;
        }

        let now = self.clock.now();
        let offer = ShareOffer {
            id: self.next_offer_id.fetch_add(1, Ordering::Relaxed),
            content_id: req.content_id,
            buyer_id: req.buyer_id,
            seller_id,
            listing_id: req.listing_id,
            quantity: req.quantity,
            bid_price: req.bid_price,
            status: OfferStatus::Pending,
            accepted_by: None,
            created_at: now,
            expires_at: expiry(now, req.ttl_secs)?,
        };
        self.with_state(|st| {
            st.offer_refs.insert(ref_key, offer.id);
            st.offers.insert(offer.id, offer.clone());
        });

        info!(
            "Offer {} created: content={} buyer={} qty={} bid={}",
            offer.id, offer.content_id, offer.buyer_id, offer.quantity, offer.bid_price
        );
        self.events.publish(ExchangeEvent::OfferCreated(self.offer_event(&offer)));
        Ok(offer)
    }

    pub async fn accept_offer(&self, req: &AcceptOfferRequest) -> Result<Fill> {
        let content_id = self.offer_snapshot(req.offer_id)?.content_id;
        let _content = self.registry.lock(content_id).await?;

        let offer = self.offer_snapshot(req.offer_id)?;
        if offer.status == OfferStatus::Accepted && offer.accepted_by == Some(req.seller_id) {
            let reference_id = format!("offer:{}", offer.id);
            if let Some(fill) = self.with_state(|st| st.fills.get(&(offer.buyer_id, reference_id)).cloned()) {
                return Ok(Fill {
                    replayed: true,
                    ..fill
                });
            }
        }
        let offer = self.pending_offer(req.offer_id)?;
        if offer.buyer_id == req.seller_id {
            return Err(ExchangeError::InvalidRequest(format!(
                "owner {} cannot accept its own offer",
                req.seller_id
            )));
        }
        if offer.seller_id.is_some_and(|s| s != req.seller_id) {
            return Err(ExchangeError::Forbidden {
                owner_id: req.seller_id,
                subject: format!("offer {}", offer.id),
            });
        }

        let listing = match offer.listing_id {
            Some(listing_id) => {
                let listing = self.usable_listing(listing_id)?;
                if listing.owner_id != req.seller_id {
                    return Err(ExchangeError::Forbidden {
                        owner_id: req.seller_id,
                        subject: format!("listing {}", listing_id),
                    });
                }
                if offer.quantity > listing.remaining_quantity {
                    return Err(ExchangeError::ListingAlreadyFulfilled(listing_id));
                }
                Some((listing_id, listing.remaining_quantity))
            }
            None => None,
        };

        let currency = self.registry.book(content_id)?.currency;
        self.settle_fill(FillPlan {
            content_id,
            currency,
            seller_id: req.seller_id,
            buyer_id: offer.buyer_id,
            quantity: offer.quantity,
            unit_price: offer.bid_price,
            listing,
            offer_id: Some(offer.id),
            reference_id: format!("offer:{}", offer.id),
        })
        .await
    }

    /// Only the seller an offer targets may reject it.
    pub async fn reject_offer(&self, req: &RejectOfferRequest) -> Result<ShareOffer> {
        let content_id = self.offer_snapshot(req.offer_id)?.content_id;
        let _content = self.registry.lock(content_id).await?;

        let offer = self.offer_snapshot(req.offer_id)?;
        if offer.status == OfferStatus::Rejected && offer.seller_id == Some(req.seller_id) {
            return Ok(offer);
        }
        let offer = self.pending_offer(req.offer_id)?;
        if offer.seller_id != Some(req.seller_id) {
            return Err(ExchangeError::Forbidden {
                owner_id: req.seller_id,
                subject: format!("offer {}", offer.id),
            });
        }

        let rejected = self.set_offer_status(offer.id, OfferStatus::Rejected)?;
        info!("Offer {} rejected by seller {}", offer.id, req.seller_id);
        self.events.publish(ExchangeEvent::OfferRejected(self.offer_event(&rejected)));
        Ok(rejected)
    }

    pub async fn withdraw_offer(&self, req: &WithdrawOfferRequest) -> Result<ShareOffer> {
        let content_id = self.offer_snapshot(req.offer_id)?.content_id;
        let _content = self.registry.lock(content_id).await?;

        let offer = self.offer_snapshot(req.offer_id)?;
        if offer.status == OfferStatus::Withdrawn && offer.buyer_id == req.buyer_id {
            return Ok(offer);
        }
        let offer = self.pending_offer(req.offer_id)?;
        if offer.buyer_id != req.buyer_id {
            return Err(ExchangeError::Forbidden {
                owner_id: req.buyer_id,
                subject: format!("offer {}", offer.id),
            });
        }

        let withdrawn = self.set_offer_status(offer.id, OfferStatus::Withdrawn)?;
        info!("Offer {} withdrawn by buyer {}", offer.id, req.buyer_id);
        self.events.publish(ExchangeEvent::OfferWithdrawn(self.offer_event(&withdrawn)));
        Ok(withdrawn)
    }

    pub async fn offer(&self, offer_id: OfferId) -> Result<ShareOffer> {
        let offer = self.offer_snapshot(offer_id)?;
        if !offer.is_due(self.clock.now()) {
            return Ok(offer);
        }

        let _content = self.registry.lock(offer.content_id).await?;
        let offer = self.offer_snapshot(offer_id)?;
        if offer.is_due(self.clock.now()) {
            return self.expire_offer(&offer);
        }
        Ok(offer)
    }

    /// Expires every listing and offer due at `now`. Content items that cannot be
    /// locked are skipped and picked up by the next sweep.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> (Vec<ListingId>, Vec<OfferId>) {
        let mut due: BTreeMap<ContentId, (Vec<ListingId>, Vec<OfferId>)> = BTreeMap::new();
        self.with_state(|st| {
            for listing in st.listings.values().filter(|l| l.is_due(now)) {
                due.entry(listing.content_id).or_default().0.push(listing.id);
            }
            for offer in st.offers.values().filter(|o| o.is_due(now)) {
                due.entry(offer.content_id).or_default().1.push(offer.id);
            }
        });

        let mut expired_listings = Vec::new();
        let mut expired_offers = Vec::new();
        for (content_id, (listing_ids, offer_ids)) in due {
            let _content = match self.registry.lock(content_id).await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("Sweep skipped content {}: {}", content_id, e);
                    continue;
                }
            };

            for listing_id in listing_ids {
                let Ok(listing) = self.listing_snapshot(listing_id) else { continue };
                if !listing.is_due(now) {
                    continue;
                }
                match self.expire_listing(&listing) {
                    Ok(_) => expired_listings.push(listing_id),
                    Err(e) => warn!("Listing {} not expired: {}", listing_id, e),
                }
            }
            for offer_id in offer_ids {
                let Ok(offer) = self.offer_snapshot(offer_id) else { continue };
                if !offer.is_due(now) {
                    continue;
                }
                match self.expire_offer(&offer) {
                    Ok(_) => expired_offers.push(offer_id),
                    Err(e) => warn!("Offer {} not expired: {}", offer_id, e),
                }
            }
        }

        expired_listings.sort_unstable();
        expired_offers.sort_unstable();
        (expired_listings, expired_offers)
    }

    /// Listing that can still trade. Caller holds the content guard. A listing past
    /// its deadline is expired here and reported as closed.
    fn usable_listing(&self, listing_id: ListingId) -> Result<ShareListing> {
        let listing = self.listing_snapshot(listing_id)?;
        match listing.status {
            ListingStatus::Fulfilled => Err(ExchangeError::ListingAlreadyFulfilled(listing_id)),
            ListingStatus::Cancelled | ListingStatus::Expired => Err(ExchangeError::ListingClosed {
                listing_id,
                status: listing.status,
            }),
            ListingStatus::Active if listing.is_due(self.clock.now()) => {
                self.expire_listing(&listing)?;
                Err(ExchangeError::ListingClosed {
                    listing_id,
                    status: ListingStatus::Expired,
                })
            }
            ListingStatus::Active => Ok(listing),
        }
    }

    fn pending_offer(&self, offer_id: OfferId) -> Result<ShareOffer> {
        let offer = self.offer_snapshot(offer_id)?;
        if offer.status.is_terminal() {
            return Err(ExchangeError::OfferAlreadyResolved {
                offer_id,
                status: offer.status,
            });
        }
        if offer.is_due(self.clock.now()) {
            self.expire_offer(&offer)?;
            return Err(ExchangeError::OfferAlreadyResolved {
                offer_id,
                status: OfferStatus::Expired,
            });
        }
        Ok(offer)
    }

    fn expire_listing(&self, listing: &ShareListing) -> Result<ShareListing> {
        let expired = self.close_listing(listing, ListingStatus::Expired)?;
        warn!(
            "Listing {} expired with {} unsold shares",
            listing.id, listing.remaining_quantity
        );
        self.events.publish(ExchangeEvent::ListingExpired(self.listing_event(&expired)));
        Ok(expired)
    }

    /// Returns unsold committed shares to the owner's free holding.
    fn close_listing(&self, listing: &ShareListing, status: ListingStatus) -> Result<ShareListing> {
        let mut closed = None;
        self.registry.transact(
            listing.content_id,
            |state| {
                state.release_commitment(listing.owner_id, listing.remaining_quantity);
                Ok(())
            },
            |_, _| {
                closed = Some(self.set_listing_status(listing.id, status)?);
                Ok(())
            },
        )?;
        closed.ok_or_else(|| ExchangeError::NotFound(format!("listing {}", listing.id)))
    }

    fn set_listing_status(&self, listing_id: ListingId, status: ListingStatus) -> Result<ShareListing> {
        self.with_state(|st| {
            let listing = st
                .listings
                .get_mut(&listing_id)
                .ok_or_else(|| ExchangeError::NotFound(format!("listing {}", listing_id)))?;
            listing.status = status;
            Ok(listing.clone())
        })
    }

    fn expire_offer(&self, offer: &ShareOffer) -> Result<ShareOffer> {
        let expired = self.set_offer_status(offer.id, OfferStatus::Expired)?;
        warn!("Offer {} expired", offer.id);
        self.events.publish(ExchangeEvent::OfferExpired(self.offer_event(&expired)));
        Ok(expired)
    }

    fn set_offer_status(&self, offer_id: OfferId, status: OfferStatus) -> Result<ShareOffer> {
        self.with_state(|st| {
            let offer = st
                .offers
                .get_mut(&offer_id)
                .ok_or_else(|| ExchangeError::NotFound(format!("offer {}", offer_id)))?;
            offer.status = status;
            Ok(offer.clone())
        })
    }

    fn record_fill(&self, plan: &FillPlan, fill: &Fill) -> (Option<ShareListing>, Option<ShareOffer>) {
        self.with_state(|st| {
            let listing = plan.listing.and_then(|(id, remaining)| {
                let stored = st.listings.get_mut(&id)?;
                stored.remaining_quantity = remaining - plan.quantity;
                if stored.remaining_quantity == 0 {
                    stored.status = ListingStatus::Fulfilled;
                }
                Some(stored.clone())
            });
            let offer = plan.offer_id.and_then(|id| {
                let stored = st.offers.get_mut(&id)?;
                stored.status = OfferStatus::Accepted;
                stored.accepted_by = Some(plan.seller_id);
                Some(stored.clone())
            });
            st.fills
                .insert((plan.buyer_id, plan.reference_id.clone()), fill.clone());
            (listing, offer)
        })
    }

    /// Moves shares seller to buyer and currency buyer to seller as one unit.
    /// Caller holds the content guard.
    async fn settle_fill(&self, plan: FillPlan) -> Result<Fill> {
        let total_price = trade_value(plan.unit_price, plan.quantity)?;
        let entries = WalletStore::transfer_entries(
            plan.buyer_id,
            plan.seller_id,
            plan.currency,
            total_price,
            LedgerReason::SharePurchase,
            &plan.reference_id,
        )?;
        let _wallets = self
            .wallets
            .lock([(plan.buyer_id, plan.currency), (plan.seller_id, plan.currency)])
            .await?;

        let fill = Fill {
            content_id: plan.content_id,
            listing_id: plan.listing.map(|(id, _)| id),
            offer_id: plan.offer_id,
            seller_id: plan.seller_id,
            buyer_id: plan.buyer_id,
            quantity: plan.quantity,
            unit_price: plan.unit_price,
            total_price,
            reference_id: plan.reference_id.clone(),
            replayed: false,
        };

        let mut recorded = (None, None);
        self.registry.transact(
            plan.content_id,
            |state| {
                match plan.listing {
                    Some(_) => state.debit_committed(plan.seller_id, plan.quantity)?,
                    None => state.debit_holding(plan.seller_id, plan.quantity)?,
                }
                state.credit_holding(plan.buyer_id, plan.quantity, plan.unit_price);
                state.book.reference_price = plan.unit_price;
                Ok(())
            },
            |_, _| {
                self.wallets.post(entries)?;
                recorded = self.record_fill(&plan, &fill);
                Ok(())
            },
        )?;
        let (listing, offer) = recorded;

        info!(
            "Fill on content {}: seller={} buyer={} qty={} price={} ref={}",
            fill.content_id, fill.seller_id, fill.buyer_id, fill.quantity, fill.unit_price,
            fill.reference_id
        );
        let now = self.clock.now();
        if let Some(listing) = &listing {
            self.events.publish(ExchangeEvent::ListingFilled(ListingFilledEvent {
                listing_id: listing.id,
                content_id: listing.content_id,
                seller_id: fill.seller_id,
                buyer_id: fill.buyer_id,
                quantity: fill.quantity,
                unit_price: fill.unit_price,
                remaining_quantity: listing.remaining_quantity,
                timestamp: now,
            }));
            if listing.status == ListingStatus::Fulfilled {
                self.events.publish(ExchangeEvent::ListingFulfilled(self.listing_event(listing)));
            }
        }
        if let Some(offer) = &offer {
            self.events.publish(ExchangeEvent::OfferAccepted(OfferAcceptedEvent {
                offer_id: offer.id,
                content_id: offer.content_id,
                buyer_id: offer.buyer_id,
                seller_id: fill.seller_id,
                quantity: offer.quantity,
                bid_price: offer.bid_price,
                timestamp: now,
            }));
        }
        Ok(fill)
    }
}
