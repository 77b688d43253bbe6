use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use log::{error, info, warn};

use crate::error::{ExchangeError, Result};
use crate::services::event_publisher::EventBus;
use crate::store::clock::Clock;
use crate::store::locks::{KeyGuard, KeyedLocks};
use crate::store::wallet::WalletStore;
use crate::types::event_types::{
    BookOpenedEvent, BookTradeEvent, ExchangeEvent, IntegrityViolationEvent,
};
use crate::types::ledger_types::LedgerReason;
use crate::types::share_types::{BookSnapshot, BookTrade, ContentId, ContentShareBook, ShareHolding};
use crate::types::wallet_types::{Amount, Currency, OwnerId};

/// Everything guarded by one content item's lock.
#[derive(Debug)]
pub struct BookState {
    pub book: ContentShareBook,
    holdings: BTreeMap<OwnerId, ShareHolding>,
    /// Running sum of `owned_shares` over `holdings`.
    owned: u128,
    /// Accrual references already applied to the dividend pool.
    accruals: HashSet<String>,
    undo: UndoLog,
}

/// Prior values of whatever the open transaction touched. Empty between transactions.
#[derive(Debug, Default)]
struct UndoLog {
    book: Option<ContentShareBook>,
    owned: u128,
    holdings: Vec<(OwnerId, Option<ShareHolding>)>,
    accruals: Vec<String>,
}

impl BookState {
    fn new(book: ContentShareBook) -> Self {
        Self {
            book,
            holdings: BTreeMap::new(),
            owned: 0,
            accruals: HashSet::new(),
            undo: UndoLog::default(),
        }
    }

    fn begin(&mut self) {
        // A log left open means the last transaction never finished.
        if self.undo.book.is_some() {
            self.rollback();
        }
        self.undo.book = Some(self.book.clone());
        self.undo.owned = self.owned;
    }

    fn commit(&mut self) {
        self.undo = UndoLog::default();
    }

    fn rollback(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        if let Some(book) = undo.book {
            self.book = book;
        }
        self.owned = undo.owned;
        for (owner_id, prior) in undo.holdings.into_iter().rev() {
            match prior {
                Some(holding) => self.holdings.insert(owner_id, holding),
                None => self.holdings.remove(&owner_id),
            };
        }
        for reference_id in undo.accruals {
            self.accruals.remove(&reference_id);
        }
    }

    fn touch(&mut self, owner_id: OwnerId) {
        if self.undo.holdings.iter().all(|(o, _)| *o != owner_id) {
            let prior = self.holdings.get(&owner_id).cloned();
            self.undo.holdings.push((owner_id, prior));
        }
    }

    pub fn holding(&self, owner_id: OwnerId) -> ShareHolding {
        self.holdings
            .get(&owner_id)
            .cloned()
            .unwrap_or_else(|| ShareHolding::new(owner_id, self.book.content_id))
    }

    fn holding_mut(&mut self, owner_id: OwnerId) -> &mut ShareHolding {
        self.touch(owner_id);
        let content_id = self.book.content_id;
        self.holdings
            .entry(owner_id)
            .or_insert_with(|| ShareHolding::new(owner_id, content_id))
    }

    fn prune(&mut self, owner_id: OwnerId) {
        if self.holdings.get(&owner_id).is_some_and(ShareHolding::is_empty) {
            self.holdings.remove(&owner_id);
        }
    }

    /// Marks an accrual reference as applied. False when it already was.
    pub fn record_accrual(&mut self, reference_id: &str) -> bool {
        if !self.accruals.insert(reference_id.to_string()) {
            return false;
        }
        self.undo.accruals.push(reference_id.to_string());
        true
    }

    fn insufficient(&self, owner_id: OwnerId, available: u64, required: u64) -> ExchangeError {
        ExchangeError::InsufficientShares {
            owner_id,
            content_id: self.book.content_id,
            available,
            required,
        }
    }

    /// Takes `quantity` out of book inventory.
    pub fn reserve_shares(&mut self, quantity: u64) -> Result<()> {
        if quantity > self.book.available_shares {
            return Err(ExchangeError::Oversell {
                content_id: self.book.content_id,
                available: self.book.available_shares,
                requested: quantity,
            });
        }
        self.book.available_shares -= quantity;
        Ok(())
    }

    pub fn release_shares(&mut self, quantity: u64) {
        self.book.available_shares = self.book.available_shares.saturating_add(quantity);
    }

    pub fn credit_holding(&mut self, owner_id: OwnerId, quantity: u64, unit_cost: Amount) {
        let holding = self.holding_mut(owner_id);
        let owned = holding.owned_shares as f64;
        let added = quantity as f64;
        let next = owned + added;
        if next > 0.0 {
            holding.cost_basis = (holding.cost_basis * owned + unit_cost as f64 * added) / next;
        }
        holding.owned_shares += quantity;
        self.owned += quantity as u128;
    }

    /// Removes free (uncommitted) shares from a holding.
    pub fn debit_holding(&mut self, owner_id: OwnerId, quantity: u64) -> Result<()> {
        let free = self.holding(owner_id).free_shares();
        if quantity > free {
            return Err(self.insufficient(owner_id, free, quantity));
        }
        self.holding_mut(owner_id).owned_shares -= quantity;
        self.owned -= quantity as u128;
        self.prune(owner_id);
        Ok(())
    }

    pub fn commit_shares(&mut self, owner_id: OwnerId, quantity: u64) -> Result<()> {
        let free = self.holding(owner_id).free_shares();
        if quantity > free {
            return Err(self.insufficient(owner_id, free, quantity));
        }
        self.holding_mut(owner_id).committed_shares += quantity;
        Ok(())
    }

    pub fn release_commitment(&mut self, owner_id: OwnerId, quantity: u64) {
        self.touch(owner_id);
        if let Some(holding) = self.holdings.get_mut(&owner_id) {
            holding.committed_shares = holding.committed_shares.saturating_sub(quantity);
        }
        self.prune(owner_id);
    }

    /// Removes shares previously committed to a listing.
    pub fn debit_committed(&mut self, owner_id: OwnerId, quantity: u64) -> Result<()> {
        let holding = self.holding(owner_id);
        if quantity > holding.committed_shares || quantity > holding.owned_shares {
            return Err(self.insufficient(owner_id, holding.committed_shares, quantity));
        }
        let holding = self.holding_mut(owner_id);
        holding.committed_shares -= quantity;
        holding.owned_shares -= quantity;
        self.owned -= quantity as u128;
        self.prune(owner_id);
        Ok(())
    }

    /// `available + Σ owned == total`, and no holder has committed more than it owns.
    /// Walks every holding and checks the running sum against it.
    pub fn verify(&self) -> std::result::Result<(), String> {
        let owned: u128 = self.holdings.values().map(|h| h.owned_shares as u128).sum();
        if owned != self.owned {
            return Err(format!("holdings sum to {} but {} are on record", owned, self.owned));
        }
        self.check_supply()?;
        self.check_commitments(self.holdings.values())
    }

    /// The same invariant restricted to the holders the open transaction touched.
    fn verify_touched(&self) -> std::result::Result<(), String> {
        self.check_supply()?;
        self.check_commitments(
            self.undo
                .holdings
                .iter()
                .filter_map(|(owner_id, _)| self.holdings.get(owner_id)),
        )
    }

    fn check_supply(&self) -> std::result::Result<(), String> {
        let book = &self.book;
        if book.available_shares > book.total_shares {
            return Err(format!(
                "available {} exceeds total {}",
                book.available_shares, book.total_shares
            ));
        }
        if book.available_shares as u128 + self.owned != book.total_shares as u128 {
            return Err(format!(
                "available {} + owned {} != total {}",
                book.available_shares, self.owned, book.total_shares
            ));
        }
        Ok(())
    }

    fn check_commitments<'a>(
        &self,
        mut holdings: impl Iterator<Item = &'a ShareHolding>,
    ) -> std::result::Result<(), String> {
        match holdings.find(|h| h.committed_shares > h.owned_shares) {
            Some(h) => Err(format!(
                "owner {} committed {} of {} owned",
                h.owner_id, h.committed_shares, h.owned_shares
            )),
            None => Ok(()),
        }
    }
}

pub struct ShareRegistry {
    books: RwLock<HashMap<ContentId, Arc<Mutex<BookState>>>>,
    suspended: RwLock<HashMap<ContentId, String>>,
    /// Book trade receipts, kept apart from the copy-on-write state.
    receipts: Mutex<HashMap<(ContentId, String), BookTrade>>,
    locks: KeyedLocks<ContentId>,
    lock_timeout: Duration,
    wallets: Arc<WalletStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl ShareRegistry {
    pub fn new(
        wallets: Arc<WalletStore>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            suspended: RwLock::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            locks: KeyedLocks::new("content"),
            lock_timeout,
            wallets,
            clock,
            events,
        }
    }

    pub fn open_book(
        &self,
        content_id: ContentId,
        issuer_id: OwnerId,
        total_shares: u64,
        reference_price: Amount,
        currency: Currency,
    ) -> Result<ContentShareBook> {
        if total_shares == 0 || reference_price <= 0 {
            return Err(ExchangeError::InvalidAmount(format!(
                "book needs positive shares and price, got {} at {}",
                total_shares, reference_price
            )));
        }

        let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
        if books.contains_key(&content_id) {
            return Err(ExchangeError::AlreadyExists(format!("content {}", content_id)));
        }

        let book = ContentShareBook {
            content_id,
            issuer_id,
            currency,
            total_shares,
            available_shares: total_shares,
            reference_price,
            dividend_pool: 0,
            distributions: 0,
            created_at: self.clock.now(),
        };
        books.insert(content_id, Arc::new(Mutex::new(BookState::new(book.clone()))));
        drop(books);

        info!(
            "Book opened: content={} issuer={} shares={} price={} {}",
            content_id, issuer_id, total_shares, reference_price, currency
        );
        self.events.publish(ExchangeEvent::BookOpened(BookOpenedEvent {
            content_id,
            issuer_id,
            total_shares,
            reference_price,
            currency,
            timestamp: self.clock.now(),
        }));
        Ok(book)
    }

    fn cell(&self, content_id: ContentId) -> Result<Arc<Mutex<BookState>>> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&content_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("content {}", content_id)))
    }

    fn ensure_active(&self, content_id: ContentId) -> Result<()> {
        match self
            .suspended
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&content_id)
        {
            Some(detail) => Err(ExchangeError::IntegrityViolation {
                content_id,
                detail: detail.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Exclusive guard over one content item. Suspended items cannot be locked.
    pub async fn lock(&self, content_id: ContentId) -> Result<KeyGuard> {
        self.cell(content_id)?;
        self.ensure_active(content_id)?;
        let guard = self.locks.acquire(&content_id, self.lock_timeout).await?;
        self.ensure_active(content_id)?;
        Ok(guard)
    }

    /// Applies `mutate` in place under an undo log, checks the share invariant for the
    /// holders it touched, runs `settle`, and only then commits. Any error rolls the item back.
    /// The caller holds the content guard and every wallet guard `settle` needs.
    pub fn transact<T, M, S>(&self, content_id: ContentId, mutate: M, settle: S) -> Result<T>
    where
        M: FnOnce(&mut BookState) -> Result<T>,
        S: FnOnce(&BookState, &T) -> Result<()>,
    {
        self.ensure_active(content_id)?;
        let cell = self.cell(content_id)?;
        let mut state = cell.lock().unwrap_or_else(PoisonError::into_inner);

        state.begin();
        let value = match mutate(&mut *state) {
            Ok(value) => value,
            Err(e) => {
                state.rollback();
                return Err(e);
            }
        };
        if let Err(detail) = state.verify_touched() {
            state.rollback();
            drop(state);
            self.suspend(content_id, &detail);
            return Err(ExchangeError::IntegrityViolation { content_id, detail });
        }

        if let Err(e) = settle(&*state, &value) {
            state.rollback();
            return Err(e);
        }
        state.commit();
        Ok(value)
    }

    fn suspend(&self, content_id: ContentId, detail: &str) {
        error!(
            "Integrity violation on content {}: {}. Content suspended",
            content_id, detail
        );
        self.suspended
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(content_id, detail.to_string());
        self.events.publish(ExchangeEvent::IntegrityViolation(IntegrityViolationEvent {
            content_id,
            detail: detail.to_string(),
            timestamp: self.clock.now(),
        }));
    }

    pub fn suspension(&self, content_id: ContentId) -> Option<String> {
        self.suspended
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&content_id)
            .cloned()
    }

    pub fn suspended(&self) -> Vec<(ContentId, String)> {
        let mut items: Vec<(ContentId, String)> = self
            .suspended
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, detail)| (*id, detail.clone()))
            .collect();
        items.sort();
        items
    }

    /// Lifts a suspension once the committed state passes verification again.
    pub async fn resume(&self, content_id: ContentId) -> Result<ContentShareBook> {
        let cell = self.cell(content_id)?;
        let _guard = self.locks.acquire(&content_id, self.lock_timeout).await?;

        let state = cell.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .verify()
            .map_err(|detail| ExchangeError::IntegrityViolation { content_id, detail })?;
        let book = state.book.clone();
        drop(state);

        if self
            .suspended
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&content_id)
            .is_some()
        {
            warn!("Content {} resumed after operator review", content_id);
        }
        Ok(book)
    }

    /// Mismatches between book inventory and holdings across every item.
    pub fn verify_all(&self) -> Vec<(ContentId, String)> {
        let cells: Vec<(ContentId, Arc<Mutex<BookState>>)> = self
            .books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, cell)| (*id, cell.clone()))
            .collect();

        let mut failures: Vec<(ContentId, String)> = cells
            .into_iter()
            .filter_map(|(id, cell)| {
                let state = cell.lock().unwrap_or_else(PoisonError::into_inner);
                state.verify().err().map(|detail| (id, detail))
            })
            .collect();
        failures.sort();
        failures
    }

    pub fn read<T>(&self, content_id: ContentId, f: impl FnOnce(&BookState) -> T) -> Result<T> {
        let cell = self.cell(content_id)?;
        let state = cell.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&state))
    }

    pub fn book(&self, content_id: ContentId) -> Result<ContentShareBook> {
        self.read(content_id, |s| s.book.clone())
    }

    pub fn holding(&self, owner_id: OwnerId, content_id: ContentId) -> Result<ShareHolding> {
        self.read(content_id, |s| s.holding(owner_id))
    }

    pub fn holdings_of(&self, owner_id: OwnerId) -> Vec<ShareHolding> {
        let cells: Vec<Arc<Mutex<BookState>>> = self
            .books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut holdings: Vec<ShareHolding> = cells
            .iter()
            .filter_map(|cell| {
                cell.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .holdings
                    .get(&owner_id)
                    .cloned()
            })
            .collect();
        holdings.sort_by_key(|h| h.content_id);
        holdings
    }

    pub fn snapshot(&self, content_id: ContentId) -> Result<BookSnapshot> {
        self.read(content_id, |s| BookSnapshot {
            book: s.book.clone(),
            holdings: s.holdings.values().cloned().collect(),
        })
    }

    pub fn contents(&self) -> Vec<ContentId> {
        let mut ids: Vec<ContentId> = self
            .books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Primary purchase from book inventory at the reference price; the issuer is paid.
    pub async fn buy_shares(
        &self,
        content_id: ContentId,
        buyer_id: OwnerId,
        quantity: u64,
        reference_id: &str,
    ) -> Result<BookTrade> {
        self.book_trade(content_id, buyer_id, quantity, reference_id, TradeSide::Buy)
            .await
    }

    /// Sells free shares back into book inventory at the reference price; the issuer pays.
    pub async fn sell_to_book(
        &self,
        content_id: ContentId,
        seller_id: OwnerId,
        quantity: u64,
        reference_id: &str,
    ) -> Result<BookTrade> {
        self.book_trade(content_id, seller_id, quantity, reference_id, TradeSide::Sell)
            .await
    }

    async fn book_trade(
        &self,
        content_id: ContentId,
        owner_id: OwnerId,
        quantity: u64,
        reference_id: &str,
        side: TradeSide,
    ) -> Result<BookTrade> {
        if quantity == 0 {
            return Err(ExchangeError::InvalidAmount("quantity must be positive".into()));
        }

        let _content = self.lock(content_id).await?;
        let receipt_key = format!("{}:{}:{}", side.as_str(), owner_id, reference_id);
        let receipt = self
            .receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(content_id, receipt_key.clone()))
            .cloned();
        if let Some(trade) = receipt {
            return Ok(BookTrade {
                replayed: true,
                ..trade
            });
        }
        let book = self.book(content_id)?;
        if owner_id == book.issuer_id {
            return Err(ExchangeError::InvalidRequest(format!(
                "issuer {} cannot trade with its own book",
                owner_id
            )));
        }

        let unit_price = book.reference_price;
        let total_price = i64::try_from(quantity)
            .ok()
            .and_then(|q| q.checked_mul(unit_price))
            .ok_or_else(|| ExchangeError::InvalidAmount("trade value overflows".into()))?;
        let (payer, payee) = match side {
            TradeSide::Buy => (owner_id, book.issuer_id),
            TradeSide::Sell => (book.issuer_id, owner_id),
        };
        let ledger_ref = format!("book:{}:{}", content_id, receipt_key);
        let entries = WalletStore::transfer_entries(
            payer,
            payee,
            book.currency,
            total_price,
            LedgerReason::SharePurchase,
            &ledger_ref,
        )?;

        let _wallets = self
            .wallets
            .lock([(payer, book.currency), (payee, book.currency)])
            .await?;

        let trade = self.transact(
            content_id,
            |state| {
                match side {
                    TradeSide::Buy => {
                        state.reserve_shares(quantity)?;
                        state.credit_holding(owner_id, quantity, unit_price);
                    }
                    TradeSide::Sell => {
                        state.debit_holding(owner_id, quantity)?;
                        state.release_shares(quantity);
                    }
                }
                let trade = BookTrade {
                    content_id,
                    owner_id,
                    quantity,
                    unit_price,
                    total_price,
                    available_shares: state.book.available_shares,
                    replayed: false,
                };
                Ok(trade)
            },
            |_, trade| {
                self.wallets.post(entries)?;
                self.receipts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert((content_id, receipt_key.clone()), trade.clone());
                Ok(())
            },
        )?;

        info!(
            "Book {:?}: content={} owner={} qty={} price={} available={}",
            side, content_id, owner_id, quantity, unit_price, trade.available_shares
        );
        let payload = BookTradeEvent {
            content_id,
            owner_id,
            quantity,
            unit_price,
            available_shares: trade.available_shares,
            timestamp: self.clock.now(),
        };
        self.events.publish(match side {
            TradeSide::Buy => ExchangeEvent::SharesPurchased(payload),
            TradeSide::Sell => ExchangeEvent::SharesRedeemed(payload),
        });
        Ok(trade)
    }
}

#[derive(Debug, Clone, Copy)]
enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}
