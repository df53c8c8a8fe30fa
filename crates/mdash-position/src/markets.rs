//! Market Registry.
//!
//! Sibling of the Position Registry over [`MarketOffer`]. Adds two
//! registry-local annotations that never come from the source: favorites
//! (keyed by symbol, kept across refreshes) and the selected market.

use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::debug;

use mdash_core::MarketOffer;

use crate::store::{Store, StoreSnapshot, Subscription};

/// Selected market before the user picks one.
pub const DEFAULT_MARKET: &str = "BNB-BNB-PERP";

pub struct MarketRegistry {
    store: Store<MarketOffer>,
    favorites: RwLock<HashSet<String>>,
    selected: RwLock<String>,
}

impl Default for MarketRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MARKET)
    }
}

impl MarketRegistry {
    pub fn new(default_market: impl Into<String>) -> Self {
        Self {
            store: Store::new(),
            favorites: RwLock::new(HashSet::new()),
            selected: RwLock::new(default_market.into()),
        }
    }

    pub(crate) fn store(&self) -> &Store<MarketOffer> {
        &self.store
    }

    /// Mark offers whose symbol is a favorite.
    pub(crate) fn annotate(&self, offers: &mut [MarketOffer]) {
        let favorites = self.favorites.read();
        for offer in offers {
            offer.is_favorite = favorites.contains(&offer.symbol);
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn replace_all(&self, mut offers: Vec<MarketOffer>) {
        self.annotate(&mut offers);
        debug!(count = offers.len(), "Replacing market offers");
        self.store.replace_all(offers);
    }

    pub fn add(&self, mut offer: MarketOffer) {
        self.annotate(std::slice::from_mut(&mut offer));
        self.store.mutate(|items| {
            match items.iter_mut().find(|o| o.id == offer.id) {
                Some(existing) => *existing = offer,
                None => items.push(offer),
            }
        });
    }

    pub fn remove(&self, id: &str) -> Option<MarketOffer> {
        self.store.mutate(|items| {
            let idx = items.iter().position(|o| o.id == id)?;
            Some(items.remove(idx))
        })
    }

    pub fn set_loading(&self, loading: bool) {
        self.store.set_loading(loading);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.store.set_error(error);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Flip the favorite flag for `symbol`. Returns the new state.
    pub fn toggle_favorite(&self, symbol: &str) -> bool {
        let now_favorite = {
            let mut favorites = self.favorites.write();
            if favorites.remove(symbol) {
                false
            } else {
                favorites.insert(symbol.to_string());
                true
            }
        };
        self.store.mutate(|items| {
            for offer in items.iter_mut().filter(|o| o.symbol == symbol) {
                offer.is_favorite = now_favorite;
            }
        });
        now_favorite
    }

    pub fn select(&self, symbol: impl Into<String>) {
        *self.selected.write() = symbol.into();
    }

    pub fn selected_symbol(&self) -> String {
        self.selected.read().clone()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The selected market, falling back to the first listed offer when the
    /// selection is not in the current set.
    pub fn current(&self) -> Option<MarketOffer> {
        let selected = self.selected.read().clone();
        self.store.read(|items| {
            items
                .iter()
                .find(|o| o.symbol == selected)
                .or_else(|| items.first())
                .cloned()
        })
    }

    pub fn get(&self, symbol: &str) -> Option<MarketOffer> {
        self.store
            .read(|items| items.iter().find(|o| o.symbol == symbol).cloned())
    }

    pub fn snapshot(&self) -> StoreSnapshot<MarketOffer> {
        self.store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.store.error()
    }

    pub fn active_offers(&self) -> Vec<MarketOffer> {
        self.store
            .read(|items| items.iter().filter(|o| o.is_active).cloned().collect())
    }

    pub fn favorite_offers(&self) -> Vec<MarketOffer> {
        self.store
            .read(|items| items.iter().filter(|o| o.is_favorite).cloned().collect())
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&StoreSnapshot<MarketOffer>) + Send + Sync + 'static,
    ) -> Subscription {
        self.store.subscribe(callback)
    }
}
