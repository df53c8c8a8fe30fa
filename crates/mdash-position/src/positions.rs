//! Position Registry.
//!
//! Authoritative in-memory set of tracked positions. Full refreshes come
//! from the sync loop; `add`/`update`/`remove` serve optimistic local
//! flows. Projections are computed on every read, never cached.

use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use mdash_core::{Position, PositionStatus, Price};

use crate::store::{Store, StoreSnapshot, Subscription};

/// Partial update applied by optimistic flows.
///
/// `pnl` and `pnl_percentage` are not settable; they are re-derived when
/// `current_price` changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionUpdate {
    pub current_price: Option<Price>,
    pub status: Option<PositionStatus>,
    pub liquidation_price: Option<Price>,
    pub realized_pnl: Option<Decimal>,
    pub loan_id: Option<u64>,
}

impl PositionUpdate {
    #[must_use]
    pub fn price(current_price: Price) -> Self {
        Self {
            current_price: Some(current_price),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn status(status: PositionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    fn apply(self, position: &mut Position) {
        if let Some(status) = self.status {
            position.status = status;
        }
        if let Some(liq) = self.liquidation_price {
            position.liquidation_price = liq;
        }
        if let Some(realized) = self.realized_pnl {
            position.realized_pnl = realized;
        }
        if let Some(loan_id) = self.loan_id {
            position.loan_id = Some(loan_id);
        }
        if let Some(price) = self.current_price {
            if let Err(e) = position.refresh_pnl(price) {
                warn!(id = %position.id, error = %e, "Price update rejected, keeping previous PnL");
            }
        }
    }
}

#[derive(Default)]
pub struct PositionRegistry {
    store: Store<Position>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn store(&self) -> &Store<Position> {
        &self.store
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Atomically replace the whole set. Duplicate ids keep the first entry.
    pub fn replace_all(&self, positions: Vec<Position>) {
        let positions = dedup_by_id(positions);
        debug!(count = positions.len(), "Replacing positions");
        self.store.replace_all(positions);
    }

    /// Insert a position, replacing any existing entry with the same id.
    pub fn add(&self, position: Position) {
        trace!(id = %position.id, "Adding position");
        self.store.mutate(|items| {
            match items.iter_mut().find(|p| p.id == position.id) {
                Some(existing) => *existing = position,
                None => items.push(position),
            }
        });
    }

    /// Remove by id. Returns the removed position.
    pub fn remove(&self, id: &str) -> Option<Position> {
        let removed = self.store.mutate(|items| {
            let idx = items.iter().position(|p| p.id == id)?;
            Some(items.remove(idx))
        });
        trace!(id, found = removed.is_some(), "Removing position");
        removed
    }

    /// Apply a partial update. Returns `false` when the id is unknown.
    pub fn update(&self, id: &str, update: PositionUpdate) -> bool {
        self.store.mutate(|items| match items.iter_mut().find(|p| p.id == id) {
            Some(position) => {
                update.apply(position);
                true
            }
            None => false,
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

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, id: &str) -> Option<Position> {
        self.store
            .read(|items| items.iter().find(|p| p.id == id).cloned())
    }

    pub fn snapshot(&self) -> StoreSnapshot<Position> {
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

    pub fn open_positions(&self) -> Vec<Position> {
        self.store
            .read(|items| items.iter().filter(|p| p.is_open()).cloned().collect())
    }

    pub fn closed_or_liquidated_positions(&self) -> Vec<Position> {
        self.store
            .read(|items| items.iter().filter(|p| !p.is_open()).cloned().collect())
    }

    /// Sum of `pnl` over open positions, saturating at the `Decimal` bounds.
    pub fn aggregate_pnl(&self) -> Decimal {
        self.store.read(|items| {
            items
                .iter()
                .filter(|p| p.is_open())
                .fold(Decimal::ZERO, |acc, p| acc.saturating_add(p.pnl))
        })
    }

    /// Sum of `collateral_quote` over open positions, saturating.
    pub fn aggregate_collateral(&self) -> Decimal {
        self.store.read(|items| {
            items
                .iter()
                .filter(|p| p.is_open())
                .fold(Decimal::ZERO, |acc, p| acc.saturating_add(p.collateral_quote))
        })
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&StoreSnapshot<Position>) + Send + Sync + 'static,
    ) -> Subscription {
        self.store.subscribe(callback)
    }
}

pub(crate) fn dedup_by_id(positions: Vec<Position>) -> Vec<Position> {
    let mut seen = std::collections::HashSet::with_capacity(positions.len());
    positions
        .into_iter()
        .filter(|p| {
            let fresh = seen.insert(p.id.clone());
            if !fresh {
                debug!(id = %p.id, "Dropping duplicate position id");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mdash_core::{AccountId, ChainId, Size};
    use rust_decimal_macros::dec;

    fn position(id: &str, status: PositionStatus, pnl: Decimal, collateral: Decimal) -> Position {
        Position {
            id: id.to_string(),
            loan_id: Some(1),
            owner: AccountId::parse("0x00000000000000000000000000000000000000aa").unwrap(),
            chain: ChainId::BERACHAIN,
            collateral_symbol: "CAKE".to_string(),
            quote_symbol: "BNB".to_string(),
            entry_price: Price::new(dec!(2)),
            current_price: Price::new(dec!(2)),
            size_base: Size::new(dec!(2.5)),
            leverage: dec!(5),
            collateral_quote: collateral,
            opening_notional_quote: dec!(5),
            pnl,
            pnl_percentage: Decimal::ZERO,
            liquidation_price: Price::new(dec!(1.61)),
            realized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status,
        }
    }

    #[test]
    fn test_projections() {
        let reg = PositionRegistry::new();
        reg.replace_all(vec![
            position("a", PositionStatus::Open, dec!(1.5), dec!(1)),
            position("b", PositionStatus::Open, dec!(-0.5), dec!(2)),
            position("c", PositionStatus::Closed, dec!(100), dec!(50)),
            position("d", PositionStatus::Liquidated, dec!(-9), dec!(9)),
        ]);

        assert_eq!(reg.open_positions().len(), 2);
        assert_eq!(reg.closed_or_liquidated_positions().len(), 2);
        assert_eq!(reg.aggregate_pnl(), dec!(1.0));
        assert_eq!(reg.aggregate_collateral(), dec!(3));
    }

    #[test]
    fn test_empty_aggregates_are_zero() {
        let reg = PositionRegistry::new();
        assert_eq!(reg.aggregate_pnl(), Decimal::ZERO);
        assert_eq!(reg.aggregate_collateral(), Decimal::ZERO);
    }

    #[test]
    fn test_replace_all_is_idempotent() {
        let reg = PositionRegistry::new();
        let batch = vec![
            position("a", PositionStatus::Open, dec!(1.125), dec!(1)),
            position("b", PositionStatus::Open, dec!(2), dec!(1)),
        ];

        reg.replace_all(batch.clone());
        let pnl = reg.aggregate_pnl();
        reg.replace_all(batch);

        assert_eq!(reg.aggregate_pnl(), pnl);
        assert_eq!(reg.open_positions().len(), 2);
    }

    #[test]
    fn test_replace_all_dedups_ids() {
        let reg = PositionRegistry::new();
        reg.replace_all(vec![
            position("a", PositionStatus::Open, dec!(1), dec!(1)),
            position("a", PositionStatus::Open, dec!(7), dec!(1)),
        ]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a").unwrap().pnl, dec!(1));
    }

    #[test]
    fn test_add_upserts() {
        let reg = PositionRegistry::new();
        reg.add(position("a", PositionStatus::Open, dec!(1), dec!(1)));
        reg.add(position("a", PositionStatus::Open, dec!(3), dec!(1)));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.aggregate_pnl(), dec!(3));
    }

    #[test]
    fn test_update_rederives_pnl() {
        let reg = PositionRegistry::new();
        reg.add(position("a", PositionStatus::Open, Decimal::ZERO, dec!(1)));

        assert!(reg.update("a", PositionUpdate::price(Price::new(dec!(2.45)))));
        let pos = reg.get("a").unwrap();
        assert_eq!(pos.pnl, dec!(1.125));
        assert_eq!(pos.pnl_percentage, dec!(112.5));

        assert!(reg.update("a", PositionUpdate::status(PositionStatus::Closed)));
        assert!(reg.open_positions().is_empty());
        assert_eq!(reg.aggregate_pnl(), Decimal::ZERO);

        assert!(!reg.update("missing", PositionUpdate::default()));
    }

    #[test]
    fn test_update_with_overflowing_price_keeps_pnl() {
        let reg = PositionRegistry::new();
        reg.add(position("a", PositionStatus::Open, dec!(1), dec!(1)));
        let before = reg.get("a").unwrap();

        let huge = Price::new(Decimal::MAX);
        assert!(reg.update("a", PositionUpdate::price(huge)));
        assert_eq!(reg.get("a").unwrap(), before);
    }

    #[test]
    fn test_aggregates_saturate() {
        let reg = PositionRegistry::new();
        reg.add(position("a", PositionStatus::Open, Decimal::MAX, Decimal::MAX));
        reg.add(position("b", PositionStatus::Open, Decimal::MAX, Decimal::MAX));

        assert_eq!(reg.aggregate_pnl(), Decimal::MAX);
        assert_eq!(reg.aggregate_collateral(), Decimal::MAX);
    }

    #[test]
    fn test_remove() {
        let reg = PositionRegistry::new();
        reg.add(position("a", PositionStatus::Open, dec!(1), dec!(1)));
        assert!(reg.remove("a").is_some());
        assert!(reg.remove("a").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_subscriber_sees_consistent_projection() {
        use std::sync::{Arc, Mutex};

        let reg = PositionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = reg.subscribe(move |snap| {
            let total: Decimal = snap.items.iter().filter(|p| p.is_open()).map(|p| p.pnl).sum();
            sink.lock().unwrap().push(total);
        });

        reg.add(position("a", PositionStatus::Open, dec!(1), dec!(1)));
        reg.add(position("b", PositionStatus::Open, dec!(2), dec!(1)));
        reg.remove("a");

        assert_eq!(*seen.lock().unwrap(), vec![dec!(1), dec!(3), dec!(2)]);
    }
}
