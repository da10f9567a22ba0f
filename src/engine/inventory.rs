use std::collections::BTreeMap;

use tracing::{instrument, warn};

use crate::engine::pricing::PricingTable;
use crate::engine::types::{MarketError, TicketBag, TierName};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    capacity: u32,
    sold: u32,
}

/// Per-tier sold counts, bounded by capacity. The authoritative source for
/// sold-out detection.
///
/// Invariant: `0 <= sold <= capacity` for every tier, always. `record_sale`
/// checks the whole bag before touching any count, so a rejected sale leaves
/// the ledger byte-for-byte unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryLedger {
    rows: BTreeMap<TierName, Row>,
}

impl InventoryLedger {
    pub fn from_table(table: &PricingTable) -> Self {
        let rows = table
            .iter()
            .map(|t| (t.name.clone(), Row { capacity: t.capacity, sold: 0 }))
            .collect();
        Self { rows }
    }

    pub fn remaining(&self, tier: &str) -> Result<u32, MarketError> {
        let row = self
            .rows
            .get(tier)
            .ok_or_else(|| MarketError::UnknownTier(tier.to_string()))?;
        Ok(row.capacity - row.sold)
    }

    pub fn sold(&self, tier: &str) -> Result<u32, MarketError> {
        self.rows
            .get(tier)
            .map(|row| row.sold)
            .ok_or_else(|| MarketError::UnknownTier(tier.to_string()))
    }

    pub fn total_sold(&self) -> u64 {
        self.rows.values().map(|row| u64::from(row.sold)).sum()
    }

    /// (tier, sold, capacity) triples, in tier order.
    pub fn iter(&self) -> impl Iterator<Item = (&TierName, u32, u32)> {
        self.rows
            .iter()
            .map(|(name, row)| (name, row.sold, row.capacity))
    }

    /// Record the sale of a whole bag, or nothing at all.
    #[instrument(level = "debug", skip(self))]
    pub fn record_sale(&mut self, bag: &TicketBag) -> Result<(), MarketError> {
        // check every tier first, then apply every increment
        for (tier, qty) in bag.iter() {
            let remaining = self.remaining(tier)?;
            if remaining < qty {
                warn!(tier = %tier, requested = qty, remaining, "sale rejected");
                return Err(MarketError::InsufficientInventory {
                    tier: tier.clone(),
                    requested: qty,
                    remaining,
                });
            }
        }
        for (tier, qty) in bag.iter() {
            if let Some(row) = self.rows.get_mut(tier) {
                row.sold += qty;
            }
        }
        Ok(())
    }

    pub fn is_fully_sold_out(&self) -> bool {
        self.rows.values().all(|row| row.sold == row.capacity)
    }

    /// Snapshot restore path; rejects counts above capacity.
    pub(crate) fn restore_sold(&mut self, tier: &str, sold: u32) -> Result<(), MarketError> {
        let row = self
            .rows
            .get_mut(tier)
            .ok_or_else(|| MarketError::UnknownTier(tier.to_string()))?;
        if sold > row.capacity {
            return Err(MarketError::InsufficientInventory {
                tier: tier.to_string(),
                requested: sold,
                remaining: row.capacity,
            });
        }
        row.sold = sold;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Tier;
    use proptest::prelude::*;

    fn three_rows() -> PricingTable {
        PricingTable::new(vec![
            Tier { name: "front".into(), unit_price: 3, capacity: 3 },
            Tier { name: "middle".into(), unit_price: 2, capacity: 5 },
            Tier { name: "back".into(), unit_price: 1, capacity: 10 },
        ])
        .unwrap()
    }

    #[test]
    fn records_and_reports_remaining() {
        let mut ledger = InventoryLedger::from_table(&three_rows());
        assert_eq!(ledger.remaining("front").unwrap(), 3);

        ledger.record_sale(&TicketBag::of("front", 3)).unwrap();
        assert_eq!(ledger.remaining("front").unwrap(), 0);
        assert_eq!(ledger.sold("front").unwrap(), 3);
        assert!(!ledger.is_fully_sold_out());
    }

    #[test]
    fn rejected_sale_touches_nothing() {
        let mut ledger = InventoryLedger::from_table(&three_rows());
        ledger.record_sale(&TicketBag::of("middle", 2)).unwrap();

        // one good tier, one short tier: the good tier must not move either
        let mut bag = TicketBag::of("back", 1);
        bag.add("middle", 4);
        let err = ledger.record_sale(&bag).unwrap_err();
        assert_eq!(
            err,
            MarketError::InsufficientInventory {
                tier: "middle".into(),
                requested: 4,
                remaining: 3,
            }
        );
        assert_eq!(ledger.remaining("back").unwrap(), 10);
        assert_eq!(ledger.remaining("middle").unwrap(), 3);
    }

    #[test]
    fn unknown_tier_in_bag_rejected() {
        let mut ledger = InventoryLedger::from_table(&three_rows());
        let err = ledger.record_sale(&TicketBag::of("balcony", 1)).unwrap_err();
        assert_eq!(err, MarketError::UnknownTier("balcony".into()));
    }

    #[test]
    fn full_sellout_detected() {
        let mut ledger = InventoryLedger::from_table(&three_rows());
        ledger.record_sale(&TicketBag::of("front", 3)).unwrap();
        ledger.record_sale(&TicketBag::of("middle", 5)).unwrap();
        assert!(!ledger.is_fully_sold_out());
        ledger.record_sale(&TicketBag::of("back", 10)).unwrap();
        assert!(ledger.is_fully_sold_out());
    }

    #[test]
    fn restore_rejects_over_capacity() {
        let mut ledger = InventoryLedger::from_table(&three_rows());
        assert!(ledger.restore_sold("front", 4).is_err());
        assert!(ledger.restore_sold("front", 3).is_ok());
        assert_eq!(ledger.remaining("front").unwrap(), 0);
    }

    fn any_tier() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("front".to_string()),
            Just("middle".to_string()),
            Just("back".to_string()),
            Just("balcony".to_string()),
        ]
    }

    proptest! {
        // capacity bound: no request sequence ever drives sold past capacity
        #[test]
        fn sold_never_exceeds_capacity(requests in proptest::collection::vec(
            (any_tier(), 0u32..6),
            0..40,
        )) {
            let mut ledger = InventoryLedger::from_table(&three_rows());
            for (tier, qty) in requests {
                let _ = ledger.record_sale(&TicketBag::of(tier, qty));
                for (name, sold, capacity) in ledger.iter() {
                    prop_assert!(sold <= capacity, "tier {} oversold", name);
                }
            }
        }
    }
}
