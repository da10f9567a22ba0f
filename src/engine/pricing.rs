use std::collections::BTreeMap;

use crate::engine::types::{Amount, MarketError, TicketBag, Tier, TierName};

/// Immutable tier name -> (unit price, capacity) table.
///
/// Pure lookups only; nothing here mutates after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingTable {
    tiers: BTreeMap<TierName, Tier>,
}

impl PricingTable {
    pub fn new(tiers: Vec<Tier>) -> Result<Self, MarketError> {
        let mut table = BTreeMap::new();
        for tier in tiers {
            if table.contains_key(&tier.name) {
                return Err(MarketError::DuplicateTier(tier.name));
            }
            table.insert(tier.name.clone(), tier);
        }
        Ok(Self { tiers: table })
    }

    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.tiers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.values()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Total price of a bag at the fixed per-tier unit prices.
    ///
    /// Integer arithmetic only; overflow is reported, never wrapped.
    pub fn price_of(&self, bag: &TicketBag) -> Result<Amount, MarketError> {
        let mut total: Amount = 0;
        for (name, qty) in bag.iter() {
            let tier = self
                .tiers
                .get(name)
                .ok_or_else(|| MarketError::UnknownTier(name.clone()))?;
            let line = tier
                .unit_price
                .checked_mul(Amount::from(qty))
                .ok_or(MarketError::PriceOverflow)?;
            total = total.checked_add(line).ok_or(MarketError::PriceOverflow)?;
        }
        Ok(total)
    }

    /// The full-capacity bag minted to the house account at construction.
    pub fn house_inventory(&self) -> TicketBag {
        self.tiers
            .values()
            .map(|t| (t.name.clone(), t.capacity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_rows() -> PricingTable {
        PricingTable::new(vec![
            Tier { name: "front".into(), unit_price: 3, capacity: 3 },
            Tier { name: "middle".into(), unit_price: 2, capacity: 5 },
            Tier { name: "back".into(), unit_price: 1, capacity: 10 },
        ])
        .unwrap()
    }

    #[test]
    fn prices_mixed_bag() {
        let table = three_rows();
        assert!(!table.is_empty());
        assert_eq!(table.tier("front").map(|t| t.unit_price), Some(3));
        let mut bag = TicketBag::of("front", 2);
        bag.add("back", 3);
        assert_eq!(table.price_of(&bag).unwrap(), 2 * 3 + 3);
    }

    #[test]
    fn empty_bag_is_free() {
        assert_eq!(three_rows().price_of(&TicketBag::new()).unwrap(), 0);
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let table = three_rows();
        assert!(table.tier("balcony").is_none());
        let bag = TicketBag::of("balcony", 1);
        assert_eq!(
            table.price_of(&bag),
            Err(MarketError::UnknownTier("balcony".into()))
        );
    }

    #[test]
    fn duplicate_tier_is_rejected() {
        let err = PricingTable::new(vec![
            Tier { name: "front".into(), unit_price: 3, capacity: 3 },
            Tier { name: "front".into(), unit_price: 4, capacity: 1 },
        ])
        .unwrap_err();
        assert_eq!(err, MarketError::DuplicateTier("front".into()));
    }

    #[test]
    fn overflow_is_an_error() {
        let table = PricingTable::new(vec![Tier {
            name: "vip".into(),
            unit_price: Amount::MAX,
            capacity: 10,
        }])
        .unwrap();
        assert_eq!(
            table.price_of(&TicketBag::of("vip", 2)),
            Err(MarketError::PriceOverflow)
        );
    }

    #[test]
    fn house_inventory_matches_capacities() {
        let bag = three_rows().house_inventory();
        assert_eq!(bag.quantity("front"), 3);
        assert_eq!(bag.quantity("middle"), 5);
        assert_eq!(bag.quantity("back"), 10);
        assert_eq!(bag.total_quantity(), 18);
    }
}
