use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Integer payment amount. Prices are fixed per tier; no fractional units.
pub type Amount = u64;

/// Opaque party identifier, issued by the authorization collaborator.
pub type PartyId = u64;

pub type TierName = String;

/// A ticket category with a fixed unit price and a fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: TierName,
    pub unit_price: Amount,
    pub capacity: u32,
}

/// Multiset of tickets of mixed tiers held or requested by one party.
///
/// Quantities are always positive: inserting a zero quantity is a no-op, and
/// subtraction removes emptied entries, so an all-zero bag and an empty bag
/// are the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketBag(BTreeMap<TierName, u32>);

impl TicketBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-tier bag, handy in tests and the CLI.
    pub fn of(tier: impl Into<TierName>, quantity: u32) -> Self {
        let mut bag = Self::new();
        bag.add(tier, quantity);
        bag
    }

    pub fn add(&mut self, tier: impl Into<TierName>, quantity: u32) {
        if quantity == 0 {
            return;
        }
        *self.0.entry(tier.into()).or_insert(0) += quantity;
    }

    pub fn quantity(&self, tier: &str) -> u32 {
        self.0.get(tier).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TierName, u32)> {
        self.0.iter().map(|(tier, qty)| (tier, *qty))
    }

    pub fn total_quantity(&self) -> u64 {
        self.0.values().map(|q| u64::from(*q)).sum()
    }

    /// First tier for which `self` holds fewer tickets than `other`, if any.
    pub fn first_shortfall<'a>(&self, other: &'a TicketBag) -> Option<&'a TierName> {
        other
            .0
            .iter()
            .find(|(tier, qty)| self.quantity(tier) < **qty)
            .map(|(tier, _)| tier)
    }

    pub fn merge(&mut self, other: &TicketBag) {
        for (tier, qty) in other.iter() {
            self.add(tier.clone(), qty);
        }
    }

    /// Remove `other` from `self`; fails with the first short tier.
    pub fn take(&mut self, other: &TicketBag) -> Result<(), TierName> {
        if let Some(tier) = self.first_shortfall(other) {
            return Err(tier.clone());
        }
        for (tier, qty) in other.iter() {
            let held = self.0.entry(tier.clone()).or_insert(0);
            *held -= qty;
            if *held == 0 {
                self.0.remove(tier);
            }
        }
        Ok(())
    }
}

impl FromIterator<(TierName, u32)> for TicketBag {
    fn from_iter<I: IntoIterator<Item = (TierName, u32)>>(iter: I) -> Self {
        let mut bag = Self::new();
        for (tier, qty) in iter {
            bag.add(tier, qty);
        }
        bag
    }
}

impl fmt::Display for TicketBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tier, qty) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}x{}", qty, tier)?;
            first = false;
        }
        if first {
            write!(f, "(empty)")?;
        }
        Ok(())
    }
}

/// Primary-market offer: a requested bag plus the payment escrowed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyOffer {
    pub requested: TicketBag,
    pub offered_payment: Amount,
}

/// Secondary-market listing as submitted by a seller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResaleListing {
    pub tickets_offered: TicketBag,
    pub ask_price: Amount,
}

/// Handle to an open resale listing, satisfiable exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub u64);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sale-progress state machine. SoldOutAwaitingCooldown -> ResaleOpen is
/// one-way and fires exactly once, on the cooldown callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleState {
    AcceptingPrimary,
    SoldOutAwaitingCooldown,
    ResaleOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    Purchased {
        buyer: PartyId,
        tickets: TicketBag,
        paid: Amount,
        ts: u64,
    },
    Refunded {
        party: PartyId,
        amount: Amount,
    },
    SoldOut {
        at: u64,
    },
    CooldownArmed {
        delay_ms: u64,
    },
    ResaleOpened,
    Listed {
        listing: ListingId,
        seller: PartyId,
        ask_price: Amount,
    },
    ResaleSettled {
        listing: ListingId,
        seller: PartyId,
        buyer: PartyId,
        price: Amount,
    },
}

/// Outcome of a successful engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Receipt {
    pub events: Vec<MarketEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("unknown tier: {0}")]
    UnknownTier(TierName),
    #[error("duplicate tier: {0}")]
    DuplicateTier(TierName),
    #[error("insufficient inventory for tier {tier}: requested {requested}, remaining {remaining}")]
    InsufficientInventory {
        tier: TierName,
        requested: u32,
        remaining: u32,
    },
    #[error("insufficient payment: offered {offered}, price is {required}")]
    InsufficientPayment { offered: Amount, required: Amount },
    #[error("insufficient resale payment: offered {offered}, asked {asked}")]
    InsufficientResalePayment { offered: Amount, asked: Amount },
    #[error("atomicity violation at leg {leg}: {detail}")]
    AtomicityViolation { leg: usize, detail: String },
    #[error("resale requires a full sellout and an elapsed cooldown")]
    UnauthorizedResale,
    #[error("seller does not hold the offered tickets (tier {tier})")]
    UnownedTickets { tier: TierName },
    #[error("the primary sale window is closed")]
    PrimaryClosed,
    #[error("order contains no tickets")]
    EmptyOrder,
    #[error("no listing with id {0}")]
    ListingNotFound(ListingId),
    #[error("listing {0} is closed")]
    ListingClosed(ListingId),
    #[error("a party cannot accept its own listing")]
    SelfTrade,
    #[error("price computation overflowed")]
    PriceOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quantities_never_stored() {
        let mut bag = TicketBag::new();
        bag.add("front", 0);
        assert!(bag.is_empty());
        assert_eq!(bag, TicketBag::new());
    }

    #[test]
    fn take_removes_emptied_entries() {
        let mut bag = TicketBag::of("front", 2);
        bag.add("back", 1);
        bag.take(&TicketBag::of("front", 2)).unwrap();
        assert_eq!(bag.quantity("front"), 0);
        assert_eq!(bag.quantity("back"), 1);
        // emptied entry is gone, so the bag equals one built without it
        assert_eq!(bag, TicketBag::of("back", 1));
    }

    #[test]
    fn take_reports_first_short_tier() {
        let mut bag = TicketBag::of("front", 1);
        let err = bag.take(&TicketBag::of("front", 2)).unwrap_err();
        assert_eq!(err, "front");
        // nothing was removed
        assert_eq!(bag.quantity("front"), 1);
    }

    #[test]
    fn shortfall_on_absent_tier() {
        let bag = TicketBag::of("front", 1);
        let want = TicketBag::of("middle", 1);
        assert_eq!(bag.first_shortfall(&want), Some(&"middle".to_string()));
    }
}
