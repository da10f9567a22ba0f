use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::engine::escrow::EscrowHouse;
use crate::engine::inventory::InventoryLedger;
use crate::engine::pricing::PricingTable;
use crate::engine::timer::{CooldownTimer, DEFAULT_COOLDOWN_MS};
use crate::engine::types::{
    Amount, ListingId, MarketEvent, PartyId, Receipt, SaleState, TicketBag,
};

/// An open or settled resale listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub seller: PartyId,
    pub tickets: TicketBag,
    pub ask_price: Amount,
    pub open: bool,
}

/// One independent two-phase ticket market.
///
/// Owns the pricing table, the inventory ledger, the escrowed balances, the
/// sale-state machine, the cooldown timer and the listing book; every
/// mutation goes through `buy`, `list_for_resale`, `accept_resale` or
/// `cooldown_elapsed`, each of which runs to completion as one indivisible
/// step. Construct as many instances as there are events on sale.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketMarket {
    pub(crate) pricing: PricingTable,
    pub(crate) inventory: InventoryLedger,
    pub(crate) escrow: EscrowHouse,
    pub(crate) state: SaleState,
    pub(crate) cooldown: CooldownTimer,
    pub(crate) listings: BTreeMap<ListingId, Listing>,
    pub(crate) next_listing_id: u64,
}

impl TicketMarket {
    /// Fresh market: nothing sold, house holds the full inventory, cooldown
    /// unarmed at the given delay.
    #[instrument(skip(pricing), fields(tiers = pricing.len()))]
    pub fn new(pricing: PricingTable, cooldown_delay_ms: u64) -> Self {
        let inventory = InventoryLedger::from_table(&pricing);
        let escrow = EscrowHouse::new(pricing.house_inventory());
        info!(
            tiers = pricing.len(),
            total_capacity = escrow.total_tickets(),
            "ticket market opened"
        );
        metrics::gauge!("tmx_tickets_remaining").set(escrow.total_tickets() as f64);
        Self {
            pricing,
            inventory,
            escrow,
            state: SaleState::AcceptingPrimary,
            cooldown: CooldownTimer::new(cooldown_delay_ms),
            listings: BTreeMap::new(),
            next_listing_id: 0,
        }
    }

    /// `new` with the production 12-minute cooldown.
    pub fn with_default_cooldown(pricing: PricingTable) -> Self {
        Self::new(pricing, DEFAULT_COOLDOWN_MS)
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn inventory(&self) -> &InventoryLedger {
        &self.inventory
    }

    pub fn escrow(&self) -> &EscrowHouse {
        &self.escrow
    }

    /// Host-side settlement hook: drain a party's escrowed funds.
    pub fn escrow_mut(&mut self) -> &mut EscrowHouse {
        &mut self.escrow
    }

    pub fn state(&self) -> SaleState {
        self.state
    }

    pub fn cooldown(&self) -> &CooldownTimer {
        &self.cooldown
    }

    pub fn listing(&self, id: ListingId) -> Option<&Listing> {
        self.listings.get(&id)
    }

    pub fn listings(&self) -> impl Iterator<Item = (ListingId, &Listing)> {
        self.listings.iter().map(|(id, listing)| (*id, listing))
    }

    /// Cooldown wakeup callback. Idempotent: only the first call after
    /// arming flips the gate and opens the resale market.
    #[instrument(skip(self))]
    pub fn cooldown_elapsed(&mut self) -> Receipt {
        let mut receipt = Receipt::default();
        if self.cooldown.fire() && self.state == SaleState::SoldOutAwaitingCooldown {
            self.state = SaleState::ResaleOpen;
            info!("resale market opened");
            receipt.events.push(MarketEvent::ResaleOpened);
        }
        receipt
    }

    pub(crate) fn allocate_listing_id(&mut self) -> ListingId {
        let id = ListingId(self.next_listing_id);
        self.next_listing_id += 1;
        id
    }

    /// Snapshot restore path; invariants were checked by the persist layer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_restored(
        pricing: PricingTable,
        inventory: InventoryLedger,
        escrow: EscrowHouse,
        state: SaleState,
        cooldown: CooldownTimer,
        listings: BTreeMap<ListingId, Listing>,
        next_listing_id: u64,
    ) -> Self {
        Self { pricing, inventory, escrow, state, cooldown, listings, next_listing_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::escrow::Party;
    use crate::engine::types::Tier;

    fn market() -> TicketMarket {
        let pricing = PricingTable::new(vec![
            Tier { name: "front".into(), unit_price: 3, capacity: 3 },
            Tier { name: "back".into(), unit_price: 1, capacity: 2 },
        ])
        .unwrap();
        TicketMarket::with_default_cooldown(pricing)
    }

    #[test]
    fn fresh_market_holds_everything_in_the_house() {
        let market = market();
        assert_eq!(market.state(), SaleState::AcceptingPrimary);
        assert_eq!(market.cooldown().delay_ms(), DEFAULT_COOLDOWN_MS);
        assert!(!market.cooldown().is_elapsed());
        let house = market.escrow().holding_of(Party::House);
        assert_eq!(house.funds, 0);
        assert_eq!(house.tickets.total_quantity(), 5);
    }

    #[test]
    fn spurious_cooldown_wakeup_is_inert() {
        let mut market = market();
        let receipt = market.cooldown_elapsed();
        assert!(receipt.events.is_empty());
        assert_eq!(market.state(), SaleState::AcceptingPrimary);
    }
}
