//! Pure conversions between the in-memory `TicketMarket` and the
//! serializable snapshot types.
//!
//! This file MUST NOT talk to the database. Only struct <-> struct mapping
//! and WAL replay live here.

use std::collections::BTreeMap;

use crate::engine::inventory::InventoryLedger;
use crate::engine::market::{Listing, TicketMarket};
use crate::engine::pricing::PricingTable;
use crate::engine::timer::CooldownTimer;
use crate::engine::types::{BuyOffer, ListingId, ResaleListing, Tier};
use crate::persist::types::{
    PersistError, PersistResult, SnapshotAccount, SnapshotData, SnapshotListing, SnapshotTier,
    WalOp, SNAPSHOT_SCHEMA_VERSION,
};

/// Build a `SnapshotData` from the current market state.
/// `wal_high_watermark` is left 0 here; the store stamps it when saving.
pub fn from_market(market: &TicketMarket) -> SnapshotData {
    let tiers = market
        .pricing()
        .iter()
        .map(|tier| SnapshotTier {
            name: tier.name.clone(),
            unit_price: tier.unit_price,
            capacity: tier.capacity,
            // the ledger always knows every pricing-table tier
            sold: market.inventory().sold(&tier.name).unwrap_or(0),
        })
        .collect();

    let accounts = market
        .escrow()
        .accounts()
        .map(|(party, holding)| SnapshotAccount { party, holding: holding.clone() })
        .collect();

    let listings = market
        .listings()
        .map(|(id, listing)| SnapshotListing {
            id: id.0,
            seller: listing.seller,
            tickets: listing.tickets.clone(),
            ask_price: listing.ask_price,
            open: listing.open,
        })
        .collect();

    SnapshotData {
        version: SNAPSHOT_SCHEMA_VERSION,
        tiers,
        sale_state: market.state(),
        cooldown: market.cooldown().state(),
        cooldown_delay_ms: market.cooldown().delay_ms(),
        accounts,
        listings,
        next_listing_id: market.next_listing_id,
        wal_high_watermark: 0,
    }
}

/// Rebuild a market from a previously saved snapshot.
pub fn to_market(snap: &SnapshotData) -> PersistResult<TicketMarket> {
    if snap.version != SNAPSHOT_SCHEMA_VERSION {
        return Err(PersistError::FormatMismatch);
    }

    let pricing = PricingTable::new(
        snap.tiers
            .iter()
            .map(|t| Tier {
                name: t.name.clone(),
                unit_price: t.unit_price,
                capacity: t.capacity,
            })
            .collect(),
    )
    .map_err(|_| PersistError::FormatMismatch)?;

    let mut inventory = InventoryLedger::from_table(&pricing);
    for tier in &snap.tiers {
        inventory
            .restore_sold(&tier.name, tier.sold)
            .map_err(|_| PersistError::FormatMismatch)?;
    }

    let escrow = crate::engine::escrow::EscrowHouse::restore(
        snap.accounts
            .iter()
            .map(|account| (account.party, account.holding.clone())),
    );

    let mut listings = BTreeMap::new();
    for entry in &snap.listings {
        listings.insert(
            ListingId(entry.id),
            Listing {
                seller: entry.seller,
                tickets: entry.tickets.clone(),
                ask_price: entry.ask_price,
                open: entry.open,
            },
        );
    }

    Ok(TicketMarket::from_restored(
        pricing,
        inventory,
        escrow,
        snap.sale_state,
        CooldownTimer::restore(snap.cooldown, snap.cooldown_delay_ms),
        listings,
        snap.next_listing_id,
    ))
}

/// Replay a single WAL operation on top of a restored market.
///
/// Every op in the log was accepted by the engine once, so a rejection
/// during replay means the log and the snapshot disagree.
pub fn apply_op(market: &mut TicketMarket, op: &WalOp) -> PersistResult<()> {
    match op {
        WalOp::TicketsPurchased { buyer, requested, offered_payment, at_ms } => {
            let offer = BuyOffer {
                requested: requested.clone(),
                offered_payment: *offered_payment,
            };
            market
                .buy(*buyer, &offer, *at_ms)
                .map_err(|_| PersistError::CorruptWalRecord)?;
        }
        WalOp::ListingCreated { seller, tickets, ask_price } => {
            let listing = ResaleListing {
                tickets_offered: tickets.clone(),
                ask_price: *ask_price,
            };
            market
                .list_for_resale(*seller, &listing)
                .map_err(|_| PersistError::CorruptWalRecord)?;
        }
        WalOp::ListingAccepted { listing, buyer, payment } => {
            market
                .accept_resale(*buyer, ListingId(*listing), *payment)
                .map_err(|_| PersistError::CorruptWalRecord)?;
        }
        WalOp::CooldownElapsed => {
            market.cooldown_elapsed();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{SaleState, TicketBag};

    fn pricing() -> PricingTable {
        PricingTable::new(vec![
            Tier { name: "front".into(), unit_price: 3, capacity: 2 },
            Tier { name: "back".into(), unit_price: 1, capacity: 3 },
        ])
        .unwrap()
    }

    #[test]
    fn snapshot_round_trips_a_mid_sale_market() {
        let mut market = TicketMarket::new(pricing(), 60_000);
        market
            .buy(7, &BuyOffer { requested: TicketBag::of("front", 2), offered_payment: 6 }, 5)
            .unwrap();

        let snap = from_market(&market);
        let restored = to_market(&snap).unwrap();
        assert_eq!(restored, market);
    }

    #[test]
    fn snapshot_round_trips_an_open_resale_market() {
        let mut market = TicketMarket::new(pricing(), 60_000);
        let mut bag = TicketBag::of("front", 2);
        bag.add("back", 3);
        market.buy(7, &BuyOffer { requested: bag, offered_payment: 9 }, 5).unwrap();
        market.cooldown_elapsed();
        let (id, _) = market
            .list_for_resale(
                7,
                &ResaleListing { tickets_offered: TicketBag::of("back", 1), ask_price: 4 },
            )
            .unwrap();

        let restored = to_market(&from_market(&market)).unwrap();
        assert_eq!(restored, market);
        // and the restored market keeps serving the same listing book
        let mut restored = restored;
        restored.accept_resale(8, id, 4).unwrap();
    }

    #[test]
    fn wrong_schema_version_is_rejected() {
        let market = TicketMarket::new(pricing(), 60_000);
        let mut snap = from_market(&market);
        snap.version = SNAPSHOT_SCHEMA_VERSION + 1;
        assert!(matches!(to_market(&snap), Err(PersistError::FormatMismatch)));
    }

    #[test]
    fn replay_reaches_the_same_state_as_the_live_run() {
        let ops = vec![
            WalOp::TicketsPurchased {
                buyer: 1,
                requested: TicketBag::of("front", 2),
                offered_payment: 6,
                at_ms: 10,
            },
            WalOp::TicketsPurchased {
                buyer: 2,
                requested: TicketBag::of("back", 3),
                offered_payment: 3,
                at_ms: 20,
            },
            WalOp::CooldownElapsed,
            WalOp::ListingCreated {
                seller: 1,
                tickets: TicketBag::of("front", 1),
                ask_price: 9,
            },
            WalOp::ListingAccepted { listing: 0, buyer: 2, payment: 9 },
        ];

        let mut replayed = TicketMarket::new(pricing(), 60_000);
        for op in &ops {
            apply_op(&mut replayed, op).unwrap();
        }

        assert_eq!(replayed.state(), SaleState::ResaleOpen);
        assert!(!replayed.listing(ListingId(0)).unwrap().open);
        let seller = replayed.escrow().holding_of(crate::engine::escrow::Party::Patron(1));
        assert_eq!(seller.funds, 9);
    }

    #[test]
    fn replaying_a_rejected_op_flags_corruption() {
        let mut market = TicketMarket::new(pricing(), 60_000);
        let op = WalOp::TicketsPurchased {
            buyer: 1,
            requested: TicketBag::of("front", 5),
            offered_payment: 100,
            at_ms: 0,
        };
        assert!(matches!(
            apply_op(&mut market, &op),
            Err(PersistError::CorruptWalRecord)
        ));
        assert_eq!(market.inventory().total_sold(), 0);
    }
}
