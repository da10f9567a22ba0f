use tracing::{debug, info, instrument, warn};

use crate::engine::escrow::{Party, SwapLeg};
use crate::engine::market::TicketMarket;
use crate::engine::types::{BuyOffer, MarketError, MarketEvent, PartyId, Receipt, SaleState};

impl TicketMarket {
    /// Primary-market purchase at the fixed tier prices.
    ///
    /// The cooldown gates resale only: buys stay valid while stock remains,
    /// even mid-cooldown. The window closes for good once resale opens.
    /// Failures leave the market untouched; on success the buyer is charged
    /// exactly the computed price, the excess is refunded, and the very
    /// first full sellout arms the cooldown.
    #[instrument(skip(self, offer), fields(payment = offer.offered_payment))]
    pub fn buy(
        &mut self,
        buyer: PartyId,
        offer: &BuyOffer,
        now_ms: u64,
    ) -> Result<Receipt, MarketError> {
        if self.state == SaleState::ResaleOpen {
            warn!("primary buy after resale opened");
            return Err(MarketError::PrimaryClosed);
        }
        if offer.requested.is_empty() {
            return Err(MarketError::EmptyOrder);
        }

        let total = self.pricing.price_of(&offer.requested)?;
        if offer.offered_payment < total {
            debug!(offered = offer.offered_payment, required = total, "underpaid buy");
            return Err(MarketError::InsufficientPayment {
                offered: offer.offered_payment,
                required: total,
            });
        }

        self.inventory.record_sale(&offer.requested)?;

        // The house holding mirrors the unsold inventory exactly, so after
        // record_sale accepted the bag this swap cannot come up short.
        self.escrow.deposit_funds(Party::Patron(buyer), total);
        self.escrow.execute(&[
            SwapLeg::funds(Party::Patron(buyer), Party::House, total),
            SwapLeg::tickets(Party::House, Party::Patron(buyer), offer.requested.clone()),
        ])?;

        let mut receipt = Receipt::default();
        receipt.events.push(MarketEvent::Purchased {
            buyer,
            tickets: offer.requested.clone(),
            paid: total,
            ts: now_ms,
        });
        let refund = offer.offered_payment - total;
        if refund > 0 {
            receipt.events.push(MarketEvent::Refunded { party: buyer, amount: refund });
        }

        let sold = offer.requested.total_quantity();
        info!(buyer, tickets = sold, paid = total, refund, "primary sale settled");
        metrics::counter!("tmx_tickets_sold_total").increment(sold);
        metrics::counter!("tmx_primary_revenue_total").increment(total);
        metrics::gauge!("tmx_tickets_remaining")
            .set(self.escrow.holding_of(Party::House).tickets.total_quantity() as f64);

        // Guarded by the state transition itself: only the sale that empties
        // the last tier arms the cooldown.
        if self.state == SaleState::AcceptingPrimary && self.inventory.is_fully_sold_out() {
            self.state = SaleState::SoldOutAwaitingCooldown;
            self.cooldown.arm(now_ms);
            receipt.events.push(MarketEvent::SoldOut { at: now_ms });
            receipt.events.push(MarketEvent::CooldownArmed {
                delay_ms: self.cooldown.delay_ms(),
            });
        }

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::escrow::Party;
    use crate::engine::market::TicketMarket;
    use crate::engine::pricing::PricingTable;
    use crate::engine::timer::CooldownState;
    use crate::engine::types::{
        BuyOffer, MarketError, MarketEvent, SaleState, TicketBag, Tier,
    };

    fn three_row_market() -> TicketMarket {
        let pricing = PricingTable::new(vec![
            Tier { name: "front".into(), unit_price: 3, capacity: 3 },
            Tier { name: "middle".into(), unit_price: 2, capacity: 5 },
            Tier { name: "back".into(), unit_price: 1, capacity: 10 },
        ])
        .unwrap();
        TicketMarket::new(pricing, 720_000)
    }

    fn offer(bag: TicketBag, payment: u64) -> BuyOffer {
        BuyOffer { requested: bag, offered_payment: payment }
    }

    fn sell_out(market: &mut TicketMarket, now_ms: u64) {
        market.buy(1, &offer(TicketBag::of("front", 3), 9), now_ms).unwrap();
        market.buy(2, &offer(TicketBag::of("middle", 5), 10), now_ms).unwrap();
        market.buy(3, &offer(TicketBag::of("back", 10), 10), now_ms).unwrap();
    }

    #[test]
    fn exact_payment_buys_the_front_row() {
        let mut market = three_row_market();
        let receipt = market.buy(1, &offer(TicketBag::of("front", 3), 9), 0).unwrap();

        assert_eq!(
            receipt.events,
            vec![MarketEvent::Purchased {
                buyer: 1,
                tickets: TicketBag::of("front", 3),
                paid: 9,
                ts: 0,
            }]
        );
        assert_eq!(market.inventory().remaining("front").unwrap(), 0);
        assert_eq!(market.escrow().holding_of(Party::House).funds, 9);
        assert_eq!(
            market.escrow().holding_of(Party::Patron(1)).tickets,
            TicketBag::of("front", 3)
        );
    }

    #[test]
    fn excess_payment_is_refunded_in_the_same_step() {
        let mut market = three_row_market();
        let receipt = market.buy(1, &offer(TicketBag::of("back", 2), 7), 0).unwrap();

        assert!(receipt
            .events
            .contains(&MarketEvent::Refunded { party: 1, amount: 5 }));
        // only the price entered escrow
        assert_eq!(market.escrow().holding_of(Party::House).funds, 2);
        assert_eq!(market.escrow().holding_of(Party::Patron(1)).funds, 0);
    }

    #[test]
    fn zero_payment_for_a_back_row_ticket_fails() {
        let mut market = three_row_market();
        let err = market.buy(1, &offer(TicketBag::of("back", 1), 0), 0).unwrap_err();
        assert_eq!(err, MarketError::InsufficientPayment { offered: 0, required: 1 });
        // inventory is unchanged
        assert_eq!(market.inventory().remaining("back").unwrap(), 10);
        assert_eq!(market.inventory().total_sold(), 0);
    }

    #[test]
    fn oversized_order_fails_and_mutates_nothing() {
        let mut market = three_row_market();
        let err = market.buy(1, &offer(TicketBag::of("front", 4), 100), 0).unwrap_err();
        assert_eq!(
            err,
            MarketError::InsufficientInventory {
                tier: "front".into(),
                requested: 4,
                remaining: 3,
            }
        );
        assert_eq!(market.escrow().holding_of(Party::Patron(1)).funds, 0);
        assert_eq!(market.inventory().total_sold(), 0);
    }

    #[test]
    fn unknown_tier_and_empty_order_are_rejected() {
        let mut market = three_row_market();
        assert_eq!(
            market.buy(1, &offer(TicketBag::of("balcony", 1), 10), 0),
            Err(MarketError::UnknownTier("balcony".into()))
        );
        assert_eq!(
            market.buy(1, &offer(TicketBag::new(), 10), 0),
            Err(MarketError::EmptyOrder)
        );
    }

    #[test]
    fn mixed_bag_is_priced_across_tiers() {
        let mut market = three_row_market();
        let mut bag = TicketBag::of("front", 1);
        bag.add("middle", 2);
        bag.add("back", 4);
        // 1*3 + 2*2 + 4*1 = 11
        let err = market.buy(1, &offer(bag.clone(), 10), 0).unwrap_err();
        assert_eq!(err, MarketError::InsufficientPayment { offered: 10, required: 11 });
        market.buy(1, &offer(bag, 11), 0).unwrap();
    }

    #[test]
    fn final_sale_arms_the_cooldown_exactly_once() {
        let mut market = three_row_market();
        market.buy(1, &offer(TicketBag::of("front", 3), 9), 10).unwrap();
        market.buy(2, &offer(TicketBag::of("middle", 5), 10), 20).unwrap();
        assert_eq!(market.state(), SaleState::AcceptingPrimary);

        let receipt = market.buy(3, &offer(TicketBag::of("back", 10), 10), 30).unwrap();
        assert_eq!(market.state(), SaleState::SoldOutAwaitingCooldown);
        assert!(receipt.events.contains(&MarketEvent::SoldOut { at: 30 }));
        assert!(receipt
            .events
            .contains(&MarketEvent::CooldownArmed { delay_ms: 720_000 }));
        assert_eq!(market.cooldown().state(), CooldownState::Armed { armed_at: 30 });
    }

    #[test]
    fn buying_mid_cooldown_is_still_a_primary_sale() {
        let mut market = three_row_market();
        sell_out(&mut market, 0);
        assert_eq!(market.state(), SaleState::SoldOutAwaitingCooldown);

        // nothing is left, so the buy fails on inventory, not on state
        let err = market.buy(4, &offer(TicketBag::of("back", 1), 5), 1_000).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientInventory { .. }));
        // and the cooldown clock was not reset by the attempt
        assert_eq!(market.cooldown().state(), CooldownState::Armed { armed_at: 0 });
    }

    #[test]
    fn primary_window_closes_when_resale_opens() {
        let mut market = three_row_market();
        sell_out(&mut market, 0);
        market.cooldown_elapsed();
        assert_eq!(market.state(), SaleState::ResaleOpen);

        let err = market.buy(4, &offer(TicketBag::of("back", 1), 5), 800_000).unwrap_err();
        assert_eq!(err, MarketError::PrimaryClosed);
    }

    #[test]
    fn conservation_across_a_sale_sequence() {
        let mut market = three_row_market();
        market.buy(1, &offer(TicketBag::of("front", 2), 6), 0).unwrap();
        market.buy(2, &offer(TicketBag::of("back", 5), 9), 0).unwrap();
        let _ = market.buy(3, &offer(TicketBag::of("middle", 9), 50), 0);

        // every sold ticket is exactly one transferred out of the house
        let held_by_patrons: u64 = market
            .escrow()
            .accounts()
            .filter(|(party, _)| *party != Party::House)
            .map(|(_, holding)| holding.tickets.total_quantity())
            .sum();
        assert_eq!(market.inventory().total_sold(), held_by_patrons);
        // and nothing was created or destroyed overall
        assert_eq!(market.escrow().total_tickets(), 18);
    }
}
