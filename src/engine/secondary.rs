use tracing::{debug, info, instrument, warn};

use crate::engine::escrow::{Party, SwapLeg};
use crate::engine::market::{Listing, TicketMarket};
use crate::engine::types::{
    Amount, ListingId, MarketError, MarketEvent, PartyId, Receipt, ResaleListing,
};

impl TicketMarket {
    /// Register a resale listing. Only legal once the primary inventory is
    /// fully sold out and the cooldown has elapsed, and only for tickets the
    /// seller actually holds in escrow.
    ///
    /// Listing does not reserve the tickets: ownership is re-checked by the
    /// settlement swap, so a seller who double-lists can only settle what
    /// they still hold.
    #[instrument(skip(self, listing), fields(ask = listing.ask_price))]
    pub fn list_for_resale(
        &mut self,
        seller: PartyId,
        listing: &ResaleListing,
    ) -> Result<(ListingId, Receipt), MarketError> {
        if !(self.inventory.is_fully_sold_out() && self.cooldown.is_elapsed()) {
            warn!(seller, "resale attempted before the market opened");
            return Err(MarketError::UnauthorizedResale);
        }
        if listing.tickets_offered.is_empty() {
            return Err(MarketError::EmptyOrder);
        }

        let held = self.escrow.holding_of(Party::Patron(seller)).tickets;
        if let Some(tier) = held.first_shortfall(&listing.tickets_offered) {
            debug!(seller, tier = %tier, "listing rejected, tickets not held");
            return Err(MarketError::UnownedTickets { tier: tier.clone() });
        }

        let id = self.allocate_listing_id();
        self.listings.insert(
            id,
            Listing {
                seller,
                tickets: listing.tickets_offered.clone(),
                ask_price: listing.ask_price,
                open: true,
            },
        );
        info!(seller, listing = %id, ask = listing.ask_price, "listing opened");
        metrics::counter!("tmx_listings_opened_total").increment(1);

        let receipt = Receipt {
            events: vec![MarketEvent::Listed {
                listing: id,
                seller,
                ask_price: listing.ask_price,
            }],
        };
        Ok((id, receipt))
    }

    /// Settle an open listing: the buyer pays the ask, the seller's escrowed
    /// tickets move to the buyer, and the listing closes for good. Excess
    /// payment never reaches the seller; it is refunded to the buyer within
    /// the same indivisible step.
    #[instrument(skip(self))]
    pub fn accept_resale(
        &mut self,
        buyer: PartyId,
        id: ListingId,
        payment: Amount,
    ) -> Result<Receipt, MarketError> {
        let listing = self
            .listings
            .get(&id)
            .ok_or(MarketError::ListingNotFound(id))?;
        if !listing.open {
            return Err(MarketError::ListingClosed(id));
        }
        let seller = listing.seller;
        if seller == buyer {
            return Err(MarketError::SelfTrade);
        }
        if payment < listing.ask_price {
            debug!(offered = payment, asked = listing.ask_price, "underpaid resale");
            return Err(MarketError::InsufficientResalePayment {
                offered: payment,
                asked: listing.ask_price,
            });
        }
        let ask = listing.ask_price;
        let tickets = listing.tickets.clone();

        // Take exactly the ask into custody; if the seller no longer holds
        // the listed tickets the swap voids and the intake is rolled back.
        self.escrow.deposit_funds(Party::Patron(buyer), ask);
        let swap = self.escrow.execute(&[
            SwapLeg::funds(Party::Patron(buyer), Party::Patron(seller), ask),
            SwapLeg::tickets(Party::Patron(seller), Party::Patron(buyer), tickets),
        ]);
        if let Err(err) = swap {
            self.escrow.revoke_funds(Party::Patron(buyer), ask);
            warn!(listing = %id, %err, "resale settlement voided");
            return Err(err);
        }

        if let Some(entry) = self.listings.get_mut(&id) {
            entry.open = false;
        }
        info!(listing = %id, seller, buyer, price = ask, "resale settled");
        metrics::counter!("tmx_resales_settled_total").increment(1);

        let mut receipt = Receipt {
            events: vec![MarketEvent::ResaleSettled { listing: id, seller, buyer, price: ask }],
        };
        let refund = payment - ask;
        if refund > 0 {
            receipt.events.push(MarketEvent::Refunded { party: buyer, amount: refund });
        }
        Ok(receipt)
    }
}
