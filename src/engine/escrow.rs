use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::engine::types::{Amount, MarketError, PartyId, TicketBag};

/// A balance holder inside the escrow: the house (unsold inventory and
/// primary proceeds) or an authenticated patron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Party {
    House,
    Patron(PartyId),
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::House => write!(f, "house"),
            Party::Patron(id) => write!(f, "patron:{}", id),
        }
    }
}

/// What one party holds in escrow for its current offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub funds: Amount,
    pub tickets: TicketBag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    Funds(Amount),
    Tickets(TicketBag),
}

/// One transfer of a swap: `from` gives `asset` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapLeg {
    pub from: Party,
    pub to: Party,
    pub asset: Asset,
}

impl SwapLeg {
    pub fn funds(from: Party, to: Party, amount: Amount) -> Self {
        Self { from, to, asset: Asset::Funds(amount) }
    }

    pub fn tickets(from: Party, to: Party, bag: TicketBag) -> Self {
        Self { from, to, asset: Asset::Tickets(bag) }
    }
}

/// Escrowed balances per party, plus the atomic multi-leg swap over them.
///
/// This is the engine's view of the ledger collaborator: funds and tickets
/// that have been placed in custody for the party's current offers, not the
/// party's entire external balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowHouse {
    accounts: BTreeMap<Party, Holding>,
}

impl EscrowHouse {
    /// Fresh escrow with the full inventory minted to the house account.
    pub fn new(house_inventory: TicketBag) -> Self {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            Party::House,
            Holding { funds: 0, tickets: house_inventory },
        );
        Self { accounts }
    }

    /// Custody intake: the authorization collaborator hands an escrowed
    /// payment over to the engine's view.
    pub fn deposit_funds(&mut self, party: Party, amount: Amount) {
        if amount == 0 {
            return;
        }
        self.accounts.entry(party).or_default().funds += amount;
    }

    /// Rollback of a custody intake whose operation failed before settling.
    /// Never removes more than was just deposited.
    pub(crate) fn revoke_funds(&mut self, party: Party, amount: Amount) {
        if let Some(holding) = self.accounts.get_mut(&party) {
            debug_assert!(holding.funds >= amount);
            holding.funds = holding.funds.saturating_sub(amount);
        }
    }

    /// Drain a party's escrowed funds, e.g. paying a seller out after a
    /// settled resale. Returns the amount released.
    pub fn payout(&mut self, party: Party) -> Amount {
        match self.accounts.get_mut(&party) {
            Some(holding) => std::mem::take(&mut holding.funds),
            None => 0,
        }
    }

    pub fn holding_of(&self, party: Party) -> Holding {
        self.accounts.get(&party).cloned().unwrap_or_default()
    }

    /// (party, holding) pairs, house first.
    pub fn accounts(&self) -> impl Iterator<Item = (Party, &Holding)> {
        self.accounts.iter().map(|(party, holding)| (*party, holding))
    }

    /// Tickets currently custodied across every account, the house included.
    pub fn total_tickets(&self) -> u64 {
        self.accounts
            .values()
            .map(|holding| holding.tickets.total_quantity())
            .sum()
    }

    /// Apply all legs as one indivisible step, or none of them.
    ///
    /// Every leg is judged against the pre-swap snapshot: per party and per
    /// asset kind, the summed gives must fit inside what that party holds
    /// right now. Amounts received by earlier legs of the same swap are not
    /// spendable. The first leg that pushes a party past its holding voids
    /// the whole call; only a fully validated swap is applied, in leg order.
    #[instrument(level = "debug", skip(self, legs), fields(legs = legs.len()))]
    pub fn execute(&mut self, legs: &[SwapLeg]) -> Result<(), MarketError> {
        let mut funds_given: BTreeMap<Party, Amount> = BTreeMap::new();
        let mut tickets_given: BTreeMap<Party, TicketBag> = BTreeMap::new();
        for (index, leg) in legs.iter().enumerate() {
            match &leg.asset {
                Asset::Funds(amount) => {
                    let given = funds_given.entry(leg.from).or_insert(0);
                    *given = given.checked_add(*amount).ok_or_else(|| {
                        MarketError::AtomicityViolation {
                            leg: index,
                            detail: format!("give total for {} overflows", leg.from),
                        }
                    })?;
                    let held = self.holding_of(leg.from).funds;
                    if *given > held {
                        return Err(MarketError::AtomicityViolation {
                            leg: index,
                            detail: format!(
                                "{} holds {} but is asked to give {}",
                                leg.from, held, given
                            ),
                        });
                    }
                }
                Asset::Tickets(bag) => {
                    let given = tickets_given.entry(leg.from).or_default();
                    given.merge(bag);
                    let held = self.holding_of(leg.from).tickets;
                    if let Some(tier) = held.first_shortfall(given) {
                        return Err(MarketError::AtomicityViolation {
                            leg: index,
                            detail: format!(
                                "{} does not hold enough {} tickets",
                                leg.from, tier
                            ),
                        });
                    }
                }
            }
        }

        // Validation bounds every prefix of gives, so no leg can come up
        // short mid-application; staging keeps even that path all-or-nothing.
        let mut staged = self.accounts.clone();
        for (index, leg) in legs.iter().enumerate() {
            Self::apply_leg(&mut staged, leg).map_err(|detail| {
                MarketError::AtomicityViolation { leg: index, detail }
            })?;
        }
        self.accounts = staged;
        metrics::counter!("tmx_swaps_applied_total").increment(1);
        debug!("swap applied");
        Ok(())
    }

    fn apply_leg(accounts: &mut BTreeMap<Party, Holding>, leg: &SwapLeg) -> Result<(), String> {
        match &leg.asset {
            Asset::Funds(amount) => {
                let source = accounts.entry(leg.from).or_default();
                if source.funds < *amount {
                    return Err(format!(
                        "{} holds {} but must give {}",
                        leg.from, source.funds, amount
                    ));
                }
                source.funds -= amount;
                accounts.entry(leg.to).or_default().funds += amount;
            }
            Asset::Tickets(bag) => {
                let source = accounts.entry(leg.from).or_default();
                source.tickets.take(bag).map_err(|tier| {
                    format!("{} does not hold enough {} tickets", leg.from, tier)
                })?;
                accounts.entry(leg.to).or_default().tickets.merge(bag);
            }
        }
        Ok(())
    }

    pub(crate) fn restore(accounts: impl IntoIterator<Item = (Party, Holding)>) -> Self {
        Self { accounts: accounts.into_iter().collect() }
    }
}
