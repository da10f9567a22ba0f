// Engine module entrypoint
pub mod types;      // shared vocabulary: bags, offers, events, errors
pub mod pricing;    // immutable tier -> (unit price, capacity) table
pub mod inventory;  // per-tier sold counts, sellout detection
pub mod escrow;     // escrowed balances + atomic multi-leg swap
pub mod timer;      // sellout cooldown gate + wakeup adapter
pub mod market;     // the per-event engine instance

mod primary;        // primary-market buy path
mod secondary;      // resale listing + settlement path
