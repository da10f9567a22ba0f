use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::escrow::{Holding, Party};
use crate::engine::timer::CooldownState;
use crate::engine::types::{Amount, PartyId, SaleState, TicketBag, TierName};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O failure")]
    IoFailure,
    #[error("serialization error")]
    SerializationFailure,
    #[error("format mismatch")]
    FormatMismatch,
    #[error("corrupt WAL record")]
    CorruptWalRecord,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Serializable image of a whole market instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub version: u32,
    pub tiers: Vec<SnapshotTier>,
    pub sale_state: SaleState,
    pub cooldown: CooldownState,
    pub cooldown_delay_ms: u64,
    pub accounts: Vec<SnapshotAccount>,
    pub listings: Vec<SnapshotListing>,
    pub next_listing_id: u64,
    pub wal_high_watermark: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTier {
    pub name: TierName,
    pub unit_price: Amount,
    pub capacity: u32,
    pub sold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotAccount {
    pub party: Party,
    pub holding: Holding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotListing {
    pub id: u64,
    pub seller: PartyId,
    pub tickets: TicketBag,
    pub ask_price: Amount,
    pub open: bool,
}

/// One WAL record per mutating engine operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    TicketsPurchased {
        buyer: PartyId,
        requested: TicketBag,
        offered_payment: Amount,
        at_ms: u64,
    },
    ListingCreated {
        seller: PartyId,
        tickets: TicketBag,
        ask_price: Amount,
    },
    ListingAccepted {
        listing: u64,
        buyer: PartyId,
        payment: Amount,
    },
    CooldownElapsed,
}
