//! Two-phase ticket-market engine: a fixed-price, tiered primary sale that
//! unlocks a peer-to-peer resale market after sellout plus a cooldown.

pub mod engine;
pub mod persist;
pub mod telemetry;
