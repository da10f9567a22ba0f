pub mod types;
pub use types::*;
pub mod snapshot;
pub mod wal;
pub mod postgres;
use async_trait::async_trait;

#[async_trait]
pub trait SnapshotStore {
    async fn load_snapshot(&self, event: &str) -> PersistResult<Option<SnapshotData>>;
    async fn save_snapshot(&mut self, snapshot: &SnapshotData) -> PersistResult<()>;
}

#[async_trait]
pub trait WalStore {
    async fn append_op(&mut self, op: &WalOp) -> PersistResult<()>;
    async fn relay_ops(&self, after: i64) -> PersistResult<Vec<(i64, WalOp)>>;
}
