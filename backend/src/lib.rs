//! Chain-facing backend pieces of the Obsidian QBFT engine: verifying
//! the committed seals on sealed headers, and the per-height snapshot
//! store (priority transactors, emission) kept alongside the chain.

mod engine;
mod snapshot;
mod store;

pub use engine::{seal_header, verify_committed_seals, EngineError};
pub use snapshot::{BlockSnapshot, Emission, PriorityTransactor, PriorityTransactorMap};
pub use store::{SnapshotStore, StoreError};
