//! Run-view synchronization.
//!
//! The store holds the last-known snapshot per run. A `RunSession` keeps one
//! snapshot current by merging change-feed deliveries and polling while the
//! run is executing; the dispatcher issues start/cancel.

mod bridge;
mod dispatcher;
pub mod feed;
mod policy;
mod reconcile;
mod session;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use bridge::pump_ndjson;
pub use dispatcher::CommandDispatcher;
pub use feed::{ChangeFeed, LocalChangeFeed};
pub use policy::RefreshPolicy;
pub use session::{RunSession, SessionParams, SyncEvent};
pub use store::SnapshotStore;
