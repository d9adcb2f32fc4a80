//! FieldSync - offline-first synchronization for field operations
//!
//! Writes from the field go to the remote store when it is reachable and to
//! a local SQLite staging store when it is not. A background orchestrator
//! replays staged records once connectivity returns, with duplicate
//! detection for logs and a bounded retry budget per record.

pub mod connectivity;
pub mod error;
pub mod facade;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod types;

pub use connectivity::{ConnectivityMonitor, ManualProbe, ReachabilityProbe, Subscription};
pub use error::{FieldSyncError, Result};
pub use facade::ResilientAccess;
pub use remote::{InMemoryRemote, RemoteEntityClient, RemoteFilter, RemoteRecord};
pub use storage::{StagingStore, Storage};
pub use sync::{SkipReason, SyncEvent, SyncHandle, SyncOrchestrator, SyncOutcome, SyncTrigger};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
