//! Reconciliation of staged records with the remote store
//!
//! [`SyncOrchestrator`] drains the staging store one pass at a time. Passes
//! are started by the background worker (interval timer, reconnect
//! transitions, queued requests from the facade) or awaited directly via
//! [`SyncOrchestrator::trigger_sync`]. At most one pass runs at any moment;
//! a trigger that finds a pass in flight is dropped.

mod orchestrator;
mod worker;

pub use orchestrator::SyncOrchestrator;
pub use worker::SyncHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, LocalId, SyncStats};

/// What asked for a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// First pass after `start()` and every interval tick
    Timer,
    /// Connectivity went from offline to online
    Reconnect,
    /// A facade write fell back to the staging store
    StagedWrite,
    /// Explicit caller request
    Manual,
}

/// Result of asking for a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The pass ran; stats of that pass
    Completed(SyncStats),
    /// Another pass was in flight, nothing was done
    AlreadyRunning,
    /// The device is offline, nothing was done
    Offline,
}

impl SyncOutcome {
    pub fn stats(&self) -> Option<&SyncStats> {
        match self {
            SyncOutcome::Completed(stats) => Some(stats),
            _ => None,
        }
    }
}

/// Why a requested pass did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
}

/// Progress notifications published by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    PassStarted {
        trigger: SyncTrigger,
        started_at: DateTime<Utc>,
    },
    PassSkipped {
        trigger: SyncTrigger,
        reason: SkipReason,
    },
    PassCompleted {
        trigger: SyncTrigger,
        stats: SyncStats,
        completed_at: DateTime<Utc>,
    },
    RecordSynced {
        entity: EntityKind,
        local_id: LocalId,
        server_id: String,
    },
    /// An equivalent remote row already existed; nothing was written
    RecordAlreadyPresent {
        entity: EntityKind,
        local_id: LocalId,
        server_id: String,
    },
    RecordFailed {
        entity: EntityKind,
        local_id: LocalId,
        attempts: u32,
        error: String,
    },
    /// The record will be skipped for the rest of this process lifetime
    RetryBudgetExhausted { entity: EntityKind, local_id: LocalId },
}
