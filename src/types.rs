//! Core types for fieldsync

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FieldSyncError, Result};

/// Identifier assigned by the staging store on insert
pub type LocalId = i64;

// =============================================================================
// Entity kinds
// =============================================================================

/// The closed set of entity types the staging layer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Log,
    Profile,
    Emergency,
    ArrivalAlert,
}

impl EntityKind {
    /// Fixed processing order used by every sync pass
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Log,
        EntityKind::Profile,
        EntityKind::Emergency,
        EntityKind::ArrivalAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Log => "log",
            EntityKind::Profile => "profile",
            EntityKind::Emergency => "emergency",
            EntityKind::ArrivalAlert => "arrival_alert",
        }
    }

    /// Name of the local staging table
    pub fn staging_table(&self) -> &'static str {
        match self {
            EntityKind::Log => "pending_logs",
            EntityKind::Profile => "pending_profiles",
            EntityKind::Emergency => "pending_emergencies",
            EntityKind::ArrivalAlert => "pending_arrival_alerts",
        }
    }

    /// Name of the collection on the remote store
    pub fn remote_collection(&self) -> &'static str {
        match self {
            EntityKind::Log => "UserLogs",
            EntityKind::Profile => "Profiles",
            EntityKind::Emergency => "Emergencies",
            EntityKind::ArrivalAlert => "ArrivalAlerts",
        }
    }

    /// Payload field naming the owning user, if the entity has one
    pub fn owner_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Log | EntityKind::ArrivalAlert => Some("userID"),
            EntityKind::Profile => Some("id"),
            EntityKind::Emergency => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "log" | "logs" => Ok(EntityKind::Log),
            "profile" | "profiles" => Ok(EntityKind::Profile),
            "emergency" | "emergencies" => Ok(EntityKind::Emergency),
            "arrival_alert" | "arrival_alerts" | "arrival-alert" | "arrival-alerts" => {
                Ok(EntityKind::ArrivalAlert)
            }
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// A shift log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: String,
    pub log_date: String,
    #[serde(default)]
    pub ingress_time: Option<String>,
    #[serde(default)]
    pub exit_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// A user profile; `id` is the account id and doubles as the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    pub id: String,
    pub name: String,
    #[serde(rename = "nVisits", default)]
    pub n_visits: String,
    #[serde(default)]
    pub date_registered: Option<String>,
    #[serde(default)]
    pub last_visit: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub start_session_time: Option<String>,
}

/// An emergency alert raised from the field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyPayload {
    pub time_alert: String,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(rename = "localizationID", default)]
    pub localization_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub received: bool,
}

/// An arrival alert awaiting acceptance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalAlertPayload {
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
    pub name: String,
    pub arrival_time: String,
    #[serde(default)]
    pub exit_time: Option<String>,
    #[serde(default)]
    pub accepted: bool,
}

/// Fields identifying an equivalent remote row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturalKey {
    /// Remote field name -> expected value (`null` matches a missing field)
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Human readable part of the synthetic correlation id
    pub label: String,
}

impl NaturalKey {
    /// Correlation id recorded when an equivalent remote row already exists
    pub fn existing_id(&self) -> String {
        format!("existing_{}", self.label)
    }

    /// Check whether a remote or cached payload carries this key
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        self.fields.iter().all(|(field, expected)| {
            let actual = value.get(field).unwrap_or(&serde_json::Value::Null);
            actual == expected
        })
    }
}

/// Capability shared by every payload that can be staged locally
pub trait Stageable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// User the record belongs to, used for filtering local reads
    fn owner_id(&self) -> Option<&str>;

    /// Natural key for entity types with duplication risk
    fn natural_key(&self) -> Option<NaturalKey> {
        None
    }

    /// Validation performed before any network attempt
    fn validate(&self) -> Result<()>;
}

fn require(field: &str, value: &str, kind: EntityKind) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FieldSyncError::InvalidInput(format!(
            "{} requires a non-empty {}",
            kind, field
        )));
    }
    Ok(())
}

impl Stageable for LogPayload {
    const KIND: EntityKind = EntityKind::Log;

    fn owner_id(&self) -> Option<&str> {
        Some(&self.user_id)
    }

    fn natural_key(&self) -> Option<NaturalKey> {
        let opt = |v: &Option<String>| match v {
            Some(s) => serde_json::Value::String(s.clone()),
            None => serde_json::Value::Null,
        };

        let mut fields = BTreeMap::new();
        fields.insert("userID".to_string(), self.user_id.clone().into());
        fields.insert("logDate".to_string(), self.log_date.clone().into());
        fields.insert("ingressTime".to_string(), opt(&self.ingress_time));
        fields.insert("exitTime".to_string(), opt(&self.exit_time));

        Some(NaturalKey {
            fields,
            label: format!("{}_{}", self.user_id, self.log_date),
        })
    }

    fn validate(&self) -> Result<()> {
        require("userID", &self.user_id, Self::KIND)?;
        require("name", &self.name, Self::KIND)?;
        require("logDate", &self.log_date, Self::KIND)
    }
}

impl Stageable for ProfilePayload {
    const KIND: EntityKind = EntityKind::Profile;

    fn owner_id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn validate(&self) -> Result<()> {
        require("id", &self.id, Self::KIND)?;
        require("name", &self.name, Self::KIND)
    }
}

impl Stageable for EmergencyPayload {
    const KIND: EntityKind = EntityKind::Emergency;

    fn owner_id(&self) -> Option<&str> {
        None
    }

    fn validate(&self) -> Result<()> {
        require("timeAlert", &self.time_alert, Self::KIND)
    }
}

impl Stageable for ArrivalAlertPayload {
    const KIND: EntityKind = EntityKind::ArrivalAlert;

    fn owner_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name, Self::KIND)?;
        require("arrivalTime", &self.arrival_time, Self::KIND)
    }
}

/// A staged payload of any kind, decoded from its stored JSON
#[derive(Debug, Clone, PartialEq)]
pub enum StagedPayload {
    Log(LogPayload),
    Profile(ProfilePayload),
    Emergency(EmergencyPayload),
    ArrivalAlert(ArrivalAlertPayload),
}

impl StagedPayload {
    /// Decode a stored payload according to its entity kind
    pub fn decode(kind: EntityKind, value: serde_json::Value) -> Result<Self> {
        Ok(match kind {
            EntityKind::Log => StagedPayload::Log(serde_json::from_value(value)?),
            EntityKind::Profile => StagedPayload::Profile(serde_json::from_value(value)?),
            EntityKind::Emergency => StagedPayload::Emergency(serde_json::from_value(value)?),
            EntityKind::ArrivalAlert => {
                StagedPayload::ArrivalAlert(serde_json::from_value(value)?)
            }
        })
    }

    pub fn natural_key(&self) -> Option<NaturalKey> {
        match self {
            StagedPayload::Log(p) => p.natural_key(),
            StagedPayload::Profile(p) => p.natural_key(),
            StagedPayload::Emergency(p) => p.natural_key(),
            StagedPayload::ArrivalAlert(p) => p.natural_key(),
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        match self {
            StagedPayload::Log(p) => p.owner_id(),
            StagedPayload::Profile(p) => p.owner_id(),
            StagedPayload::Emergency(p) => p.owner_id(),
            StagedPayload::ArrivalAlert(p) => p.owner_id(),
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(match self {
            StagedPayload::Log(p) => serde_json::to_value(p)?,
            StagedPayload::Profile(p) => serde_json::to_value(p)?,
            StagedPayload::Emergency(p) => serde_json::to_value(p)?,
            StagedPayload::ArrivalAlert(p) => serde_json::to_value(p)?,
        })
    }
}

// =============================================================================
// Records
// =============================================================================

/// A row of the staging store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord<P> {
    pub local_id: LocalId,
    pub payload: P,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub server_id: Option<String>,
}

/// Identifier of a record handed back to callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum RecordId {
    /// Confirmed by the remote store
    Remote(String),
    /// Placeholder for a record that only exists in the staging store
    Local(LocalId),
}

impl RecordId {
    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Remote(id) => f.write_str(id),
            RecordId::Local(id) => write!(f, "local_{}", id),
        }
    }
}

/// A record as seen by callers of the resilient facade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord<P> {
    pub id: RecordId,
    #[serde(flatten)]
    pub payload: P,
}

// =============================================================================
// Sync statistics and status
// =============================================================================

/// Outcome counters for one entity type in the most recent pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStats {
    pub success: u32,
    pub failed: u32,
    pub total: u32,
}

/// Statistics of the most recently run sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub logs_sync: EntityStats,
    pub profiles_sync: EntityStats,
    pub emergencies_sync: EntityStats,
    pub arrival_alerts_sync: EntityStats,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncStats {
    pub fn for_kind(&self, kind: EntityKind) -> &EntityStats {
        match kind {
            EntityKind::Log => &self.logs_sync,
            EntityKind::Profile => &self.profiles_sync,
            EntityKind::Emergency => &self.emergencies_sync,
            EntityKind::ArrivalAlert => &self.arrival_alerts_sync,
        }
    }

    pub fn for_kind_mut(&mut self, kind: EntityKind) -> &mut EntityStats {
        match kind {
            EntityKind::Log => &mut self.logs_sync,
            EntityKind::Profile => &mut self.profiles_sync,
            EntityKind::Emergency => &mut self.emergencies_sync,
            EntityKind::ArrivalAlert => &mut self.arrival_alerts_sync,
        }
    }
}

/// Number of not-yet-synced records per entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounts {
    pub logs: usize,
    pub profiles: usize,
    pub emergencies: usize,
    pub arrival_alerts: usize,
    pub total: usize,
}

impl PendingCounts {
    pub fn get(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Log => self.logs,
            EntityKind::Profile => self.profiles,
            EntityKind::Emergency => self.emergencies,
            EntityKind::ArrivalAlert => self.arrival_alerts,
        }
    }

    pub(crate) fn set(&mut self, kind: EntityKind, count: usize) {
        match kind {
            EntityKind::Log => self.logs = count,
            EntityKind::Profile => self.profiles = count,
            EntityKind::Emergency => self.emergencies = count,
            EntityKind::ArrivalAlert => self.arrival_alerts = count,
        }
        self.total = self.logs + self.profiles + self.emergencies + self.arrival_alerts;
    }
}

/// Read-only view of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub is_syncing: bool,
    pub stats: SyncStats,
}

// =============================================================================
// Configuration
// =============================================================================

/// Staging database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Path to SQLite database
    pub db_path: String,
    /// Storage mode (local or cloud-safe)
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl StagingConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Journal strategy for the staging database
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// WAL journal, best for app-private storage
    #[default]
    Local,
    /// DELETE journal, single file on disk
    CloudSafe,
}

/// Sync orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between scheduled passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive failures tolerated per record
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between records of the same entity type
    #[serde(default = "default_record_delay_ms")]
    pub record_delay_ms: u64,
    /// Upper bound for a single remote call
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    /// Capacity of the fire-and-forget request queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_record_delay_ms() -> u64 {
    100
}

fn default_remote_timeout_ms() -> u64 {
    15_000
}

fn default_queue_capacity() -> usize {
    16
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_retries: default_max_retries(),
            record_delay_ms: default_record_delay_ms(),
            remote_timeout_ms: default_remote_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SyncConfig {
    /// Reject configurations that would stall or spin the worker
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(FieldSyncError::Config(
                "interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(FieldSyncError::Config(
                "max_retries must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(FieldSyncError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
