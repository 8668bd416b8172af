//! Sync-run lifecycle types: statuses, counters, requests, and reports.

use serde::{Deserialize, Serialize};

use crate::entity::{SyncEntityType, SYNC_ORDER};

/// Lifecycle of one orchestrator invocation. `Completed` and `Failed` are
/// terminal and never revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Lifecycle of one entity type's resumable cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Why a page loop stopped. A ceiling stop means more data may exist and a
/// continuation should be scheduled; exhaustion means the remote collection
/// ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    CeilingReached,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::CeilingReached => "ceiling_reached",
        }
    }
}

/// Aggregate counters for a run. `success` counts created and updated
/// records; conflicted records count as processed but neither succeed nor
/// fail until resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: i64,
    pub success: i64,
    pub failed: i64,
}

impl RunCounters {
    pub fn merge(&mut self, other: RunCounters) {
        self.processed += other.processed;
        self.success += other.success;
        self.failed += other.failed;
    }
}

/// Invocation surface action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Sync,
    Import,
    FullImport,
    Export,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Import => "import",
            Self::FullImport => "full_import",
            Self::Export => "export",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "import" => Some(Self::Import),
            "full_import" => Some(Self::FullImport),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

/// Which entity types a run covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncScope {
    All,
    One(SyncEntityType),
}

impl SyncScope {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().eq_ignore_ascii_case("all") {
            return Some(Self::All);
        }
        SyncEntityType::parse(raw).map(Self::One)
    }

    /// Entity types in the fixed deterministic processing order.
    pub fn entities(&self) -> Vec<SyncEntityType> {
        match self {
            Self::All => SYNC_ORDER.to_vec(),
            Self::One(entity) => vec![*entity],
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::One(entity) => entity.as_str().to_string(),
        }
    }
}

/// One parsed invocation of the sync engine.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    pub action: SyncAction,
    pub scope: SyncScope,
    pub full_sync: bool,
    pub batch_size: Option<u32>,
    pub max_pages: Option<u32>,
}

/// Per-entity outcome attached to a run report.
#[derive(Clone, Debug, Serialize)]
pub struct EntitySummary {
    pub entity: SyncEntityType,
    pub pages: u32,
    pub stop: Option<StopReason>,
    pub counters: RunCounters,
}

/// What one orchestrator invocation produced.
#[derive(Clone, Debug, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub status: SyncRunStatus,
    pub processed: i64,
    pub success: i64,
    pub failed: i64,
    pub errors: Vec<String>,
    pub entities: Vec<EntitySummary>,
}

#[cfg(test)]
mod tests {
    use crate::entity::SyncEntityType;
    use crate::run::{RunCounters, SyncAction, SyncRunStatus, SyncScope};

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [SyncRunStatus::Running, SyncRunStatus::Completed, SyncRunStatus::Failed] {
            assert_eq!(SyncRunStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn scope_parses_all_and_single_types() {
        assert_eq!(SyncScope::parse("all"), Some(SyncScope::All));
        assert_eq!(SyncScope::parse("invoices"), Some(SyncScope::One(SyncEntityType::Invoice)));
        assert_eq!(SyncScope::parse("everything"), None);
        assert_eq!(SyncScope::All.entities().len(), 6);
    }

    #[test]
    fn counters_merge_accumulates() {
        let mut total = RunCounters::default();
        total.merge(RunCounters { processed: 10, success: 8, failed: 2 });
        total.merge(RunCounters { processed: 5, success: 5, failed: 0 });
        assert_eq!(total, RunCounters { processed: 15, success: 13, failed: 2 });
    }

    #[test]
    fn action_parse_covers_invocation_surface() {
        assert_eq!(SyncAction::parse("full_import"), Some(SyncAction::FullImport));
        assert_eq!(SyncAction::parse("Export"), Some(SyncAction::Export));
        assert_eq!(SyncAction::parse("purge"), None);
    }
}
