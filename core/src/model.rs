//! Data model shared by the sync engine and the read paths.
//!
//! - `Norma`: operational record; `aplicavel`/`sistema_gestao` are owned by the reconciler
//! - `ClassificationRow`: one true-classification row from the external dataset
//! - `SyncPhase`: where the store's applicability subset currently stands
//! - `SyncReport`: terminal record of the last reconciliation run

use serde::{Deserialize, Serialize};

/// Default page size for norma listings.
pub const DEFAULT_PER_PAGE: u32 = 50;

/// Upper bound on page size for norma listings.
pub const MAX_PER_PAGE: u32 = 100;

/// Operational norma record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Norma {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo_norma: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero_norma: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ano_publicacao: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ementa: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub situacao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_vigencia: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divisao_politica: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origem_publicacao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origem_dado: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_norma: Option<String>,
    /// ISO date (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_publicacao: Option<String>,
    pub aplicavel: bool,
    /// Comma-space joined labels; `None` whenever `aplicavel` is false.
    pub sistema_gestao: Option<String>,
}

/// A true-classification row as consumed by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRow {
    pub norma_id: i64,
    pub management_system_label: Option<String>,
}

impl ClassificationRow {
    pub fn new(norma_id: i64, label: Option<&str>) -> Self {
        Self {
            norma_id,
            management_system_label: label.map(str::to_string),
        }
    }
}

/// Full classification record, for diagnostics on a single norma.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub norma_id: i64,
    pub sistema_gestao: Option<String>,
    pub classification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_classificacao: Option<String>,
}

/// Number of distinct normas classified under one management system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagementSystemCount {
    pub sistema_gestao: String,
    pub total_normas: u64,
}

/// Filters for the norma listing read path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormasFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aplicavel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo_norma: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_vigencia: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divisao_politica: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origem_publicacao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origem_dado: Option<String>,
    /// Case-insensitive substring match over `ementa` and `numero_norma`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

impl NormasFilter {
    /// 1-based page number.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, clamped to `1..=MAX_PER_PAGE`.
    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.per_page())
    }
}

/// Values a client can pick from for each exact-match listing filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterValues {
    pub tipo_norma: Vec<String>,
    pub status_vigencia: Vec<String>,
    pub divisao_politica: Vec<String>,
    pub origem_publicacao: Vec<String>,
    pub origem_dado: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32, total: u64) -> Self {
        Self {
            page,
            per_page,
            total,
            pages: total.div_ceil(u64::from(per_page.max(1))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

/// Phase of the store's applicability subset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Reflects a past (or no) classification snapshot.
    Stale,
    Resetting,
    Fetching,
    Aggregating,
    Applying,
    Verifying,
    /// Last run succeeded.
    Reconciled,
    /// Last run aborted; the store may be partially or fully reset.
    Failed,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Resetting => "resetting",
            Self::Fetching => "fetching",
            Self::Aggregating => "aggregating",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::Reconciled => "reconciled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a reconciliation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Scheduled,
}

/// Successful outcome returned to the trigger caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub message: String,
    pub updated: u64,
}

/// Terminal record of a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub state: SyncPhase,
    /// RFC3339 timestamp.
    pub started_at: String,
    /// RFC3339 timestamp.
    pub finished_at: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
    /// Distinct norma ids in the aggregated classification mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classified: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub flags_cleared: bool,
}

/// Snapshot of the reconciler for status queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<SyncReport>,
}

/// Classified norma ids with no matching row in the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanReport {
    /// Distinct norma ids with at least one true classification.
    pub classified: u64,
    /// Ascending.
    pub orphan_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_pagination_defaults_and_clamp() {
        let f = NormasFilter::default();
        assert_eq!(f.page(), 1);
        assert_eq!(f.per_page(), DEFAULT_PER_PAGE);
        assert_eq!(f.offset(), 0);

        let f = NormasFilter {
            page: Some(3),
            per_page: Some(1000),
            ..Default::default()
        };
        assert_eq!(f.per_page(), MAX_PER_PAGE);
        assert_eq!(f.offset(), 200);

        let f = NormasFilter {
            page: Some(0),
            per_page: Some(0),
            ..Default::default()
        };
        assert_eq!(f.page(), 1);
        assert_eq!(f.per_page(), 1);
    }

    #[test]
    fn pagination_rounds_pages_up() {
        assert_eq!(Pagination::new(1, 50, 0).pages, 0);
        assert_eq!(Pagination::new(1, 50, 50).pages, 1);
        assert_eq!(Pagination::new(1, 50, 51).pages, 2);
    }

    #[test]
    fn phase_display_matches_wire_name() {
        assert_eq!(SyncPhase::Applying.to_string(), "applying");
        assert_eq!(
            serde_json::to_value(SyncPhase::Applying).unwrap_or_default(),
            "applying"
        );
    }

    #[test]
    fn report_wire_shape() {
        let report = SyncReport {
            trigger: SyncTrigger::Scheduled,
            state: SyncPhase::Failed,
            started_at: "2026-01-05T03:00:00+00:00".to_string(),
            finished_at: "2026-01-05T03:00:02+00:00".to_string(),
            duration_ms: 2_000,
            updated: None,
            classified: None,
            error: Some("boom".to_string()),
            flags_cleared: true,
        };
        let json = serde_json::to_value(&report).unwrap_or_else(|e| panic!("serialize: {e}"));
        assert_eq!(json["trigger"], "scheduled");
        assert_eq!(json["state"], "failed");
        assert!(json.get("updated").is_none());
        assert_eq!(json["flags_cleared"], true);
    }
}
