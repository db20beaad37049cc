//! Events returned by desk operations.
//!
//! Every state transition the allocation engine performs is reported as a
//! `DeskEvent`. Callers decide what to do with them (notify, display,
//! forward to an audit sink); the core does not persist them beyond the
//! allocation log itself.

use crate::types::{AgencyId, AllocationMethod, CaseId, CaseStatus, EntityId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    // ── Allocation events ──────────────────────────
    CaseAllocated {
        at: DateTime<Utc>,
        case_id: CaseId,
        agency_id: AgencyId,
        allocation_id: EntityId,
        acting_user_id: UserId,
        method: AllocationMethod,
    },
    CaseReassigned {
        at: DateTime<Utc>,
        case_id: CaseId,
        from_agency_id: AgencyId,
        to_agency_id: AgencyId,
        allocation_id: EntityId,
        acting_user_id: UserId,
        method: AllocationMethod,
    },

    // ── Lifecycle events ───────────────────────────
    CaseStatusChanged {
        at: DateTime<Utc>,
        case_id: CaseId,
        old_status: CaseStatus,
        new_status: CaseStatus,
        acting_user_id: UserId,
    },
    PaymentRecorded {
        at: DateTime<Utc>,
        case_id: CaseId,
        amount: f64,
        recovered_amount: f64,
        acting_user_id: UserId,
    },

    // ── Metrics events ─────────────────────────────
    AgencyPerformanceRefreshed {
        at: DateTime<Utc>,
        agency_id: AgencyId,
        recovery_rate: f64,
        sla_compliance: f64,
    },
}

impl DeskEvent {
    /// Stable string name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CaseAllocated { .. } => "case_allocated",
            Self::CaseReassigned { .. } => "case_reassigned",
            Self::CaseStatusChanged { .. } => "case_status_changed",
            Self::PaymentRecorded { .. } => "payment_recorded",
            Self::AgencyPerformanceRefreshed { .. } => "agency_performance_refreshed",
        }
    }

    pub fn case_id(&self) -> Option<CaseId> {
        match self {
            Self::CaseAllocated { case_id, .. }
            | Self::CaseReassigned { case_id, .. }
            | Self::CaseStatusChanged { case_id, .. }
            | Self::PaymentRecorded { case_id, .. } => Some(*case_id),
            Self::AgencyPerformanceRefreshed { .. } => None,
        }
    }
}
