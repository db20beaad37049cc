use super::CaseStore;
use crate::{
    error::DeskResult,
    model::DcaAllocation,
    types::{AgencyId, CaseId, CaseStatus},
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

const ALLOCATION_COLUMNS: &str = "id, case_id, agency_id, allocated_by, allocated_at,
                                  allocation_reason, allocation_method";

fn allocation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DcaAllocation> {
    Ok(DcaAllocation {
        id: row.get(0)?,
        case_id: row.get(1)?,
        agency_id: row.get(2)?,
        allocated_by: row.get(3)?,
        allocated_at: row.get(4)?,
        allocation_reason: row.get(5)?,
        allocation_method: row.get(6)?,
    })
}

/// The record the case's current agency pointer must agree with.
pub(super) fn latest_for_case(conn: &Connection, case_id: CaseId) -> DeskResult<Option<DcaAllocation>> {
    conn.query_row(
        &format!(
            "SELECT {ALLOCATION_COLUMNS} FROM dca_allocation
             WHERE case_id = ?1 ORDER BY id DESC LIMIT 1"
        ),
        params![case_id],
        allocation_row,
    )
    .optional()
    .map_err(Into::into)
}

impl CaseStore {
    // ── Allocation log ────────────────────────────────────────────

    /// Full allocation history for a case, oldest first.
    pub fn allocations_for_case(&self, case_id: CaseId) -> DeskResult<Vec<DcaAllocation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM dca_allocation WHERE case_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![case_id], allocation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Most recent allocation across all cases. Drives round-robin.
    pub fn latest_allocation_overall(&self) -> DeskResult<Option<DcaAllocation>> {
        self.conn
            .query_row(
                &format!("SELECT {ALLOCATION_COLUMNS} FROM dca_allocation ORDER BY id DESC LIMIT 1"),
                [],
                allocation_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn allocation_count(&self) -> DeskResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM dca_allocation", [], |r| r.get(0))?)
    }

    /// Open (allocated or active) cases currently held by each agency.
    /// Agencies holding none are absent from the map.
    pub fn open_case_load(&self) -> DeskResult<HashMap<AgencyId, u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT agency_id, COUNT(*) FROM recovery_case
             WHERE agency_id IS NOT NULL AND status IN (?1, ?2)
             GROUP BY agency_id",
        )?;
        let rows = stmt.query_map(params![CaseStatus::Allocated, CaseStatus::Active], |r| {
            Ok((r.get::<_, AgencyId>(0)?, r.get::<_, u32>(1)?))
        })?;
        rows.collect::<Result<HashMap<_, _>, _>>().map_err(Into::into)
    }
}
