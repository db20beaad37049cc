use super::{tag_missing, CaseStore};
use crate::{
    error::{DeskError, DeskResult},
    model::{NewCase, RecoveryCase},
    types::{AgencyId, CaseId, CaseStatus, Priority, StatusFilter},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub(super) const UNASSIGNED: &str = "Unassigned";

const CASE_COLUMNS: &str = "id, case_number, account_id, agency_id, amount_due, recovered_amount,
                            days_overdue, priority, status, allocation_method, allocated_at,
                            sla_deadline, recovered_at, closed_at, notes, created_at, updated_at";

fn case_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecoveryCase> {
    Ok(RecoveryCase {
        id: row.get(0)?,
        case_number: row.get(1)?,
        account_id: row.get(2)?,
        agency_id: row.get(3)?,
        amount_due: row.get(4)?,
        recovered_amount: row.get(5)?,
        days_overdue: row.get(6)?,
        priority: row.get(7)?,
        status: row.get(8)?,
        allocation_method: row.get(9)?,
        allocated_at: row.get(10)?,
        sla_deadline: row.get(11)?,
        recovered_at: row.get(12)?,
        closed_at: row.get(13)?,
        notes: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

pub(super) fn case_by_id(conn: &Connection, case_id: CaseId) -> DeskResult<RecoveryCase> {
    conn.query_row(
        &format!("SELECT {CASE_COLUMNS} FROM recovery_case WHERE id = ?1"),
        params![case_id],
        case_row,
    )
    .map_err(|e| tag_missing(e.into(), "case", case_id))
}

fn filter_status(filter: StatusFilter) -> Option<CaseStatus> {
    match filter {
        StatusFilter::All => None,
        StatusFilter::Only(status) => Some(status),
    }
}

/// One line of the case listing, with account and agency names resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseListRow {
    pub id: CaseId,
    pub case_number: String,
    pub account_number: String,
    pub customer_name: String,
    pub amount_due: f64,
    pub recovered_amount: f64,
    pub days_overdue: u32,
    pub priority: Priority,
    pub agency_name: String,
    pub status: CaseStatus,
    pub created_on: NaiveDate,
}

/// Portfolio-wide sums used by the dashboard and the recovery rate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CaseTotals {
    pub total_cases: i64,
    pub active_cases: i64,
    pub total_due: f64,
    pub total_recovered: f64,
}

impl CaseStore {
    // ── Recovery cases ────────────────────────────────────────────

    /// New cases always start pending and unassigned.
    pub fn insert_case(&self, c: &NewCase, at: DateTime<Utc>) -> DeskResult<RecoveryCase> {
        c.validate()?;
        // Explicit lookup so a bad account id reports which entity is missing.
        self.account(c.account_id)?;
        if self.case_by_number(&c.case_number)?.is_some() {
            return Err(DeskError::Validation(format!(
                "case_number '{}' already exists",
                c.case_number
            )));
        }
        self.conn.execute(
            "INSERT INTO recovery_case (
                case_number, account_id, agency_id, amount_due, recovered_amount,
                days_overdue, priority, status, sla_deadline, notes, created_at
             ) VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &c.case_number,
                c.account_id,
                c.amount_due,
                c.recovered_amount,
                c.days_overdue,
                c.priority,
                CaseStatus::Pending,
                c.sla_deadline,
                c.notes.as_deref(),
                at,
            ],
        )?;
        case_by_id(&self.conn, self.conn.last_insert_rowid())
    }

    pub fn case_by_number(&self, case_number: &str) -> DeskResult<Option<RecoveryCase>> {
        self.conn
            .query_row(
                &format!("SELECT {CASE_COLUMNS} FROM recovery_case WHERE case_number = ?1"),
                params![case_number],
                case_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Every case, oldest first.
    pub fn cases(&self) -> DeskResult<Vec<RecoveryCase>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CASE_COLUMNS} FROM recovery_case ORDER BY id ASC"))?;
        let rows = stmt.query_map([], case_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn cases_for_agency(&self, agency_id: AgencyId) -> DeskResult<Vec<RecoveryCase>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CASE_COLUMNS} FROM recovery_case WHERE agency_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![agency_id], case_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn count_cases(&self, filter: StatusFilter) -> DeskResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM recovery_case WHERE (?1 IS NULL OR status = ?1)",
            params![filter_status(filter)],
            |r| r.get(0),
        )?)
    }

    /// Newest cases first; ties on creation time fall back to id.
    pub fn page_cases(
        &self,
        filter: StatusFilter,
        limit: u32,
        offset: u64,
    ) -> DeskResult<Vec<CaseListRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.case_number, a.account_number, a.customer_name,
                    c.amount_due, c.recovered_amount, c.days_overdue, c.priority,
                    COALESCE(g.name, ?1), c.status, c.created_at
             FROM recovery_case c
             JOIN customer_account a ON a.id = c.account_id
             LEFT JOIN dca_agency g ON g.id = c.agency_id
             WHERE (?2 IS NULL OR c.status = ?2)
             ORDER BY c.created_at DESC, c.id DESC
             LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(
            params![UNASSIGNED, filter_status(filter), limit, offset as i64],
            |r| {
                Ok(CaseListRow {
                    id: r.get(0)?,
                    case_number: r.get(1)?,
                    account_number: r.get(2)?,
                    customer_name: r.get(3)?,
                    amount_due: r.get(4)?,
                    recovered_amount: r.get(5)?,
                    days_overdue: r.get(6)?,
                    priority: r.get(7)?,
                    agency_name: r.get(8)?,
                    status: r.get(9)?,
                    created_on: r.get::<_, DateTime<Utc>>(10)?.date_naive(),
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn case_totals(&self) -> DeskResult<CaseTotals> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(amount_due), 0.0),
                    COALESCE(SUM(recovered_amount), 0.0)
             FROM recovery_case",
            params![CaseStatus::Active],
            |r| {
                Ok(CaseTotals {
                    total_cases: r.get(0)?,
                    active_cases: r.get(1)?,
                    total_due: r.get(2)?,
                    total_recovered: r.get(3)?,
                })
            },
        )?)
    }
}
