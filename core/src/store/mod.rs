//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Engines call store methods and never execute SQL directly.
//!
//! Reads go through `CaseStore`. State transitions go through a
//! `WriteScope`, which holds a `BEGIN IMMEDIATE` transaction: one writer per
//! database at a time, committed all-or-nothing.

use crate::{
    error::{DeskError, DeskResult},
    model::{DcaAgency, DcaAllocation, DeskUser, RecoveryCase},
    types::{AgencyId, AllocationMethod, CaseId, CaseStatus, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::time::Duration;

mod agency;
mod allocation;
mod case;
mod customer;
mod user;

pub use case::{CaseListRow, CaseTotals};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CaseStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
    busy_timeout: Duration,
}

impl CaseStore {
    /// Open (or create) the desk database at `path`.
    pub fn open(path: &str) -> DeskResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit lock wait. A writer that cannot take the lock
    /// within `busy_timeout` fails with `DeskError::Conflict`.
    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> DeskResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            busy_timeout,
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DeskResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Open a second connection to the same database.
    /// For in-memory databases this returns a new, isolated database.
    pub fn reopen(&self) -> DeskResult<Self> {
        match &self.path {
            Some(p) => Self::open_with_timeout(p, self.busy_timeout),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> DeskResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_dca_schema.sql"))?;
        Ok(())
    }

    /// Start a write transaction. Blocks up to the busy timeout waiting for
    /// any other writer, then fails with a retryable conflict.
    pub fn write(&mut self) -> DeskResult<WriteScope<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(WriteScope { tx })
    }

    // ── Shared reads ──────────────────────────────────────────────

    pub fn case(&self, case_id: CaseId) -> DeskResult<RecoveryCase> {
        case::case_by_id(&self.conn, case_id)
    }

    pub fn agency(&self, agency_id: AgencyId) -> DeskResult<DcaAgency> {
        agency::agency_by_id(&self.conn, agency_id)
    }

    pub fn user(&self, user_id: UserId) -> DeskResult<DeskUser> {
        user::user_by_id(&self.conn, user_id)
    }

    pub fn latest_allocation(&self, case_id: CaseId) -> DeskResult<Option<DcaAllocation>> {
        allocation::latest_for_case(&self.conn, case_id)
    }
}

/// Allocation columns written together by `WriteScope::assign_case`.
#[derive(Debug, Clone)]
pub struct Assignment<'r> {
    pub case_id: CaseId,
    pub agency_id: AgencyId,
    pub acting_user_id: UserId,
    pub reason: Option<&'r str>,
    pub method: AllocationMethod,
    pub at: DateTime<Utc>,
    pub sla_deadline: Option<DateTime<Utc>>,
}

/// An open write transaction. Dropping it without `commit()` rolls back.
pub struct WriteScope<'c> {
    tx: Transaction<'c>,
}

impl WriteScope<'_> {
    pub fn case(&self, case_id: CaseId) -> DeskResult<RecoveryCase> {
        case::case_by_id(&self.tx, case_id)
    }

    pub fn agency(&self, agency_id: AgencyId) -> DeskResult<DcaAgency> {
        agency::agency_by_id(&self.tx, agency_id)
    }

    pub fn user(&self, user_id: UserId) -> DeskResult<DeskUser> {
        user::user_by_id(&self.tx, user_id)
    }

    pub fn latest_allocation(&self, case_id: CaseId) -> DeskResult<Option<DcaAllocation>> {
        allocation::latest_for_case(&self.tx, case_id)
    }

    /// Point the case at its new agency and append the matching allocation
    /// record. Both rows change in this transaction or neither does.
    pub fn assign_case(&self, a: &Assignment<'_>) -> DeskResult<DcaAllocation> {
        let updated = self.tx.execute(
            "UPDATE recovery_case
             SET agency_id = ?1, status = ?2, allocated_at = ?3,
                 allocation_method = ?4, sla_deadline = ?5, updated_at = ?3
             WHERE id = ?6",
            params![
                a.agency_id,
                CaseStatus::Allocated,
                a.at,
                a.method,
                a.sla_deadline,
                a.case_id
            ],
        )?;
        if updated == 0 {
            return Err(DeskError::not_found("case", a.case_id));
        }
        self.tx.execute(
            "INSERT INTO dca_allocation
                (case_id, agency_id, allocated_by, allocated_at, allocation_reason, allocation_method)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                a.case_id,
                a.agency_id,
                a.acting_user_id,
                a.at,
                a.reason,
                a.method
            ],
        )?;
        let id = self.tx.last_insert_rowid();
        Ok(DcaAllocation {
            id,
            case_id: a.case_id,
            agency_id: a.agency_id,
            allocated_by: a.acting_user_id,
            allocated_at: a.at,
            allocation_reason: a.reason.map(str::to_string),
            allocation_method: a.method,
        })
    }

    /// Persist lifecycle progress: status, recovered amount and the
    /// resolution timestamps. Allocation columns are not touched here.
    pub fn save_progress(&self, c: &RecoveryCase, at: DateTime<Utc>) -> DeskResult<()> {
        if !c.agency_matches_status() {
            return Err(DeskError::InvalidState(format!(
                "case {} would be '{}' with agency {:?}",
                c.case_number, c.status, c.agency_id
            )));
        }
        self.tx.execute(
            "UPDATE recovery_case
             SET status = ?1, recovered_amount = ?2, recovered_at = ?3,
                 closed_at = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                c.status,
                c.recovered_amount,
                c.recovered_at,
                c.closed_at,
                at,
                c.id
            ],
        )?;
        Ok(())
    }

    /// Persist recomputed performance figures for one agency.
    pub fn write_agency_performance(
        &self,
        agency_id: AgencyId,
        recovery_rate: f64,
        sla_compliance: f64,
    ) -> DeskResult<()> {
        agency::write_performance(&self.tx, agency_id, recovery_rate, sla_compliance)
    }

    /// Hand-set performance figures, refused once any case references the
    /// agency.
    pub fn override_agency_performance(
        &self,
        agency_id: AgencyId,
        recovery_rate: f64,
        sla_compliance: f64,
    ) -> DeskResult<()> {
        let agency = agency::agency_by_id(&self.tx, agency_id)?;
        let referencing = agency::referencing_count(&self.tx, agency_id)?;
        if referencing > 0 {
            return Err(DeskError::InvalidState(format!(
                "agency {} is referenced by {referencing} case(s); performance is computed",
                agency.code
            )));
        }
        agency::write_performance(&self.tx, agency_id, recovery_rate, sla_compliance)
    }

    pub fn commit(self) -> DeskResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

/// Ids that come back from SQL as `NotFound { entity: "row" }` are re-tagged
/// with the entity the caller actually asked for.
fn tag_missing(err: DeskError, entity: &'static str, key: impl ToString) -> DeskError {
    match err {
        DeskError::NotFound { entity: "row", .. } => DeskError::not_found(entity, key),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_twice() {
        let store = CaseStore::in_memory().unwrap();
        store.migrate().unwrap();
        store.migrate().unwrap();
    }

    #[test]
    fn missing_case_is_tagged_not_found() {
        let store = CaseStore::in_memory().unwrap();
        store.migrate().unwrap();
        match store.case(99) {
            Err(DeskError::NotFound { entity, key }) => {
                assert_eq!(entity, "case");
                assert_eq!(key, "99");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn dropped_scope_rolls_back() {
        let mut store = CaseStore::in_memory().unwrap();
        store.migrate().unwrap();
        let user = store.insert_user("ops@desk.test", "ops", "agent", Utc::now()).unwrap();
        {
            let scope = store.write().unwrap();
            assert_eq!(scope.user(user.id).unwrap().email, "ops@desk.test");
            scope
                .tx
                .execute("DELETE FROM desk_user WHERE id = ?1", params![user.id])
                .unwrap();
        }
        assert!(store.user(user.id).is_ok());
    }

    #[test]
    fn pending_case_with_agency_is_refused() {
        use crate::model::{NewAccount, NewAgency, NewCase};

        let mut store = CaseStore::in_memory().unwrap();
        store.migrate().unwrap();
        let at = Utc::now();
        let user = store.insert_user("ops@desk.test", "ops", "agent", at).unwrap();
        let account = store
            .insert_account(
                &NewAccount {
                    account_number: "ACC-1".into(),
                    customer_name: "Lee Hart".into(),
                    ..Default::default()
                },
                at,
            )
            .unwrap();
        let agency = store.insert_agency(&NewAgency::new("A1", "Alpha"), at).unwrap();
        let case = store.insert_case(&NewCase::new("C-1", account.id, 50.0), at).unwrap();

        let scope = store.write().unwrap();
        scope
            .assign_case(&Assignment {
                case_id: case.id,
                agency_id: agency.id,
                acting_user_id: user.id,
                reason: None,
                method: AllocationMethod::Manual,
                at,
                sla_deadline: None,
            })
            .unwrap();

        let mut regressed = scope.case(case.id).unwrap();
        regressed.status = CaseStatus::Pending;
        match scope.save_progress(&regressed, at) {
            Err(DeskError::InvalidState(_)) => {}
            other => panic!("expected InvalidState, got {other:?}"),
        }

        let raw = scope
            .tx
            .execute(
                "UPDATE recovery_case SET status = 'pending' WHERE id = ?1",
                params![case.id],
            )
            .map_err(DeskError::from);
        assert!(matches!(raw, Err(DeskError::Validation(_))), "got {raw:?}");
        scope.commit().unwrap();

        let stored = store.case(case.id).unwrap();
        assert_eq!(stored.status, CaseStatus::Allocated);
        assert_eq!(stored.agency_id, Some(agency.id));
    }
}
