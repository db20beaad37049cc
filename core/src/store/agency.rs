use super::{tag_missing, CaseStore};
use crate::{
    error::{DeskError, DeskResult},
    model::{validate_percentage, DcaAgency, NewAgency},
    types::{AgencyId, AgencyStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const AGENCY_COLUMNS: &str = "id, code, name, contact_person, email, phone, address,
                              recovery_rate, sla_compliance, status,
                              contract_start, contract_end, created_at";

fn agency_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DcaAgency> {
    Ok(DcaAgency {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        contact_person: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        address: row.get(6)?,
        recovery_rate: row.get(7)?,
        sla_compliance: row.get(8)?,
        status: row.get(9)?,
        contract_start: row.get(10)?,
        contract_end: row.get(11)?,
        created_at: row.get(12)?,
    })
}

pub(super) fn agency_by_id(conn: &Connection, agency_id: AgencyId) -> DeskResult<DcaAgency> {
    conn.query_row(
        &format!("SELECT {AGENCY_COLUMNS} FROM dca_agency WHERE id = ?1"),
        params![agency_id],
        agency_row,
    )
    .map_err(|e| tag_missing(e.into(), "agency", agency_id))
}

pub(super) fn write_performance(
    conn: &Connection,
    agency_id: AgencyId,
    recovery_rate: f64,
    sla_compliance: f64,
) -> DeskResult<()> {
    validate_percentage("recovery_rate", recovery_rate)?;
    validate_percentage("sla_compliance", sla_compliance)?;
    let updated = conn.execute(
        "UPDATE dca_agency SET recovery_rate = ?1, sla_compliance = ?2 WHERE id = ?3",
        params![recovery_rate, sla_compliance, agency_id],
    )?;
    if updated == 0 {
        return Err(DeskError::not_found("agency", agency_id));
    }
    Ok(())
}

pub(super) fn referencing_count(conn: &Connection, agency_id: AgencyId) -> DeskResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM (
            SELECT id FROM recovery_case WHERE agency_id = ?1
            UNION
            SELECT case_id FROM dca_allocation WHERE agency_id = ?1
         )",
        params![agency_id],
        |r| r.get(0),
    )?)
}

impl CaseStore {
    // ── Agencies ──────────────────────────────────────────────────

    pub fn insert_agency(&self, a: &NewAgency, at: DateTime<Utc>) -> DeskResult<DcaAgency> {
        a.validate()?;
        if self.agency_by_code(&a.code)?.is_some() {
            return Err(DeskError::Validation(format!(
                "agency code '{}' already exists",
                a.code
            )));
        }
        self.conn.execute(
            "INSERT INTO dca_agency (
                code, name, contact_person, email, phone, address,
                recovery_rate, sla_compliance, status, contract_start, contract_end, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &a.code,
                &a.name,
                a.contact_person.as_deref(),
                a.email.as_deref(),
                a.phone.as_deref(),
                a.address.as_deref(),
                a.recovery_rate,
                a.sla_compliance,
                a.status,
                a.contract_start,
                a.contract_end,
                at,
            ],
        )?;
        agency_by_id(&self.conn, self.conn.last_insert_rowid())
    }

    pub fn agency_by_code(&self, code: &str) -> DeskResult<Option<DcaAgency>> {
        self.conn
            .query_row(
                &format!("SELECT {AGENCY_COLUMNS} FROM dca_agency WHERE code = ?1"),
                params![code],
                agency_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// All agencies ordered by code.
    pub fn agencies(&self) -> DeskResult<Vec<DcaAgency>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {AGENCY_COLUMNS} FROM dca_agency ORDER BY code ASC"))?;
        let rows = stmt.query_map([], agency_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Active agencies ordered by code.
    pub fn active_agencies(&self) -> DeskResult<Vec<DcaAgency>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {AGENCY_COLUMNS} FROM dca_agency WHERE status = ?1 ORDER BY code ASC"
        ))?;
        let rows = stmt.query_map(params![AgencyStatus::Active], agency_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_agency_status(&self, agency_id: AgencyId, status: AgencyStatus) -> DeskResult<()> {
        let updated = self.conn.execute(
            "UPDATE dca_agency SET status = ?1 WHERE id = ?2",
            params![status, agency_id],
        )?;
        if updated == 0 {
            return Err(DeskError::not_found("agency", agency_id));
        }
        Ok(())
    }

    /// Hand-set performance figures. Only allowed while no case references
    /// the agency; after that the figures belong to the metrics engine. The
    /// check and the write run in one write scope.
    pub fn override_agency_performance(
        &mut self,
        agency_id: AgencyId,
        recovery_rate: f64,
        sla_compliance: f64,
    ) -> DeskResult<()> {
        let scope = self.write()?;
        scope.override_agency_performance(agency_id, recovery_rate, sla_compliance)?;
        scope.commit()
    }

    /// Cases pointing at the agency now, plus any it held in the past.
    pub fn cases_referencing_agency(&self, agency_id: AgencyId) -> DeskResult<i64> {
        referencing_count(&self.conn, agency_id)
    }
}
