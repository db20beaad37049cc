//! Entity records as persisted by the store, plus the input shapes used to
//! create them.
//!
//! Records reference each other by id only. Navigating from a case to its
//! account or agency is always an explicit store lookup.

use crate::{
    error::{DeskError, DeskResult},
    types::{
        AccountId, AgencyId, AgencyStatus, AllocationMethod, CaseId, CaseStatus, EntityId,
        Priority, UserId,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Users ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeskUser {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

// ── Customer accounts ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerAccount {
    pub id: AccountId,
    pub account_number: String,
    pub customer_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub credit_limit: f64,
    pub current_balance: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAccount {
    pub account_number: String,
    pub customer_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub credit_limit: f64,
    pub current_balance: f64,
}

impl NewAccount {
    pub fn validate(&self) -> DeskResult<()> {
        require_text("account_number", &self.account_number)?;
        require_text("customer_name", &self.customer_name)?;
        if !(self.credit_limit >= 0.0) {
            return Err(DeskError::Validation(format!(
                "credit_limit must be >= 0, got {}",
                self.credit_limit
            )));
        }
        require_finite("current_balance", self.current_balance)
    }
}

// ── Agencies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DcaAgency {
    pub id: AgencyId,
    pub code: String,
    pub name: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Percentage in [0, 100]. Written by the metrics engine.
    pub recovery_rate: f64,
    /// Percentage in [0, 100]. Written by the metrics engine.
    pub sla_compliance: f64,
    pub status: AgencyStatus,
    pub contract_start: Option<NaiveDate>,
    pub contract_end: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl DcaAgency {
    pub fn is_active(&self) -> bool {
        self.status == AgencyStatus::Active
    }

    /// True when `day` falls inside the contract window. Open-ended sides
    /// always match.
    pub fn under_contract_on(&self, day: NaiveDate) -> bool {
        self.contract_start.map_or(true, |s| s <= day)
            && self.contract_end.map_or(true, |e| day <= e)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgency {
    pub code: String,
    pub name: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub recovery_rate: f64,
    pub sla_compliance: f64,
    pub status: AgencyStatus,
    pub contract_start: Option<NaiveDate>,
    pub contract_end: Option<NaiveDate>,
}

impl NewAgency {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            contact_person: None,
            email: None,
            phone: None,
            address: None,
            recovery_rate: 0.0,
            sla_compliance: 0.0,
            status: AgencyStatus::Active,
            contract_start: None,
            contract_end: None,
        }
    }

    pub fn with_performance(mut self, recovery_rate: f64, sla_compliance: f64) -> Self {
        self.recovery_rate = recovery_rate;
        self.sla_compliance = sla_compliance;
        self
    }

    pub fn with_status(mut self, status: AgencyStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_contract(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.contract_start = start;
        self.contract_end = end;
        self
    }

    pub fn validate(&self) -> DeskResult<()> {
        require_text("code", &self.code)?;
        require_text("name", &self.name)?;
        validate_percentage("recovery_rate", self.recovery_rate)?;
        validate_percentage("sla_compliance", self.sla_compliance)?;
        if let (Some(start), Some(end)) = (self.contract_start, self.contract_end) {
            if start > end {
                return Err(DeskError::Validation(format!(
                    "contract_start {start} is after contract_end {end}"
                )));
            }
        }
        Ok(())
    }
}

// ── Recovery cases ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryCase {
    pub id: CaseId,
    pub case_number: String,
    pub account_id: AccountId,
    pub agency_id: Option<AgencyId>,
    pub amount_due: f64,
    pub recovered_amount: f64,
    pub days_overdue: u32,
    pub priority: Priority,
    pub status: CaseStatus,
    pub allocation_method: Option<AllocationMethod>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecoveryCase {
    /// Holds when the agency reference agrees with the status.
    pub fn agency_matches_status(&self) -> bool {
        self.agency_id.is_some() == self.status.requires_agency()
    }

    pub fn outstanding(&self) -> f64 {
        self.amount_due - self.recovered_amount
    }

    /// When the case left the open states: recovery first, else closure.
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.recovered_at.or(self.closed_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCase {
    pub case_number: String,
    pub account_id: AccountId,
    pub amount_due: f64,
    pub recovered_amount: f64,
    pub days_overdue: u32,
    pub priority: Priority,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl NewCase {
    pub fn new(case_number: impl Into<String>, account_id: AccountId, amount_due: f64) -> Self {
        Self {
            case_number: case_number.into(),
            account_id,
            amount_due,
            recovered_amount: 0.0,
            days_overdue: 0,
            priority: Priority::Medium,
            sla_deadline: None,
            notes: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_days_overdue(mut self, days: u32) -> Self {
        self.days_overdue = days;
        self
    }

    pub fn with_sla_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.sla_deadline = Some(deadline);
        self
    }

    pub fn validate(&self) -> DeskResult<()> {
        require_text("case_number", &self.case_number)?;
        validate_amounts(self.amount_due, self.recovered_amount)
    }
}

/// `amount_due > 0` and `0 <= recovered_amount <= amount_due`.
pub fn validate_amounts(amount_due: f64, recovered_amount: f64) -> DeskResult<()> {
    require_finite("amount_due", amount_due)?;
    require_finite("recovered_amount", recovered_amount)?;
    if amount_due <= 0.0 {
        return Err(DeskError::Validation(format!(
            "amount_due must be > 0, got {amount_due}"
        )));
    }
    if recovered_amount < 0.0 {
        return Err(DeskError::Validation(format!(
            "recovered_amount must be >= 0, got {recovered_amount}"
        )));
    }
    if recovered_amount > amount_due {
        return Err(DeskError::Validation(format!(
            "recovered_amount {recovered_amount} exceeds amount_due {amount_due}"
        )));
    }
    Ok(())
}

// ── Allocations ───────────────────────────────────────────────────

/// One append-only allocation event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DcaAllocation {
    pub id: EntityId,
    pub case_id: CaseId,
    pub agency_id: AgencyId,
    pub allocated_by: UserId,
    pub allocated_at: DateTime<Utc>,
    pub allocation_reason: Option<String>,
    pub allocation_method: AllocationMethod,
}

// ── Helpers ───────────────────────────────────────────────────────

fn require_text(field: &str, value: &str) -> DeskResult<()> {
    if value.trim().is_empty() {
        return Err(DeskError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_finite(field: &str, value: f64) -> DeskResult<()> {
    if !value.is_finite() {
        return Err(DeskError::Validation(format!("{field} must be a finite number")));
    }
    Ok(())
}

pub(crate) fn validate_percentage(field: &str, value: f64) -> DeskResult<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(DeskError::Validation(format!(
            "{field} must be within 0..=100, got {value}"
        )));
    }
    Ok(())
}
