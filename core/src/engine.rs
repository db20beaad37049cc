//! The desk engine: the surface the web/API layer calls into.
//!
//! It owns the store connection, the config and the clock, and hands out
//! short-lived allocation and metrics engines over them. It is
//! transport-agnostic: requests and responses are plain serde types.
//!
//! One `DeskEngine` owns one connection and is not shared across threads.
//! Concurrent callers each open their own engine on the same database file;
//! the store's write scopes serialize them.

use crate::{
    allocation_engine::{AllocationEngine, AllocationOutcome, AllocationRequest},
    clock::DeskClock,
    config::DeskConfig,
    error::{DeskError, DeskResult},
    event::DeskEvent,
    metrics_engine::{self, MetricsEngine, MetricsSnapshot},
    model::{CustomerAccount, DcaAgency, DeskUser, NewAccount, NewAgency, NewCase, RecoveryCase},
    store::{CaseListRow, CaseStore, CaseTotals},
    types::{CaseId, StatusFilter, UserId},
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reply shape of the "allocate a case" endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CasePage {
    pub items: Vec<CaseListRow>,
    pub total: i64,
    pub page_count: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Dashboard reply: portfolio counters, the newest cases and every agency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dashboard {
    pub totals: CaseTotals,
    pub recent_cases: Vec<CaseListRow>,
    pub agencies: Vec<DcaAgency>,
}

const RECENT_CASES: u32 = 10;

pub struct DeskEngine {
    pub store: CaseStore,
    pub config: DeskConfig,
    pub clock: DeskClock,
}

impl DeskEngine {
    pub fn new(store: CaseStore, config: DeskConfig, clock: DeskClock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Open the database at `path`, apply migrations and wire the engine.
    pub fn open(path: &str, config: DeskConfig, clock: DeskClock) -> DeskResult<Self> {
        let store =
            CaseStore::open_with_timeout(path, Duration::from_millis(config.busy_timeout_ms))?;
        store.migrate()?;
        Ok(Self::new(store, config, clock))
    }

    /// In-memory engine with test config and a manual clock pinned to
    /// 2026-01-05 09:00 UTC.
    pub fn build_test() -> DeskResult<Self> {
        let store = CaseStore::in_memory()?;
        store.migrate()?;
        let start = Utc
            .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
            .single()
            .ok_or_else(|| DeskError::Other(anyhow::anyhow!("invalid test clock start")))?;
        Ok(Self::new(
            store,
            DeskConfig::default_test(),
            DeskClock::manual(start),
        ))
    }

    // ── Reference data ────────────────────────────────────────────

    pub fn register_user(&self, email: &str, username: &str, role: &str) -> DeskResult<DeskUser> {
        self.store.insert_user(email, username, role, self.clock.now())
    }

    pub fn register_account(&self, account: &NewAccount) -> DeskResult<CustomerAccount> {
        self.store.insert_account(account, self.clock.now())
    }

    pub fn register_agency(&self, agency: &NewAgency) -> DeskResult<DcaAgency> {
        self.store.insert_agency(agency, self.clock.now())
    }

    pub fn open_case(&self, case: &NewCase) -> DeskResult<RecoveryCase> {
        let created = self.store.insert_case(case, self.clock.now())?;
        log::info!(
            "case: opened {} for account {} ({:.2} due)",
            created.case_number,
            created.account_id,
            created.amount_due
        );
        Ok(created)
    }

    // ── Allocation ────────────────────────────────────────────────

    pub fn allocation(&mut self) -> AllocationEngine<'_> {
        AllocationEngine::new(&mut self.store, &self.config, &self.clock)
    }

    pub fn allocate(&mut self, req: &AllocationRequest) -> DeskResult<AllocationOutcome> {
        self.allocation().allocate(req)
    }

    /// Endpoint form of `allocate`: never fails, reports the outcome as
    /// `{success, message}`.
    pub fn allocate_case(&mut self, req: &AllocationRequest) -> AllocationResponse {
        match self.allocate(req) {
            Ok(outcome) => AllocationResponse {
                success: true,
                message: "Case allocated successfully".into(),
                error_kind: None,
                allocation_id: Some(outcome.allocation.id),
            },
            Err(e) => {
                log::warn!("allocation: case {} rejected: {e}", req.case_id);
                AllocationResponse {
                    success: false,
                    message: e.to_string(),
                    error_kind: Some(e.kind().to_string()),
                    allocation_id: None,
                }
            }
        }
    }

    pub fn activate_case(&mut self, case_id: CaseId, acting_user_id: UserId) -> DeskResult<DeskEvent> {
        self.allocation().activate_case(case_id, acting_user_id)
    }

    pub fn record_payment(
        &mut self,
        case_id: CaseId,
        amount: f64,
        acting_user_id: UserId,
    ) -> DeskResult<Vec<DeskEvent>> {
        self.allocation().record_payment(case_id, amount, acting_user_id)
    }

    pub fn mark_recovered(&mut self, case_id: CaseId, acting_user_id: UserId) -> DeskResult<DeskEvent> {
        self.allocation().mark_recovered(case_id, acting_user_id)
    }

    pub fn close_case(&mut self, case_id: CaseId, acting_user_id: UserId) -> DeskResult<DeskEvent> {
        self.allocation().close_case(case_id, acting_user_id)
    }

    /// Check the agency/status invariant and that the case points at the
    /// agency of its latest allocation record.
    pub fn verify_case(&self, case_id: CaseId) -> DeskResult<()> {
        let case = self.store.case(case_id)?;
        if !case.agency_matches_status() {
            return Err(DeskError::InvalidState(format!(
                "case {} is {} with agency {:?}",
                case.case_number, case.status, case.agency_id
            )));
        }
        let latest = self.store.latest_allocation(case_id)?.map(|a| a.agency_id);
        if latest != case.agency_id {
            return Err(DeskError::InvalidState(format!(
                "case {} points at agency {:?} but latest allocation is {:?}",
                case.case_number, case.agency_id, latest
            )));
        }
        Ok(())
    }

    // ── Listing ───────────────────────────────────────────────────

    /// One page of cases, newest first. Pages start at 1; `page_size`
    /// defaults to the configured size and may not exceed the maximum.
    pub fn list_cases(
        &self,
        filter: StatusFilter,
        page: u32,
        page_size: Option<u32>,
    ) -> DeskResult<CasePage> {
        let page_size = page_size.unwrap_or(self.config.default_page_size);
        if page == 0 {
            return Err(DeskError::Validation("page starts at 1".into()));
        }
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(DeskError::Validation(format!(
                "page_size must be within 1..={}, got {page_size}",
                self.config.max_page_size
            )));
        }
        let total = self.store.count_cases(filter)?;
        let offset = u64::from(page - 1) * u64::from(page_size);
        let items = self.store.page_cases(filter, page_size, offset)?;
        let size = i64::from(page_size);
        Ok(CasePage {
            items,
            total,
            page_count: (total + size - 1) / size,
            page,
            page_size,
        })
    }

    /// `list_cases` with the filter given as its wire string
    /// ("all", "pending", ...).
    pub fn list_cases_by_name(
        &self,
        status: &str,
        page: u32,
        page_size: Option<u32>,
    ) -> DeskResult<CasePage> {
        self.list_cases(status.parse()?, page, page_size)
    }

    // ── Metrics ───────────────────────────────────────────────────

    pub fn metrics(&self) -> MetricsEngine<'_> {
        MetricsEngine::new(&self.store)
    }

    pub fn metrics_snapshot(&self) -> DeskResult<MetricsSnapshot> {
        self.metrics().snapshot(self.config.top_agencies)
    }

    pub fn refresh_agency_performance(&mut self) -> DeskResult<Vec<DeskEvent>> {
        metrics_engine::refresh_agency_performance(&mut self.store, &self.clock)
    }

    pub fn dashboard(&self) -> DeskResult<Dashboard> {
        Ok(Dashboard {
            totals: self.store.case_totals()?,
            recent_cases: self.store.page_cases(StatusFilter::All, RECENT_CASES, 0)?,
            agencies: self.store.agencies()?,
        })
    }
}
