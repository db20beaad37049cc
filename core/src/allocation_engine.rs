//! Allocation engine. Assigns recovery cases to agencies and drives the
//! case lifecycle afterwards.
//!
//! RULES:
//!   - Every transition runs inside one store write scope. Either the case
//!     row and its allocation record both change, or nothing does.
//!   - A case holds an agency exactly when it is not pending.
//!   - The case's agency always equals the agency of its latest allocation
//!     record. Reassignment appends; nothing is ever deleted.
//!   - The acting user is passed in on every call.

use crate::{
    allocation_policy::{self, SelectionInputs},
    clock::DeskClock,
    config::DeskConfig,
    error::{DeskError, DeskResult},
    event::DeskEvent,
    model::{DcaAllocation, RecoveryCase},
    store::{Assignment, CaseStore},
    types::{AgencyId, AllocationMethod, CaseId, CaseStatus, UserId},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Payment totals within this distance of `amount_due` count as settled.
pub const AMOUNT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationRequest {
    pub case_id: CaseId,
    /// Required for manual allocation, absent for policy methods.
    pub agency_id: Option<AgencyId>,
    pub acting_user_id: UserId,
    pub reason: Option<String>,
    pub method: AllocationMethod,
}

impl AllocationRequest {
    pub fn manual(case_id: CaseId, agency_id: AgencyId, acting_user_id: UserId) -> Self {
        Self {
            case_id,
            agency_id: Some(agency_id),
            acting_user_id,
            reason: None,
            method: AllocationMethod::Manual,
        }
    }

    pub fn by_policy(case_id: CaseId, method: AllocationMethod, acting_user_id: UserId) -> Self {
        Self {
            case_id,
            agency_id: None,
            acting_user_id,
            reason: None,
            method,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn check_shape(&self) -> DeskResult<()> {
        match (self.method, self.agency_id) {
            (AllocationMethod::Manual, None) => Err(DeskError::Validation(
                "manual allocation requires an agency_id".into(),
            )),
            (AllocationMethod::Auto | AllocationMethod::PriorityBased, Some(_)) => {
                Err(DeskError::Validation(format!(
                    "{} allocation chooses the agency; do not pass agency_id",
                    self.method
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationOutcome {
    pub case: RecoveryCase,
    pub allocation: DcaAllocation,
    pub event: DeskEvent,
}

pub struct AllocationEngine<'e> {
    store: &'e mut CaseStore,
    config: &'e DeskConfig,
    clock: &'e DeskClock,
}

impl<'e> AllocationEngine<'e> {
    pub fn new(store: &'e mut CaseStore, config: &'e DeskConfig, clock: &'e DeskClock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Assign (or reassign) a case to an agency.
    ///
    /// Fails with `NotFound` for an unknown case, agency or user, and with
    /// `InvalidState` when the case is recovered/closed or the agency is not
    /// active. On failure nothing is written.
    pub fn allocate(&mut self, req: &AllocationRequest) -> DeskResult<AllocationOutcome> {
        req.check_shape()?;
        let agency_id = match req.agency_id {
            Some(id) => id,
            None => self.choose_agency(req)?,
        };
        let at = self.clock.now();

        let scope = self.store.write()?;
        let case = scope.case(req.case_id)?;
        let agency = scope.agency(agency_id)?;
        scope.user(req.acting_user_id)?;

        if !case.status.accepts_allocation() {
            return Err(DeskError::InvalidState(format!(
                "case {} is {} and cannot be allocated",
                case.case_number, case.status
            )));
        }
        if !agency.is_active() {
            return Err(DeskError::InvalidState(format!(
                "agency {} is {} and cannot take cases",
                agency.code, agency.status
            )));
        }

        let sla_deadline = case.sla_deadline.or_else(|| {
            Some(at + Duration::days(self.config.sla_days.for_priority(case.priority)))
        });
        let allocation = scope.assign_case(&Assignment {
            case_id: case.id,
            agency_id,
            acting_user_id: req.acting_user_id,
            reason: req.reason.as_deref(),
            method: req.method,
            at,
            sla_deadline,
        })?;
        let updated = scope.case(case.id)?;
        scope.commit()?;

        let event = match case.agency_id {
            Some(previous) => {
                log::info!(
                    "allocation: case {} reassigned {previous} -> {} ({}) by user {}",
                    case.case_number, agency.code, req.method, req.acting_user_id
                );
                DeskEvent::CaseReassigned {
                    at,
                    case_id: case.id,
                    from_agency_id: previous,
                    to_agency_id: agency_id,
                    allocation_id: allocation.id,
                    acting_user_id: req.acting_user_id,
                    method: req.method,
                }
            }
            None => {
                log::info!(
                    "allocation: case {} allocated to {} ({}) by user {}",
                    case.case_number, agency.code, req.method, req.acting_user_id
                );
                DeskEvent::CaseAllocated {
                    at,
                    case_id: case.id,
                    agency_id,
                    allocation_id: allocation.id,
                    acting_user_id: req.acting_user_id,
                    method: req.method,
                }
            }
        };

        Ok(AllocationOutcome {
            case: updated,
            allocation,
            event,
        })
    }

    /// Policy selection. Reads outside the write scope; the scope re-checks
    /// the chosen agency is still active before assigning.
    fn choose_agency(&self, req: &AllocationRequest) -> DeskResult<AgencyId> {
        let case = self.store.case(req.case_id)?;
        let Some(rule) = allocation_policy::rule_for(req.method, case.priority, self.config.auto_rule)
        else {
            return Err(DeskError::Validation(
                "manual allocation requires an agency_id".into(),
            ));
        };

        let candidates = allocation_policy::eligible(self.store.active_agencies()?, self.clock.today());
        let open_load = self.store.open_case_load()?;
        let last_code = match self.store.latest_allocation_overall()? {
            Some(last) => Some(self.store.agency(last.agency_id)?.code),
            None => None,
        };

        let chosen = allocation_policy::select(
            rule,
            SelectionInputs {
                candidates: &candidates,
                open_load: &open_load,
                last_allocated_code: last_code.as_deref(),
            },
        )
        .ok_or_else(|| {
            DeskError::InvalidState(format!(
                "no eligible agency for case {} under {rule:?}",
                case.case_number
            ))
        })?;
        log::debug!(
            "allocation: {rule:?} picked {} for case {} from {} candidates",
            chosen.code,
            case.case_number,
            candidates.len()
        );
        Ok(chosen.id)
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// allocated → active: the agency has started work.
    pub fn activate_case(&mut self, case_id: CaseId, acting_user_id: UserId) -> DeskResult<DeskEvent> {
        self.transition(case_id, CaseStatus::Active, acting_user_id)
    }

    /// Settle a case as recovered, whether or not the full amount came in.
    pub fn mark_recovered(&mut self, case_id: CaseId, acting_user_id: UserId) -> DeskResult<DeskEvent> {
        self.transition(case_id, CaseStatus::Recovered, acting_user_id)
    }

    pub fn close_case(&mut self, case_id: CaseId, acting_user_id: UserId) -> DeskResult<DeskEvent> {
        self.transition(case_id, CaseStatus::Closed, acting_user_id)
    }

    /// Add a payment to the recovered amount. A payment that brings the
    /// case to its full amount due also marks it recovered.
    pub fn record_payment(
        &mut self,
        case_id: CaseId,
        amount: f64,
        acting_user_id: UserId,
    ) -> DeskResult<Vec<DeskEvent>> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(DeskError::Validation(format!(
                "payment amount must be > 0, got {amount}"
            )));
        }
        let at = self.clock.now();
        let scope = self.store.write()?;
        scope.user(acting_user_id)?;
        let mut case = scope.case(case_id)?;
        if !case.status.is_open() {
            return Err(DeskError::InvalidState(format!(
                "case {} is {} and cannot take payments",
                case.case_number, case.status
            )));
        }
        let mut recovered_amount = case.recovered_amount + amount;
        if recovered_amount > case.amount_due + AMOUNT_EPSILON {
            return Err(DeskError::Validation(format!(
                "payment {amount} would exceed outstanding {} on case {}",
                case.outstanding(),
                case.case_number
            )));
        }
        let settled = recovered_amount >= case.amount_due - AMOUNT_EPSILON;
        if settled {
            // Snap so the stored total never exceeds amount_due.
            recovered_amount = case.amount_due;
        }
        case.recovered_amount = recovered_amount;

        let mut events = vec![DeskEvent::PaymentRecorded {
            at,
            case_id,
            amount,
            recovered_amount,
            acting_user_id,
        }];
        if settled {
            let old_status = case.status;
            apply_status(&mut case, CaseStatus::Recovered, at);
            events.push(DeskEvent::CaseStatusChanged {
                at,
                case_id,
                old_status,
                new_status: CaseStatus::Recovered,
                acting_user_id,
            });
        }
        scope.save_progress(&case, at)?;
        scope.commit()?;
        log::info!(
            "lifecycle: case {} paid {amount:.2}, recovered {recovered_amount:.2}/{:.2}",
            case.case_number,
            case.amount_due
        );
        Ok(events)
    }

    fn transition(
        &mut self,
        case_id: CaseId,
        next: CaseStatus,
        acting_user_id: UserId,
    ) -> DeskResult<DeskEvent> {
        let at = self.clock.now();
        let scope = self.store.write()?;
        scope.user(acting_user_id)?;
        let mut case = scope.case(case_id)?;
        let old_status = case.status;
        if !old_status.can_transition_to(next) {
            return Err(DeskError::InvalidState(format!(
                "case {} cannot move from {old_status} to {next}",
                case.case_number
            )));
        }
        apply_status(&mut case, next, at);
        scope.save_progress(&case, at)?;
        scope.commit()?;
        log::info!(
            "lifecycle: case {} {old_status} -> {next} by user {acting_user_id}",
            case.case_number
        );
        Ok(DeskEvent::CaseStatusChanged {
            at,
            case_id,
            old_status,
            new_status: next,
            acting_user_id,
        })
    }
}

/// Set the status and stamp the matching resolution time once.
fn apply_status(case: &mut RecoveryCase, next: CaseStatus, at: DateTime<Utc>) {
    case.status = next;
    match next {
        CaseStatus::Recovered => {
            case.recovered_at.get_or_insert(at);
        }
        CaseStatus::Closed => {
            case.closed_at.get_or_insert(at);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_without_agency_is_rejected() {
        let req = AllocationRequest {
            case_id: 1,
            agency_id: None,
            acting_user_id: 1,
            reason: None,
            method: AllocationMethod::Manual,
        };
        assert_eq!(req.check_shape().unwrap_err().kind(), "validation");
    }

    #[test]
    fn policy_with_agency_is_rejected() {
        let mut req = AllocationRequest::by_policy(1, AllocationMethod::Auto, 1);
        assert!(req.check_shape().is_ok());
        req.agency_id = Some(4);
        assert_eq!(req.check_shape().unwrap_err().kind(), "validation");
    }
}
