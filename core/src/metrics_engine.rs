//! Metrics engine: recovery and SLA figures derived from stored cases.
//!
//! The four portfolio metrics are read-only and independent of each other.
//! Empty stores are normal: every metric has a defined zero/empty answer.
//!
//! The one write path, `refresh_agency_performance`, persists per-agency
//! figures so rankings can be read without recomputation.

use crate::{
    clock::DeskClock,
    error::DeskResult,
    event::DeskEvent,
    model::{DcaAgency, RecoveryCase},
    store::CaseStore,
    types::{AgencyId, CaseStatus},
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgencyRanking {
    pub agency_id: AgencyId,
    pub code: String,
    pub name: String,
    pub recovery_rate: f64,
    pub sla_compliance: f64,
}

impl From<&DcaAgency> for AgencyRanking {
    fn from(a: &DcaAgency) -> Self {
        Self {
            agency_id: a.id,
            code: a.code.clone(),
            name: a.name.clone(),
            recovery_rate: a.recovery_rate,
            sla_compliance: a.sla_compliance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Percentage of all amounts due that has been recovered.
    pub recovery_rate: f64,
    /// Mean days from allocation to recovery. `None` until a case recovers.
    pub average_recovery_time: Option<f64>,
    /// Percentage of deadline-bearing cases resolved on time.
    pub sla_compliance: f64,
    pub top_agencies: Vec<AgencyRanking>,
}

/// Ranking order: recovery rate desc, SLA compliance desc, code asc.
/// Total, so sorted output is stable across runs.
pub fn performance_order(a: &DcaAgency, b: &DcaAgency) -> Ordering {
    b.recovery_rate
        .total_cmp(&a.recovery_rate)
        .then_with(|| b.sla_compliance.total_cmp(&a.sla_compliance))
        .then_with(|| a.code.cmp(&b.code))
}

/// Σ recovered / Σ due × 100, or 0 when nothing is due.
pub fn recovery_rate_of(total_recovered: f64, total_due: f64) -> f64 {
    if total_due > 0.0 {
        total_recovered / total_due * 100.0
    } else {
        0.0
    }
}

/// Mean days between allocation and recovery over cases that recovered.
pub fn average_recovery_days(cases: &[RecoveryCase]) -> Option<f64> {
    let durations: Vec<f64> = cases
        .iter()
        .filter_map(|c| match (c.allocated_at, c.recovered_at) {
            (Some(allocated), Some(recovered)) => {
                Some((recovered - allocated).num_seconds() as f64 / SECONDS_PER_DAY)
            }
            _ => None,
        })
        .collect();
    if durations.is_empty() {
        return None;
    }
    Some(durations.iter().sum::<f64>() / durations.len() as f64)
}

/// On-time share of cases that carry a deadline, as a percentage. `None`
/// when no case has a deadline. Unresolved cases count against compliance.
pub fn sla_compliance_ratio(cases: &[RecoveryCase]) -> Option<f64> {
    let mut with_deadline = 0usize;
    let mut on_time = 0usize;
    for c in cases {
        let Some(deadline) = c.sla_deadline else {
            continue;
        };
        with_deadline += 1;
        let resolved_in_time = matches!(c.status, CaseStatus::Recovered | CaseStatus::Closed)
            && c.resolved_at().is_some_and(|at| at <= deadline);
        if resolved_in_time {
            on_time += 1;
        }
    }
    (with_deadline > 0).then(|| on_time as f64 / with_deadline as f64 * 100.0)
}

/// Top `n` active agencies in ranking order.
pub fn rank_agencies(agencies: &[DcaAgency], n: usize) -> Vec<AgencyRanking> {
    let mut active: Vec<&DcaAgency> = agencies.iter().filter(|a| a.is_active()).collect();
    active.sort_by(|a, b| performance_order(a, b));
    active.into_iter().take(n).map(AgencyRanking::from).collect()
}

pub struct MetricsEngine<'s> {
    store: &'s CaseStore,
}

impl<'s> MetricsEngine<'s> {
    pub fn new(store: &'s CaseStore) -> Self {
        Self { store }
    }

    pub fn recovery_rate(&self) -> DeskResult<f64> {
        let totals = self.store.case_totals()?;
        Ok(recovery_rate_of(totals.total_recovered, totals.total_due))
    }

    /// In days.
    pub fn average_recovery_time(&self) -> DeskResult<Option<f64>> {
        Ok(average_recovery_days(&self.store.cases()?))
    }

    pub fn sla_compliance(&self) -> DeskResult<f64> {
        Ok(sla_compliance_ratio(&self.store.cases()?).unwrap_or(0.0))
    }

    pub fn top_performing_agencies(&self, n: usize) -> DeskResult<Vec<AgencyRanking>> {
        Ok(rank_agencies(&self.store.active_agencies()?, n))
    }

    pub fn snapshot(&self, top_n: usize) -> DeskResult<MetricsSnapshot> {
        let totals = self.store.case_totals()?;
        let cases = self.store.cases()?;
        let snapshot = MetricsSnapshot {
            recovery_rate: recovery_rate_of(totals.total_recovered, totals.total_due),
            average_recovery_time: average_recovery_days(&cases),
            sla_compliance: sla_compliance_ratio(&cases).unwrap_or(0.0),
            top_agencies: rank_agencies(&self.store.active_agencies()?, top_n),
        };
        log::debug!(
            "metrics: cases={} recovery_rate={:.2} sla={:.2} top={}",
            cases.len(),
            snapshot.recovery_rate,
            snapshot.sla_compliance,
            snapshot.top_agencies.len()
        );
        Ok(snapshot)
    }
}

/// Recompute every agency's recovery rate and SLA compliance from the cases
/// it currently holds, and persist them in one transaction. Agencies holding
/// no cases keep their figures; so does the SLA figure of an agency none of
/// whose cases carries a deadline.
pub fn refresh_agency_performance(
    store: &mut CaseStore,
    clock: &DeskClock,
) -> DeskResult<Vec<DeskEvent>> {
    let at = clock.now();
    let mut updates = Vec::new();
    for agency in store.agencies()? {
        let cases = store.cases_for_agency(agency.id)?;
        if cases.is_empty() {
            continue;
        }
        let due: f64 = cases.iter().map(|c| c.amount_due).sum();
        let recovered: f64 = cases.iter().map(|c| c.recovered_amount).sum();
        let recovery_rate = recovery_rate_of(recovered, due);
        let sla_compliance = sla_compliance_ratio(&cases).unwrap_or(agency.sla_compliance);
        updates.push((agency.id, recovery_rate, sla_compliance));
    }

    let scope = store.write()?;
    let mut events = Vec::with_capacity(updates.len());
    for (agency_id, recovery_rate, sla_compliance) in updates {
        scope.write_agency_performance(agency_id, recovery_rate, sla_compliance)?;
        events.push(DeskEvent::AgencyPerformanceRefreshed {
            at,
            agency_id,
            recovery_rate,
            sla_compliance,
        });
    }
    scope.commit()?;
    log::info!("metrics: refreshed performance for {} agencies", events.len());
    Ok(events)
}
