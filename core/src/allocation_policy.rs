//! Agency selection for policy-driven allocation.
//!
//! RULE: selection is pure. It sees a snapshot of candidates and their load
//! and returns a choice; it never touches the store or case state. The
//! allocation engine owns every state transition.

use crate::{
    metrics_engine::performance_order,
    model::DcaAgency,
    types::{AgencyId, AllocationMethod, Priority},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRule {
    /// Fewest open cases; ties by code.
    LeastLoaded,
    /// Ranking order: recovery rate, then SLA compliance, then code.
    HighestRecoveryRate,
    /// Next code after the agency that took the most recent allocation.
    RoundRobin,
}

/// What the selector is allowed to look at.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInputs<'a> {
    pub candidates: &'a [DcaAgency],
    pub open_load: &'a HashMap<AgencyId, u32>,
    pub last_allocated_code: Option<&'a str>,
}

/// The rule a method applies to a case. `None` means the caller names the
/// agency (manual).
pub fn rule_for(
    method: AllocationMethod,
    priority: Priority,
    auto_rule: SelectionRule,
) -> Option<SelectionRule> {
    match method {
        AllocationMethod::Manual => None,
        AllocationMethod::Auto => Some(auto_rule),
        AllocationMethod::PriorityBased => match priority {
            Priority::High => Some(SelectionRule::HighestRecoveryRate),
            Priority::Medium | Priority::Low => Some(auto_rule),
        },
    }
}

/// Agencies a policy may pick: active and under contract on `today`.
pub fn eligible(agencies: Vec<DcaAgency>, today: NaiveDate) -> Vec<DcaAgency> {
    agencies
        .into_iter()
        .filter(|a| a.is_active() && a.under_contract_on(today))
        .collect()
}

pub fn select<'a>(rule: SelectionRule, inputs: SelectionInputs<'a>) -> Option<&'a DcaAgency> {
    let mut by_code: Vec<&DcaAgency> = inputs.candidates.iter().collect();
    by_code.sort_by(|a, b| a.code.cmp(&b.code));

    match rule {
        SelectionRule::LeastLoaded => {
            let load = |a: &DcaAgency| inputs.open_load.get(&a.id).copied().unwrap_or(0);
            by_code
                .into_iter()
                .min_by(|a, b| load(a).cmp(&load(b)).then_with(|| a.code.cmp(&b.code)))
        }
        SelectionRule::HighestRecoveryRate => {
            by_code.into_iter().min_by(|a, b| performance_order(a, b))
        }
        SelectionRule::RoundRobin => {
            let next = inputs
                .last_allocated_code
                .and_then(|last| by_code.iter().find(|a| a.code.as_str() > last).copied());
            next.or_else(|| by_code.first().copied())
        }
    }
}
