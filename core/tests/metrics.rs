//! Metrics engine tests: portfolio recovery figures, SLA compliance,
//! agency ranking and the performance refresh.

use chrono::Duration;
use dca_core::allocation_engine::AllocationRequest;
use dca_core::engine::DeskEngine;
use dca_core::error::DeskResult;
use dca_core::model::{NewAccount, NewAgency, NewCase};
use dca_core::types::{AccountId, AgencyId, AgencyStatus, CaseId, Priority, UserId};

struct Desk {
    engine: DeskEngine,
    user: UserId,
    account: AccountId,
}

fn build() -> Desk {
    let engine = DeskEngine::build_test().expect("build test engine");
    let user = engine.register_user("metrics@desk.test", "metrics", "analyst").unwrap().id;
    let account = engine
        .register_account(&NewAccount {
            account_number: "ACC-3001".into(),
            customer_name: "Priya Lindqvist".into(),
            ..Default::default()
        })
        .unwrap()
        .id;
    Desk {
        engine,
        user,
        account,
    }
}

fn agency(desk: &Desk, code: &str, rate: f64, sla: f64) -> AgencyId {
    desk.engine
        .register_agency(&NewAgency::new(code, format!("Agency {code}")).with_performance(rate, sla))
        .unwrap()
        .id
}

fn allocated(desk: &mut Desk, number: &str, amount: f64, priority: Priority, agency: AgencyId) -> CaseId {
    let case = desk
        .engine
        .open_case(&NewCase::new(number, desk.account, amount).with_priority(priority))
        .unwrap();
    desk.engine
        .allocate(&AllocationRequest::manual(case.id, agency, desk.user))
        .unwrap();
    case.id
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Empty desk: zero rates, no recovery time, no ranked agencies.
#[test]
fn empty_desk_snapshot_is_neutral() -> DeskResult<()> {
    let desk = build();
    let snapshot = desk.engine.metrics_snapshot()?;
    assert_eq!(snapshot.recovery_rate, 0.0);
    assert_eq!(snapshot.average_recovery_time, None);
    assert_eq!(snapshot.sla_compliance, 0.0);
    assert!(snapshot.top_agencies.is_empty());
    Ok(())
}

#[test]
fn recovery_rate_is_recovered_over_due() -> DeskResult<()> {
    let mut desk = build();
    let a = agency(&desk, "A1", 0.0, 0.0);
    let first = allocated(&mut desk, "CASE-1", 1_000.0, Priority::Medium, a);
    allocated(&mut desk, "CASE-2", 500.0, Priority::Medium, a);
    desk.engine.record_payment(first, 250.0, desk.user)?;

    let rate = desk.engine.metrics().recovery_rate()?;
    assert!(approx(rate, 250.0 / 1_500.0 * 100.0), "rate was {rate}");
    assert!((0.0..=100.0).contains(&rate));
    Ok(())
}

#[test]
fn average_recovery_time_counts_days_from_allocation() -> DeskResult<()> {
    let mut desk = build();
    let a = agency(&desk, "A1", 0.0, 0.0);
    let quick = allocated(&mut desk, "CASE-Q", 100.0, Priority::Medium, a);
    let slow = allocated(&mut desk, "CASE-S", 100.0, Priority::Medium, a);
    allocated(&mut desk, "CASE-OPEN", 100.0, Priority::Medium, a);

    desk.engine.clock.advance(Duration::days(4));
    desk.engine.mark_recovered(quick, desk.user)?;
    desk.engine.clock.advance(Duration::days(6));
    desk.engine.record_payment(slow, 100.0, desk.user)?;

    let avg = desk.engine.metrics().average_recovery_time()?.expect("two recovered cases");
    assert!(approx(avg, 7.0), "average was {avg}");
    Ok(())
}

/// Cases without a deadline do not move SLA compliance either way.
#[test]
fn sla_compliance_ignores_cases_without_deadline() -> DeskResult<()> {
    let mut desk = build();
    let a = agency(&desk, "A1", 0.0, 0.0);
    let on_time = allocated(&mut desk, "CASE-OK", 100.0, Priority::Medium, a);
    allocated(&mut desk, "CASE-OPEN", 100.0, Priority::High, a);
    let late = allocated(&mut desk, "CASE-LATE", 100.0, Priority::High, a);

    desk.engine.clock.advance(Duration::days(5));
    desk.engine.mark_recovered(on_time, desk.user)?;
    desk.engine.clock.advance(Duration::days(15));
    desk.engine.mark_recovered(late, desk.user)?;

    let before = desk.engine.metrics().sla_compliance()?;
    assert!(approx(before, 100.0 / 3.0), "compliance was {before}");

    desk.engine.open_case(&NewCase::new("CASE-NODEADLINE", desk.account, 900.0))?;
    let after = desk.engine.metrics().sla_compliance()?;
    assert!(approx(before, after));
    Ok(())
}

#[test]
fn top_agencies_skip_inactive_and_rank_by_recovery_rate() -> DeskResult<()> {
    let desk = build();
    agency(&desk, "A1", 80.0, 90.0);
    agency(&desk, "A2", 85.0, 70.0);
    let a3 = agency(&desk, "A3", 99.0, 99.0);
    desk.engine.store.set_agency_status(a3, AgencyStatus::Inactive)?;

    let top = desk.engine.metrics().top_performing_agencies(5)?;
    let codes: Vec<&str> = top.iter().map(|a| a.code.as_str()).collect();
    assert_eq!(codes, ["A2", "A1"]);

    let first_only = desk.engine.metrics().top_performing_agencies(1)?;
    assert_eq!(first_only.len(), 1);
    assert_eq!(first_only[0].code, "A2");
    Ok(())
}

/// Equal recovery rates fall back to SLA compliance.
#[test]
fn top_two_by_rate_then_sla() -> DeskResult<()> {
    let desk = build();
    agency(&desk, "A1", 80.0, 90.0);
    agency(&desk, "A2", 80.0, 95.0);
    agency(&desk, "A3", 60.0, 99.0);

    let top = desk.engine.metrics().top_performing_agencies(2)?;
    let codes: Vec<&str> = top.iter().map(|a| a.code.as_str()).collect();
    assert_eq!(codes, ["A2", "A1"]);
    Ok(())
}

#[test]
fn ranking_ties_break_on_sla_then_code() -> DeskResult<()> {
    let desk = build();
    agency(&desk, "B", 70.0, 50.0);
    agency(&desk, "C", 70.0, 60.0);
    agency(&desk, "A", 70.0, 50.0);

    let codes: Vec<String> = desk
        .engine
        .metrics_snapshot()?
        .top_agencies
        .into_iter()
        .map(|a| a.code)
        .collect();
    assert_eq!(codes, ["C", "A", "B"]);
    Ok(())
}

#[test]
fn refresh_recomputes_agencies_holding_cases() -> DeskResult<()> {
    let mut desk = build();
    let busy = agency(&desk, "BUSY", 10.0, 10.0);
    let idle = agency(&desk, "IDLE", 42.0, 64.0);
    let paid = allocated(&mut desk, "CASE-1", 1_000.0, Priority::Medium, busy);
    allocated(&mut desk, "CASE-2", 1_000.0, Priority::Medium, busy);

    desk.engine.clock.advance(Duration::days(3));
    desk.engine.record_payment(paid, 1_000.0, desk.user)?;

    let events = desk.engine.refresh_agency_performance()?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "agency_performance_refreshed");

    let refreshed = desk.engine.store.agency(busy)?;
    assert!(approx(refreshed.recovery_rate, 50.0));
    assert!(approx(refreshed.sla_compliance, 50.0));

    let untouched = desk.engine.store.agency(idle)?;
    assert_eq!(untouched.recovery_rate, 42.0);
    assert_eq!(untouched.sla_compliance, 64.0);
    Ok(())
}

#[test]
fn performance_override_is_blocked_once_cases_reference_agency() -> DeskResult<()> {
    let mut desk = build();
    let used = agency(&desk, "USED", 10.0, 10.0);
    let fresh = agency(&desk, "FRESH", 10.0, 10.0);
    allocated(&mut desk, "CASE-1", 100.0, Priority::Low, used);

    let err = desk
        .engine
        .store
        .override_agency_performance(used, 90.0, 90.0)
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_state");

    desk.engine.store.override_agency_performance(fresh, 75.0, 80.0)?;
    let updated = desk.engine.store.agency(fresh)?;
    assert_eq!(updated.recovery_rate, 75.0);
    assert_eq!(updated.sla_compliance, 80.0);
    Ok(())
}
