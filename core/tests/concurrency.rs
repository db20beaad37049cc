//! Two connections racing on one database file.

use dca_core::allocation_engine::AllocationRequest;
use dca_core::clock::DeskClock;
use dca_core::config::DeskConfig;
use dca_core::engine::DeskEngine;
use dca_core::error::{DeskError, DeskResult};
use dca_core::model::{NewAccount, NewAgency, NewCase};
use dca_core::store::CaseStore;
use dca_core::types::{AgencyId, CaseId, UserId};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

struct Seed {
    case: CaseId,
    agencies: [AgencyId; 2],
    user: UserId,
}

fn seed(path: &str) -> DeskResult<Seed> {
    let engine = DeskEngine::open(path, DeskConfig::default_test(), DeskClock::system())?;
    let user = engine.register_user("race@desk.test", "race", "agent")?.id;
    let account = engine.register_account(&NewAccount {
        account_number: "ACC-9001".into(),
        customer_name: "Jordan Vale".into(),
        ..Default::default()
    })?;
    let first = engine.register_agency(&NewAgency::new("R1", "Riverside Collections"))?;
    let second = engine.register_agency(&NewAgency::new("R2", "Ridgeway Recovery"))?;
    let case = engine.open_case(&NewCase::new("CASE-RACE", account.id, 2_000.0))?;
    Ok(Seed {
        case: case.id,
        agencies: [first.id, second.id],
        user,
    })
}

/// Both writers either succeed one after the other or fail with a retryable
/// conflict; the case ends up pointing at the last successful allocation.
#[test]
fn concurrent_allocations_serialize() -> DeskResult<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().map_err(anyhow::Error::from)?;
    let path = dir.path().join("desk.db").to_string_lossy().into_owned();
    let seed = seed(&path)?;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = seed
        .agencies
        .iter()
        .map(|&agency| {
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            let (case, user) = (seed.case, seed.user);
            thread::spawn(move || -> DeskResult<i64> {
                let store = CaseStore::open_with_timeout(&path, Duration::from_secs(10))?;
                let mut engine =
                    DeskEngine::new(store, DeskConfig::default_test(), DeskClock::system());
                barrier.wait();
                let outcome = engine.allocate(&AllocationRequest::manual(case, agency, user))?;
                Ok(outcome.allocation.id)
            })
        })
        .collect();

    let results: Vec<DeskResult<i64>> = handles
        .into_iter()
        .map(|h| h.join().expect("allocation thread panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(err.is_retryable(), "unexpected failure: {err:?}");
    }
    assert!(successes >= 1);

    let check = CaseStore::open(&path)?;
    assert_eq!(check.allocation_count()?, successes as i64);
    let engine = DeskEngine::new(check, DeskConfig::default_test(), DeskClock::system());
    engine.verify_case(seed.case)
}

#[test]
fn locked_database_is_a_retryable_conflict() -> DeskResult<()> {
    let dir = tempfile::tempdir().map_err(anyhow::Error::from)?;
    let path = dir.path().join("desk.db").to_string_lossy().into_owned();
    seed(&path)?;

    let mut holder = CaseStore::open_with_timeout(&path, Duration::from_secs(10))?;
    let mut waiter = CaseStore::open_with_timeout(&path, Duration::from_millis(50))?;

    let scope = holder.write()?;
    match waiter.write() {
        Err(err @ DeskError::Conflict(_)) => assert!(err.is_retryable()),
        Err(other) => panic!("expected Conflict, got {other:?}"),
        Ok(_) => panic!("second writer should not get the lock"),
    }
    drop(scope);

    assert!(waiter.write()?.commit().is_ok());
    Ok(())
}

/// A performance override waits for the writer lock like an allocation does.
#[test]
fn performance_override_takes_the_writer_lock() -> DeskResult<()> {
    let dir = tempfile::tempdir().map_err(anyhow::Error::from)?;
    let path = dir.path().join("desk.db").to_string_lossy().into_owned();
    let seed = seed(&path)?;
    let agency = seed.agencies[1];

    let mut holder = CaseStore::open_with_timeout(&path, Duration::from_secs(10))?;
    let mut waiter = CaseStore::open_with_timeout(&path, Duration::from_millis(50))?;

    let scope = holder.write()?;
    let err = waiter
        .override_agency_performance(agency, 88.0, 77.0)
        .unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    drop(scope);

    assert_eq!(waiter.agency(agency)?.recovery_rate, 0.0);
    waiter.override_agency_performance(agency, 88.0, 77.0)?;
    let updated = waiter.agency(agency)?;
    assert_eq!(updated.recovery_rate, 88.0);
    assert_eq!(updated.sla_compliance, 77.0);
    Ok(())
}

/// Once the allocation commits, the override sees the new reference.
#[test]
fn performance_override_sees_committed_allocation() -> DeskResult<()> {
    let dir = tempfile::tempdir().map_err(anyhow::Error::from)?;
    let path = dir.path().join("desk.db").to_string_lossy().into_owned();
    let seed = seed(&path)?;
    let agency = seed.agencies[0];

    let mut allocator = DeskEngine::new(
        CaseStore::open_with_timeout(&path, Duration::from_secs(10))?,
        DeskConfig::default_test(),
        DeskClock::system(),
    );
    let mut editor = CaseStore::open_with_timeout(&path, Duration::from_secs(10))?;

    allocator.allocate(&AllocationRequest::manual(seed.case, agency, seed.user))?;
    let err = editor
        .override_agency_performance(agency, 50.0, 50.0)
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_state");
    Ok(())
}
