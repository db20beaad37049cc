//! Case allocation and recovery metrics for debt-collection-agency desks.
//!
//! Customer accounts, collection agencies, recovery cases and the append-only
//! allocation log live in a SQLite store. The allocation engine assigns
//! cases to agencies; the metrics engine derives recovery rate, recovery
//! time, SLA compliance and agency rankings from the stored history.

pub mod allocation_engine;
pub mod allocation_policy;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics_engine;
pub mod model;
pub mod store;
pub mod types;
