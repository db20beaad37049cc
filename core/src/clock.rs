//! Desk clock, the single source of "now" for allocation and lifecycle
//! timestamps.
//!
//! Production uses the wall clock. Tests pin time and advance it by hand so
//! recovery times and SLA outcomes are exact.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeskClock {
    System,
    Manual { now: DateTime<Utc> },
}

impl DeskClock {
    pub fn system() -> Self {
        Self::System
    }

    pub fn manual(now: DateTime<Utc>) -> Self {
        Self::Manual { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Manual { now } => *now,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Move a manual clock forward. Panics on the system clock: only tests
    /// and replay tooling drive time by hand.
    pub fn advance(&mut self, by: Duration) -> DateTime<Utc> {
        match self {
            Self::System => panic!("advance() called on system clock"),
            Self::Manual { now } => {
                *now += by;
                *now
            }
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

impl Default for DeskClock {
    fn default() -> Self {
        Self::System
    }
}
