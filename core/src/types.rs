//! Shared primitive types used across the desk.

use crate::error::{DeskError, DeskResult};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Surrogate row id for every stored entity.
pub type EntityId = i64;

pub type CaseId = EntityId;
pub type AgencyId = EntityId;
pub type AccountId = EntityId;
pub type UserId = EntityId;

/// Maps a closed string vocabulary onto an enum, both for SQL columns and
/// for caller input. Unknown values are validation errors.
macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DeskError;

            fn from_str(s: &str) -> DeskResult<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(DeskError::Validation(format!(
                        "unknown {} '{other}'",
                        $label
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: DeskError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    Allocated,
    Active,
    Recovered,
    Closed,
}

string_enum!(CaseStatus, "case status", {
    Pending => "pending",
    Allocated => "allocated",
    Active => "active",
    Recovered => "recovered",
    Closed => "closed",
});

impl CaseStatus {
    /// Every status except `Pending` carries an agency reference.
    pub fn requires_agency(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Allocation (and reassignment) is legal until the case is resolved.
    pub fn accepts_allocation(&self) -> bool {
        matches!(self, Self::Pending | Self::Allocated | Self::Active)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Allocated | Self::Active)
    }

    /// Lifecycle moves outside of allocation itself.
    pub fn can_transition_to(&self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        matches!(
            (self, next),
            (Allocated, Active)
                | (Allocated, Recovered)
                | (Active, Recovered)
                | (Allocated, Closed)
                | (Active, Closed)
                | (Recovered, Closed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

string_enum!(Priority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgencyStatus {
    Active,
    Inactive,
}

string_enum!(AgencyStatus, "agency status", {
    Active => "active",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationMethod {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "priority-based")]
    PriorityBased,
}

string_enum!(AllocationMethod, "allocation method", {
    Auto => "auto",
    Manual => "manual",
    PriorityBased => "priority-based",
});

/// Status filter accepted by case listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(CaseStatus),
}

impl FromStr for StatusFilter {
    type Err = DeskError;

    fn from_str(s: &str) -> DeskResult<Self> {
        match s {
            "all" => Ok(Self::All),
            other => other.parse().map(Self::Only),
        }
    }
}

impl Default for StatusFilter {
    fn default() -> Self {
        Self::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_strings_match_stored_vocabulary() {
        assert_eq!(AllocationMethod::PriorityBased.as_str(), "priority-based");
        assert_eq!(
            "priority-based".parse::<AllocationMethod>().unwrap(),
            AllocationMethod::PriorityBased
        );
        assert_eq!(
            serde_json::to_string(&AllocationMethod::PriorityBased).unwrap(),
            "\"priority-based\""
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "archived".parse::<CaseStatus>().unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!("archived".parse::<StatusFilter>().is_err());
        assert_eq!("all".parse::<StatusFilter>().unwrap(), StatusFilter::All);
    }

    #[test]
    fn resolved_cases_refuse_allocation() {
        assert!(!CaseStatus::Closed.accepts_allocation());
        assert!(!CaseStatus::Recovered.accepts_allocation());
        assert!(CaseStatus::Active.accepts_allocation());
        assert!(!CaseStatus::Pending.can_transition_to(CaseStatus::Closed));
        assert!(CaseStatus::Recovered.can_transition_to(CaseStatus::Closed));
    }
}
