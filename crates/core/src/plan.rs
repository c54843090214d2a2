//! Subscription plans and the features they unlock.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription tier of an owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Team,
}

/// Capabilities that may be gated by plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    VersionHistory,
    Rollback,
    SmartSearch,
    DuplicateDetection,
    LinkHealth,
    ScheduledSync,
}

impl Plan {
    /// Number of versions the ledger retains for this plan.
    pub fn max_versions(&self) -> usize {
        match self {
            Self::Free => 5,
            Self::Pro => 30,
            Self::Team => 100,
        }
    }

    /// Whether this plan unlocks `feature`.
    ///
    /// The final arm is the default: any feature not gated above is
    /// available on every plan.
    pub fn allows(&self, feature: Feature) -> bool {
        match feature {
            Feature::Rollback
            | Feature::SmartSearch
            | Feature::DuplicateDetection
            | Feature::LinkHealth
            | Feature::ScheduledSync => *self != Self::Free,
            _ => true,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
            Self::Team => write!(f, "team"),
        }
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "team" => Ok(Self::Team),
            other => Err(format!("unknown plan '{other}'")),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VersionHistory => "version_history",
            Self::Rollback => "rollback",
            Self::SmartSearch => "smart_search",
            Self::DuplicateDetection => "duplicate_detection",
            Self::LinkHealth => "link_health",
            Self::ScheduledSync => "scheduled_sync",
        };
        f.write_str(name)
    }
}
