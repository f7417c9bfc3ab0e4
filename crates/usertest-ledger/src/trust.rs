use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tester reputation tier. Ordered so promotion can never demote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    #[default]
    New,
    Regular,
    Trusted,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::New => "new",
            TrustLevel::Regular => "regular",
            TrustLevel::Trusted => "trusted",
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(TrustLevel::New),
            "regular" => Ok(TrustLevel::Regular),
            "trusted" => Ok(TrustLevel::Trusted),
            other => Err(format!("unknown trust level: {}", other)),
        }
    }
}

/// Completed-task counts at which a tester is promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustThresholds {
    pub regular_at: u32,
    pub trusted_at: u32,
}

impl Default for TrustThresholds {
    fn default() -> Self {
        Self {
            regular_at: 5,
            trusted_at: 20,
        }
    }
}

impl TrustThresholds {
    pub fn level_for(&self, completed_tasks: u32) -> TrustLevel {
        if completed_tasks >= self.trusted_at {
            TrustLevel::Trusted
        } else if completed_tasks >= self.regular_at {
            TrustLevel::Regular
        } else {
            TrustLevel::New
        }
    }

    /// Level after reaching `completed_tasks`; never lower than `current`.
    pub fn promote(&self, current: TrustLevel, completed_tasks: u32) -> TrustLevel {
        current.max(self.level_for(completed_tasks))
    }
}

/// How long an approved tester's earnings are held before they can be withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldPolicy {
    pub new_days: u32,
    pub regular_days: u32,
    pub trusted_days: u32,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            new_days: 7,
            regular_days: 3,
            trusted_days: 0,
        }
    }
}

impl HoldPolicy {
    pub fn hold_days(&self, level: TrustLevel) -> u32 {
        match level {
            TrustLevel::New => self.new_days,
            TrustLevel::Regular => self.regular_days,
            TrustLevel::Trusted => self.trusted_days,
        }
    }

    pub fn hold_for(&self, level: TrustLevel) -> Duration {
        Duration::days(i64::from(self.hold_days(level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hold_mapping() {
        let policy = HoldPolicy::default();
        assert_eq!(policy.hold_for(TrustLevel::New), Duration::days(7));
        assert_eq!(policy.hold_for(TrustLevel::Regular), Duration::days(3));
        assert_eq!(policy.hold_for(TrustLevel::Trusted), Duration::zero());
    }

    #[test]
    fn test_promotion_thresholds() {
        let t = TrustThresholds::default();
        assert_eq!(t.promote(TrustLevel::New, 4), TrustLevel::New);
        assert_eq!(t.promote(TrustLevel::New, 5), TrustLevel::Regular);
        assert_eq!(t.promote(TrustLevel::Regular, 19), TrustLevel::Regular);
        assert_eq!(t.promote(TrustLevel::Regular, 20), TrustLevel::Trusted);
    }

    #[test]
    fn test_promotion_never_demotes() {
        let t = TrustThresholds::default();
        // A trusted tester imported with a low count keeps the tier.
        assert_eq!(t.promote(TrustLevel::Trusted, 1), TrustLevel::Trusted);
        assert_eq!(t.promote(TrustLevel::Regular, 0), TrustLevel::Regular);
    }
}
