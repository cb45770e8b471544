//! Subscription round types.
//!
//! A round is a time- and capacity-bounded window during which new
//! deposits are admitted. Rounds are append-only history: closed rounds
//! stay on record with the reason they closed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RoundId;

/// Why a round stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    /// An admin closed it.
    Manual,
    /// Its end time passed and it was closed lazily.
    Expired,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "MANUAL"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// One subscription round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionRound {
    pub id: RoundId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Maximum number of admitted deposits.
    pub capacity: u64,
    pub admitted_count: u64,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl SubscriptionRound {
    /// Admitting iff flagged active, `now ∈ [start, end)`, and capacity remains.
    #[must_use]
    pub fn is_admitting(&self, now: DateTime<Utc>) -> bool {
        self.active
            && now >= self.start_time
            && now < self.end_time
            && self.admitted_count < self.capacity
    }

    /// Flagged active but past its end time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.active && now >= self.end_time
    }

    /// Deposits still admissible in this round.
    #[must_use]
    pub fn remaining_capacity(&self) -> u64 {
        self.capacity.saturating_sub(self.admitted_count)
    }

    /// Why the round is not admitting at `now`, if it isn't.
    #[must_use]
    pub fn ineligibility(&self, now: DateTime<Utc>) -> Option<String> {
        if !self.active {
            Some(format!("round {} is closed", self.id))
        } else if now < self.start_time {
            Some(format!("round {} opens at {}", self.id, self.start_time))
        } else if now >= self.end_time {
            Some(format!("round {} ended at {}", self.id, self.end_time))
        } else if self.admitted_count >= self.capacity {
            Some(format!(
                "round {} capacity of {} deposits reached",
                self.id, self.capacity
            ))
        } else {
            None
        }
    }
}

/// Outcome of a read-only deposit pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    /// The round the deposit would count against, if any.
    pub round_id: Option<RoundId>,
    /// Human-readable reason when ineligible.
    pub reason: Option<String>,
}

impl Eligibility {
    #[must_use]
    pub fn eligible(round_id: RoundId) -> Self {
        Self {
            eligible: true,
            round_id: Some(round_id),
            reason: None,
        }
    }

    #[must_use]
    pub fn ineligible(round_id: Option<RoundId>, reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            round_id,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn round(now: DateTime<Utc>) -> SubscriptionRound {
        SubscriptionRound {
            id: RoundId(1),
            name: "genesis".into(),
            start_time: now,
            end_time: now + Duration::hours(1),
            capacity: 2,
            admitted_count: 0,
            active: true,
            opened_at: now,
            closed_at: None,
            close_reason: None,
        }
    }

    #[test]
    fn admitting_window_is_half_open() {
        let now = Utc::now();
        let r = round(now);
        assert!(r.is_admitting(now));
        assert!(r.is_admitting(now + Duration::minutes(59)));
        assert!(!r.is_admitting(now + Duration::hours(1)));
        assert!(!r.is_admitting(now - Duration::seconds(1)));
    }

    #[test]
    fn capacity_exhaustion_stops_admission() {
        let now = Utc::now();
        let mut r = round(now);
        r.admitted_count = 2;
        assert!(!r.is_admitting(now));
        assert_eq!(r.remaining_capacity(), 0);
        assert!(r.ineligibility(now).unwrap().contains("capacity"));
    }

    #[test]
    fn expiry_only_applies_to_active_rounds() {
        let now = Utc::now();
        let mut r = round(now);
        assert!(r.is_expired(now + Duration::hours(2)));
        r.active = false;
        assert!(!r.is_expired(now + Duration::hours(2)));
        assert!(r.ineligibility(now).unwrap().contains("closed"));
    }
}
