//! Subscription admission window.
//!
//! Deposits are admitted only inside discrete rounds bounded by time and
//! by a maximum number of admitted deposits. At most one round is active.
//!
//! Expiry is evaluated by [`SubscriptionWindow::sweep_expired`], a function
//! of `(state, now)` that every mutating entry point calls first.
//! [`SubscriptionWindow::validate`] is strictly read-only; the admitted
//! count only moves in [`SubscriptionWindow::confirm_deposit`].

use chrono::{DateTime, Utc};
use vaultcore_types::{
    ActivityEvent, ActivityKind, Address, AuthorizationTable, CloseReason, Eligibility, Result,
    Role, RoundId, SubscriptionRound, VaultError,
};

/// Round registry. Rounds are never removed.
#[derive(Debug, Clone)]
pub struct SubscriptionWindow {
    rounds: Vec<SubscriptionRound>,
    next_id: RoundId,
    events: Vec<ActivityEvent>,
}

impl Default for SubscriptionWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionWindow {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rounds: Vec::new(),
            next_id: RoundId(1),
            events: Vec::new(),
        }
    }

    /// Close every round that is still flagged active past its end time.
    /// Returns the ids that were closed.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<RoundId> {
        let mut closed = Vec::new();
        for round in self.rounds.iter_mut().filter(|r| r.is_expired(now)) {
            round.active = false;
            round.closed_at = Some(now);
            round.close_reason = Some(CloseReason::Expired);
            closed.push(round.id);
        }
        for id in &closed {
            tracing::info!(round = %id, "Subscription round expired");
            self.events.push(
                ActivityEvent::new(ActivityKind::RoundClosed, format!("round {id} expired"), now)
                    .with_metadata(serde_json::json!({
                        "round_id": id.0,
                        "reason": CloseReason::Expired.to_string(),
                    })),
            );
        }
        closed
    }

    /// Open a new round.
    ///
    /// # Errors
    /// `Unauthorized`, `InvalidTimeRange`, `InvalidCapacity`, or
    /// `RoundAlreadyActive` if a non-expired round is still active.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        name: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        capacity: u64,
        now: DateTime<Utc>,
    ) -> Result<RoundId> {
        auth.require(Role::Admin, caller, "open subscription round")?;
        if start >= end {
            return Err(VaultError::InvalidTimeRange { start, end });
        }
        if capacity == 0 {
            return Err(VaultError::InvalidCapacity);
        }
        self.sweep_expired(now);
        if let Some(active) = self.rounds.iter().find(|r| r.active) {
            return Err(VaultError::RoundAlreadyActive(active.id));
        }

        let id = self.next_id;
        self.next_id = id.next();
        let round = SubscriptionRound {
            id,
            name: name.into(),
            start_time: start,
            end_time: end,
            capacity,
            admitted_count: 0,
            active: true,
            opened_at: now,
            closed_at: None,
            close_reason: None,
        };
        tracing::info!(
            round = %id,
            name = %round.name,
            capacity,
            start = %start,
            end = %end,
            "Subscription round opened"
        );
        self.events.push(
            ActivityEvent::new(ActivityKind::RoundOpened, format!("opened round {id}"), now)
                .with_metadata(serde_json::json!({
                    "round_id": id.0,
                    "name": round.name,
                    "capacity": capacity,
                    "start_time": start,
                    "end_time": end,
                })),
        );
        self.rounds.push(round);
        Ok(id)
    }

    /// Close the active round.
    ///
    /// # Errors
    /// `Unauthorized`, or `NoActiveRound` if none is active (an expired
    /// round is swept first and does not count).
    pub fn close(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        now: DateTime<Utc>,
    ) -> Result<RoundId> {
        auth.require(Role::Admin, caller, "close subscription round")?;
        self.sweep_expired(now);
        let round = self
            .rounds
            .iter_mut()
            .find(|r| r.active)
            .ok_or(VaultError::NoActiveRound)?;
        round.active = false;
        round.closed_at = Some(now);
        round.close_reason = Some(CloseReason::Manual);
        let id = round.id;
        let admitted = round.admitted_count;
        tracing::info!(round = %id, admitted, "Subscription round closed");
        self.events.push(
            ActivityEvent::new(ActivityKind::RoundClosed, format!("closed round {id}"), now)
                .with_metadata(serde_json::json!({
                    "round_id": id.0,
                    "reason": CloseReason::Manual.to_string(),
                    "admitted_count": admitted,
                })),
        );
        Ok(id)
    }

    /// Whether `round_id` admits deposits at `now`. Unknown rounds do not.
    #[must_use]
    pub fn is_admitting(&self, round_id: RoundId, now: DateTime<Utc>) -> bool {
        self.round(round_id).is_some_and(|r| r.is_admitting(now))
    }

    /// Read-only deposit pre-check.
    #[must_use]
    pub fn validate(&self, deposit_amount: u128, now: DateTime<Utc>) -> Eligibility {
        let Some(latest) = self.rounds.last() else {
            return Eligibility::ineligible(None, "no subscription round exists");
        };
        let round = self.rounds.iter().rev().find(|r| r.active).unwrap_or(latest);
        if deposit_amount == 0 {
            return Eligibility::ineligible(Some(round.id), "deposit amount must be greater than zero");
        }
        match round.ineligibility(now) {
            Some(reason) => Eligibility::ineligible(Some(round.id), reason),
            None => Eligibility::eligible(round.id),
        }
    }

    /// Count one successful deposit against `round_id`.
    ///
    /// # Errors
    /// `RoundNotFound`, or `RoundNotAdmitting` if the round stopped
    /// admitting between validation and confirmation.
    pub fn confirm_deposit(
        &mut self,
        round_id: RoundId,
        depositor: Address,
        amount: u128,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.sweep_expired(now);
        let round = self
            .rounds
            .iter_mut()
            .find(|r| r.id == round_id)
            .ok_or(VaultError::RoundNotFound(round_id))?;
        if let Some(reason) = round.ineligibility(now) {
            return Err(VaultError::RoundNotAdmitting {
                round: round_id,
                reason,
            });
        }
        round.admitted_count += 1;
        let admitted = round.admitted_count;
        tracing::debug!(round = %round_id, depositor = %depositor.short(), amount, admitted, "Deposit admitted");
        self.events.push(
            ActivityEvent::new(
                ActivityKind::DepositAdmitted,
                format!("deposit admitted into round {round_id}"),
                now,
            )
            .with_metadata(serde_json::json!({
                "round_id": round_id.0,
                "depositor": depositor,
                "amount": amount.to_string(),
                "admitted_count": admitted,
            })),
        );
        Ok(admitted)
    }

    /// The round currently admitting or waiting to start, if any.
    #[must_use]
    pub fn active_round(&self, now: DateTime<Utc>) -> Option<&SubscriptionRound> {
        self.rounds.iter().find(|r| r.active && !r.is_expired(now))
    }

    #[must_use]
    pub fn round(&self, id: RoundId) -> Option<&SubscriptionRound> {
        self.rounds.iter().find(|r| r.id == id)
    }

    /// Full round history, oldest first.
    #[must_use]
    pub fn rounds(&self) -> &[SubscriptionRound] {
        &self.rounds
    }

    /// Drain activity events produced since the last call.
    pub fn take_events(&mut self) -> Vec<ActivityEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Fixture {
        auth: AuthorizationTable,
        admin: Address,
        window: SubscriptionWindow,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let admin = Address::random();
        Fixture {
            auth: AuthorizationTable::new(Address::random()).with_admin(admin),
            admin,
            window: SubscriptionWindow::new(),
            now: Utc::now(),
        }
    }

    impl Fixture {
        fn open(&mut self, hours: i64, capacity: u64) -> Result<RoundId> {
            let (auth, admin, now) = (&self.auth, self.admin, self.now);
            self.window
                .open(auth, &admin, "round", now, now + Duration::hours(hours), capacity, now)
        }
    }

    #[test]
    fn open_validates_inputs() {
        let mut f = fixture();
        let now = f.now;
        let outsider = Address::random();
        assert!(matches!(
            f.window.open(&f.auth, &outsider, "r", now, now + Duration::hours(1), 1, now),
            Err(VaultError::Unauthorized { .. })
        ));
        assert!(matches!(
            f.window.open(&f.auth, &f.admin, "r", now, now, 1, now),
            Err(VaultError::InvalidTimeRange { .. })
        ));
        assert!(matches!(f.open(1, 0), Err(VaultError::InvalidCapacity)));
        assert!(f.window.rounds().is_empty());
    }

    #[test]
    fn only_one_active_round() {
        let mut f = fixture();
        let first = f.open(1, 10).unwrap();
        assert_eq!(first, RoundId(1));
        assert!(matches!(f.open(1, 10), Err(VaultError::RoundAlreadyActive(RoundId(1)))));
        let now = f.now;
        f.window.close(&f.auth, &f.admin, now).unwrap();
        assert_eq!(f.open(1, 10).unwrap(), RoundId(2));
        assert_eq!(f.window.rounds().len(), 2);
        assert_eq!(f.window.rounds()[0].close_reason, Some(CloseReason::Manual));
    }

    #[test]
    fn open_sweeps_expired_round_first() {
        let mut f = fixture();
        f.open(1, 10).unwrap();
        f.now += Duration::hours(2);
        let second = f.open(1, 10).unwrap();
        assert_eq!(second, RoundId(2));
        let first = f.window.round(RoundId(1)).unwrap();
        assert!(!first.active);
        assert_eq!(first.close_reason, Some(CloseReason::Expired));
    }

    #[test]
    fn close_without_active_round_fails() {
        let mut f = fixture();
        let now = f.now;
        assert!(matches!(
            f.window.close(&f.auth, &f.admin, now),
            Err(VaultError::NoActiveRound)
        ));
        f.open(1, 10).unwrap();
        let later = now + Duration::hours(1);
        assert!(matches!(
            f.window.close(&f.auth, &f.admin, later),
            Err(VaultError::NoActiveRound)
        ));
    }

    #[test]
    fn validate_never_mutates() {
        let mut f = fixture();
        let id = f.open(1, 1).unwrap();
        for _ in 0..50 {
            assert!(f.window.validate(100, f.now).eligible);
        }
        assert_eq!(f.window.round(id).unwrap().admitted_count, 0);
        assert_eq!(f.window.take_events().len(), 1);
    }

    #[test]
    fn validate_reports_reasons() {
        let mut f = fixture();
        let none = f.window.validate(1, f.now);
        assert!(!none.eligible);
        assert_eq!(none.round_id, None);

        let id = f.open(1, 1).unwrap();
        let zero = f.window.validate(0, f.now);
        assert!(!zero.eligible);
        assert!(zero.reason.unwrap().contains("greater than zero"));

        f.window.confirm_deposit(id, Address::random(), 10, f.now).unwrap();
        let full = f.window.validate(10, f.now);
        assert!(!full.eligible);
        assert_eq!(full.round_id, Some(id));
        assert!(full.reason.unwrap().contains("capacity"));

        let late = f.window.validate(10, f.now + Duration::hours(3));
        assert!(late.reason.unwrap().contains("ended"));
    }

    #[test]
    fn confirm_deposit_counts_and_enforces_capacity() {
        let mut f = fixture();
        let id = f.open(1, 2).unwrap();
        assert!(f.window.is_admitting(id, f.now));
        assert_eq!(f.window.confirm_deposit(id, Address::random(), 1, f.now).unwrap(), 1);
        assert_eq!(f.window.confirm_deposit(id, Address::random(), 1, f.now).unwrap(), 2);
        assert!(!f.window.is_admitting(id, f.now));
        assert!(matches!(
            f.window.confirm_deposit(id, Address::random(), 1, f.now),
            Err(VaultError::RoundNotAdmitting { .. })
        ));
        assert!(matches!(
            f.window.confirm_deposit(RoundId(9), Address::random(), 1, f.now),
            Err(VaultError::RoundNotFound(_))
        ));
    }

    #[test]
    fn future_round_is_active_but_not_admitting() {
        let mut f = fixture();
        let now = f.now;
        let id = f
            .window
            .open(&f.auth, &f.admin, "later", now + Duration::hours(1), now + Duration::hours(2), 5, now)
            .unwrap();
        assert!(f.window.active_round(now).is_some());
        assert!(!f.window.is_admitting(id, now));
        assert!(f.window.is_admitting(id, now + Duration::minutes(90)));
    }
}
