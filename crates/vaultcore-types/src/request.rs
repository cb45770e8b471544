//! # Redemption requests: the withdrawal claim primitive
//!
//! A `RedemptionRequest` is an owner's signed intent to burn shares for
//! collateral. It moves through a fixed state machine and is never deleted.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐ approve ┌──────────┐ claim ┌────────────┐ paid ┌───────────┐
//!   │ PENDING ├────────▶│ APPROVED ├──────▶│ PROCESSING ├─────▶│ COMPLETED │
//!   └─┬──┬──┬─┘         └──┬────┬──┘       └─────┬──────┘      └───────────┘
//!     │  │  │ reject       │    │ expire   fail  │  ▲ retry
//!     │  │  ▼              │    ▼                ▼  │
//!     │  │ REJECTED        │  EXPIRED          ┌────┴───┐
//!     │  └─ expire ─▶ EXPIRED                  │ FAILED │
//!     │                    │                   └───┬────┘
//!     └──── cancel ────────┴──── cancel ───────────┴──▶ CANCELLED
//! ```
//!
//! ## Escrow
//!
//! Shares are reserved on approval and stay reserved until the request is
//! terminal: burned on COMPLETED, released on CANCELLED or EXPIRED.

use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{Address, DeploymentId, RequestId, Result, VaultError};

/// Lifecycle state of a redemption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Submitted, awaiting operator review.
    Pending,
    /// Reviewed; holds a queue position and reserved shares.
    Approved,
    /// Claimed into an in-flight settlement batch.
    Processing,
    /// Paid out. Terminal.
    Completed,
    /// Settlement attempt failed; eligible for retry or cancellation.
    Failed,
    /// Withdrawn by the owner or an operator. Terminal.
    Cancelled,
    /// Refused during review. Terminal.
    Rejected,
    /// Deadline passed before settlement. Terminal.
    Expired,
}

impl RequestStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Approved,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Rejected,
        Self::Expired,
    ];

    /// Can a request in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Pending,
                Self::Approved | Self::Rejected | Self::Cancelled | Self::Expired
            ) | (
                Self::Approved,
                Self::Processing | Self::Cancelled | Self::Expired
            ) | (Self::Processing, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Processing | Self::Cancelled)
        )
    }

    /// No further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Shares are earmarked while the request sits in this state.
    #[must_use]
    pub fn holds_reservation(&self) -> bool {
        matches!(self, Self::Approved | Self::Processing | Self::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// RedemptionIntent: what the owner signs
// ---------------------------------------------------------------------------

/// One element of a submit batch: the owner's signed redemption intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionIntent {
    /// Share owner; also the ed25519 key the proof must verify against.
    pub owner: Address,
    /// Where the assets are paid.
    pub recipient: Address,
    /// Shares to burn.
    pub share_amount: u128,
    /// Minimum acceptable assets out, in canonical units.
    pub min_assets_out: u128,
    /// Owner-chosen replay nonce.
    pub nonce: u64,
    /// The request must settle before this instant.
    pub deadline: DateTime<Utc>,
    /// Ed25519 signature over [`RedemptionIntent::signing_payload`] for
    /// the deployment the intent is submitted to.
    pub signature_proof: Vec<u8>,
}

impl RedemptionIntent {
    /// Canonical signing payload, bound to one deployment.
    ///
    /// Format: `"vaultcore:redeem:v2:" || len(deployment) || deployment || owner || recipient
    /// || shares || min_out || nonce || deadline_secs || deadline_nanos`
    ///
    /// Integers are little-endian. The deadline is signed to the
    /// nanosecond, so any change to it invalidates the proof.
    #[must_use]
    pub fn signing_payload(&self, deployment: &DeploymentId) -> Vec<u8> {
        let domain = deployment.0.as_bytes();
        let mut payload = Vec::with_capacity(160 + domain.len());
        payload.extend_from_slice(b"vaultcore:redeem:v2:");
        payload.extend_from_slice(&u64::try_from(domain.len()).unwrap_or(u64::MAX).to_le_bytes());
        payload.extend_from_slice(domain);
        payload.extend_from_slice(self.owner.as_bytes());
        payload.extend_from_slice(self.recipient.as_bytes());
        payload.extend_from_slice(&self.share_amount.to_le_bytes());
        payload.extend_from_slice(&self.min_assets_out.to_le_bytes());
        payload.extend_from_slice(&self.nonce.to_le_bytes());
        payload.extend_from_slice(&self.deadline.timestamp().to_le_bytes());
        payload.extend_from_slice(&self.deadline.timestamp_subsec_nanos().to_le_bytes());
        payload
    }

    /// Build and sign an intent for `deployment`. The owner address is
    /// derived from `key`.
    #[must_use]
    pub fn signed(
        key: &SigningKey,
        deployment: &DeploymentId,
        recipient: Address,
        share_amount: u128,
        min_assets_out: u128,
        nonce: u64,
        deadline: DateTime<Utc>,
    ) -> Self {
        let mut intent = Self {
            owner: Address::from_pubkey(key.verifying_key().to_bytes()),
            recipient,
            share_amount,
            min_assets_out,
            nonce,
            deadline,
            signature_proof: Vec::new(),
        };
        intent.signature_proof = key
            .sign(&intent.signing_payload(deployment))
            .to_bytes()
            .to_vec();
        intent
    }

    /// Verify the signature proof against the owner's address, as signed
    /// for `deployment`.
    ///
    /// # Errors
    /// Returns [`VaultError::InvalidSignature`] if the owner is not a valid
    /// key, the proof is malformed, or it does not verify for this
    /// deployment.
    pub fn verify_signature(&self, deployment: &DeploymentId) -> Result<()> {
        let invalid = || VaultError::InvalidSignature(self.owner);
        let key = VerifyingKey::from_bytes(self.owner.as_bytes()).map_err(|_| invalid())?;
        let sig = Signature::from_slice(&self.signature_proof).map_err(|_| invalid())?;
        key.verify(&self.signing_payload(deployment), &sig)
            .map_err(|_| invalid())
    }
}

// ---------------------------------------------------------------------------
// RedemptionRequest
// ---------------------------------------------------------------------------

/// A redemption request as stored by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub id: RequestId,
    pub owner: Address,
    pub recipient: Address,
    pub share_amount: u128,
    /// Asset value at the price observed on submission.
    pub expected_asset_amount: u128,
    pub min_acceptable_asset_amount: u128,
    pub signature_proof: Vec<u8>,
    pub nonce: u64,
    pub deadline: DateTime<Utc>,
    pub status: RequestStatus,
    /// Admin-assigned priority; higher settles first.
    pub priority: u32,
    /// Dense rank among APPROVED requests. `Some` iff status is APPROVED.
    pub queue_position: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub actual_asset_amount: Option<u128>,
    pub settlement_ref: Option<String>,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    /// Number of times the request was claimed into a settlement batch.
    pub attempts: u32,
}

impl RedemptionRequest {
    /// Create a PENDING request from a verified intent.
    #[must_use]
    pub fn from_intent(
        intent: RedemptionIntent,
        expected_asset_amount: u128,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            owner: intent.owner,
            recipient: intent.recipient,
            share_amount: intent.share_amount,
            expected_asset_amount,
            min_acceptable_asset_amount: intent.min_assets_out,
            signature_proof: intent.signature_proof,
            nonce: intent.nonce,
            deadline: intent.deadline,
            status: RequestStatus::Pending,
            priority: 0,
            queue_position: None,
            created_at,
            processed_at: None,
            actual_asset_amount: None,
            settlement_ref: None,
            admin_notes: None,
            rejection_reason: None,
            attempts: 0,
        }
    }

    /// Move to `target` if the transition table allows it.
    ///
    /// # Errors
    /// Returns [`VaultError::InvalidTransition`] otherwise. The request is
    /// left unchanged.
    pub fn transition(&mut self, target: RequestStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(VaultError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(())
    }

    /// Deadline reached at `now`.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// Fixture requests for unit tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl RedemptionRequest {
    /// A PENDING request for `owner` with a one-day deadline.
    pub fn dummy(owner: Address, share_amount: u128) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            owner,
            recipient: owner,
            share_amount,
            expected_asset_amount: share_amount,
            min_acceptable_asset_amount: 0,
            signature_proof: vec![0u8; 64],
            nonce: rand::random::<u64>(),
            deadline: now + chrono::Duration::days(1),
            status: RequestStatus::Pending,
            priority: 0,
            queue_position: None,
            created_at: now,
            processed_at: None,
            actual_asset_amount: None,
            settlement_ref: None,
            admin_notes: None,
            rejection_reason: None,
            attempts: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch plumbing
// ---------------------------------------------------------------------------

/// One element of a settlement batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementItem {
    pub request_id: RequestId,
    /// Caller-supplied floor on assets out for this request.
    pub min_output: u128,
}

/// Per-item result of a batch operation; partial success stays visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult<T> {
    /// Index of the item in the input collection.
    pub index: usize,
    pub outcome: std::result::Result<T, VaultError>,
}

impl<T> ItemResult<T> {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signing_key() -> SigningKey {
        SigningKey::generate(&mut rand::rngs::OsRng)
    }

    #[test]
    fn transition_table_allows_documented_edges() {
        use RequestStatus::*;
        let allowed = [
            (Pending, Approved),
            (Pending, Rejected),
            (Pending, Cancelled),
            (Pending, Expired),
            (Approved, Processing),
            (Approved, Cancelled),
            (Approved, Expired),
            (Processing, Completed),
            (Processing, Failed),
            (Failed, Processing),
            (Failed, Cancelled),
        ];
        for from in RequestStatus::ALL {
            for to in RequestStatus::ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in RequestStatus::ALL.into_iter().filter(RequestStatus::is_terminal) {
            for to in RequestStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} is terminal");
            }
        }
    }

    #[test]
    fn illegal_transition_leaves_request_unchanged() {
        let mut req = RedemptionRequest::dummy(Address::random(), 10);
        let err = req.transition(RequestStatus::Completed).unwrap_err();
        assert!(matches!(
            err,
            VaultError::InvalidTransition {
                from: RequestStatus::Pending,
                to: RequestStatus::Completed,
                ..
            }
        ));
        assert_eq!(req.status, RequestStatus::Pending);
    }

    fn vault_a() -> DeploymentId {
        DeploymentId::new("vault-a")
    }

    #[test]
    fn signed_intent_verifies() {
        let key = signing_key();
        let intent = RedemptionIntent::signed(
            &key,
            &vault_a(),
            Address::random(),
            100_000_000,
            99_000_000,
            1,
            Utc::now() + chrono::Duration::hours(1),
        );
        assert!(intent.verify_signature(&vault_a()).is_ok());
    }

    #[test]
    fn tampered_intent_fails_verification() {
        let key = signing_key();
        let mut intent = RedemptionIntent::signed(
            &key,
            &vault_a(),
            Address::random(),
            100_000_000,
            0,
            1,
            Utc::now() + chrono::Duration::hours(1),
        );
        intent.share_amount += 1;
        assert!(matches!(
            intent.verify_signature(&vault_a()),
            Err(VaultError::InvalidSignature(_))
        ));
    }

    #[test]
    fn signature_is_bound_to_deployment() {
        let key = signing_key();
        let intent = RedemptionIntent::signed(
            &key,
            &vault_a(),
            Address::random(),
            100_000_000,
            0,
            1,
            Utc::now() + chrono::Duration::hours(1),
        );
        assert!(matches!(
            intent.verify_signature(&DeploymentId::new("vault-b")),
            Err(VaultError::InvalidSignature(owner)) if owner == intent.owner
        ));
        // Length-prefixed, so a shifted boundary between domain and owner
        // bytes is a different payload.
        assert_ne!(
            intent.signing_payload(&DeploymentId::new("vault-a")),
            intent.signing_payload(&DeploymentId::new("vault-a\0")),
        );
    }

    #[test]
    fn sub_second_deadline_change_fails_verification() {
        let key = signing_key();
        let mut intent = RedemptionIntent::signed(
            &key,
            &vault_a(),
            Address::random(),
            1,
            0,
            1,
            Utc::now() + chrono::Duration::hours(1),
        );
        intent.deadline += chrono::Duration::milliseconds(1);
        assert!(intent.verify_signature(&vault_a()).is_err());
    }

    #[test]
    fn garbage_proof_fails_verification() {
        let key = signing_key();
        let mut intent = RedemptionIntent::signed(
            &key,
            &vault_a(),
            Address::random(),
            1,
            0,
            1,
            Utc::now() + chrono::Duration::hours(1),
        );
        intent.signature_proof = vec![1, 2, 3];
        assert!(intent.verify_signature(&vault_a()).is_err());
    }

    #[test]
    fn signing_payload_differs_by_nonce() {
        let key = signing_key();
        let deadline = Utc::now();
        let a = RedemptionIntent::signed(&key, &vault_a(), Address::random(), 1, 0, 1, deadline);
        let mut b = a.clone();
        b.nonce = 2;
        assert_ne!(a.signing_payload(&vault_a()), b.signing_payload(&vault_a()));
    }

    #[test]
    fn status_display() {
        assert_eq!(RequestStatus::Processing.to_string(), "PROCESSING");
        assert_eq!(RequestStatus::Expired.to_string(), "EXPIRED");
    }
}
