//! # vaultcore-queue
//!
//! **Redemption request lifecycle and ordering.**
//!
//! Requests move through a fixed state machine:
//!
//! ```text
//! PENDING → APPROVED → PROCESSING → COMPLETED
//!                          ↓   ↑
//!                         FAILED (retry)
//! ```
//!
//! with CANCELLED, REJECTED and EXPIRED as the other terminal states.
//! Approved requests hold a dense queue position `1..=N`; cancelling or
//! expiring one closes the gap in O(log n) via [`PositionIndex`].
//!
//! Settlement batches are drawn with [`RedemptionQueue::next_batch`]:
//! priority first, then queue position, then submission time.

pub mod position_index;
pub mod queue;

pub use position_index::PositionIndex;
pub use queue::{QueueStats, RedemptionQueue};
