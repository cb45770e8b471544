//! Chain state reader boundary.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vaultcore_types::{DeploymentId, Result, VaultError, math};

/// Vault totals and raw collateral balances as read from chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub total_assets: u128,
    pub total_supply: u128,
    /// Held amount per collateral symbol, canonical units.
    pub balances: BTreeMap<String, u128>,
}

impl ChainSnapshot {
    /// Externally reported share price implied by the totals.
    #[must_use]
    pub fn share_price(&self) -> u128 {
        math::price_from_totals(self.total_assets, self.total_supply)
    }
}

/// Reads deployment state from chain. Implementations are called from
/// scheduler tasks and must be cancel-safe: a timed-out read is dropped.
pub trait ChainReader: Send + Sync + 'static {
    /// # Errors
    /// `ChainRead` when the backend cannot produce a snapshot.
    fn snapshot(
        &self,
        deployment: &DeploymentId,
    ) -> impl Future<Output = Result<ChainSnapshot>> + Send;
}

#[derive(Debug, Default)]
struct MemoryChainState {
    snapshots: HashMap<DeploymentId, ChainSnapshot>,
    failing: HashMap<DeploymentId, String>,
    delays: HashMap<DeploymentId, Duration>,
}

/// Chain reader serving snapshots from memory. Failures and latency can
/// be injected per deployment.
#[derive(Debug, Default)]
pub struct MemoryChainReader {
    state: Mutex<MemoryChainState>,
}

impl MemoryChainReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&self, deployment: DeploymentId, snapshot: ChainSnapshot) {
        if let Ok(mut state) = self.state.lock() {
            state.snapshots.insert(deployment, snapshot);
        }
    }

    /// Make reads for `deployment` fail with `reason`; `None` clears it.
    pub fn set_failure(&self, deployment: DeploymentId, reason: Option<&str>) {
        if let Ok(mut state) = self.state.lock() {
            match reason {
                Some(r) => {
                    state.failing.insert(deployment, r.to_string());
                }
                None => {
                    state.failing.remove(&deployment);
                }
            }
        }
    }

    /// Delay every read for `deployment` by `delay`.
    pub fn set_delay(&self, deployment: DeploymentId, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delays.insert(deployment, delay);
        }
    }
}

impl ChainReader for MemoryChainReader {
    async fn snapshot(&self, deployment: &DeploymentId) -> Result<ChainSnapshot> {
        let (delay, outcome) = {
            let state = self
                .state
                .lock()
                .map_err(|_| VaultError::Internal("chain reader lock poisoned".into()))?;
            let outcome = if let Some(reason) = state.failing.get(deployment) {
                Err(VaultError::ChainRead {
                    reason: reason.clone(),
                })
            } else {
                state
                    .snapshots
                    .get(deployment)
                    .cloned()
                    .ok_or_else(|| VaultError::ChainRead {
                        reason: format!("no snapshot for {deployment}"),
                    })
            };
            (state.delays.get(deployment).copied(), outcome)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultcore_types::constants::PRICE_SCALE;

    #[tokio::test]
    async fn serves_and_fails_on_demand() {
        let reader = MemoryChainReader::new();
        let id = DeploymentId::new("alpha");
        assert!(reader.snapshot(&id).await.is_err());

        reader.set_snapshot(
            id.clone(),
            ChainSnapshot {
                total_assets: 210 * PRICE_SCALE,
                total_supply: 200 * PRICE_SCALE,
                balances: BTreeMap::new(),
            },
        );
        let snap = reader.snapshot(&id).await.unwrap();
        assert_eq!(snap.share_price(), 105_000_000);

        reader.set_failure(id.clone(), Some("rpc down"));
        assert!(matches!(
            reader.snapshot(&id).await,
            Err(VaultError::ChainRead { .. })
        ));
        reader.set_failure(id.clone(), None);
        assert!(reader.snapshot(&id).await.is_ok());
    }

    #[test]
    fn empty_vault_prices_at_one() {
        assert_eq!(ChainSnapshot::default().share_price(), PRICE_SCALE);
    }
}
