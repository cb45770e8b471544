//! Scheduler ticks across several deployments: isolation, timeouts,
//! settlement and health.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use tokio::sync::watch;
use vaultcore_node::{
    ChainSnapshot, HealthStatus, JobKind, JobState, MemoryChainReader, Scheduler, TickSummary,
    Vault,
};
use vaultcore_types::{
    Address, AuthorizationTable, Clock, CollateralAsset, DeploymentId, ManualClock,
    RedemptionIntent, RequestStatus, SchedulerConfig, VaultConfig,
    constants::{PRICE_SCALE, SHARE_SCALE},
};

struct Fleet {
    admin: Address,
    clock: Arc<ManualClock>,
    reader: Arc<MemoryChainReader>,
    alpha: Arc<Vault>,
    beta: Arc<Vault>,
}

async fn deployment(name: &str, admin: Address, clock: &Arc<ManualClock>) -> Arc<Vault> {
    let vault = Vault::new(
        DeploymentId::new(name),
        VaultConfig::default(),
        AuthorizationTable::new(admin),
        clock.clone(),
    )
    .unwrap();
    vault
        .register_asset(&admin, CollateralAsset::new("0xusdc", "USDC", 8))
        .await
        .unwrap();
    Arc::new(vault)
}

impl Fleet {
    async fn new() -> Self {
        let admin = Address::random();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let alpha = deployment("alpha", admin, &clock).await;
        let beta = deployment("beta", admin, &clock).await;
        Self {
            admin,
            clock,
            reader: Arc::new(MemoryChainReader::new()),
            alpha,
            beta,
        }
    }

    /// Scheduler over both deployments; a unit counts as stuck one second
    /// before it times out.
    fn scheduler(&self, job_timeout_secs: u64) -> Scheduler<MemoryChainReader> {
        let config = SchedulerConfig {
            job_timeout_secs,
            stuck_threshold_secs: job_timeout_secs - 1,
            ..SchedulerConfig::default()
        };
        assert!(
            VaultConfig {
                scheduler: config.clone(),
                ..VaultConfig::default()
            }
            .validate()
            .is_ok()
        );
        Scheduler::new(config, Arc::clone(&self.reader), self.clock.clone())
            .with_deployment(Arc::clone(&self.alpha))
            .with_deployment(Arc::clone(&self.beta))
    }
}

fn snapshot(total_assets: u128, total_supply: u128, usdc: u128) -> ChainSnapshot {
    ChainSnapshot {
        total_assets,
        total_supply,
        balances: BTreeMap::from([("USDC".to_string(), usdc)]),
    }
}

#[tokio::test]
async fn failing_deployment_does_not_block_others() {
    let fleet = Fleet::new().await;
    fleet.reader.set_snapshot(
        DeploymentId::new("alpha"),
        snapshot(1_005 * PRICE_SCALE, 1_000 * SHARE_SCALE, 0),
    );
    fleet
        .reader
        .set_failure(DeploymentId::new("beta"), Some("rpc unavailable"));
    let scheduler = fleet.scheduler(5);

    let summary = scheduler.run_tick(JobKind::Metrics).await;
    assert_eq!(
        summary,
        TickSummary {
            succeeded: 1,
            failed: 1,
            timed_out: 0
        }
    );
    assert_eq!(fleet.alpha.oracle_snapshot().await.target_price, 100_500_000);
    assert_eq!(fleet.beta.oracle_snapshot().await.target_price, PRICE_SCALE);

    let health = scheduler.health();
    assert!(matches!(
        health.job(JobKind::Metrics, fleet.alpha.id()).unwrap().state,
        JobState::Succeeded { .. }
    ));
    let beta = health.job(JobKind::Metrics, fleet.beta.id()).unwrap();
    assert!(matches!(beta.state, JobState::Failed { ref error, .. } if error.contains("VC_ERR_600")));
    assert_eq!(beta.consecutive_failures, 1);
}

#[tokio::test]
async fn hanging_read_times_out_alone() {
    let fleet = Fleet::new().await;
    fleet
        .reader
        .set_snapshot(DeploymentId::new("alpha"), snapshot(0, 0, 7 * PRICE_SCALE));
    fleet
        .reader
        .set_snapshot(DeploymentId::new("beta"), snapshot(0, 0, 7 * PRICE_SCALE));
    fleet
        .reader
        .set_delay(DeploymentId::new("beta"), StdDuration::from_secs(30));
    let scheduler = fleet.scheduler(2);

    let summary = scheduler.run_tick(JobKind::Collateral).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(fleet.alpha.liquidity_snapshot().await.total_held, 7 * PRICE_SCALE);
    assert_eq!(fleet.beta.liquidity_snapshot().await.total_held, 0);
    assert!(matches!(
        scheduler.health().job(JobKind::Collateral, fleet.beta.id()).unwrap().state,
        JobState::TimedOut { .. }
    ));
}

#[tokio::test]
async fn redemption_job_settles_queue_head() {
    let fleet = Fleet::new().await;
    let now = fleet.clock.now();
    fleet
        .alpha
        .open_round(&fleet.admin, "R1", now, now + Duration::days(1), 10)
        .await
        .unwrap();
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let owner = Address::from_pubkey(key.verifying_key().to_bytes());
    fleet.alpha.deposit(owner, "USDC", 20 * PRICE_SCALE).await.unwrap();

    let intent = RedemptionIntent::signed(
        &key,
        fleet.alpha.id(),
        owner,
        5 * SHARE_SCALE,
        0,
        1,
        now + Duration::hours(1),
    );
    let id = fleet.alpha.submit_redemptions(vec![intent]).await.unwrap()[0]
        .outcome
        .clone()
        .unwrap();
    fleet.alpha.approve_redemptions(&fleet.admin, &[id]).await.unwrap();

    let summary = fleet.scheduler(5).run_tick(JobKind::Redemption).await;
    assert_eq!(summary.succeeded, 2);
    assert_eq!(fleet.alpha.request(id).await.unwrap().status, RequestStatus::Completed);
    assert_eq!(
        fleet.alpha.liquidity_snapshot().await.available_liquidity,
        15 * PRICE_SCALE
    );
}

#[tokio::test]
async fn overrunning_unit_degrades_health_before_timeout() {
    let fleet = Fleet::new().await;
    let alpha = DeploymentId::new("alpha");
    fleet
        .reader
        .set_snapshot(alpha.clone(), snapshot(1_000 * PRICE_SCALE, 1_000 * SHARE_SCALE, 0));
    fleet.reader.set_delay(alpha, StdDuration::from_secs(30));
    fleet.reader.set_snapshot(
        DeploymentId::new("beta"),
        snapshot(1_000 * PRICE_SCALE, 1_000 * SHARE_SCALE, 0),
    );
    let scheduler = Arc::new(fleet.scheduler(3));
    assert_eq!(scheduler.report().status, HealthStatus::Healthy);

    let tick = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run_tick(JobKind::Metrics).await }
    });
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    assert_eq!(scheduler.report().status, HealthStatus::Healthy);

    // Past the two-second stuck threshold while the unit is still running.
    fleet.clock.advance(Duration::seconds(3));
    let report = scheduler.report();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.stuck.len(), 1);
    assert!(report.stuck[0].contains("alpha"));

    let summary = tick.await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(scheduler.report().status, HealthStatus::Healthy);
}

#[tokio::test]
async fn spawned_loops_stop_on_shutdown() {
    let fleet = Fleet::new().await;
    let scheduler = Arc::new(fleet.scheduler(5));
    let (tx, rx) = watch::channel(false);
    let handles = Arc::clone(&scheduler).spawn(rx);
    assert_eq!(handles.len(), JobKind::ALL.len());

    tokio::time::sleep(StdDuration::from_millis(50)).await;
    tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(StdDuration::from_secs(5), handle)
            .await
            .expect("job loop did not stop")
            .unwrap();
    }
    // First ticks fire immediately; the redemption job finds empty queues.
    assert!(scheduler.health().job(JobKind::Redemption, fleet.alpha.id()).is_some());
}
