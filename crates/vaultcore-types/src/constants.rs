//! System-wide constants for the VaultCore settlement core.

/// Decimal places of the canonical BTC-equivalent unit.
pub const CANONICAL_DECIMALS: u8 = 8;

/// Fixed-point scale of one share (10^8).
pub const SHARE_SCALE: u128 = 100_000_000;

/// Fixed-point scale of a price per share (10^8 canonical units per share).
pub const PRICE_SCALE: u128 = 100_000_000;

/// Basis-point denominator.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Default initial price per share (1.0).
pub const DEFAULT_INITIAL_PRICE: u128 = PRICE_SCALE;

/// Default maximum price change per deviation period (1%).
pub const DEFAULT_MAX_DEVIATION_BPS: u32 = 100;

/// Default deviation period in seconds.
pub const DEFAULT_DEVIATION_PERIOD_SECS: u64 = 300;

/// Maximum requests accepted in a single submit/approve/settle batch.
pub const MAX_REQUESTS_PER_BATCH: usize = 500;

/// Default number of requests pulled by one automatic settlement tick.
pub const DEFAULT_AUTO_SETTLE_BATCH: usize = 25;

/// Settlement idempotency cache size (number of request IDs to remember).
pub const SETTLEMENT_IDEMPOTENCY_CACHE_SIZE: usize = 100_000;

/// Default metrics refresh interval in seconds.
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 300;

/// Default collateral sync interval in seconds.
pub const DEFAULT_COLLATERAL_INTERVAL_SECS: u64 = 3_600;

/// Default redemption processing interval in seconds.
pub const DEFAULT_REDEMPTION_INTERVAL_SECS: u64 = 60;

/// Default per-unit job timeout in seconds.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 120;

/// A job running longer than this is reported as degraded. Must stay
/// below the job timeout, which ends the run.
pub const DEFAULT_STUCK_THRESHOLD_SECS: u64 = 90;

/// Source tag used when the scheduler reports a chain-derived price.
pub const CHAIN_PRICE_SOURCE: &str = "chain-refresh";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "VaultCore";
