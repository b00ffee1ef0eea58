//! Per-configuration admission control.
//!
//! # Responsibilities
//! - Turn a stored rate policy into a concrete GCRA limit
//! - Decide per request whether a `tenant:config` key may proceed
//! - Provide an in-process store for single-node deployments and tests
//!
//! # Design Decisions
//! - Burst equals the configured count for every unit
//! - The store performs the whole test-and-update atomically per key
//! - A store failure is an error, never a silent allow or deny

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::store::RatePolicy;

/// Rate unit named by a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateUnit {
    /// Length of the window this unit stands for.
    pub fn period(self) -> Duration {
        match self {
            RateUnit::Second => Duration::from_secs(1),
            RateUnit::Minute => Duration::from_secs(60),
            RateUnit::Hour => Duration::from_secs(60 * 60),
            RateUnit::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl std::str::FromStr for RateUnit {
    type Err = UnsupportedUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "second" => Ok(RateUnit::Second),
            "minute" => Ok(RateUnit::Minute),
            "hour" => Ok(RateUnit::Hour),
            "day" => Ok(RateUnit::Day),
            other => Err(UnsupportedUnitError(other.to_string())),
        }
    }
}

/// A rate policy named a unit outside second/minute/hour/day.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported limit per unit: {0}")]
pub struct UnsupportedUnitError(pub String);

/// Admission failed for a reason other than an exhausted quota.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("rate limit store error: {0}")]
    Store(String),

    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}

/// GCRA parameters: `rate` requests per `period`, bursting up to `burst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub rate: u32,
    pub burst: u32,
    pub period: Duration,
}

impl Limit {
    /// `count` requests per `unit`, with a burst of `count`.
    pub fn per(count: u32, unit: RateUnit) -> Self {
        Self {
            rate: count,
            burst: count,
            period: unit.period(),
        }
    }

    /// Build a limit from a stored policy, rejecting unknown units.
    pub fn from_policy(policy: &RatePolicy) -> Result<Self, UnsupportedUnitError> {
        let unit: RateUnit = policy.per.parse()?;
        Ok(Self::per(policy.count, unit))
    }

    /// Time between two evenly spaced admissions.
    pub fn emission_interval(&self) -> Result<Duration, LimiterError> {
        if self.rate == 0 {
            return Err(LimiterError::InvalidLimit("rate must be positive".into()));
        }
        Ok(self.period / self.rate)
    }

    fn burst_offset(&self) -> Result<Duration, LimiterError> {
        Ok(self.emission_interval()? * self.burst)
    }
}

/// Shared counter backend for admission decisions.
///
/// `try_consume` must test and update the key as one atomic step.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn try_consume(&self, key: &str, limit: &Limit) -> Result<bool, LimiterError>;
}

/// In-process GCRA store.
///
/// Holds one theoretical arrival time per key. The DashMap entry lock
/// makes each test-and-update atomic for its key.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    arrivals: DashMap<String, Instant>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn try_consume(&self, key: &str, limit: &Limit) -> Result<bool, LimiterError> {
        let increment = limit.emission_interval()?;
        let burst_offset = limit.burst_offset()?;
        let now = Instant::now();

        let mut entry = self.arrivals.entry(key.to_string()).or_insert(now);
        let tat = (*entry).max(now);
        let new_tat = tat + increment;

        // Admit while the new arrival time stays within one burst of now.
        if new_tat > now + burst_offset {
            return Ok(false);
        }
        *entry = new_tat;
        Ok(true)
    }
}

/// Per-request admission decision for a tenant configuration.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn RateLimitStore>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Composite key shared by every tunnel using the same configuration.
    pub fn key(tenant_id: &str, config_id: &str) -> String {
        format!("{}:{}", tenant_id, config_id)
    }

    /// Whether one more request under `key` fits in `limit`.
    pub async fn allow(&self, key: &str, limit: &Limit) -> Result<bool, LimiterError> {
        let allowed = self.store.try_consume(key, limit).await?;
        if !allowed {
            tracing::warn!(key = %key, rate = limit.rate, period = ?limit.period, "Rate limit exceeded");
            metrics::record_rate_limited();
        }
        Ok(allowed)
    }
}
