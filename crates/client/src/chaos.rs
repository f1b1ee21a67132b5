//! Failure injection wrapper for [`StoreBackend`].
//!
//! [`ChaosBackend`] wraps any backend and injects random errors, latency,
//! a hard outage switch, and lost acknowledgements (the write commits but
//! the caller sees an error), which is the case that makes masking
//! collaborator failures unsafe.

use crate::backend::{BackendError, CasOutcome, StoreBackend, StoredEntry};
use crate::vclock::VersionMarker;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of failing a request before it reaches the store \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
    /// Every request fails until cleared.
    pub unavailable: bool,
    /// Forward conditional stores, then report a timeout regardless.
    pub drop_acks: bool,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            unavailable: false,
            drop_acks: false,
        }
    }
}

pub struct ChaosBackend<B: StoreBackend> {
    inner: Arc<B>,
    config: Arc<RwLock<ChaosConfig>>,
}

impl<B: StoreBackend> std::fmt::Debug for ChaosBackend<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosBackend").finish_non_exhaustive()
    }
}

impl<B: StoreBackend> ChaosBackend<B> {
    pub fn new(inner: B, config: ChaosConfig) -> Self {
        Self::wrap(Arc::new(inner), config)
    }

    /// Wrap a backend that is also used directly elsewhere.
    pub fn wrap(inner: Arc<B>, config: ChaosConfig) -> Self {
        Self {
            inner,
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.config.write().await.unavailable = unavailable;
    }

    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    pub async fn set_drop_acks(&self, drop_acks: bool) {
        self.config.write().await.drop_acks = drop_acks;
    }

    async fn maybe_fail(&self) -> Result<(), BackendError> {
        let (delay, failure_rate, unavailable) = {
            let config = self.config.read().await;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            (
                config.latency + Duration::from_millis(jitter_ms),
                config.failure_rate,
                config.unavailable,
            )
        };

        if unavailable {
            return Err(BackendError::Unavailable("chaos: store marked down".into()));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(BackendError::Unavailable("chaos: random failure".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<B: StoreBackend> StoreBackend for ChaosBackend<B> {
    async fn fetch(&self, key: &str) -> Result<Option<StoredEntry>, BackendError> {
        self.maybe_fail().await?;
        self.inner.fetch(key).await
    }

    async fn conditional_store(
        &self,
        key: &str,
        entry: StoredEntry,
        expected: &VersionMarker,
    ) -> Result<CasOutcome, BackendError> {
        self.maybe_fail().await?;
        let outcome = self.inner.conditional_store(key, entry, expected).await?;
        if self.config.read().await.drop_acks {
            tracing::debug!("chaos: dropping ack for {} ({:?})", key, outcome);
            return Err(BackendError::Timeout);
        }
        Ok(outcome)
    }
}
