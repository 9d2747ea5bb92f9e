//! The environment seam between entity code and the outside world.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Everything the transit runtime needs from its host.
///
/// Entity tasks, ingestion timestamps and the synthetic feed all go through
/// this trait, so a run is reproducible whenever the implementation is:
///
/// - [`TokioContext`](crate::TokioContext) uses the system clock and OS entropy
/// - [`SimContext`](crate::SimContext) uses a clock that moves only when told
///   to, and RNG streams derived from one seed
#[async_trait]
pub trait TransitContext: Send + Sync + 'static {
    /// Monotonic time since the context was created.
    fn now(&self) -> Duration;

    /// Wall-clock time; source of every ingestion timestamp.
    fn system_time(&self) -> SystemTime;

    /// [`TransitContext::system_time`] as Unix epoch milliseconds.
    fn epoch_millis(&self) -> i64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    async fn sleep(&self, duration: Duration);

    /// Runs `future` in the background. The runtime calls this once per entity.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// An RNG stream for one consumer, keyed by `seed_extension`.
    fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng;

    /// Master seed; 0 when the context is not seeded.
    fn seed(&self) -> u64;
}
