//! Injected time and randomness services.
//!
//! The scheduler (C5), message handler (C8) and digipeater (C9) all need
//! "after this much time, maybe with jitter, do X" behavior that has to be
//! deterministic in tests (spec scenarios S4/S5/S6/S8). Real wall-clock
//! delay is still driven by `tokio::time`, which itself can be paused with
//! `tokio::time::pause()` in tests; the only thing abstracted here is the
//! *source of randomness* used to compute jittered delays, so a test can
//! pin the jitter to a known value while still running on the real (paused)
//! tokio clock.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// A source of uniform randomness in `[0, max)`, used for CSMA hold-off
/// jitter and retransmit backoff jitter.
pub trait RandomSource: Send + Sync {
    /// Returns a value in `[0, max)`. `max <= 0.0` always returns `0.0`.
    fn uniform(&self, max: f64) -> f64;
}

/// Randomness backed by the `rand` crate, used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn uniform(&self, max: f64) -> f64 {
        if max <= 0.0 {
            0.0
        } else {
            rand::random::<f64>() * max
        }
    }
}

/// Deterministic randomness for tests: always returns `fraction * max`.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
    pub fraction: f64,
}

impl FixedRandom {
    pub fn new(fraction: f64) -> Self {
        FixedRandom { fraction }
    }

    pub fn zero() -> Self {
        FixedRandom { fraction: 0.0 }
    }
}

impl RandomSource for FixedRandom {
    fn uniform(&self, max: f64) -> f64 {
        if max <= 0.0 {
            0.0
        } else {
            self.fraction * max
        }
    }
}

pub type SharedRandom = Arc<dyn RandomSource>;

pub fn system_random() -> SharedRandom {
    Arc::new(SystemRandom)
}

/// Handle returned by [`schedule`]; dropping it does not cancel the timer,
/// call [`CancelToken::cancel`] explicitly.
#[derive(Debug, Clone)]
pub struct CancelToken(AbortHandle);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.abort();
    }
}

/// Runs `fut` after `delay` on the current tokio runtime, returning a token
/// that can cancel it before it fires.
pub fn schedule<F>(delay: Duration, fut: F) -> CancelToken
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fut.await;
    });
    CancelToken(handle.abort_handle())
}

/// Converts a floating-point seconds value (possibly fractional, e.g. from
/// a jittered hold-off) into a `Duration`, saturating at zero.
pub fn secs_f64(seconds: f64) -> Duration {
    Duration::from_secs_f64(seconds.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_random_scales_max() {
        let r = FixedRandom::new(0.5);
        assert_eq!(r.uniform(10.0), 5.0);
        assert_eq!(r.uniform(0.0), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_fires_after_delay() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let _token = schedule(Duration::from_millis(100), async move {
            let _ = tx.send(()).await;
        });
        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::advance(Duration::from_millis(2)).await;
        rx.recv().await.expect("timer fired");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_timer() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let token = schedule(Duration::from_millis(100), async move {
            let _ = tx.send(()).await;
        });
        token.cancel();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }
}
