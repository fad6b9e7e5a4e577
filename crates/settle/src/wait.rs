//! Stability-based convergence poller.
//!
//! Every wait, visibility check under time pressure and expectation in this
//! crate funnels into [`wait_until`]: re-evaluate an async predicate on a fixed
//! interval until it has been continuously true for a stability window, or a
//! timeout elapses. A single true sample is not enough by default, which is
//! what filters out transient states (an element that appears for one frame
//! during a re-render, a spinner that blinks).
//!
//! Time is read through `tokio::time`, so tests can run the poller on a paused
//! clock.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace};

use crate::result::{SettleError, SettleResult};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for wait operations (30 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Default stability window (300ms)
pub const DEFAULT_STABILITY_MS: u64 = 300;

/// Default polling interval (10ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Floor applied to the polling interval so a zero interval cannot spin
pub const MIN_POLL_INTERVAL_MS: u64 = 1;

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Options for [`wait_until`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitOptions {
    /// Upper bound on total elapsed time, in milliseconds
    pub timeout_ms: u64,
    /// How long the predicate must stay true, in milliseconds
    pub stability_ms: u64,
    /// Delay between evaluations, in milliseconds
    pub poll_interval_ms: u64,
    /// Count a failed evaluation as `false` instead of aborting
    pub wrap_predicate_execution_inside_try_catch: bool,
    /// Fail with [`SettleError::Timeout`] instead of returning `false`
    pub throw_on_timeout: bool,
    /// Log every attempt at `info` level
    pub verbose: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            stability_ms: DEFAULT_STABILITY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wrap_predicate_execution_inside_try_catch: false,
            throw_on_timeout: true,
            verbose: false,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set stability window in milliseconds
    #[must_use]
    pub const fn with_stability(mut self, stability_ms: u64) -> Self {
        self.stability_ms = stability_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Treat predicate errors as a `false` evaluation
    #[must_use]
    pub const fn with_try_catch(mut self, wrap: bool) -> Self {
        self.wrap_predicate_execution_inside_try_catch = wrap;
        self
    }

    /// Fail on timeout instead of returning `false`
    #[must_use]
    pub const fn with_throw_on_timeout(mut self, throw: bool) -> Self {
        self.throw_on_timeout = throw;
        self
    }

    /// Log every attempt
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get stability window as Duration
    #[must_use]
    pub const fn stability(&self) -> Duration {
        Duration::from_millis(self.stability_ms)
    }

    /// Get poll interval as Duration, never below [`MIN_POLL_INTERVAL_MS`]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            Duration::from_millis(MIN_POLL_INTERVAL_MS)
        } else {
            Duration::from_millis(self.poll_interval_ms)
        }
    }
}

// =============================================================================
// WAIT RESULT
// =============================================================================

/// Result of a wait operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResult {
    /// Whether the predicate held for the whole stability window
    pub satisfied: bool,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Number of predicate evaluations
    pub attempts: u32,
    /// Description of what was waited for
    pub waited_for: String,
}

impl WaitResult {
    /// Create a successful wait result
    #[must_use]
    pub fn success(elapsed: Duration, attempts: u32, waited_for: impl Into<String>) -> Self {
        Self {
            satisfied: true,
            elapsed,
            attempts,
            waited_for: waited_for.into(),
        }
    }

    /// Create a timeout wait result
    #[must_use]
    pub fn timeout(elapsed: Duration, attempts: u32, waited_for: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            elapsed,
            attempts,
            waited_for: waited_for.into(),
        }
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Wait until `predicate` has been continuously true for the stability window.
///
/// Returns `Ok(true)` on success. On timeout returns `Ok(false)` or, with
/// `throw_on_timeout`, a [`SettleError::Timeout`] carrying `failure_message`.
pub async fn wait_until<F, Fut>(
    predicate: F,
    failure_message: &str,
    options: &WaitOptions,
) -> SettleResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SettleResult<bool>>,
{
    wait_until_with_report(predicate, failure_message, options)
        .await
        .map(|report| report.satisfied)
}

/// Same as [`wait_until`] but reports elapsed time and attempt count
pub async fn wait_until_with_report<F, Fut>(
    mut predicate: F,
    failure_message: &str,
    options: &WaitOptions,
) -> SettleResult<WaitResult>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SettleResult<bool>>,
{
    let start = Instant::now();
    let timeout = options.timeout();
    let stability = options.stability();
    let interval = options.poll_interval();
    let mut attempts: u32 = 0;
    let mut true_since: Option<Instant> = None;

    loop {
        attempts = attempts.saturating_add(1);
        let satisfied = match predicate().await {
            Ok(satisfied) => satisfied,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) if options.wrap_predicate_execution_inside_try_catch => {
                if options.verbose {
                    info!(error = %e, attempt = attempts, "predicate failed, counted as false");
                } else {
                    debug!(error = %e, attempt = attempts, "predicate failed, counted as false");
                }
                false
            }
            Err(e) => return Err(e),
        };

        let now = Instant::now();
        let elapsed = now.duration_since(start);
        if satisfied {
            let since = *true_since.get_or_insert(now);
            let stable_for = now.duration_since(since);
            if stable_for >= stability {
                if options.verbose {
                    info!(
                        attempt = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "predicate is stable"
                    );
                }
                return Ok(WaitResult::success(elapsed, attempts, failure_message));
            }
        } else {
            true_since = None;
        }

        if options.verbose {
            info!(
                attempt = attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                satisfied,
                "waiting for predicate to settle"
            );
        } else {
            trace!(attempt = attempts, elapsed_ms = elapsed.as_millis() as u64, satisfied);
        }

        if elapsed >= timeout {
            break;
        }
        sleep(interval).await;
    }

    let elapsed = start.elapsed();
    if options.throw_on_timeout {
        return Err(SettleError::Timeout {
            message: failure_message.to_string(),
            ms: options.timeout_ms,
        });
    }
    if options.verbose {
        info!(attempts, elapsed_ms = elapsed.as_millis() as u64, "wait timed out");
    }
    Ok(WaitResult::timeout(elapsed, attempts, failure_message))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    mod options_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let options = WaitOptions::default();
            assert_eq!(options.timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
            assert_eq!(options.stability_ms, DEFAULT_STABILITY_MS);
            assert_eq!(options.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
            assert!(!options.wrap_predicate_execution_inside_try_catch);
            assert!(options.throw_on_timeout);
            assert!(!options.verbose);
        }

        #[test]
        fn test_builders() {
            let options = WaitOptions::new()
                .with_timeout(500)
                .with_stability(0)
                .with_poll_interval(25)
                .with_try_catch(true)
                .with_throw_on_timeout(false)
                .with_verbose(true);
            assert_eq!(options.timeout(), Duration::from_millis(500));
            assert_eq!(options.stability(), Duration::ZERO);
            assert_eq!(options.poll_interval(), Duration::from_millis(25));
            assert!(options.wrap_predicate_execution_inside_try_catch);
            assert!(!options.throw_on_timeout);
            assert!(options.verbose);
        }

        #[test]
        fn test_zero_poll_interval_is_floored() {
            let options = WaitOptions::new().with_poll_interval(0);
            assert_eq!(
                options.poll_interval(),
                Duration::from_millis(MIN_POLL_INTERVAL_MS)
            );
        }

        #[test]
        fn test_deserialize_with_field_defaults() {
            let options: WaitOptions = serde_json::from_str("{}").unwrap();
            assert_eq!(options, WaitOptions::default());

            let options: WaitOptions =
                serde_json::from_str(r#"{"timeoutMs": 500, "throwOnTimeout": false}"#).unwrap();
            assert_eq!(options.timeout_ms, 500);
            assert!(!options.throw_on_timeout);
            assert_eq!(options.stability_ms, DEFAULT_STABILITY_MS);
        }
    }

    mod poller_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_true_with_zero_stability_returns_on_first_attempt() {
            let options = WaitOptions::new().with_stability(0);
            let report = wait_until_with_report(|| async { Ok(true) }, "never", &options)
                .await
                .unwrap();
            assert!(report.satisfied);
            assert_eq!(report.attempts, 1);
            assert_eq!(report.elapsed, Duration::ZERO);
        }

        #[tokio::test(start_paused = true)]
        async fn test_success_waits_for_stability_after_first_truth() {
            let t1 = Duration::from_millis(200);
            let options = WaitOptions::new().with_timeout(5_000).with_stability(300);
            let start = Instant::now();
            let report = wait_until_with_report(
                || async move { Ok(start.elapsed() >= t1) },
                "flag",
                &options,
            )
            .await
            .unwrap();
            assert!(report.satisfied);
            assert!(report.elapsed >= Duration::from_millis(500));
            assert!(report.elapsed <= Duration::from_millis(500 + DEFAULT_POLL_INTERVAL_MS));
        }

        #[tokio::test(start_paused = true)]
        async fn test_succeeds_when_timeout_equals_t1_plus_stability() {
            let t1 = Duration::from_millis(100);
            let options = WaitOptions::new().with_timeout(400).with_stability(300);
            let start = Instant::now();
            let ok = wait_until(|| async move { Ok(start.elapsed() >= t1) }, "flag", &options)
                .await
                .unwrap();
            assert!(ok);
        }

        #[tokio::test(start_paused = true)]
        async fn test_flapping_predicate_times_out() {
            let options = WaitOptions::new().with_timeout(1_000).with_stability(300);
            let start = Instant::now();
            let err = wait_until(
                || async move { Ok((start.elapsed().as_millis() / 50) % 2 == 0) },
                "flapping",
                &options,
            )
            .await
            .unwrap_err();
            assert!(err.is_timeout());
            assert!(err.to_string().contains("flapping"));
            assert!(start.elapsed() >= Duration::from_millis(1_000));
        }

        #[tokio::test(start_paused = true)]
        async fn test_false_resets_stability_clock() {
            let options = WaitOptions::new().with_timeout(5_000).with_stability(300);
            let start = Instant::now();
            // true during [0, 100), false during [100, 150), true afterwards
            let report = wait_until_with_report(
                || async move {
                    let ms = start.elapsed().as_millis();
                    Ok(!(100..150).contains(&ms))
                },
                "reset",
                &options,
            )
            .await
            .unwrap();
            assert!(report.elapsed >= Duration::from_millis(450));
        }

        #[tokio::test(start_paused = true)]
        async fn test_timeout_without_throw_returns_false() {
            let options = WaitOptions::new()
                .with_timeout(100)
                .with_throw_on_timeout(false);
            let start = Instant::now();
            let ok = wait_until(|| async { Ok(false) }, "never", &options)
                .await
                .unwrap();
            assert!(!ok);
            assert!(start.elapsed() >= Duration::from_millis(100));
        }

        #[tokio::test(start_paused = true)]
        async fn test_zero_timeout_evaluates_once() {
            let options = WaitOptions::new()
                .with_timeout(0)
                .with_throw_on_timeout(false);
            let report = wait_until_with_report(|| async { Ok(false) }, "never", &options)
                .await
                .unwrap();
            assert_eq!(report.attempts, 1);
            assert!(!report.satisfied);
        }

        #[tokio::test(start_paused = true)]
        async fn test_error_propagates_without_try_catch() {
            let mut calls = 0;
            let result = wait_until(
                || {
                    calls += 1;
                    async { Err(SettleError::driver("boom")) }
                },
                "boom",
                &WaitOptions::new(),
            )
            .await;
            assert!(matches!(result, Err(SettleError::Driver { .. })));
            assert_eq!(calls, 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_try_catch_counts_errors_as_false() {
            let mut calls = 0;
            let options = WaitOptions::new().with_stability(0).with_try_catch(true);
            let ok = wait_until(
                || {
                    calls += 1;
                    let n = calls;
                    async move {
                        if n <= 3 {
                            Err(SettleError::detached("re-rendering"))
                        } else {
                            Ok(true)
                        }
                    }
                },
                "recovers",
                &options,
            )
            .await
            .unwrap();
            assert!(ok);
            assert_eq!(calls, 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_configuration_errors_are_never_retried() {
            let mut calls = 0;
            let options = WaitOptions::new().with_try_catch(true);
            let err = wait_until(
                || {
                    calls += 1;
                    async {
                        Err(SettleError::InvalidSelector {
                            selector: String::new(),
                            reason: "selector is empty".to_string(),
                        })
                    }
                },
                "bad selector",
                &options,
            )
            .await
            .unwrap_err();
            assert!(err.is_configuration());
            assert_eq!(calls, 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_verbose_run_still_succeeds() {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .try_init();
            let options = WaitOptions::new().with_stability(20).with_verbose(true);
            let report = wait_until_with_report(|| async { Ok(true) }, "verbose", &options)
                .await
                .unwrap();
            assert!(report.satisfied);
            assert_eq!(report.attempts, 3);
            assert_eq!(report.waited_for, "verbose");
        }
    }
}
