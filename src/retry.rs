//! Bounded, classification-aware retries around remote API calls.
//!
//! [`ResilientInvoker::invoke`] runs an action, classifies each failure through
//! [`classify`](crate::classify::classify), and sleeps `base_delay * 2^n` (plus optional
//! jitter) between retryable attempts. Authentication failures are never retried here: the
//! caller refreshes the credential and rebuilds its client first (see
//! [`ApiSession`](crate::session::ApiSession)).

// std
use std::{
	sync::atomic::{AtomicU32, Ordering},
	time::Duration as StdDuration,
};
// crates.io
use backon::{ExponentialBuilder, Retryable};
use rand::Rng;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	classify::{ClassifiedError, ErrorKind, RemoteFailure},
	obs,
};

/// Retry knobs used by [`ResilientInvoker`].
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
	/// Total number of attempts, including the first one.
	pub max_attempts: u32,
	/// Delay before the first retry; doubles for every further retry.
	pub base_delay: StdDuration,
	/// Upper bound for a single backoff delay (before jitter).
	pub max_delay: StdDuration,
	/// Extra random delay as a fraction of the computed delay, in `0.0..=1.0`.
	pub jitter: f64,
}
impl RetryPolicy {
	const DEFAULT_MAX_ATTEMPTS: u32 = 3;

	/// Policy without jitter: delays are exactly `base_delay * 2^n`.
	pub fn without_jitter(mut self) -> Self {
		self.jitter = 0.0;

		self
	}

	/// Overrides the attempt budget (values below one are treated as one).
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts.max(1);

		self
	}

	/// Overrides the base delay.
	pub fn with_base_delay(mut self, delay: StdDuration) -> Self {
		self.base_delay = delay;

		self
	}

	/// Overrides the jitter fraction (clamped to `0.0..=1.0`).
	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };

		self
	}

	/// Exponential backoff schedule for the retries this policy allows (no jitter).
	pub fn backoff(&self) -> ExponentialBuilder {
		let retries = usize::try_from(self.max_attempts.max(1) - 1).unwrap_or(usize::MAX);

		ExponentialBuilder::default()
			.with_min_delay(self.base_delay)
			.with_factor(2.0)
			.with_max_delay(self.max_delay)
			.with_max_times(retries)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
			base_delay: StdDuration::from_secs(1),
			max_delay: StdDuration::from_secs(60),
			jitter: 0.2,
		}
	}
}

/// Executes remote work with bounded, exponentially backed-off retries.
#[derive(Clone, Debug, Default)]
pub struct ResilientInvoker {
	policy: RetryPolicy,
	shutdown: CancellationToken,
}
impl ResilientInvoker {
	/// Creates an invoker with the provided policy.
	pub fn new(policy: RetryPolicy) -> Self {
		Self { policy, shutdown: CancellationToken::new() }
	}

	/// Aborts pending invocations, backoff sleeps included, with [`Error::Interrupted`] once
	/// `token` is cancelled.
	pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
		self.shutdown = token;

		self
	}

	/// Policy used by this invoker.
	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Runs `action` until it succeeds, fails terminally, or the attempt budget is spent.
	///
	/// Terminal failures map to [`Error::QuotaExceeded`], [`Error::RateLimited`], or
	/// [`Error::Remote`] carrying the classification.
	pub async fn invoke<T, F, Fut>(&self, action: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, RemoteFailure>>,
	{
		let max_attempts = self.policy.max_attempts.max(1);
		let jitter = self.policy.jitter;
		let retries = AtomicU32::new(0);
		let retrying = action
			.retry(self.policy.backoff())
			.sleep(move |delay| tokio::time::sleep(jittered(delay, jitter)))
			.when(|failure: &RemoteFailure| failure.classify().retryable)
			.notify(|failure: &RemoteFailure, delay: StdDuration| {
				let attempt = retries.fetch_add(1, Ordering::SeqCst) + 1;
				let kind = failure.classify().kind;

				obs::record_retry(kind);
				tracing::warn!(
					attempt,
					max_attempts,
					delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
					%kind,
					"Remote call failed; retrying after backoff."
				);
			});
		let outcome = tokio::select! {
			biased;

			outcome = retrying => outcome,
			_ = self.shutdown.cancelled() => return Err(Error::Interrupted),
		};
		let failure = match outcome {
			Ok(value) => return Ok(value),
			Err(failure) => failure,
		};
		let attempts = retries.load(Ordering::SeqCst) + 1;
		let classified = failure.classify();

		tracing::debug!(
			attempts,
			kind = %classified.kind,
			status = failure.status,
			"Remote call failed terminally."
		);

		Err(terminal_error(classified, attempts))
	}
}

/// Stretches `delay` by a random fraction in `0.0..=jitter`.
fn jittered(delay: StdDuration, jitter: f64) -> StdDuration {
	if jitter <= 0.0 {
		return delay;
	}

	delay.mul_f64(1.0 + rand::rng().random_range(0.0..=jitter))
}

fn terminal_error(classified: ClassifiedError, attempts: u32) -> Error {
	match classified.kind {
		ErrorKind::QuotaExceeded => Error::QuotaExceeded { message: classified.message },
		ErrorKind::RateLimited => Error::RateLimited { message: classified.message, attempts },
		ErrorKind::AuthFailed | ErrorKind::Unknown => Error::Remote(classified),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use backon::BackoffBuilder;
	use tokio::time::Instant;
	// self
	use super::*;

	#[test]
	fn delays_double_and_cap() {
		let policy = RetryPolicy::default().without_jitter().with_max_attempts(10);
		let delays = policy.backoff().build().map(|delay| delay.as_secs()).collect::<Vec<_>>();

		assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
		assert_eq!(RetryPolicy::default().backoff().build().count(), 2);
	}

	#[test]
	fn jitter_stays_within_bounds() {
		for _ in 0..100 {
			let delay = jittered(StdDuration::from_secs(2), 0.2);

			assert!(delay >= StdDuration::from_secs(2));
			assert!(delay <= StdDuration::from_millis(2_400));
		}

		assert_eq!(jittered(StdDuration::from_secs(2), 0.0), StdDuration::from_secs(2));
	}

	#[tokio::test(start_paused = true)]
	async fn rate_limited_action_retries_with_increasing_delays() {
		let invoker = ResilientInvoker::default();
		let stamps = Mutex::new(Vec::new());
		let err = invoker
			.invoke(|| {
				stamps.lock().push(Instant::now());

				async { Err::<(), _>(RemoteFailure::new(429, "too many requests")) }
			})
			.await
			.expect_err("Persistent throttling should surface as an error.");

		assert!(matches!(err, Error::RateLimited { attempts: 3, .. }));

		let stamps = stamps.into_inner();

		assert_eq!(stamps.len(), 3);

		let first_gap = stamps[1] - stamps[0];
		let second_gap = stamps[2] - stamps[1];

		assert!(first_gap >= StdDuration::from_secs(1));
		assert!(second_gap > first_gap);
	}

	#[tokio::test(start_paused = true)]
	async fn quota_exceeded_is_not_retried() {
		let invoker = ResilientInvoker::default();
		let calls = AtomicU32::new(0);
		let err = invoker
			.invoke(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err::<(), _>(RemoteFailure::new(403, "quotaExceeded: daily limit")) }
			})
			.await
			.expect_err("Quota exhaustion should surface immediately.");

		assert!(matches!(err, Error::QuotaExceeded { .. }));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn auth_failures_are_left_to_the_caller() {
		let invoker = ResilientInvoker::default();
		let calls = AtomicU32::new(0);
		let err = invoker
			.invoke(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err::<(), _>(RemoteFailure::new(401, "Invalid Credentials")) }
			})
			.await
			.expect_err("Authentication failures should not be retried.");

		assert!(err.is_auth_failure());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn transient_throttle_then_success() {
		let invoker = ResilientInvoker::new(RetryPolicy::default().with_max_attempts(5));
		let calls = AtomicU32::new(0);
		let value = invoker
			.invoke(|| {
				let call = calls.fetch_add(1, Ordering::SeqCst);

				async move {
					if call < 2 {
						Err(RemoteFailure::new(403, "rateLimitExceeded"))
					} else {
						Ok(call)
					}
				}
			})
			.await
			.expect("Third attempt should succeed.");

		assert_eq!(value, 2);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_interrupts_backoff() {
		let shutdown = CancellationToken::new();
		let invoker = ResilientInvoker::default().with_shutdown(shutdown.clone());
		let calls = AtomicU32::new(0);

		shutdown.cancel();

		let err = invoker
			.invoke(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err::<(), _>(RemoteFailure::new(429, "too many requests")) }
			})
			.await
			.expect_err("Cancelled backoff should abort the retry loop.");

		assert!(matches!(err, Error::Interrupted));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
