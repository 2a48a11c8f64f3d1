use crate::core::errors::UpstreamError;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error, StateMachine};
use std::future::Future;
use std::time::Duration;

/// Circuit breaker guarding calls to external collaborators
///
/// Policy:
/// - 5 consecutive failures triggers OPEN state
/// - 5 seconds cool-down period before HALF-OPEN (retry)
pub type UpstreamCircuitBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

/// Create a new standard circuit breaker instance
pub fn create_circuit_breaker() -> UpstreamCircuitBreaker {
    Config::new()
        .failure_policy(failure_policy::consecutive_failures(
            5,
            backoff::constant(Duration::from_secs(5)),
        ))
        .build()
}

/// Bound an upstream call by `timeout`; expiry is reported as `UpstreamError::Timeout`
pub async fn with_timeout<F, T>(timeout: Duration, operation: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout),
    }
}

/// Whether an upstream error should count against the circuit.
/// A unique violation is an answer from a healthy collaborator.
fn is_failure(err: &UpstreamError) -> bool {
    !matches!(err, UpstreamError::Conflict)
}

/// Execute an upstream call within the circuit breaker and a deadline
///
/// A rejected call (circuit open) never reaches the collaborator.
pub async fn execute_with_cb<F, Fut, T>(
    cb: &UpstreamCircuitBreaker,
    timeout: Duration,
    operation: F,
) -> Result<T, UpstreamError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    match cb.call_with(is_failure, with_timeout(timeout, operation())).await {
        Ok(val) => Ok(val),
        Err(Error::Inner(e)) => Err(e),
        Err(Error::Rejected) => Err(UpstreamError::CircuitOpen),
    }
}
