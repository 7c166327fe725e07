use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards calls to a remote collaborator (broker, stock validator). After
// `failure_threshold` consecutive failures calls are rejected without being
// attempted until `open_timeout` elapses; then a half-open probe decides.
//
// States:
// - Closed: calls pass through
// - Open: calls rejected immediately
// - HalfOpen: probing, `success_threshold` successes close the circuit
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the metrics gauge
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before a half-open probe
    pub open_timeout: Duration,
    /// Probe successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    #[error("{0}")]
    OperationFailed(E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit::<E>().await?;

        match operation.await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut state = self.state.lock().await;

        if state.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = state
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.open_timeout)
            .unwrap_or(true);

        if elapsed {
            tracing::info!(breaker = %self.name, "Circuit breaker transitioning to HalfOpen");
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            Ok(())
        } else {
            Err(CircuitBreakerError::Open(self.name.to_string()))
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(
                        breaker = %self.name,
                        successes = state.success_count,
                        "Circuit breaker closing"
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                // A call admitted before another task opened the circuit
            }
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                tracing::warn!(
                    breaker = %self.name,
                    failures = state.failure_count,
                    "Circuit breaker opening"
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "Failure during half-open, reopening circuit");
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                open_timeout: Duration::from_secs(1),
                success_threshold: 2,
            },
        );

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), _>("error") }).await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed("error"))));
        }

        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(ref name)) if name == "test"));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(1),
                success_threshold: 1,
            },
        );

        let _ = cb.call(async { Err::<(), _>("error") }).await;
        let _ = cb.call(async { Ok::<_, &str>(()) }).await;
        let _ = cb.call(async { Err::<(), _>("error") }).await;

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_after_timeout() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_millis(50),
                success_threshold: 1,
            },
        );

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>("error") }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(CircuitState::Closed.as_gauge(), 0);
    }
}
