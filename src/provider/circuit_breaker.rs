use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct Gate {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probes_in_flight: usize,
}

/// Returned by [`ProviderCircuitBreaker::permit`] when a call must not be
/// attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen;

/// Closed/Open/Half-Open gate in front of the data provider. After
/// `failure_threshold` consecutive failures the gate opens for `cooldown`,
/// then admits up to `probe_limit` trial calls.
#[derive(Debug)]
pub struct ProviderCircuitBreaker {
    gate: Mutex<Gate>,
    failure_threshold: usize,
    cooldown: Duration,
    probe_limit: usize,
}

impl Default for ProviderCircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), 1)
    }
}

impl ProviderCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration, probe_limit: usize) -> Self {
        Self {
            gate: Mutex::new(Gate {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown: cooldown.max(Duration::from_millis(1)),
            probe_limit: probe_limit.max(1),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let gate = self.lock();
        CircuitBreakerSnapshot {
            state: gate.state,
            consecutive_failures: gate.consecutive_failures,
            opened_at: gate.opened_at,
        }
    }

    /// Reserves the right to make one call. Moves an expired Open gate to
    /// Half-Open.
    pub fn permit(&self) -> Result<CircuitState, CircuitOpen> {
        let mut gate = self.lock();

        if gate.state == CircuitState::Open {
            let cooled = gate
                .opened_at
                .map(|opened| opened.elapsed() >= self.cooldown)
                .unwrap_or(false);
            if !cooled {
                return Err(CircuitOpen);
            }
            Self::transition(&mut gate, CircuitState::HalfOpen);
            gate.probes_in_flight = 0;
        }

        if gate.state == CircuitState::HalfOpen {
            if gate.probes_in_flight >= self.probe_limit {
                return Err(CircuitOpen);
            }
            gate.probes_in_flight += 1;
        }

        Ok(gate.state)
    }

    pub fn record_success(&self) {
        let mut gate = self.lock();
        Self::release_probe(&mut gate);
        gate.consecutive_failures = 0;
        if gate.state == CircuitState::HalfOpen {
            gate.opened_at = None;
            Self::transition(&mut gate, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut gate = self.lock();
        Self::release_probe(&mut gate);
        gate.consecutive_failures = gate.consecutive_failures.saturating_add(1);

        let trip = match gate.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => gate.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            gate.opened_at = Some(Instant::now());
            gate.probes_in_flight = 0;
            Self::transition(&mut gate, CircuitState::Open);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_probe(gate: &mut Gate) {
        if gate.state == CircuitState::HalfOpen {
            gate.probes_in_flight = gate.probes_in_flight.saturating_sub(1);
        }
    }

    fn transition(gate: &mut Gate, next: CircuitState) {
        if gate.state != next {
            tracing::warn!(
                previous = ?gate.state,
                next = ?next,
                consecutive_failures = gate.consecutive_failures,
                "provider circuit breaker state changed"
            );
            gate.state = next;
        }
    }
}
