//! Service state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! Caller (main.rs) executes the I/O implied by each action.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

/// Runtime counters surfaced on `/health`
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being forwarded. Reported when the drain deadline
    /// expires with work still pending.
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Lifecycle states
///
/// Field data is carried through transitions, not read independently.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ServiceState {
    /// Loading config, opening the session store
    Initializing,
    /// Binding the HTTP listener
    Starting { listen_addr: SocketAddr },
    /// Accepting and forwarding requests
    Running { listen_addr: SocketAddr },
    /// Graceful shutdown, finishing in-flight requests
    Draining { deadline: Instant },
    /// Terminal state
    Stopped { exit_code: i32 },
}

/// Events that drive state transitions
#[derive(Debug)]
pub enum ServiceEvent {
    /// Configuration parsed and validated
    ConfigLoaded { listen_addr: SocketAddr },
    /// Listener bind or client construction failed
    StartupFailed(String),
    /// HTTP listener bound and ready
    ListenerReady,
    /// SIGTERM/SIGINT received
    ShutdownSignal,
    /// Every in-flight request finished
    Drained,
    /// Drain deadline exceeded
    DrainTimeout,
}

/// Actions the caller should execute after a state transition
#[derive(Debug)]
pub enum ServiceAction {
    /// Bind HTTP listener on the given address
    StartListener { addr: SocketAddr },
    /// Stop accepting connections and wait until `deadline`
    Drain { deadline: Instant },
    /// Exit the process
    Shutdown { exit_code: i32 },
    /// No-op
    None,
}

/// Time allowed for in-flight requests after a shutdown signal
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ServiceState, event: ServiceEvent) -> (ServiceState, ServiceAction) {
    match (state, event) {
        // --- Initializing ---
        (ServiceState::Initializing, ServiceEvent::ConfigLoaded { listen_addr }) => (
            ServiceState::Starting { listen_addr },
            ServiceAction::StartListener { addr: listen_addr },
        ),

        // --- Starting ---
        (ServiceState::Starting { listen_addr }, ServiceEvent::ListenerReady) => (
            ServiceState::Running { listen_addr },
            ServiceAction::None,
        ),

        (ServiceState::Initializing | ServiceState::Starting { .. }, ServiceEvent::StartupFailed(_)) => (
            ServiceState::Stopped { exit_code: 1 },
            ServiceAction::Shutdown { exit_code: 1 },
        ),

        // --- Running ---
        (ServiceState::Running { .. }, ServiceEvent::ShutdownSignal) => {
            let deadline = Instant::now() + DRAIN_TIMEOUT;
            (
                ServiceState::Draining { deadline },
                ServiceAction::Drain { deadline },
            )
        }

        // --- Draining ---
        (ServiceState::Draining { .. }, ServiceEvent::Drained | ServiceEvent::DrainTimeout) => (
            ServiceState::Stopped { exit_code: 0 },
            ServiceAction::Shutdown { exit_code: 0 },
        ),

        // --- Shutdown before the listener is up: nothing to drain ---
        (
            ServiceState::Initializing | ServiceState::Starting { .. },
            ServiceEvent::ShutdownSignal,
        ) => (
            ServiceState::Stopped { exit_code: 0 },
            ServiceAction::Shutdown { exit_code: 0 },
        ),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, ServiceAction::None),
    }
}
