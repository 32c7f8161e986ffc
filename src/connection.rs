use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Join state machine of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    CapabilitiesLoaded,
    TransportsReady,
    Joined,
    Active,
    Exiting,
}

impl SessionState {
    /// Transports exist, so producing is possible.
    pub fn has_transports(self) -> bool {
        matches!(
            self,
            SessionState::TransportsReady | SessionState::Joined | SessionState::Active
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::CapabilitiesLoaded => write!(f, "CapabilitiesLoaded"),
            SessionState::TransportsReady => write!(f, "TransportsReady"),
            SessionState::Joined => write!(f, "Joined"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Exiting => write!(f, "Exiting"),
        }
    }
}

/// Publishes state changes to any number of observers.
#[derive(Clone)]
pub struct SessionMonitor {
    state: Arc<watch::Sender<SessionState>>,
    receiver: watch::Receiver<SessionState>,
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMonitor {
    pub fn new() -> Self {
        let (state, receiver) = watch::channel(SessionState::Idle);
        Self {
            state: Arc::new(state),
            receiver,
        }
    }

    /// Returns the previous state.
    pub fn set(&self, state: SessionState) -> SessionState {
        self.state.send_replace(state)
    }

    pub fn state(&self) -> SessionState {
        *self.receiver.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.receiver.clone()
    }

    /// Waits until the session is back to [`SessionState::Idle`].
    pub async fn wait_idle(&self) {
        let mut receiver = self.subscribe();
        let _ = receiver
            .wait_for(|state| *state == SessionState::Idle)
            .await;
    }
}
