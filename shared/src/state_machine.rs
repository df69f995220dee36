//! Connection State Machines
//!
//! Defines valid connection state transitions and the bookkeeping of the
//! bounded reconnect policy. Both are pure; the async layer drives them.

use std::fmt;

/// Lifecycle state of one robot connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Caller asked for a connection
    ConnectRequested,
    /// Transport session opened
    Opened,
    /// Transport session could not be opened
    OpenFailed,
    /// Established session failed unexpectedly
    SessionLost { auto_reconnect: bool },
    /// Reconnect supervisor re-established the session
    Reconnected,
    /// Reconnect supervisor ran out of attempts
    ReconnectGivenUp,
    /// Caller asked to disconnect
    DisconnectRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or was re-entered)
    Success(ConnectionState),
    /// Event is a deliberate no-op in the current state
    Ignored(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

/// Serialized state machine for a single connection
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        // Explicit disconnect wins from every state
        if event == LinkEvent::DisconnectRequested {
            self.current_state = ConnectionState::Disconnected;
            return TransitionResult::Success(self.current_state);
        }

        if let Some(state) = self.ignored(&event) {
            return TransitionResult::Ignored(state);
        }

        match self.get_next_state(&event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn ignored(&self, event: &LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (self.current_state, event) {
            (Connecting | Connected | Reconnecting, LinkEvent::ConnectRequested) => {
                Some(self.current_state)
            }
            _ => None,
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: &LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self.current_state, event) {
            (Disconnected | Failed, ConnectRequested) => Some(Connecting),

            (Connecting, Opened) => Some(Connected),
            (Connecting, OpenFailed) => Some(Failed),

            (Connected, SessionLost { auto_reconnect: true }) => Some(Reconnecting),
            (Connected, SessionLost { auto_reconnect: false }) => Some(Disconnected),

            (Reconnecting, Reconnected) => Some(Connected),
            (Reconnecting, ReconnectGivenUp) => Some(Failed),

            _ => None,
        }
    }
}

/// Phase of the reconnect supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPhase {
    #[default]
    Idle,
    Scheduled,
    Attempting,
    GivenUp,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Retry counter and phase of the bounded reconnect policy
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    phase: ReconnectPhase,
    attempts: u32,
    max_attempts: u32,
}

impl ReconnectTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            phase: ReconnectPhase::Idle,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Unexpected loss (or a failed attempt with budget left): wait for the delay
    pub fn schedule(&mut self) {
        self.phase = ReconnectPhase::Scheduled;
    }

    /// Delay elapsed: returns the 1-based number of the attempt starting now
    pub fn begin_attempt(&mut self) -> u32 {
        self.phase = ReconnectPhase::Attempting;
        self.attempts += 1;
        self.attempts
    }

    pub fn succeed(&mut self) {
        self.phase = ReconnectPhase::Idle;
        self.attempts = 0;
    }

    pub fn fail(&mut self) -> RetryDecision {
        if self.attempts < self.max_attempts {
            self.phase = ReconnectPhase::Scheduled;
            RetryDecision::Retry
        } else {
            self.phase = ReconnectPhase::GivenUp;
            RetryDecision::GiveUp
        }
    }

    /// Explicit disconnect: back to Idle regardless of the counter
    pub fn cancel(&mut self) {
        self.phase = ReconnectPhase::Idle;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
        assert_eq!(
            fsm.process_event(LinkEvent::ConnectRequested),
            TransitionResult::Success(ConnectionState::Connecting)
        );
        assert_eq!(
            fsm.process_event(LinkEvent::Opened),
            TransitionResult::Success(ConnectionState::Connected)
        );
    }

    #[test]
    fn test_connect_is_noop_when_connected() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkEvent::ConnectRequested);
        fsm.process_event(LinkEvent::Opened);
        assert_eq!(
            fsm.process_event(LinkEvent::ConnectRequested),
            TransitionResult::Ignored(ConnectionState::Connected)
        );
    }

    #[test]
    fn test_loss_and_recovery() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkEvent::ConnectRequested);
        fsm.process_event(LinkEvent::Opened);
        assert_eq!(
            fsm.process_event(LinkEvent::SessionLost { auto_reconnect: true }),
            TransitionResult::Success(ConnectionState::Reconnecting)
        );
        assert_eq!(
            fsm.process_event(LinkEvent::Reconnected),
            TransitionResult::Success(ConnectionState::Connected)
        );
        fsm.process_event(LinkEvent::SessionLost { auto_reconnect: true });
        assert_eq!(
            fsm.process_event(LinkEvent::ReconnectGivenUp),
            TransitionResult::Success(ConnectionState::Failed)
        );
        // Failed allows a fresh user-initiated connect
        assert_eq!(
            fsm.process_event(LinkEvent::ConnectRequested),
            TransitionResult::Success(ConnectionState::Connecting)
        );
    }

    #[test]
    fn test_loss_without_auto_reconnect() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkEvent::ConnectRequested);
        fsm.process_event(LinkEvent::Opened);
        assert_eq!(
            fsm.process_event(LinkEvent::SessionLost { auto_reconnect: false }),
            TransitionResult::Success(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let mut fsm = ConnectionStateMachine::new();
        assert!(matches!(
            fsm.process_event(LinkEvent::Opened),
            TransitionResult::Invalid { from: ConnectionState::Disconnected, .. }
        ));
        assert!(matches!(
            fsm.process_event(LinkEvent::SessionLost { auto_reconnect: true }),
            TransitionResult::Invalid { .. }
        ));
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkEvent::ConnectRequested);
        fsm.process_event(LinkEvent::Opened);
        fsm.process_event(LinkEvent::SessionLost { auto_reconnect: true });
        assert_eq!(
            fsm.process_event(LinkEvent::DisconnectRequested),
            TransitionResult::Success(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn test_tracker_gives_up_after_max() {
        let mut tracker = ReconnectTracker::new(3);
        tracker.schedule();
        let mut attempts = Vec::new();
        loop {
            attempts.push(tracker.begin_attempt());
            if tracker.fail() == RetryDecision::GiveUp {
                break;
            }
            assert_eq!(tracker.phase(), ReconnectPhase::Scheduled);
        }
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(tracker.phase(), ReconnectPhase::GivenUp);
    }

    #[test]
    fn test_tracker_resets_on_success_and_cancel() {
        let mut tracker = ReconnectTracker::new(5);
        tracker.schedule();
        tracker.begin_attempt();
        tracker.fail();
        tracker.begin_attempt();
        tracker.succeed();
        assert_eq!(tracker.attempts(), 0);
        assert_eq!(tracker.phase(), ReconnectPhase::Idle);

        tracker.schedule();
        tracker.begin_attempt();
        tracker.cancel();
        assert_eq!(tracker.attempts(), 0);
        assert_eq!(tracker.phase(), ReconnectPhase::Idle);
    }
}
