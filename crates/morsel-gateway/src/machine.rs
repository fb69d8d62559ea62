use std::time::Duration;

/// Lifecycle of the single logical socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Automatic reconnect budget.
///
/// Attempt `n` (1-based) waits `initial_delay * 2^(n-1)`: 1s, 2s, 4s, 8s, 16s
/// with the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay.saturating_mul(1u32 << exponent)
    }

    /// Every delay the policy will ever schedule, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(|attempt| self.delay_for(attempt))
    }
}

/// What the owner of the socket has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Open a transport.
    Dial,
    /// The transport is up: flush queued frames.
    Drain,
    /// Dial again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted. Wait for an explicit connect or send.
    GiveUp,
    /// Tear the transport down.
    Close,
    /// Nothing to do in the current state.
    Ignore,
}

/// Reconnect state machine. Pure: no timers, no I/O.
#[derive(Debug, Clone)]
pub struct Machine {
    state: ConnectionState,
    attempts: u32,
    policy: BackoffPolicy,
}

impl Machine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Automatic attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Explicit connect, a send while offline, or a retry timer firing.
    pub fn connect(&mut self) -> Transition {
        match self.state {
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                Transition::Dial
            }
            _ => Transition::Ignore,
        }
    }

    pub fn opened(&mut self) -> Transition {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Open;
                self.attempts = 0;
                Transition::Drain
            }
            _ => Transition::Ignore,
        }
    }

    /// The transport failed to open or dropped. Both take the backoff path.
    pub fn closed(&mut self) -> Transition {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                self.state = ConnectionState::Disconnected;
                if self.attempts >= self.policy.max_attempts {
                    return Transition::GiveUp;
                }
                self.attempts += 1;
                Transition::Retry {
                    attempt: self.attempts,
                    delay: self.policy.delay_for(self.attempts),
                }
            }
            ConnectionState::Closing => {
                self.state = ConnectionState::Disconnected;
                Transition::Ignore
            }
            ConnectionState::Disconnected => Transition::Ignore,
        }
    }

    /// Logout. Resets the retry budget; the caller follows up with `closed`.
    pub fn disconnect(&mut self) -> Transition {
        self.attempts = 0;
        match self.state {
            ConnectionState::Disconnected => Transition::Ignore,
            _ => {
                self.state = ConnectionState::Closing;
                Transition::Close
            }
        }
    }
}
