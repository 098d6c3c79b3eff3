use std::fmt;

/// Lifecycle of the KMS control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Registering(RegistrationStep),
    Operational,
    ConnectFailed,
    RegistrationFailed,
}

impl SessionState {
    /// Whether a transport is open, regardless of registration progress.
    pub fn has_transport(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Registering(_) | SessionState::Operational
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Registering(step) => write!(f, "REGISTERING ({step})"),
            SessionState::Operational => write!(f, "OPERATIONAL"),
            SessionState::ConnectFailed => write!(f, "CONNECT_FAILED"),
            SessionState::RegistrationFailed => write!(f, "REGISTRATION_FAILED"),
        }
    }
}

/// Which half of the registration handshake is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    AwaitingRegisterResponse,
    AwaitingChallengeResponse,
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStep::AwaitingRegisterResponse => write!(f, "register"),
            RegistrationStep::AwaitingChallengeResponse => write!(f, "challenge"),
        }
    }
}
