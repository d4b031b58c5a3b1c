//! Disconnect reason classification.

use std::fmt;

/// Why a protocol connection closed, decoded from the close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// 428: the server closed the stream.
    ConnectionClosed,
    /// 408: the stream dropped or timed out.
    ConnectionLost,
    /// 440: another client took over this session.
    ConnectionReplaced,
    /// 401: the account logged this device out.
    LoggedOut,
    /// 500: the stored session is unusable.
    BadSession,
    /// 515: the server asks for a fresh connection, usually right after pairing.
    RestartRequired,
    /// 411: multi-device protocol mismatch.
    MultideviceMismatch,
    /// 403
    Forbidden,
    /// 503
    UnavailableService,
    /// Any status code not listed above.
    Other(u16),
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            411 => Self::MultideviceMismatch,
            403 => Self::Forbidden,
            503 => Self::UnavailableService,
            other => Self::Other(other),
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Forbidden => 403,
            Self::UnavailableService => 503,
            Self::Other(code) => code,
        }
    }

    /// Transient reasons are recovered by reconnecting.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::ConnectionClosed | Self::RestartRequired
        )
    }
}

/// Classify an optional close reason; an absent reason is terminal.
pub fn is_transient(reason: Option<DisconnectReason>) -> bool {
    reason.is_some_and(DisconnectReason::is_transient)
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionLost => "connection lost",
            Self::ConnectionReplaced => "connection replaced",
            Self::LoggedOut => "logged out",
            Self::BadSession => "bad session",
            Self::RestartRequired => "restart required",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::Forbidden => "forbidden",
            Self::UnavailableService => "service unavailable",
            Self::Other(_) => "unknown",
        };
        write!(f, "{} ({})", name, self.status_code())
    }
}
