//! One error enum per originating layer, each convertible into the wire
//! shape its layer surfaces to the outside (a [`WireError`], an HTTP
//! status, or both).

use std::error::Error;
use std::fmt;

use crate::api::message::WireError;

/// Malformed envelope, pre-join misuse, or an unknown message kind. Fatal
/// to the connection: the transport closes with a 1002-equivalent code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    MalformedEnvelope,
    PreJoinMisuse,
    UnknownKind,
}

impl ProtocolError {
    pub fn code(self) -> &'static str {
        match self {
            Self::MalformedEnvelope => "malformedEnvelope",
            Self::PreJoinMisuse => "preJoinMisuse",
            Self::UnknownKind => "unknownKind",
        }
    }

    /// WebSocket close code paired with this error: a 1002-equivalent for
    /// every protocol violation.
    pub fn close_code(self) -> u16 {
        1002
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Error for ProtocolError {}

/// Missing/invalid token, or insufficient admin role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    InsufficientRole,
}

impl AuthError {
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingToken => "missingToken",
            Self::InvalidToken => "invalidToken",
            Self::InsufficientRole => "insufficientRole",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            Self::MissingToken | Self::InvalidToken => 401,
            Self::InsufficientRole => 403,
        }
    }

    pub fn close_code(self) -> u16 {
        4001
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Error for AuthError {}

/// Raised by a land's `CanJoin` handler. The session remains open for
/// retry on every variant.
#[derive(Debug, Clone)]
pub enum JoinError {
    RoomFull,
    Unauthorized,
    LandNotFound,
    Custom { code: String, message: String },
}

impl JoinError {
    pub fn code(&self) -> &str {
        match self {
            Self::RoomFull => "roomFull",
            Self::Unauthorized => "unauthorized",
            Self::LandNotFound => "landNotFound",
            Self::Custom { code, .. } => code,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::RoomFull => "the land is full".to_string(),
            Self::Unauthorized => "not authorized to join this land".to_string(),
            Self::LandNotFound => "no land instance with that id".to_string(),
            Self::Custom { message, .. } => message.clone(),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl Error for JoinError {}

/// Raised while dispatching an action. Returned in the `actionResponse`;
/// the session remains open.
#[derive(Debug, Clone)]
pub enum DispatchError {
    UnknownAction,
    DecodeFailed,
    HandlerError(String),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownAction => "unknownAction",
            Self::DecodeFailed => "decodeFailed",
            Self::HandlerError(_) => "handlerError",
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlerError(msg) => write!(f, "{}: {msg}", self.code()),
            other => f.write_str(other.code()),
        }
    }
}

impl Error for DispatchError {}

impl From<DispatchError> for WireError {
    fn from(err: DispatchError) -> Self {
        let retryable = matches!(err, DispatchError::HandlerError(_));
        WireError::new(err.code(), err.to_string(), retryable)
    }
}

/// Backpressure overflow or a per-field encode failure. Fatal to the
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    SlowConsumer,
    EncodeFailure,
}

impl TransportError {
    pub fn code(self) -> &'static str {
        match self {
            Self::SlowConsumer => "slowConsumer",
            Self::EncodeFailure => "internal",
        }
    }

    pub fn close_code(self) -> u16 {
        match self {
            Self::SlowConsumer => 4003,
            Self::EncodeFailure => 1011,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Error for TransportError {}

/// Matchmaking control-plane errors, surfaced over HTTP as
/// `{success: false, error: {code, message, retryable}}`.
#[derive(Debug, Clone)]
pub enum MatchmakingError {
    TicketNotFound,
    AlreadyAssigned,
    NoCapacity,
    DuplicateGroup,
}

impl MatchmakingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TicketNotFound => "ticketNotFound",
            Self::AlreadyAssigned => "alreadyAssigned",
            Self::NoCapacity => "noCapacity",
            Self::DuplicateGroup => "duplicateGroup",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::TicketNotFound => 404,
            Self::AlreadyAssigned => 409,
            Self::NoCapacity => 503,
            Self::DuplicateGroup => 409,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, Self::NoCapacity)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::TicketNotFound => "no ticket with that id",
            Self::AlreadyAssigned => "ticket already has an assignment",
            Self::DuplicateGroup => "a ticket for this group is already queued",
            Self::NoCapacity => "no healthy server available for this land type",
        }
    }
}

impl fmt::Display for MatchmakingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl Error for MatchmakingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_handler_error_is_retryable_others_are_not() {
        let handler_err: WireError = DispatchError::HandlerError("boom".into()).into();
        assert!(handler_err.retryable);

        let unknown_err: WireError = DispatchError::UnknownAction.into();
        assert!(!unknown_err.retryable);
    }

    #[test]
    fn auth_error_status_codes_follow_http_semantics() {
        assert_eq!(AuthError::MissingToken.http_status(), 401);
        assert_eq!(AuthError::InsufficientRole.http_status(), 403);
    }
}
