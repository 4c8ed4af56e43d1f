//! Response status codes
//!
//! The first byte of every response is one of these codes. `Success`, `NoServersAvailable`,
//! `DialFailed` and `HandlerFailed` are the codes every node understands. The remaining
//! codes split the old overloaded code 6 and are only emitted when legacy codes are off.

use std::fmt;

/// Status byte leading every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Call succeeded, payload follows
    Success,
    /// Load balancer has no registered workers
    NoServersAvailable,
    /// Load balancer could not connect to the selected worker
    DialFailed,
    /// Handler failed; also retries exhausted under legacy codes
    HandlerFailed,
    /// Request payload did not decode into the handler's request type
    DecodeFailed,
    /// Load balancer gave up after its retry budget
    MaxRetriesExceeded,
    /// Worker has no handler under the requested name
    UnknownOperation,
    /// Any byte this build does not know
    Other(u8),
}

impl StatusCode {
    pub fn as_u8(self) -> u8 {
        match self {
            StatusCode::Success => 0,
            StatusCode::NoServersAvailable => 4,
            StatusCode::DialFailed => 5,
            StatusCode::HandlerFailed => 6,
            StatusCode::DecodeFailed => 7,
            StatusCode::MaxRetriesExceeded => 8,
            StatusCode::UnknownOperation => 9,
            StatusCode::Other(code) => code,
        }
    }

    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => StatusCode::Success,
            4 => StatusCode::NoServersAvailable,
            5 => StatusCode::DialFailed,
            6 => StatusCode::HandlerFailed,
            7 => StatusCode::DecodeFailed,
            8 => StatusCode::MaxRetriesExceeded,
            9 => StatusCode::UnknownOperation,
            other => StatusCode::Other(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// Byte to put on the wire.
    ///
    /// Under legacy codes, retries exhausted collapses onto 6 and the decode/unknown
    /// failures have no code at all (the node sends nothing).
    pub fn wire_byte(self, legacy: bool) -> Option<u8> {
        if !legacy {
            return Some(self.as_u8());
        }
        match self {
            StatusCode::MaxRetriesExceeded => Some(StatusCode::HandlerFailed.as_u8()),
            StatusCode::DecodeFailed | StatusCode::UnknownOperation => None,
            other => Some(other.as_u8()),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Success => write!(f, "success"),
            StatusCode::NoServersAvailable => write!(f, "no servers available"),
            StatusCode::DialFailed => write!(f, "dial failed"),
            StatusCode::HandlerFailed => write!(f, "handler failed or retries exceeded"),
            StatusCode::DecodeFailed => write!(f, "decode failed"),
            StatusCode::MaxRetriesExceeded => write!(f, "max retries exceeded"),
            StatusCode::UnknownOperation => write!(f, "unknown operation"),
            StatusCode::Other(code) => write!(f, "unknown status {}", code),
        }
    }
}
