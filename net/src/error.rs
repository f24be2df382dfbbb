use std::fmt;
use std::io;

/// Every way a frame, a socket operation or a peer lookup can fail. One variant per error kind
/// named by the transport's error handling policy: decode failures are recovered at the frame
/// boundary, `Io` bubbles up from the socket.
#[derive(Debug)]
pub enum NetworkError {
    /// Not enough bytes were available to decode a complete value.
    Truncated,
    /// The bytes decoded into a value that cannot exist (bad discriminator, impossible length).
    Malformed,
    /// A frame's magic prefix didn't match `wire::MAGIC`.
    BadMagic,
    /// A connectionless or connected opcode byte matched no known command.
    UnknownOpcode(u8),
    /// A send was attempted against a peer id no longer in the table.
    ClientNotFound,
    /// The outer (de)compression codec failed.
    CompressError,
    /// The underlying UDP socket returned an error.
    Io(io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Truncated => write!(f, "truncated frame"),
            NetworkError::Malformed => write!(f, "malformed frame"),
            NetworkError::BadMagic => write!(f, "bad magic"),
            NetworkError::UnknownOpcode(op) => write!(f, "unknown opcode {}", op),
            NetworkError::ClientNotFound => write!(f, "client not found"),
            NetworkError::CompressError => write!(f, "outer codec failure"),
            NetworkError::Io(err) => write!(f, "socket error: {}", err),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(err: io::Error) -> Self {
        NetworkError::Io(err)
    }
}

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Decode-only subset of `NetworkError`, returned by the wire codec. Kept narrow so callers that
/// only ever touch the codec (e.g. tests) don't have to match on socket/client variants.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum DecodeError {
    Truncated,
    Malformed,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "truncated frame"),
            DecodeError::Malformed => write!(f, "malformed frame"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for NetworkError {
    #[inline]
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Truncated => NetworkError::Truncated,
            DecodeError::Malformed => NetworkError::Malformed,
        }
    }
}
