//! Basic identifier and status types

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of hex characters in a generated session id
pub const SESSION_ID_HEX_LENGTH: usize = 16;

/// MRCP session identifier, a hex string generated on the first offer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh id of `len` hex characters
    pub fn generate(len: usize) -> Self {
        let mut rng = rand::thread_rng();
        let id: String = (0..len)
            .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
            .collect();
        Self(id)
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Protocol version a session speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MrcpVersion {
    /// MRCPv1: control messages tunnelled through the signaling leg (RTSP)
    V1,
    /// MRCPv2: control messages on a dedicated TCP/TLS connection
    V2,
}

impl fmt::Display for MrcpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MrcpVersion::V1 => write!(f, "MRCP/1.0"),
            MrcpVersion::V2 => write!(f, "MRCP/2.0"),
        }
    }
}

/// Overall status carried by a session descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Everything the offer asked for was set up
    Ok,
    /// The offer referenced a resource name the server does not know
    NoSuchResource,
    /// The resource exists but could not be brought up
    UnavailableResource,
    /// The resource exists but its engine refused the channel
    UnacceptableResource,
}

impl SessionStatus {
    /// Human-readable phrase, as it appears on the wire
    pub fn phrase(&self) -> &'static str {
        match self {
            SessionStatus::Ok => "OK",
            SessionStatus::NoSuchResource => "No Such Resource",
            SessionStatus::UnavailableResource => "Unavailable Resource",
            SessionStatus::UnacceptableResource => "Unacceptable Resource",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.phrase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_hex_of_requested_length() {
        let id = SessionId::generate(SESSION_ID_HEX_LENGTH);
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_unique_enough() {
        let a = SessionId::generate(16);
        let b = SessionId::generate(16);
        assert_ne!(a, b);
    }
}
