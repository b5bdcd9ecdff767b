//! Typed MRCP messages
//!
//! The session core routes messages by their kind and channel identifier; it
//! never parses or serialises the wire format (that is the transport's job).
//! Start line: `<version> <length> <request-id> <method|status>`, channel
//! identifier `<session-id>@<resource>`.

use bytes::Bytes;

use crate::types::{MrcpVersion, SessionId};

/// Request state reported by responses and events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// The request is queued behind another one
    Pending,
    /// The request was accepted and is being serviced
    InProgress,
    /// The request reached its final state
    Complete,
}

/// Message kind, from the start line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Client-issued method, e.g. `SPEAK` or `RECOGNIZE`
    Request { method: String },
    /// Server response with a status code
    Response { status: u16, request_state: RequestState },
    /// Resource-generated event, e.g. `RECOGNITION-COMPLETE`
    Event { name: String, request_state: RequestState },
}

/// Channel identifier: `<session-id>@<resource>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentifier {
    /// Session half, absent until the session id is assigned
    pub session_id: Option<SessionId>,
    /// Resource name half
    pub resource: String,
}

/// One MRCP message
#[derive(Debug, Clone)]
pub struct MrcpMessage {
    /// Protocol version from the start line
    pub version: MrcpVersion,
    /// Request id tying responses and events to their request
    pub request_id: u64,
    /// Start line kind
    pub kind: MessageKind,
    /// Channel identifier
    pub channel_id: ChannelIdentifier,
    /// Header fields in arrival order
    pub headers: Vec<(String, String)>,
    /// Message body
    pub body: Bytes,
}

impl MrcpMessage {
    /// Build a request message
    pub fn request(
        version: MrcpVersion,
        resource: impl Into<String>,
        method: impl Into<String>,
        request_id: u64,
    ) -> Self {
        Self {
            version,
            request_id,
            kind: MessageKind::Request {
                method: method.into(),
            },
            channel_id: ChannelIdentifier {
                session_id: None,
                resource: resource.into(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build the response to a request
    pub fn response_to(request: &MrcpMessage, status: u16, request_state: RequestState) -> Self {
        Self {
            version: request.version,
            request_id: request.request_id,
            kind: MessageKind::Response {
                status,
                request_state,
            },
            channel_id: request.channel_id.clone(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build an event tied to a request
    pub fn event_for(
        request: &MrcpMessage,
        name: impl Into<String>,
        request_state: RequestState,
    ) -> Self {
        Self {
            version: request.version,
            request_id: request.request_id,
            kind: MessageKind::Event {
                name: name.into(),
                request_state,
            },
            channel_id: request.channel_id.clone(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Attach a header field
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a body
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// First header with the given name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether this is a request
    pub fn is_request(&self) -> bool {
        matches!(self.kind, MessageKind::Request { .. })
    }

    /// Whether this is a response
    pub fn is_response(&self) -> bool {
        matches!(self.kind, MessageKind::Response { .. })
    }

    /// Whether this is an event
    pub fn is_event(&self) -> bool {
        matches!(self.kind, MessageKind::Event { .. })
    }

    /// Request state carried by responses and events
    pub fn request_state(&self) -> Option<RequestState> {
        match &self.kind {
            MessageKind::Request { .. } => None,
            MessageKind::Response { request_state, .. }
            | MessageKind::Event { request_state, .. } => Some(*request_state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_inherits_request_identity() {
        let request = MrcpMessage::request(MrcpVersion::V2, "speechsynth", "SPEAK", 1);
        let response = MrcpMessage::response_to(&request, 200, RequestState::InProgress);
        assert_eq!(response.request_id, 1);
        assert_eq!(response.channel_id.resource, "speechsynth");
        assert!(response.is_response());
        assert_eq!(response.request_state(), Some(RequestState::InProgress));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let msg = MrcpMessage::request(MrcpVersion::V2, "speechrecog", "RECOGNIZE", 2)
            .with_header("Content-Type", "application/srgs+xml");
        assert_eq!(msg.header("content-type"), Some("application/srgs+xml"));
        assert_eq!(msg.header("Accept"), None);
    }
}
