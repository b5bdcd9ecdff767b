//! Server-side session core of the mrcpd gateway
//!
//! This crate implements the signaling half of a gateway session: it accepts
//! offers from a signaling agent, assembles the MRCP channels and RTP
//! terminations needed to satisfy them, coordinates their asynchronous setup
//! through the media engine, and drives each resource's request/response
//! lifecycle through a per-channel state machine.
//!
//! The entry point is [`server::SessionServer`], whose handle creates sessions
//! and feeds them signaling messages. All external collaborators (signaling
//! transport, MRCPv2 connection agent, resource engine plugins) are traits the
//! embedder implements; the media half lives in `mrcpd-media-core`.

pub mod channel;
pub mod connection;
pub mod descriptor;
pub mod engine_channel;
pub mod errors;
pub mod message;
pub mod profile;
pub mod server;
pub mod session;
pub mod state_machine;
pub mod types;

pub use connection::ConnectionAgent;
pub use descriptor::{ControlMediaDescriptor, SessionDescriptor};
pub use engine_channel::{EngineChannel, EngineChannelDriver, ResourceEngine};
pub use errors::{Result, SessionError};
pub use message::{MessageKind, MrcpMessage, RequestState};
pub use profile::{Profile, Resource, ResourceFactory};
pub use server::{ChannelRef, ServerHandle, SessionHandle, SessionServer, SessionServerConfig, SignalingAgent};
pub use state_machine::{DeactivateStatus, DefaultStateMachine, MrcpStateMachine, SmSignal};
pub use types::{MrcpVersion, SessionId, SessionStatus};
