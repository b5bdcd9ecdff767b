//! Profiles: the read-only environment a session is created with
//!
//! A profile bundles the resource factory, the resource engines, the
//! connection agent, the media engine handle and the RTP termination factory.
//! Sessions never mutate their profile.

use std::collections::HashMap;
use std::sync::Arc;

use mrcpd_media_core::{MediaEngineHandle, RtpTerminationFactory};

use crate::connection::ConnectionAgent;
use crate::engine_channel::ResourceEngine;
use crate::state_machine::{DefaultStateMachine, MrcpStateMachine};
use crate::types::MrcpVersion;

/// Standard resource name: speech synthesizer
pub const RESOURCE_SYNTHESIZER: &str = "speechsynth";
/// Standard resource name: speech recognizer
pub const RESOURCE_RECOGNIZER: &str = "speechrecog";
/// Standard resource name: speaker verifier
pub const RESOURCE_VERIFIER: &str = "speakverify";
/// Standard resource name: recorder
pub const RESOURCE_RECORDER: &str = "recorder";

/// Protocol-level definition of a resource
///
/// A resource knows its name and how to build the state machine enforcing its
/// MRCP semantics. The engine actually servicing requests is looked up
/// separately in the profile's engine table.
pub trait Resource: Send + Sync {
    /// Resource name as it appears in descriptors
    fn name(&self) -> &str;

    /// Build the per-channel state machine
    fn create_state_machine(&self, version: MrcpVersion) -> Box<dyn MrcpStateMachine>;
}

struct GenericResource {
    name: String,
}

impl Resource for GenericResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_state_machine(&self, _version: MrcpVersion) -> Box<dyn MrcpStateMachine> {
        Box::new(DefaultStateMachine::new(self.name.clone()))
    }
}

/// Registry of resources by name
#[derive(Default)]
pub struct ResourceFactory {
    resources: HashMap<String, Arc<dyn Resource>>,
}

impl ResourceFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory preloaded with the four standard resources, each using the
    /// generic request-lifecycle state machine
    pub fn standard() -> Self {
        let mut factory = Self::new();
        for name in [
            RESOURCE_SYNTHESIZER,
            RESOURCE_RECOGNIZER,
            RESOURCE_VERIFIER,
            RESOURCE_RECORDER,
        ] {
            factory.register(Arc::new(GenericResource {
                name: name.to_string(),
            }));
        }
        factory
    }

    /// Register a resource definition
    pub fn register(&mut self, resource: Arc<dyn Resource>) {
        self.resources.insert(resource.name().to_string(), resource);
    }

    /// Look a resource up by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.resources.get(name).cloned()
    }
}

impl std::fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFactory")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The environment a session runs in
pub struct Profile {
    /// Resource definitions by name
    pub resource_factory: Arc<ResourceFactory>,
    /// Resource engines by resource name
    pub engine_table: HashMap<String, Arc<dyn ResourceEngine>>,
    /// MRCPv2 connection agent
    pub connection_agent: Arc<dyn ConnectionAgent>,
    /// Handle to the media engine loop
    pub media_engine: MediaEngineHandle,
    /// Factory of RTP-leg terminations
    pub rtp_factory: Arc<RtpTerminationFactory>,
}

impl Profile {
    /// Resource engine for a resource name, if one is configured
    pub fn engine(&self, resource_name: &str) -> Option<Arc<dyn ResourceEngine>> {
        self.engine_table.get(resource_name).cloned()
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("resource_factory", &self.resource_factory)
            .field("engines", &self.engine_table.keys().collect::<Vec<_>>())
            .finish()
    }
}
