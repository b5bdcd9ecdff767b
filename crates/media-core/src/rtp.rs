//! RTP termination descriptors and factory
//!
//! The factory builds RTP-leg terminations for sessions: it reserves a local
//! port at creation time and resolves negotiated codec descriptors against a
//! codec registry. There is no socket I/O here; the RTP transport proper is an
//! external collaborator and this crate only tracks the negotiated legs.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MediaError, Result};
use crate::stream::{AudioStream, FrameBuffer};
use crate::termination::{RtpLeg, Termination};
use crate::types::{CodecDescriptor, CodecRegistry, StreamMode};

/// One `m=audio` line worth of negotiated parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpMediaDescriptor {
    /// Position of the media line in the SDP message
    pub id: usize,
    /// Grouping id (`a=mid`), matched against control-media `cmid`
    pub mid: usize,
    /// Address the media flows to/from
    pub ip: Option<IpAddr>,
    /// External (NATed) address to advertise instead of `ip`, if any
    pub ext_ip: Option<IpAddr>,
    /// Port, 0 when the media line is rejected
    pub port: u16,
    /// Direction attribute
    pub mode: StreamMode,
    /// Negotiated codecs, preference order
    pub codec_list: Vec<CodecDescriptor>,
    /// Packetization time in ms
    pub ptime: Option<u16>,
}

impl RtpMediaDescriptor {
    /// An empty media descriptor
    pub fn new() -> Self {
        Self {
            id: 0,
            mid: 0,
            ip: None,
            ext_ip: None,
            port: 0,
            mode: StreamMode::NONE,
            codec_list: Vec::new(),
            ptime: None,
        }
    }

    /// A rejection slot: port 0, no codecs, inactive
    pub fn rejection(id: usize) -> Self {
        Self {
            id,
            ..Self::new()
        }
    }
}

impl Default for RtpMediaDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Local/remote descriptor pair for one RTP audio leg
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RtpAudioDescriptor {
    /// Our side of the leg, filled in by the termination on modify
    pub local: Option<RtpMediaDescriptor>,
    /// The far side, as received in the offer
    pub remote: Option<RtpMediaDescriptor>,
}

/// Descriptor handed to the media engine alongside termination add/modify
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RtpTerminationDescriptor {
    /// Audio leg descriptors
    pub audio: RtpAudioDescriptor,
}

impl RtpTerminationDescriptor {
    /// Build a descriptor carrying only a remote media description
    pub fn with_remote(remote: RtpMediaDescriptor) -> Self {
        Self {
            audio: RtpAudioDescriptor {
                local: None,
                remote: Some(remote),
            },
        }
    }
}

/// Configuration of the RTP termination factory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpFactoryConfig {
    /// Address local legs bind to
    pub bind_ip: IpAddr,
    /// NATed address to advertise instead of `bind_ip`, if any
    pub ext_ip: Option<IpAddr>,
    /// First port of the allocation range (inclusive)
    pub port_min: u16,
    /// Last port of the allocation range (inclusive)
    pub port_max: u16,
}

impl Default for RtpFactoryConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ext_ip: None,
            port_min: 40000,
            port_max: 50000,
        }
    }
}

/// Port reservation shared by every termination of a factory
#[derive(Debug)]
pub(crate) struct PortAllocator {
    min: u16,
    max: u16,
    next: AtomicU16,
    in_use: DashMap<u16, ()>,
}

impl PortAllocator {
    fn new(min: u16, max: u16) -> Self {
        Self {
            min,
            max,
            next: AtomicU16::new(min),
            in_use: DashMap::new(),
        }
    }

    pub(crate) fn allocate(&self) -> Result<u16> {
        let span = (self.max - self.min) as u32 + 1;
        for _ in 0..span {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            let port = self.min + (raw.wrapping_sub(self.min)) % (span as u16);
            if self.in_use.insert(port, ()).is_none() {
                return Ok(port);
            }
        }
        Err(MediaError::PortRangeExhausted {
            min: self.min,
            max: self.max,
        })
    }

    pub(crate) fn release(&self, port: u16) {
        self.in_use.remove(&port);
    }
}

/// Factory of RTP-leg terminations
///
/// One factory per profile; terminations created here release their port back
/// to the factory when dropped.
#[derive(Debug, Clone)]
pub struct RtpTerminationFactory {
    config: RtpFactoryConfig,
    allocator: Arc<PortAllocator>,
    codecs: Arc<CodecRegistry>,
}

impl RtpTerminationFactory {
    /// Create a factory over the given port range and addresses
    pub fn new(config: RtpFactoryConfig) -> Self {
        let allocator = Arc::new(PortAllocator::new(config.port_min, config.port_max));
        Self {
            config,
            allocator,
            codecs: Arc::new(CodecRegistry::new()),
        }
    }

    /// Create a factory that resolves codec engines out of `codecs`
    pub fn with_codecs(config: RtpFactoryConfig, codecs: CodecRegistry) -> Self {
        let allocator = Arc::new(PortAllocator::new(config.port_min, config.port_max));
        Self {
            config,
            allocator,
            codecs: Arc::new(codecs),
        }
    }

    /// Build a fresh RTP termination with a reserved local port
    pub fn create(&self) -> Result<Termination> {
        let port = self.allocator.allocate()?;
        let local = RtpMediaDescriptor {
            ip: Some(self.config.bind_ip),
            ext_ip: self.config.ext_ip,
            port,
            ..RtpMediaDescriptor::new()
        };
        debug!("Created RTP termination on {}:{}", self.config.bind_ip, port);
        let stream = AudioStream::new(StreamMode::NONE, FrameBuffer::shared());
        let leg = RtpLeg {
            local,
            remote: None,
            allocator: self.allocator.clone(),
            codecs: self.codecs.clone(),
        };
        Ok(Termination::rtp("rtp", stream, leg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_hands_out_distinct_ports_and_recycles() {
        let alloc = PortAllocator::new(40000, 40003);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_ne!(a, b);
        alloc.release(a);
        // range of 4 ports, 2 still free plus the recycled one
        assert!(alloc.allocate().is_ok());
        assert!(alloc.allocate().is_ok());
    }

    #[test]
    fn allocator_exhausts() {
        let alloc = PortAllocator::new(40000, 40001);
        alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        assert!(matches!(
            alloc.allocate(),
            Err(MediaError::PortRangeExhausted { .. })
        ));
    }

    #[test]
    fn factory_creates_termination_with_local_leg() {
        let factory = RtpTerminationFactory::new(RtpFactoryConfig::default());
        let t = factory.create().unwrap();
        let local = t.local_rtp().expect("rtp termination has a local leg");
        assert!(local.port >= 40000);
        assert_eq!(local.ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }
}
