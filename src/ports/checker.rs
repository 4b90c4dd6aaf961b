// Loopback bind probes for host port availability

use super::Protocol;
use std::net::{Ipv4Addr, TcpListener, UdpSocket};

/// Which sockets a probe must be able to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Both,
}

impl From<Protocol> for Transport {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => Transport::Tcp,
            Protocol::Udp => Transport::Udp,
        }
    }
}

/// Answers whether a host port can currently be bound
pub trait PortProbe: Send + Sync {
    fn is_available(&self, port: u16, transport: Transport) -> bool;
}

/// Probes by binding transient sockets on 127.0.0.1.
///
/// Sockets are dropped before returning, so a `true` answer only means the
/// port was free at probe time. A later bind failure must still be handled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortAvailabilityChecker;

impl PortAvailabilityChecker {
    fn tcp_listener(port: u16) -> Option<TcpListener> {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).ok()
    }

    fn udp_socket(port: u16) -> Option<UdpSocket> {
        UdpSocket::bind((Ipv4Addr::LOCALHOST, port)).ok()
    }
}

impl PortProbe for PortAvailabilityChecker {
    fn is_available(&self, port: u16, transport: Transport) -> bool {
        match transport {
            Transport::Tcp => Self::tcp_listener(port).is_some(),
            Transport::Udp => Self::udp_socket(port).is_some(),
            Transport::Both => {
                // Both sockets must be held at the same time
                let Some(_tcp) = Self::tcp_listener(port) else {
                    return false;
                };
                Self::udp_socket(port).is_some()
            }
        }
    }
}
