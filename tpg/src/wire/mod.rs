//! Header representations consumed and produced by the data plane.
//!
//! Framing, checksums and the byte layout of Ethernet and IPv4 headers are the job of the
//! surrounding packet I/O. What crosses the boundary into the data plane is a parsed high-level
//! representation: a [`Segment`] for TCP and a [`Datagram`] for UDP. Both carry the addresses of
//! the enclosing IPv4 header and, when the NIC computed one, its RSS hash.
//!
//! This module also defines the identity of a connection, the [`FourTuple`] seen from the local
//! side and the [`ConnectionKey`] that pins it to a physical port.
//!
//! [`Segment`]: struct.Segment.html
//! [`Datagram`]: struct.Datagram.html
//! [`FourTuple`]: struct.FourTuple.html
//! [`ConnectionKey`]: struct.ConnectionKey.html
use core::fmt;
use std::net::Ipv4Addr;

mod tcp;
mod udp;

pub use self::tcp::{
    Flags as TcpFlags,
    Segment,
    SeqNumber as TcpSeqNumber,
};

pub use self::udp::Datagram;

/// Identifier of a physical port (interface) of the traffic generator.
pub type PortId = u32;

/// The addresses and ports of a connection, seen from the local endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    /// The address of this host.
    pub local_addr: Ipv4Addr,
    /// The address of the peer, unspecified for listening endpoints.
    pub remote_addr: Ipv4Addr,
    /// The port of this host.
    pub local_port: u16,
    /// The port of the peer, zero for listening endpoints.
    pub remote_port: u16,
}

/// The full identity of a connection on one core.
///
/// Immutable for the lifetime of a control block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    /// The physical port the connection lives on.
    pub port: PortId,
    /// The connection's endpoints.
    pub tuple: FourTuple,
}

impl FourTuple {
    /// The catch-all tuple of a listening endpoint.
    pub fn listen(local_addr: Ipv4Addr, local_port: u16) -> Self {
        FourTuple {
            local_addr,
            remote_addr: Ipv4Addr::UNSPECIFIED,
            local_port,
            remote_port: 0,
        }
    }

    /// Whether the remote half is filled in.
    ///
    /// Opening an endpoint with a remote address or port is an active open, otherwise it is a
    /// passive one that waits for the peer.
    pub fn is_active(&self) -> bool {
        !self.remote_addr.is_unspecified() || self.remote_port != 0
    }

    /// The tuple with local and remote swapped.
    pub fn reversed(&self) -> Self {
        FourTuple {
            local_addr: self.remote_addr,
            remote_addr: self.local_addr,
            local_port: self.remote_port,
            remote_port: self.local_port,
        }
    }
}

impl fmt::Display for FourTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} -> {}:{}",
            self.local_addr, self.local_port,
            self.remote_addr, self.remote_port)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[p{}] {}", self.port, self.tuple)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn active_tuple() {
        let listen = FourTuple::listen(Ipv4Addr::new(10, 0, 0, 1), 80);
        assert!(!listen.is_active());

        let mut active = listen;
        active.remote_port = 4000;
        assert!(active.is_active());

        let reversed = active.reversed();
        assert_eq!(reversed.local_port, 4000);
        assert_eq!(reversed.remote_addr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(reversed.reversed(), active);
    }
}
