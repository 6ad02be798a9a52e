use std::net::Ipv4Addr;

/// A high-level representation of a User Datagram Protocol packet.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Datagram {
    /// Source address from the IPv4 header.
    pub src_addr: Ipv4Addr,
    /// Destination address from the IPv4 header.
    pub dst_addr: Ipv4Addr,
    /// The source port.
    pub src_port: u16,
    /// The destination port.
    pub dst_port: u16,
    /// The datagram body.
    pub payload: Vec<u8>,
    /// The hash computed by the receiving NIC, if it provided one.
    pub rss_hash: Option<u32>,
}

impl Datagram {
    /// Create a datagram between two endpoints.
    pub fn new(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), payload: Vec<u8>) -> Self {
        Datagram {
            src_addr: src.0,
            dst_addr: dst.0,
            src_port: src.1,
            dst_port: dst.1,
            payload,
            rss_hash: None,
        }
    }
}
