//! Software devices.
use std::collections::VecDeque;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};

use super::{Device, Packet};
use crate::wire::PortId;
use crate::{Error, Result};

/// A software device that keeps packets in memory.
///
/// Outbound packets are collected for inspection, inbound ones are injected by the user. Packets
/// are not looped back automatically, a test decides what the peer sees.
#[derive(Debug, Default)]
pub struct Loopback {
    inbound: VecDeque<(PortId, Packet)>,
    sent: VecDeque<(PortId, Packet)>,
}

/// One end of an in-memory wire between two cores.
///
/// Everything one end transmits is received by the other end, on the same port.
#[derive(Debug)]
pub struct Link {
    tx: Sender<(PortId, Packet)>,
    rx: Receiver<(PortId, Packet)>,
}

impl Loopback {
    /// Create an empty device.
    pub fn new() -> Self {
        Loopback::default()
    }

    /// Queue a packet for the next `rx`.
    pub fn inject(&mut self, port: PortId, packet: Packet) {
        self.inbound.push_back((port, packet));
    }

    /// Take all packets sent so far.
    pub fn take_sent(&mut self) -> Vec<(PortId, Packet)> {
        self.sent.drain(..).collect()
    }

    /// The number of packets sent and not yet taken.
    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }
}

impl Device for Loopback {
    fn rx(&mut self, max: usize, packets: &mut Vec<(PortId, Packet)>) -> Result<usize> {
        let count = max.min(self.inbound.len());
        packets.extend(self.inbound.drain(..count));
        Ok(count)
    }

    fn tx(&mut self, port: PortId, packet: Packet) -> Result<()> {
        self.sent.push_back((port, packet));
        Ok(())
    }
}

impl Link {
    /// Create both ends of a link, each direction buffering up to `capacity` packets.
    pub fn pair(capacity: usize) -> (Link, Link) {
        let (a_tx, b_rx) = channel::bounded(capacity);
        let (b_tx, a_rx) = channel::bounded(capacity);
        (Link { tx: a_tx, rx: a_rx }, Link { tx: b_tx, rx: b_rx })
    }
}

impl Device for Link {
    fn rx(&mut self, max: usize, packets: &mut Vec<(PortId, Packet)>) -> Result<usize> {
        let mut count = 0;
        while count < max {
            match self.rx.try_recv() {
                Ok(packet) => packets.push(packet),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(Error::NotConnected),
            }
            count += 1;
        }
        Ok(count)
    }

    fn tx(&mut self, port: PortId, packet: Packet) -> Result<()> {
        match self.tx.try_send((port, packet)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::NoMem),
            Err(TrySendError::Disconnected(_)) => Err(Error::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Datagram;
    use std::net::Ipv4Addr;

    fn datagram(byte: u8) -> Packet {
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        Packet::Udp(Datagram::new((addr, 1), (addr, 2), vec![byte]))
    }

    #[test]
    fn loopback() {
        let mut nic = Loopback::new();
        nic.inject(0, datagram(1));
        nic.inject(1, datagram(2));

        let mut packets = Vec::new();
        assert_eq!(nic.rx(1, &mut packets), Ok(1));
        assert_eq!(nic.rx(8, &mut packets), Ok(1));
        assert_eq!(packets, [(0, datagram(1)), (1, datagram(2))]);

        nic.tx(3, datagram(3)).unwrap();
        assert_eq!(nic.sent_len(), 1);
        assert_eq!(nic.take_sent(), [(3, datagram(3))]);
    }

    #[test]
    fn link() {
        let (mut a, mut b) = Link::pair(1);
        a.tx(0, datagram(7)).unwrap();
        assert_eq!(a.tx(0, datagram(8)), Err(Error::NoMem));

        let mut packets = Vec::new();
        assert_eq!(b.rx(4, &mut packets), Ok(1));
        assert_eq!(packets, [(0, datagram(7))]);

        drop(a);
        assert_eq!(b.tx(0, datagram(9)), Err(Error::NotConnected));
    }
}
