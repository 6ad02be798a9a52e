//! The boundary to packet I/O and to the applications.
//!
//! The data plane neither parses nor builds frames. A [`Device`] hands it parsed inbound
//! [`Packet`]s and takes the outbound ones, while header construction, checksums and the actual
//! queueing are the job of the implementation. Events that applications care about are reported
//! synchronously through [`Notify`].
//!
//! [`Device`]: trait.Device.html
//! [`Packet`]: enum.Packet.html
//! [`Notify`]: trait.Notify.html
mod loopback;

use crate::cb::L4Cb;
use crate::pool::CbId;
use crate::tcp::{self, TcpNotification};
use crate::udp::{self, UdpNotification};
use crate::wire::{Datagram, PortId, Segment};
use crate::Result;

pub use self::loopback::{Link, Loopback};

/// A parsed packet crossing the device boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// A tcp segment.
    Tcp(Segment),
    /// A udp datagram.
    Udp(Datagram),
}

/// A packet device of one core.
///
/// Every core polls its own device, it is never shared.
pub trait Device {
    /// Receive packets.
    ///
    /// Dequeue up to `max` received packets into `packets`, returns the number added.
    fn rx(&mut self, max: usize, packets: &mut Vec<(PortId, Packet)>) -> Result<usize>;

    /// Queue one packet for sending on a physical port.
    ///
    /// This operation may fail for a lack of resources to queue the packet, which the caller
    /// accounts as a drop. Tcp recovers through retransmission.
    fn tx(&mut self, port: PortId, packet: Packet) -> Result<()>;
}

impl<D: Device + ?Sized> Device for &'_ mut D {
    fn rx(&mut self, max: usize, packets: &mut Vec<(PortId, Packet)>) -> Result<usize> {
        (**self).rx(max, packets)
    }

    fn tx(&mut self, port: PortId, packet: Packet) -> Result<()> {
        (**self).tx(port, packet)
    }
}

/// Receives the notifications of the protocol state machines.
///
/// Called synchronously on the owning core while the block is being processed. The default
/// implementations ignore everything.
pub trait Notify {
    /// A tcp event.
    fn tcp(&mut self, cb: &L4Cb, event: TcpNotification<'_>) {
        let _ = (cb, event);
    }

    /// A udp event.
    fn udp(&mut self, cb: &L4Cb, event: UdpNotification<'_>) {
        let _ = (cb, event);
    }
}

impl Notify for () { }

impl<N: Notify + ?Sized> Notify for &'_ mut N {
    fn tcp(&mut self, cb: &L4Cb, event: TcpNotification<'_>) {
        (**self).tcp(cb, event)
    }

    fn udp(&mut self, cb: &L4Cb, event: UdpNotification<'_>) {
        (**self).udp(cb, event)
    }
}

/// An owned copy of a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Note {
    /// `TcpNotification::Init`.
    TcpInit,
    /// `TcpNotification::StateChange`.
    TcpState(tcp::State, tcp::State),
    /// `TcpNotification::SegDelivered`.
    TcpDelivered(u32),
    /// `TcpNotification::WinUnavailable`.
    TcpWinUnavailable,
    /// `TcpNotification::WinAvailable`.
    TcpWinAvailable,
    /// `TcpNotification::SegReceived`.
    TcpReceived(Vec<u8>),
    /// `TcpNotification::Term`.
    TcpTerm,
    /// `UdpNotification::StateChange`.
    UdpState(udp::State, udp::State),
    /// `UdpNotification::SegSent`.
    UdpSent(u32),
    /// `UdpNotification::SegReceived`.
    UdpReceived(Vec<u8>),
}

/// Records all notifications, for inspection in tests and demos.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    /// The recorded notifications with the id of their block.
    pub notes: Vec<(Option<CbId>, Note)>,
}

impl Journal {
    /// The notifications of one block.
    pub fn of(&self, id: CbId) -> impl Iterator<Item=&Note> + '_ {
        self.notes.iter()
            .filter(move |(cb, _)| *cb == Some(id))
            .map(|(_, note)| note)
    }

    /// All tcp state changes, in order.
    pub fn tcp_states(&self, id: CbId) -> Vec<tcp::State> {
        self.of(id)
            .filter_map(|note| match note {
                Note::TcpState(_, to) => Some(*to),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of all received data of a block.
    pub fn received(&self, id: CbId) -> Vec<u8> {
        self.of(id)
            .flat_map(|note| match note {
                Note::TcpReceived(data) | Note::UdpReceived(data) => data.as_slice(),
                _ => &[],
            })
            .cloned()
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.notes.clear()
    }
}

impl Notify for Journal {
    fn tcp(&mut self, cb: &L4Cb, event: TcpNotification<'_>) {
        let note = match event {
            TcpNotification::Init => Note::TcpInit,
            TcpNotification::StateChange { from, to } => Note::TcpState(from, to),
            TcpNotification::SegDelivered { bytes } => Note::TcpDelivered(bytes),
            TcpNotification::WinUnavailable => Note::TcpWinUnavailable,
            TcpNotification::WinAvailable => Note::TcpWinAvailable,
            TcpNotification::SegReceived(data) => Note::TcpReceived(data.to_vec()),
            TcpNotification::Term => Note::TcpTerm,
        };
        self.notes.push((cb.id, note));
    }

    fn udp(&mut self, cb: &L4Cb, event: UdpNotification<'_>) {
        let note = match event {
            UdpNotification::StateChange { from, to } => Note::UdpState(from, to),
            UdpNotification::SegSent { bytes } => Note::UdpSent(bytes),
            UdpNotification::SegReceived(data) => Note::UdpReceived(data.to_vec()),
        };
        self.notes.push((cb.id, note));
    }
}
