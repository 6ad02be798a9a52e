//! Udp control blocks.
//!
//! There is not much state to keep for udp. A block is opened towards a remote endpoint, or
//! listens on a local one, and stays open until the user closes it. Datagrams that arrive at a
//! listener create an open passive clone on the owning core, just like tcp does for a SYN, so
//! answers go out from a block with the full four tuple.
use core::{fmt, ops};

use crate::cb::L4Cb;
use crate::nic::{Device, Notify, Packet};
use crate::wire::Datagram;
use crate::{Error, Result};


/// The states of a udp block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Allocated, not opened yet.
    Init,
    /// Waiting for datagrams to any remote endpoint.
    Listen,
    /// Bound to a remote endpoint.
    Open,
    /// Closed, ready to be freed.
    Closed,
}

/// Events of a udp block reported to the application.
#[derive(Clone, Copy, Debug)]
pub enum UdpNotification<'a> {
    /// The block changed its state.
    StateChange {
        /// The previous state.
        from: State,
        /// The new state.
        to: State,
    },
    /// A datagram was handed to the device.
    SegSent {
        /// Payload bytes.
        bytes: u32,
    },
    /// A datagram arrived.
    SegReceived(&'a [u8]),
}

/// Counters of the udp layer of one core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdpStats {
    /// Datagrams received for a block.
    pub received_pkts: u64,
    /// Payload bytes received for a block.
    pub received_bytes: u64,
    /// Datagrams sent.
    pub sent_pkts: u64,
    /// Payload bytes sent.
    pub sent_bytes: u64,
    /// Datagrams the device refused.
    pub tx_failed: u64,
    /// Datagrams for which no block existed.
    pub no_cb: u64,
    /// Blocks that could not be allocated.
    pub cb_alloc_err: u64,
    /// Blocks allocated.
    pub cb_alloc: u64,
    /// Blocks freed.
    pub cb_free: u64,
}

/// A udp control block.
#[derive(Clone, Debug)]
pub struct UdpCb {
    /// The protocol independent part.
    pub l4: L4Cb,
    /// The current state.
    pub state: State,
    /// Opened towards a remote endpoint, as opposed to cloned from a listener.
    pub active: bool,
}

/// Everything outside of a block that a udp operation touches.
pub struct Env<'a> {
    /// Outbound datagrams.
    pub device: &'a mut dyn Device,
    /// The application.
    pub app: &'a mut dyn Notify,
    /// Counters.
    pub stats: &'a mut UdpStats,
}

impl UdpCb {
    /// A new block in `INIT`.
    pub fn new(l4: L4Cb) -> Self {
        let active = l4.tuple().is_active();
        UdpCb {
            l4,
            state: State::Init,
            active,
        }
    }

    fn enter_state(&mut self, state: State, env: &mut Env<'_>) {
        let from = self.state;
        cb_debug!(self.l4, %from, to = %state, "udp state change");
        self.state = state;
        env.app.udp(&self.l4, UdpNotification::StateChange { from, to: state });
    }

    /// Open the block.
    ///
    /// A block with a remote endpoint becomes `OPEN`, one without starts to `LISTEN`.
    pub fn open(&mut self, env: &mut Env<'_>) -> Result<()> {
        if self.state != State::Init {
            return Err(Error::Invalid);
        }

        let next = if self.active { State::Open } else { State::Listen };
        self.enter_state(next, env);
        Ok(())
    }

    /// Open a clone of a listener for the remote endpoint of a datagram.
    pub fn accept(&mut self, env: &mut Env<'_>) -> Result<()> {
        if self.state != State::Init {
            return Err(Error::Invalid);
        }

        self.active = false;
        self.enter_state(State::Open, env);
        Ok(())
    }

    /// Send one datagram to the remote endpoint.
    pub fn send(&mut self, data: &[u8], env: &mut Env<'_>) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::NotConnected);
        }

        let tuple = self.l4.tuple();
        let datagram = Datagram::new(
            (tuple.local_addr, tuple.local_port),
            (tuple.remote_addr, tuple.remote_port),
            data.to_vec());
        let bytes = data.len() as u32;

        if let Err(err) = env.device.tx(self.l4.key.port, Packet::Udp(datagram)) {
            env.stats.tx_failed += 1;
            cb_debug!(self.l4, %err, "datagram not sent");
            return Err(err);
        }

        cb_trace!(self.l4, bytes, "udp tx");
        env.stats.sent_pkts += 1;
        env.stats.sent_bytes += u64::from(bytes);
        env.app.udp(&self.l4, UdpNotification::SegSent { bytes });
        Ok(())
    }

    /// Deliver a datagram addressed to this block.
    ///
    /// Only an open block delivers, a datagram for a block in any other state is dropped.
    pub fn receive(&mut self, datagram: &Datagram, env: &mut Env<'_>) {
        if self.state != State::Open {
            cb_trace!(self.l4, state = %self.state, "udp datagram dropped");
            return;
        }

        env.stats.received_pkts += 1;
        env.stats.received_bytes += datagram.payload.len() as u64;
        env.app.udp(&self.l4, UdpNotification::SegReceived(&datagram.payload));
    }

    /// Close the block.
    ///
    /// Closing twice is an error, the block is to be freed after the first close.
    pub fn close(&mut self, env: &mut Env<'_>) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::NotConnected);
        }

        self.enter_state(State::Closed, env);
        Ok(())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Init => "INIT",
            State::Listen => "LISTEN",
            State::Open => "OPEN",
            State::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

impl ops::AddAssign<&'_ UdpStats> for UdpStats {
    fn add_assign(&mut self, other: &UdpStats) {
        self.received_pkts += other.received_pkts;
        self.received_bytes += other.received_bytes;
        self.sent_pkts += other.sent_pkts;
        self.sent_bytes += other.sent_bytes;
        self.tx_failed += other.tx_failed;
        self.no_cb += other.no_cb;
        self.cb_alloc_err += other.cb_alloc_err;
        self.cb_alloc += other.cb_alloc;
        self.cb_free += other.cb_free;
    }
}
