use std::collections::VecDeque;

use crate::cb::{CbFlags, L4Cb};
use crate::timer::TimerSlot;
use crate::wire::TcpSeqNumber;

use super::{Reassembly, State};

/// The send sequence variables of rfc793.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendVars {
    /// Oldest unacknowledged sequence number.
    pub una: TcpSeqNumber,
    /// Next sequence number to send.
    pub nxt: TcpSeqNumber,
    /// The window advertised by the peer.
    pub wnd: u32,
    /// Sequence number of the segment used for the last window update.
    pub wl1: TcpSeqNumber,
    /// Acknowledgement number of the segment used for the last window update.
    pub wl2: TcpSeqNumber,
    /// Our initial sequence number.
    pub iss: TcpSeqNumber,
}

/// The receive sequence variables of rfc793.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecvVars {
    /// Next sequence number expected.
    pub nxt: TcpSeqNumber,
    /// Our receive window.
    pub wnd: u32,
    /// The peer's initial sequence number.
    pub irs: TcpSeqNumber,
}

/// Data queued for sending, starting at `SND.UNA`.
///
/// Holds both the bytes in flight and those not sent yet. Acknowledged bytes are dropped from the
/// front.
#[derive(Clone, Debug, Default)]
pub struct SendQueue {
    bytes: VecDeque<u8>,
}

/// The control block of a tcp connection.
#[derive(Clone, Debug)]
pub struct TcpCb {
    /// The protocol independent part.
    pub l4: L4Cb,
    /// The connection state.
    pub state: State,
    /// Whether we opened the connection.
    pub active: bool,
    /// Send sequence variables.
    pub snd: SendVars,
    /// Receive sequence variables.
    pub rcv: RecvVars,
    /// The peer's FIN, when it arrived before all of the data preceding it.
    pub fin_rcvd: Option<TcpSeqNumber>,
    /// Whether our FIN occupies `SND.NXT - 1`.
    pub fin_sent: bool,
    /// Retransmission timeouts since the peer last made progress.
    pub retrans_cnt: u32,
    pub(crate) retrans: SendQueue,
    pub(crate) ooo: Reassembly,
    pub(crate) rto_timer: Option<TimerSlot>,
    pub(crate) slow_timer: Option<TimerSlot>,
}

impl SendQueue {
    /// The number of queued bytes.
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Queue data.
    pub fn push(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().copied());
    }

    /// Drop acknowledged bytes from the front.
    pub fn ack(&mut self, count: u32) {
        let count = (count as usize).min(self.bytes.len());
        self.bytes.drain(..count);
    }

    /// Copy `len` bytes starting `offset` bytes after `SND.UNA`.
    pub fn read(&self, offset: u32, len: u32) -> Vec<u8> {
        self.bytes
            .range(offset as usize..(offset + len) as usize)
            .copied()
            .collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.bytes.clear()
    }
}

impl TcpCb {
    /// Wrap an initialized base block.
    ///
    /// The block starts in `INIT` with empty buffers and our receive window taken from the
    /// options.
    pub fn new(l4: L4Cb) -> Self {
        let active = l4.key.tuple.is_active();
        let wnd = l4.options.tcp.win_size;
        TcpCb {
            l4,
            state: State::Init,
            active,
            snd: SendVars::default(),
            rcv: RecvVars { wnd, ..RecvVars::default() },
            fin_rcvd: None,
            fin_sent: false,
            retrans_cnt: 0,
            retrans: SendQueue::default(),
            ooo: Reassembly::default(),
            rto_timer: None,
            slow_timer: None,
        }
    }

    /// The data waiting for acknowledgement or sending.
    pub fn send_queue(&self) -> &SendQueue {
        &self.retrans
    }

    /// The out of order data.
    pub fn reassembly(&self) -> &Reassembly {
        &self.ooo
    }

    /// Whether the retransmission timer is armed.
    pub fn rto_armed(&self) -> bool {
        self.rto_timer.is_some()
    }

    /// Whether the slow timer is armed.
    pub fn slow_armed(&self) -> bool {
        self.slow_timer.is_some()
    }

    /// Close as soon as the peer closes.
    pub fn consume_all_data(&self) -> bool {
        self.l4.flags.contains(CbFlags::CONSUME_ALL_DATA)
    }

    /// Bytes sent but not acknowledged yet.
    ///
    /// Excludes the sequence space taken by SYN and FIN.
    pub fn in_flight(&self) -> u32 {
        self.snd.nxt.wrapping_diff(self.snd.una).min(self.retrans.len())
    }

    /// Bytes queued but not sent yet.
    pub fn unsent(&self) -> u32 {
        self.retrans.len() - self.in_flight()
    }

    /// Check if the peer's window is used up.
    pub fn snd_win_full(&self) -> bool {
        self.snd.wnd == self.snd.nxt.wrapping_diff(self.snd.una)
    }

    /// Room left in the send buffer.
    pub fn snd_buf_avail(&self) -> u32 {
        self.l4.options.tcp.win_size.saturating_sub(self.retrans.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn send_queue() {
        let mut queue = SendQueue::default();
        queue.push(b"hello ");
        queue.push(b"world");
        assert_eq!(queue.len(), 11);
        assert_eq!(queue.read(6, 5), b"world");

        queue.ack(6);
        assert_eq!(queue.read(0, 5), b"world");
        queue.ack(100);
        assert!(queue.is_empty());
    }
}
