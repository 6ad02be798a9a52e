use core::ops;

use super::State;

/// Counters of the tcp state machine of one core.
///
/// The state gauges count the blocks currently in each state. `missing_seq` and `snd_win_full`
/// are gauges too: the blocks that currently hold out of order data, and those whose send window
/// is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TsmStats {
    /// Blocks per state, indexed by `State::index`.
    pub states: [u64; 12],
    /// Connections given up while waiting for a SYN|ACK.
    pub syn_to: u64,
    /// Connections given up while waiting for the ACK of our SYN|ACK.
    pub synack_to: u64,
    /// Connections given up while retransmitting data or FIN.
    pub retry_to: u64,
    /// Bytes sent again.
    pub retrans_bytes: u64,
    /// Blocks holding out of order data.
    pub missing_seq: u64,
    /// Blocks with a full send window.
    pub snd_win_full: u64,
}

/// Packet level counters of the tcp layer of one core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpStats {
    /// Segments received.
    pub received_pkts: u64,
    /// Payload bytes received.
    pub received_bytes: u64,
    /// Segments sent.
    pub sent_ctrl_pkts: u64,
    /// Segments with payload sent.
    pub sent_data_pkts: u64,
    /// Payload bytes sent, including retransmissions.
    pub sent_data_bytes: u64,
    /// Resets sent.
    pub rst_sent: u64,
    /// Segments the device refused.
    pub tx_failed: u64,
    /// Segments for which no block existed.
    pub no_cb: u64,
    /// Blocks that could not be allocated.
    pub cb_alloc_err: u64,
    /// Blocks allocated.
    pub cb_alloc: u64,
    /// Blocks freed.
    pub cb_free: u64,
}

impl TsmStats {
    /// The number of blocks in a state.
    pub fn state(&self, state: State) -> u64 {
        self.states[state.index()]
    }

    pub(crate) fn enter(&mut self, state: State) {
        self.states[state.index()] += 1;
    }

    pub(crate) fn leave(&mut self, state: State) {
        let gauge = &mut self.states[state.index()];
        *gauge = gauge.saturating_sub(1);
    }
}

impl ops::AddAssign<&'_ TsmStats> for TsmStats {
    fn add_assign(&mut self, other: &TsmStats) {
        for (sum, value) in self.states.iter_mut().zip(other.states.iter()) {
            *sum += value;
        }
        self.syn_to += other.syn_to;
        self.synack_to += other.synack_to;
        self.retry_to += other.retry_to;
        self.retrans_bytes += other.retrans_bytes;
        self.missing_seq += other.missing_seq;
        self.snd_win_full += other.snd_win_full;
    }
}

impl ops::AddAssign<&'_ TcpStats> for TcpStats {
    fn add_assign(&mut self, other: &TcpStats) {
        self.received_pkts += other.received_pkts;
        self.received_bytes += other.received_bytes;
        self.sent_ctrl_pkts += other.sent_ctrl_pkts;
        self.sent_data_pkts += other.sent_data_pkts;
        self.sent_data_bytes += other.sent_data_bytes;
        self.rst_sent += other.rst_sent;
        self.tx_failed += other.tx_failed;
        self.no_cb += other.no_cb;
        self.cb_alloc_err += other.cb_alloc_err;
        self.cb_alloc += other.cb_alloc;
        self.cb_free += other.cb_free;
    }
}
