//! The TCP layer.
//!
//! Each connection is a [`TcpCb`] living in the tcp pool of the core that owns it. Everything that
//! happens to a connection is an [`Event`] handed to [`dispatch`], which selects the handler of
//! the connection's current state. The handlers follow the event processing of rfc793 closely,
//! with the simplifications a traffic generator can afford:
//!
//! * no options are negotiated, the segment size is a socket option,
//! * the send window is the peer's advertised window, there is no congestion control beyond the
//!   exponential backoff of the retransmission timer,
//! * retransmission resends everything outstanding from `SND.UNA` instead of tracking segments.
//!
//! ## Structure
//!
//! State transitions always go through [`enter_state`]. It updates the per-state gauges, reports
//! the change to the application and dispatches `Event::EnterState` to the new state, which is
//! where timers are armed and closing segments sent. Side effects on the outside world (sending
//! segments, arming timers, notifications and statistics) go through an [`Env`] borrowed from the
//! core for the duration of one event.
//!
//! A connection that reaches `CLOSED` is released by the state machine: its timers are cancelled,
//! its buffers dropped and `TcpNotification::Term` is emitted. Returning the block to its pool and
//! removing it from the connection table is left to the core, which checks the state after every
//! event.
//!
//! [`TcpCb`]: struct.TcpCb.html
//! [`Event`]: enum.Event.html
//! [`dispatch`]: fn.dispatch.html
//! [`enter_state`]: fn.enter_state.html
//! [`Env`]: struct.Env.html
use core::fmt;

use crate::time::Duration;
use crate::wire::Segment;
use crate::{Error, Result};

mod control;
mod data;
mod isn;
mod reassembly;
mod sm;
mod stats;
#[cfg(test)]
mod tests;

pub use self::control::{
    RecvVars,
    SendQueue,
    SendVars,
    TcpCb,
};

pub use self::data::SEGS_PER_SEND;
pub use self::isn::IsnGenerator;
pub use self::reassembly::Reassembly;

pub use self::sm::{
    accept,
    dispatch,
    enter_state,
    initialize,
    send_data,
    Env,
};

pub(crate) use self::sm::{on_rto, on_slow};

pub use self::stats::{TcpStats, TsmStats};

/// Retransmissions after which a connection is given up regardless of its options.
pub const TCP_MAX_RETRY_CNT: u32 = 128;

/// The largest configurable receive window.
pub const TCP_MAX_WINDOW_SIZE: u32 = 65535;

/// The largest configurable retransmission timeout.
pub const TCP_MAX_RTO: Duration = Duration::from_millis(1000);

/// The largest configurable fin timeout.
pub const TCP_MAX_FIN_TO: Duration = Duration::from_millis(1000);

/// The largest configurable time-wait timeout.
pub const TCP_MAX_TWAIT_TO: Duration = Duration::from_millis(10_000);

/// The largest configurable orphan timeout.
pub const TCP_MAX_ORPHAN_TO: Duration = Duration::from_millis(2000);

/// The number of backoff doublings of the retransmission timeout.
pub const RTO_BACKOFF_SHIFT: u32 = 6;

/// The states of a tcp connection.
///
/// `Init` is the state of a block before it has been opened, all others are those of rfc793.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Allocated but not opened yet.
    Init,
    /// Waiting for a connection request.
    Listen,
    /// Waiting for the answer to our connection request.
    SynSent,
    /// Waiting for the acknowledgement of our answer to a connection request.
    SynReceived,
    /// Data flows in both directions.
    Established,
    /// Closed locally, our FIN is not acknowledged yet.
    FinWait1,
    /// Closed locally and acknowledged, waiting for the peer to close.
    FinWait2,
    /// Closed by both, waiting for the acknowledgement of our FIN.
    LastAck,
    /// Closed by both simultaneously, waiting for the acknowledgement of our FIN.
    Closing,
    /// Waiting for stray segments of the connection to leave the network.
    TimeWait,
    /// Closed by the peer, waiting for the application to close.
    CloseWait,
    /// The connection is gone.
    Closed,
}

impl State {
    /// All states, in gauge order.
    pub const ALL: [State; 12] = [
        State::Init,
        State::Listen,
        State::SynSent,
        State::SynReceived,
        State::Established,
        State::FinWait1,
        State::FinWait2,
        State::LastAck,
        State::Closing,
        State::TimeWait,
        State::CloseWait,
        State::Closed,
    ];

    /// The index of the state in `ALL`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Check if the initial sequence numbers of both sides are known.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Init | State::Listen | State::SynSent | State::Closed => false,
            _ => true,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Init => "INIT",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynReceived => "SYN_RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::LastAck => "LAST_ACK",
            State::Closing => "CLOSING",
            State::TimeWait => "TIME_WAIT",
            State::CloseWait => "CLOSE_WAIT",
            State::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// An event for the state machine.
#[derive(Debug)]
pub enum Event<'a> {
    /// Dispatched by `enter_state` to the new state.
    EnterState,
    /// Open the connection, actively if `active` is set.
    Open {
        /// Send a SYN instead of waiting for one.
        active: bool,
    },
    /// Queue application data.
    Send {
        /// The data to queue.
        data: &'a [u8],
        /// Send even less than a full segment.
        push: bool,
        /// Receives the number of bytes queued.
        sent: &'a mut u32,
    },
    /// The application wants to receive.
    Receive,
    /// Graceful close.
    Close,
    /// Reset the connection.
    Abort,
    /// Query the connection, without effects.
    Status,
    /// A segment of the connection arrived.
    Segment(&'a Segment),
    /// The application gave up on the connection.
    UserTimeout,
    /// The retransmission timer fired.
    RetransmissionTimeout,
    /// The orphan timer fired in `FIN_WAIT_1`.
    OrphanTimeout,
    /// The fin timer fired in `FIN_WAIT_2`.
    FinTimeout,
    /// The time-wait timer fired.
    TimeWaitTimeout,
}

impl Event<'_> {
    /// A short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::EnterState => "ENTER_STATE",
            Event::Open { .. } => "OPEN",
            Event::Send { .. } => "SEND",
            Event::Receive => "RECEIVE",
            Event::Close => "CLOSE",
            Event::Abort => "ABORT",
            Event::Status => "STATUS",
            Event::Segment(_) => "SEGMENT_ARRIVES",
            Event::UserTimeout => "USER_TIMEOUT",
            Event::RetransmissionTimeout => "RETRANSMISSION_TIMEOUT",
            Event::OrphanTimeout => "ORPHAN_TIMEOUT",
            Event::FinTimeout => "FIN_TIMEOUT",
            Event::TimeWaitTimeout => "TIME_WAIT_TIMEOUT",
        }
    }
}

/// Events reported to the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpNotification<'a> {
    /// The block was initialized.
    Init,
    /// The connection changed its state.
    StateChange {
        /// The previous state.
        from: State,
        /// The new state.
        to: State,
    },
    /// Outstanding data was acknowledged by the peer.
    SegDelivered {
        /// The number of acknowledged bytes.
        bytes: u32,
    },
    /// The send window became full.
    WinUnavailable,
    /// The send window has room again.
    WinAvailable,
    /// In-order data arrived.
    SegReceived(&'a [u8]),
    /// The block is released and will be freed.
    Term,
}

/// Per-connection tcp options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpOptions {
    /// Our receive window, also the size of the send buffer.
    pub win_size: u32,
    /// Retransmissions of a SYN before giving up.
    pub syn_retry_cnt: u32,
    /// Retransmissions of a SYN|ACK before giving up.
    pub syn_ack_retry_cnt: u32,
    /// Retransmissions of data before giving up.
    pub data_retry_cnt: u32,
    /// Retransmissions of a FIN before giving up.
    pub retry_cnt: u32,
    /// The initial retransmission timeout.
    pub rto: Duration,
    /// Time to wait for the peer's FIN in `FIN_WAIT_2`.
    pub fin_to: Duration,
    /// Duration of `TIME_WAIT`.
    pub twait_to: Duration,
    /// Time to wait for the acknowledgement of our FIN in `FIN_WAIT_1`.
    pub orphan_to: Duration,
    /// Close directly instead of entering `TIME_WAIT`.
    pub skip_timewait: bool,
    /// The largest payload of a segment.
    pub mss: u16,
}

impl TcpOptions {
    /// Check all values against their maxima.
    pub fn validate(&self) -> Result<()> {
        let retries = [
            self.syn_retry_cnt,
            self.syn_ack_retry_cnt,
            self.data_retry_cnt,
            self.retry_cnt,
        ];

        if self.win_size > TCP_MAX_WINDOW_SIZE
            || retries.iter().any(|&cnt| cnt > TCP_MAX_RETRY_CNT)
            || self.rto > TCP_MAX_RTO
            || self.fin_to > TCP_MAX_FIN_TO
            || self.twait_to > TCP_MAX_TWAIT_TO
            || self.orphan_to > TCP_MAX_ORPHAN_TO
            || self.rto == Duration::from_secs(0)
            || self.mss == 0
        {
            return Err(Error::Invalid);
        }

        Ok(())
    }
}

impl Default for TcpOptions {
    fn default() -> Self {
        TcpOptions {
            win_size: TCP_MAX_WINDOW_SIZE,
            syn_retry_cnt: 3,
            syn_ack_retry_cnt: 3,
            data_retry_cnt: 3,
            retry_cnt: 3,
            rto: Duration::from_millis(200),
            fin_to: Duration::from_millis(1000),
            twait_to: Duration::from_millis(1000),
            orphan_to: Duration::from_millis(2000),
            skip_timewait: false,
            mss: 1460,
        }
    }
}
