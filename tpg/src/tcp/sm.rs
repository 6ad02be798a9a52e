//! The tcp state machine.
use crate::nic::{Device, Notify};
use crate::time::{Duration, Instant};
use crate::timer::Wheel;
use crate::wire::{Segment, TcpFlags as Flags, TcpSeqNumber};
use crate::{Error, Result};

use super::data;
use super::{
    Event,
    IsnGenerator,
    State,
    TcpCb,
    TcpNotification,
    TcpStats,
    TsmStats,
    RTO_BACKOFF_SHIFT,
    TCP_MAX_RETRY_CNT,
};

/// Everything outside of a block that the state machine touches.
///
/// Borrowed from the owning core for a single event.
pub struct Env<'a> {
    /// The current time.
    pub now: Instant,
    /// Outbound segments.
    pub device: &'a mut dyn Device,
    /// The application.
    pub app: &'a mut dyn Notify,
    /// The retransmission timers.
    pub rto: &'a mut Wheel,
    /// The connection lifetime timers.
    pub slow: &'a mut Wheel,
    /// State machine counters.
    pub tsm: &'a mut TsmStats,
    /// Packet counters.
    pub stats: &'a mut TcpStats,
    /// Initial sequence numbers.
    pub isn: &'a IsnGenerator,
}

impl Env<'_> {
    fn notify(&mut self, cb: &TcpCb, note: TcpNotification<'_>) {
        self.app.tcp(&cb.l4, note)
    }
}

/// Prepare a fresh block for its first event.
///
/// Counts the block in `INIT` and reports `TcpNotification::Init`.
pub fn initialize(cb: &mut TcpCb, env: &mut Env<'_>) {
    cb.state = State::Init;
    env.tsm.enter(State::Init);
    env.notify(cb, TcpNotification::Init);
}

/// Process one event in the current state of the block.
pub fn dispatch(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    cb_trace!(cb.l4, state = %cb.state, event = event.name(), "dispatch");

    match (cb.state, &event) {
        (State::Closed, Event::Abort) | (State::Closed, Event::UserTimeout) => {
            return Err(Error::NotConnected)
        },
        (_, Event::Status) => return Ok(()),
        (_, Event::Abort) => return abort(cb, env),
        (_, Event::UserTimeout) => return enter_state(cb, State::Closed, env),
        _ => {},
    }

    match cb.state {
        State::Init => init(cb, event, env),
        State::Listen => listen(cb, event, env),
        State::SynSent => syn_sent(cb, event, env),
        State::SynReceived => syn_received(cb, event, env),
        State::Established => established(cb, event, env),
        State::FinWait1 => fin_wait_1(cb, event, env),
        State::FinWait2 => fin_wait_2(cb, event, env),
        State::LastAck => last_ack(cb, event, env),
        State::Closing => closing(cb, event, env),
        State::TimeWait => time_wait(cb, event, env),
        State::CloseWait => close_wait(cb, event, env),
        State::Closed => closed(cb, event, env),
    }
}

/// Move the block to another state.
///
/// Adjusts the state gauges, reports the change and dispatches `Event::EnterState` to the new
/// state.
pub fn enter_state(cb: &mut TcpCb, state: State, env: &mut Env<'_>) -> Result<()> {
    let from = cb.state;
    cb_debug!(cb.l4, %from, to = %state, "state change");

    env.tsm.leave(from);
    env.tsm.enter(state);
    cb.state = state;
    env.notify(cb, TcpNotification::StateChange { from, to: state });

    dispatch(cb, Event::EnterState, env)
}

/// Queue application data, returning the number of bytes taken.
pub fn send_data(cb: &mut TcpCb, data: &[u8], push: bool, env: &mut Env<'_>) -> Result<u32> {
    let mut sent = 0;
    dispatch(cb, Event::Send { data, push, sent: &mut sent }, env)?;
    Ok(sent)
}

/// Process a SYN on an initialized block cloned from a listener.
///
/// The block passes through `LISTEN`, picks its initial sequence number and answers with a
/// SYN|ACK, entering `SYN_RECEIVED`. The listener itself is not touched.
pub fn accept(cb: &mut TcpCb, segment: &Segment, env: &mut Env<'_>) -> Result<()> {
    cb.active = false;
    enter_state(cb, State::Listen, env)?;

    cb.rcv.nxt = segment.seq_number + 1;
    cb.rcv.irs = segment.seq_number;
    cb.snd.iss = env.isn.get_isn(cb.l4.tuple(), env.now);
    cb.snd.una = cb.snd.iss;
    cb.snd.nxt = cb.snd.iss + 1;

    data::send_ctrl(cb, Flags::SYN | Flags::ACK, env);
    enter_state(cb, State::SynReceived, env)
}

/// The retransmission timer of the block fired.
pub(crate) fn on_rto(cb: &mut TcpCb, env: &mut Env<'_>) -> Result<()> {
    cb.rto_timer = None;
    cb.retrans_cnt += 1;
    dispatch(cb, Event::RetransmissionTimeout, env)
}

/// The slow timer of the block fired.
pub(crate) fn on_slow(cb: &mut TcpCb, env: &mut Env<'_>) -> Result<()> {
    cb.slow_timer = None;
    let event = match cb.state {
        State::FinWait1 => Event::OrphanTimeout,
        State::FinWait2 => Event::FinTimeout,
        State::TimeWait => Event::TimeWaitTimeout,
        _ => return Ok(()),
    };
    dispatch(cb, event, env)
}

/// Drop all local state and report the end of the block.
///
/// No packet is sent. The block is ready to be freed afterwards.
fn release(cb: &mut TcpCb, env: &mut Env<'_>) {
    rto_cancel(cb, env);
    slow_cancel(cb, env);
    cb.retrans.clear();
    if !cb.ooo.is_empty() {
        env.tsm.missing_seq = env.tsm.missing_seq.saturating_sub(1);
        cb.ooo.clear();
    }
    terminate(cb, env);
}

fn terminate(cb: &mut TcpCb, env: &mut Env<'_>) {
    env.tsm.leave(cb.state);
    env.notify(cb, TcpNotification::Term);
}

fn abort(cb: &mut TcpCb, env: &mut Env<'_>) -> Result<()> {
    if cb.state.is_synchronized() {
        let nxt = cb.snd.nxt;
        data::send_ctrl_seq(cb, Flags::RST, nxt, env);
    }
    enter_state(cb, State::Closed, env)
}

fn rto_set(cb: &mut TcpCb, timeout: Duration, env: &mut Env<'_>) {
    let id = match cb.l4.id {
        Some(id) => id,
        None => return,
    };

    rto_cancel(cb, env);
    // An overflow is counted by the wheel, the connection then relies on the peer.
    cb.rto_timer = env.rto.add(id, env.now, timeout).ok();
}

fn rto_cancel(cb: &mut TcpCb, env: &mut Env<'_>) {
    if let (Some(id), Some(slot)) = (cb.l4.id, cb.rto_timer.take()) {
        env.rto.cancel(id, slot);
    }
}

fn slow_set(cb: &mut TcpCb, timeout: Duration, env: &mut Env<'_>) {
    let id = match cb.l4.id {
        Some(id) => id,
        None => return,
    };

    slow_cancel(cb, env);
    cb.slow_timer = env.slow.add(id, env.now, timeout).ok();
}

fn slow_cancel(cb: &mut TcpCb, env: &mut Env<'_>) {
    if let (Some(id), Some(slot)) = (cb.l4.id, cb.slow_timer.take()) {
        env.slow.cancel(id, slot);
    }
}

/// Arm the retransmission timer if anything is outstanding.
///
/// An armed timer is kept. The timeout doubles with every retransmission, up to
/// `RTO_BACKOFF_SHIFT` times and below the range of the wheel.
fn schedule_retransmission(cb: &mut TcpCb, env: &mut Env<'_>) {
    if cb.snd.una == cb.snd.nxt && cb.retrans.is_empty() {
        cb.retrans_cnt = 0;
        rto_cancel(cb, env);
        return;
    }

    if cb.rto_armed() {
        return;
    }

    let shift = cb.retrans_cnt.min(RTO_BACKOFF_SHIFT);
    let ceiling = env.rto.max() - Duration::from_micros(1);
    let timeout = (cb.l4.options.tcp.rto * (1 << shift)).min(ceiling);
    rto_set(cb, timeout, env);
}

/// Check the retry limit of the block, counting the failure in `counter`.
fn give_up(cb: &TcpCb, limit: u32, counter: &mut u64) -> bool {
    if cb.retrans_cnt > limit || cb.retrans_cnt > TCP_MAX_RETRY_CNT {
        *counter += 1;
        cb_debug!(cb.l4, retries = cb.retrans_cnt, "retransmission limit reached");
        true
    } else {
        false
    }
}

fn queue_data(
    cb: &mut TcpCb,
    data: &[u8],
    push: bool,
    sent: &mut u32,
    env: &mut Env<'_>,
) -> Result<()> {
    let was_full = cb.snd_win_full();
    let result = data::send(cb, data, push, sent, env);
    schedule_retransmission(cb, env);

    if !was_full && cb.snd_win_full() {
        env.notify(cb, TcpNotification::WinUnavailable);
        env.tsm.snd_win_full += 1;
    }

    result
}

fn retrans_data(cb: &mut TcpCb, env: &mut Env<'_>) {
    let was_full = cb.snd_win_full();
    let bytes = data::retrans(cb, env);
    env.tsm.retrans_bytes += u64::from(bytes);

    if !was_full && cb.snd_win_full() {
        env.notify(cb, TcpNotification::WinUnavailable);
        env.tsm.snd_win_full += 1;
    }
}

/// Send queued data the window did not allow before.
fn flush_data(cb: &mut TcpCb, env: &mut Env<'_>) {
    let was_full = cb.snd_win_full();
    if data::flush(cb, env) == 0 {
        return;
    }

    schedule_retransmission(cb, env);
    if !was_full && cb.snd_win_full() {
        env.notify(cb, TcpNotification::WinUnavailable);
        env.tsm.snd_win_full += 1;
    }
}

/// Drop acknowledged data from the send queue, advancing `SND.UNA`.
fn cleanup(cb: &mut TcpCb, ack: TcpSeqNumber, env: &mut Env<'_>) {
    let acked = ack.wrapping_diff(cb.snd.una);
    if acked == 0 || acked > cb.retrans.len() {
        return;
    }

    let was_full = cb.snd_win_full();
    cb.retrans.ack(acked);
    cb.snd.una = ack;
    // The peer makes progress.
    cb.retrans_cnt = 0;
    cb_trace!(cb.l4, acked, "send queue cleanup");
    env.notify(cb, TcpNotification::SegDelivered { bytes: acked });

    if cb.snd.una == cb.snd.nxt {
        rto_cancel(cb, env);
    }

    if was_full && !cb.snd_win_full() {
        env.notify(cb, TcpNotification::WinAvailable);
        env.tsm.snd_win_full = env.tsm.snd_win_full.saturating_sub(1);
    }
}

/// Process the text of a segment, returning the bytes delivered.
fn handle_incoming(cb: &mut TcpCb, segment: &Segment, env: &mut Env<'_>) -> u32 {
    if segment.payload.is_empty() {
        return 0;
    }

    // The text of a SYN starts after it.
    let seq = if segment.flags.syn() { segment.seq_number + 1 } else { segment.seq_number };
    let was_missing = !cb.ooo.is_empty();
    let delivered = data::handle(cb, seq, &segment.payload, env);

    if !was_missing && !cb.ooo.is_empty() {
        env.tsm.missing_seq += 1;
    } else if was_missing && cb.ooo.is_empty() {
        env.tsm.missing_seq = env.tsm.missing_seq.saturating_sub(1);
    }

    delivered
}

/// The receive acceptance test of rfc793.
fn acceptable(cb: &TcpCb, segment: &Segment) -> bool {
    let seq = segment.seq_number;
    let nxt = cb.rcv.nxt;
    let wnd = cb.rcv.wnd;

    match (segment.payload_len(), wnd) {
        (0, 0) => seq == nxt,
        (0, _) => seq.in_window(nxt, wnd),
        (_, 0) => false,
        (len, _) => seq.in_window(nxt, wnd) || (seq + len - 1).in_window(nxt, wnd),
    }
}

/// The checks shared by all synchronized states, in the order of rfc793.
///
/// Returns the acknowledgement number if processing should continue.
fn check_segment(cb: &mut TcpCb, segment: &Segment, env: &mut Env<'_>)
    -> Result<Option<TcpSeqNumber>>
{
    if !acceptable(cb, segment) {
        cb_trace!(cb.l4, seq = segment.seq_number.0, "segment not acceptable");
        if !segment.flags.rst() {
            data::send_ctrl(cb, Flags::ACK, env);
        }
        return Ok(None);
    }

    if segment.flags.rst() || segment.flags.syn() {
        enter_state(cb, State::Closed, env)?;
        return Ok(None);
    }

    Ok(segment.ack())
}

fn update_window(cb: &mut TcpCb, segment: &Segment, ack: TcpSeqNumber) {
    let seq = segment.seq_number;
    if cb.snd.wl1 < seq || (cb.snd.wl1 == seq && cb.snd.wl2 <= ack) {
        cb.snd.wnd = u32::from(segment.window_len);
        cb.snd.wl1 = seq;
        cb.snd.wl2 = ack;
    }
}

/// Check if the peer's FIN can be processed now.
///
/// A FIN that arrives ahead of missing data is remembered and processed once `RCV.NXT` reaches
/// it, with the segment that fills the gap.
fn fin_arrived(cb: &mut TcpCb, segment: &Segment) -> bool {
    if segment.flags.fin() {
        let fin_seq = segment.seq_number + segment.payload_len();
        if cb.rcv.nxt != fin_seq {
            cb_trace!(cb.l4, fin_seq = fin_seq.0, "fin ahead of data");
            cb.fin_rcvd = Some(fin_seq);
            return false;
        }
        return true;
    }

    cb.fin_rcvd.map_or(false, |fin| cb.rcv.nxt == fin)
}

/// Send our FIN once all queued data went out.
///
/// The FIN takes the sequence number after the last queued byte. While the peer's window holds
/// data back, the FIN waits and is sent by a later acknowledgement or retransmission.
fn send_fin(cb: &mut TcpCb, env: &mut Env<'_>) {
    if cb.fin_sent {
        return;
    }

    flush_data(cb, env);
    if cb.unsent() > 0 {
        cb_trace!(cb.l4, unsent = cb.unsent(), "fin waits for data");
        return;
    }

    data::send_ctrl(cb, Flags::FIN | Flags::ACK, env);
    cb.snd.nxt += 1;
    cb.fin_sent = true;
}

/// Retransmit our FIN, which sits at `SND.NXT - 1`.
fn resend_fin(cb: &mut TcpCb, env: &mut Env<'_>) {
    let seq = cb.snd.nxt - 1;
    data::send_ctrl_seq(cb, Flags::FIN | Flags::ACK, seq, env);
}

/// Retransmit after a timeout in a closing state: the data from `SND.UNA`, then the FIN.
fn retrans_closing(cb: &mut TcpCb, env: &mut Env<'_>) {
    retrans_data(cb, env);
    if cb.fin_sent {
        resend_fin(cb, env);
    } else {
        send_fin(cb, env);
    }
}

/// Check if `ack` covers our FIN.
fn fin_acked(cb: &TcpCb, ack: TcpSeqNumber) -> bool {
    cb.fin_sent && cb.snd.una == cb.snd.nxt - 1 && ack == cb.snd.nxt
}

/// The part of `ack` that acknowledges data, the FIN itself is not in the send queue.
fn data_ack(cb: &TcpCb, ack: TcpSeqNumber) -> TcpSeqNumber {
    if cb.fin_sent && ack == cb.snd.nxt { ack - 1 } else { ack }
}

fn init(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::Open { active } => {
            cb.active = active;
            if !active {
                return enter_state(cb, State::Listen, env);
            }

            cb.snd.iss = env.isn.get_isn(cb.l4.tuple(), env.now);
            cb.snd.una = cb.snd.iss;
            cb.snd.nxt = cb.snd.iss + 1;
            data::send_ctrl(cb, Flags::SYN, env);
            enter_state(cb, State::SynSent, env)
        },
        Event::Send { .. } | Event::Receive => Err(Error::NotConnected),
        Event::Close => enter_state(cb, State::Closed, env),
        _ => Ok(()),
    }
}

fn listen(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::Segment(segment) => {
            if segment.flags.rst() {
                return Ok(());
            }

            if let Some(ack) = segment.ack() {
                // Nothing was sent from here that could be acknowledged.
                data::send_ctrl_seq(cb, Flags::RST, ack, env);
                return Ok(());
            }

            // A SYN is accepted on a clone of the listener by the core, never on the listener.
            Ok(())
        },
        Event::Send { .. } | Event::Receive => Err(Error::NotConnected),
        Event::Close => enter_state(cb, State::Closed, env),
        _ => Ok(()),
    }
}

fn syn_sent(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            schedule_retransmission(cb, env);
            Ok(())
        },
        Event::Segment(segment) => syn_sent_segment(cb, segment, env),
        Event::Send { .. } | Event::Receive => Err(Error::NotConnected),
        Event::Close => enter_state(cb, State::Closed, env),
        Event::RetransmissionTimeout => {
            let limit = cb.l4.options.tcp.syn_retry_cnt;
            if give_up(cb, limit, &mut env.tsm.syn_to) {
                return enter_state(cb, State::Closed, env);
            }

            data::send_ctrl(cb, Flags::SYN, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        _ => Ok(()),
    }
}

fn syn_sent_segment(cb: &mut TcpCb, segment: &Segment, env: &mut Env<'_>) -> Result<()> {
    let flags = segment.flags;
    let seq = segment.seq_number;

    if let Some(ack) = segment.ack() {
        if ack <= cb.snd.iss || ack > cb.snd.nxt {
            if !flags.rst() {
                data::send_ctrl_seq(cb, Flags::RST, ack, env);
            }
            return Ok(());
        }

        if ack < cb.snd.una {
            return Ok(());
        }
    }

    if flags.rst() {
        // Only reached with an acceptable ACK, a bare RST is dropped.
        if segment.ack().is_some() {
            return enter_state(cb, State::Closed, env);
        }
        return Ok(());
    }

    if !flags.syn() {
        return Ok(());
    }

    cb.rcv.nxt = seq + 1;
    cb.rcv.irs = seq;

    if let Some(ack) = segment.ack() {
        // Our SYN is acknowledged, data might be as well.
        cb.snd.una += 1;
        cleanup(cb, ack, env);

        if cb.snd.una > cb.snd.iss {
            cb.snd.wnd = u32::from(segment.window_len);
            cb.snd.wl1 = seq;
            cb.snd.wl2 = ack;

            handle_incoming(cb, segment, env);
            data::send_ctrl(cb, Flags::ACK, env);
            rto_cancel(cb, env);
            return enter_state(cb, State::Established, env);
        }
    }

    // Simultaneous open.
    data::send_ctrl(cb, Flags::SYN | Flags::ACK, env);
    enter_state(cb, State::SynReceived, env)
}

fn syn_received(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            schedule_retransmission(cb, env);
            Ok(())
        },
        Event::Segment(segment) => {
            let ack = match check_segment(cb, segment, env)? {
                Some(ack) => ack,
                None => return Ok(()),
            };

            if ack < cb.snd.una || ack > cb.snd.nxt {
                data::send_ctrl_seq(cb, Flags::RST, ack, env);
                return Ok(());
            }

            if ack > cb.snd.una {
                cb.snd.una += 1;
                cleanup(cb, ack, env);
            }

            cb.snd.wnd = u32::from(segment.window_len);
            cb.snd.wl1 = segment.seq_number;
            cb.snd.wl2 = ack;

            if handle_incoming(cb, segment, env) > 0 {
                data::send_ctrl(cb, Flags::ACK, env);
            }

            if segment.flags.fin() {
                cb.rcv.nxt += 1;
                data::send_ctrl(cb, Flags::ACK, env);
                return enter_state(cb, State::CloseWait, env);
            }

            rto_cancel(cb, env);
            enter_state(cb, State::Established, env)
        },
        Event::Send { .. } | Event::Receive => Err(Error::NotConnected),
        Event::Close => enter_state(cb, State::FinWait1, env),
        Event::RetransmissionTimeout => {
            let limit = cb.l4.options.tcp.syn_ack_retry_cnt;
            if give_up(cb, limit, &mut env.tsm.synack_to) {
                return enter_state(cb, State::Closed, env);
            }

            data::send_ctrl(cb, Flags::SYN | Flags::ACK, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        _ => Ok(()),
    }
}

fn established(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::Send { data, push, sent } => queue_data(cb, data, push, sent, env),
        Event::Close => enter_state(cb, State::FinWait1, env),
        Event::Segment(segment) => {
            let ack = match check_segment(cb, segment, env)? {
                Some(ack) => ack,
                None => return Ok(()),
            };

            if cb.snd.una < ack && ack <= cb.snd.nxt {
                cleanup(cb, ack, env);
            } else if ack < cb.snd.una {
                // Duplicate.
                return Ok(());
            } else if ack > cb.snd.nxt {
                data::send_ctrl(cb, Flags::ACK, env);
                return Ok(());
            }

            update_window(cb, segment, ack);
            flush_data(cb, env);

            if handle_incoming(cb, segment, env) > 0 {
                data::send_ctrl(cb, Flags::ACK, env);
            }

            if !fin_arrived(cb, segment) {
                return Ok(());
            }

            cb.rcv.nxt += 1;
            data::send_ctrl(cb, Flags::ACK, env);
            enter_state(cb, State::CloseWait, env)
        },
        Event::RetransmissionTimeout => {
            let limit = cb.l4.options.tcp.data_retry_cnt;
            if give_up(cb, limit, &mut env.tsm.retry_to) {
                return enter_state(cb, State::Closed, env);
            }

            retrans_data(cb, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        _ => Ok(()),
    }
}

fn fin_wait_1(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            send_fin(cb, env);
            schedule_retransmission(cb, env);
            let orphan_to = cb.l4.options.tcp.orphan_to;
            slow_set(cb, orphan_to, env);
            Ok(())
        },
        Event::Open { .. } | Event::Send { .. } | Event::Receive | Event::Close => {
            Err(Error::NotConnected)
        },
        Event::Segment(segment) => {
            let ack = match check_segment(cb, segment, env)? {
                Some(ack) => ack,
                None => return Ok(()),
            };

            if cb.snd.una < ack && ack <= cb.snd.nxt {
                let data_ack = data_ack(cb, ack);
                cleanup(cb, data_ack, env);
            } else if ack < cb.snd.una || ack > cb.snd.nxt {
                return Ok(());
            }

            update_window(cb, segment, ack);

            let fin_acked = fin_acked(cb, ack);
            if fin_acked {
                cb.snd.una += 1;
            } else {
                send_fin(cb, env);
            }

            let delivered = handle_incoming(cb, segment, env);

            if fin_arrived(cb, segment) {
                cb.rcv.nxt += 1;
                data::send_ctrl(cb, Flags::ACK, env);
                slow_cancel(cb, env);
                let next = if fin_acked { State::TimeWait } else { State::Closing };
                return enter_state(cb, next, env);
            }

            if delivered > 0 {
                data::send_ctrl(cb, Flags::ACK, env);
            }

            if fin_acked {
                rto_cancel(cb, env);
                slow_cancel(cb, env);
                return enter_state(cb, State::FinWait2, env);
            }

            Ok(())
        },
        Event::RetransmissionTimeout => {
            let limit = cb.l4.options.tcp.retry_cnt;
            if give_up(cb, limit, &mut env.tsm.retry_to) {
                slow_cancel(cb, env);
                return enter_state(cb, State::Closed, env);
            }

            retrans_closing(cb, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        Event::OrphanTimeout => enter_state(cb, State::Closed, env),
        _ => Ok(()),
    }
}

fn fin_wait_2(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            let fin_to = cb.l4.options.tcp.fin_to;
            slow_set(cb, fin_to, env);
            Ok(())
        },
        Event::Open { .. } | Event::Send { .. } | Event::Receive | Event::Close => {
            Err(Error::NotConnected)
        },
        Event::Segment(segment) => {
            let ack = match check_segment(cb, segment, env)? {
                Some(ack) => ack,
                None => return Ok(()),
            };

            if cb.snd.una < ack && ack <= cb.snd.nxt {
                cleanup(cb, ack, env);
            }

            update_window(cb, segment, ack);
            let delivered = handle_incoming(cb, segment, env);

            if !fin_arrived(cb, segment) {
                if delivered > 0 {
                    data::send_ctrl(cb, Flags::ACK, env);
                }
                return Ok(());
            }

            slow_cancel(cb, env);
            cb.rcv.nxt += 1;
            data::send_ctrl(cb, Flags::ACK, env);
            enter_state(cb, State::TimeWait, env)
        },
        Event::FinTimeout => enter_state(cb, State::Closed, env),
        _ => Ok(()),
    }
}

fn last_ack(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            send_fin(cb, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        Event::Open { .. } | Event::Send { .. } | Event::Receive | Event::Close => {
            Err(Error::NotConnected)
        },
        Event::Segment(segment) => {
            let ack = match check_segment(cb, segment, env)? {
                Some(ack) => ack,
                None => return Ok(()),
            };

            if cb.snd.una < ack && ack <= cb.snd.nxt {
                let data_ack = data_ack(cb, ack);
                cleanup(cb, data_ack, env);
            }

            if fin_acked(cb, ack) {
                return enter_state(cb, State::Closed, env);
            }

            update_window(cb, segment, ack);
            send_fin(cb, env);
            Ok(())
        },
        Event::RetransmissionTimeout => {
            let limit = cb.l4.options.tcp.retry_cnt;
            if give_up(cb, limit, &mut env.tsm.retry_to) {
                return enter_state(cb, State::Closed, env);
            }

            retrans_closing(cb, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        _ => Ok(()),
    }
}

fn closing(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            send_fin(cb, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        Event::Open { .. } | Event::Send { .. } | Event::Receive | Event::Close => {
            Err(Error::NotConnected)
        },
        Event::Segment(segment) => {
            let ack = match check_segment(cb, segment, env)? {
                Some(ack) => ack,
                None => return Ok(()),
            };

            if cb.snd.una < ack && ack <= cb.snd.nxt {
                let data_ack = data_ack(cb, ack);
                cleanup(cb, data_ack, env);
            } else if ack < cb.snd.una || ack > cb.snd.nxt {
                return Ok(());
            }

            update_window(cb, segment, ack);

            if fin_acked(cb, ack) {
                cb.snd.una += 1;
                rto_cancel(cb, env);
                return enter_state(cb, State::TimeWait, env);
            }

            send_fin(cb, env);
            Ok(())
        },
        Event::RetransmissionTimeout => {
            let limit = cb.l4.options.tcp.retry_cnt;
            if give_up(cb, limit, &mut env.tsm.retry_to) {
                return enter_state(cb, State::Closed, env);
            }

            retrans_closing(cb, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        _ => Ok(()),
    }
}

fn time_wait(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            rto_cancel(cb, env);
            slow_cancel(cb, env);
            if cb.l4.options.tcp.skip_timewait {
                return enter_state(cb, State::Closed, env);
            }

            let twait_to = cb.l4.options.tcp.twait_to;
            slow_set(cb, twait_to, env);
            Ok(())
        },
        Event::Open { .. } | Event::Send { .. } | Event::Receive | Event::Close => {
            Err(Error::NotConnected)
        },
        Event::Segment(segment) => {
            if !acceptable(cb, segment) {
                if !segment.flags.rst() {
                    data::send_ctrl(cb, Flags::ACK, env);
                }
                return Ok(());
            }

            if segment.flags.rst() || segment.flags.syn() {
                return enter_state(cb, State::Closed, env);
            }

            // A retransmitted FIN, our last ACK got lost.
            data::send_ctrl(cb, Flags::ACK, env);
            let twait_to = cb.l4.options.tcp.twait_to;
            slow_set(cb, twait_to, env);
            Ok(())
        },
        Event::TimeWaitTimeout => enter_state(cb, State::Closed, env),
        _ => Ok(()),
    }
}

fn close_wait(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            if cb.consume_all_data() {
                return enter_state(cb, State::LastAck, env);
            }

            schedule_retransmission(cb, env);
            Ok(())
        },
        Event::Send { data, push, sent } => queue_data(cb, data, push, sent, env),
        Event::Close => enter_state(cb, State::LastAck, env),
        Event::Segment(segment) => {
            let ack = match check_segment(cb, segment, env)? {
                Some(ack) => ack,
                None => return Ok(()),
            };

            if cb.snd.una < ack && ack <= cb.snd.nxt {
                cleanup(cb, ack, env);
            }

            update_window(cb, segment, ack);
            flush_data(cb, env);
            Ok(())
        },
        Event::RetransmissionTimeout => {
            let limit = cb.l4.options.tcp.retry_cnt;
            if give_up(cb, limit, &mut env.tsm.retry_to) {
                return enter_state(cb, State::Closed, env);
            }

            retrans_data(cb, env);
            schedule_retransmission(cb, env);
            Ok(())
        },
        _ => Ok(()),
    }
}

fn closed(cb: &mut TcpCb, event: Event<'_>, env: &mut Env<'_>) -> Result<()> {
    match event {
        Event::EnterState => {
            release(cb, env);
            Ok(())
        },
        Event::Open { .. } | Event::Send { .. } | Event::Receive | Event::Close => {
            Err(Error::NotConnected)
        },
        Event::Segment(segment) => {
            if segment.flags.rst() {
                return Ok(());
            }

            match segment.ack() {
                Some(ack) => {
                    data::send_ctrl_seq(cb, Flags::RST, ack, env);
                },
                None => {
                    cb.rcv.nxt = segment.seq_number + segment.sequence_len();
                    data::send_ctrl_seq(cb, Flags::RST | Flags::ACK, TcpSeqNumber(0), env);
                },
            }
            Ok(())
        },
        _ => Ok(()),
    }
}
