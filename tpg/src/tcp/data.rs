//! Moving bytes: building outbound segments, the send queue and the receive path.
use crate::nic::Packet;
use crate::wire::{Segment, TcpFlags, TcpSeqNumber};
use crate::{Error, Result};

use super::{Env, TcpCb, TcpNotification};

/// The most segments sent in answer to one event.
pub const SEGS_PER_SEND: u32 = 4;

/// Build a segment from the block's endpoints.
///
/// The acknowledgement is `RCV.NXT` when the ACK flag is set, the window is our receive window.
pub(crate) fn build(cb: &TcpCb, flags: TcpFlags, seq: TcpSeqNumber, payload: Vec<u8>) -> Segment {
    let tuple = cb.l4.tuple();
    let ack = if flags.ack() { cb.rcv.nxt } else { TcpSeqNumber::default() };
    let mut segment = Segment::control(
        (tuple.local_addr, tuple.local_port),
        (tuple.remote_addr, tuple.remote_port),
        flags,
        seq,
        ack);
    segment.window_len = cb.rcv.wnd.min(u32::from(u16::max_value())) as u16;
    segment.payload = payload;
    segment
}

/// Hand a segment to the device.
///
/// Returns `false` if the device refused it, which is a drop like any other on the wire.
pub(crate) fn transmit(cb: &TcpCb, segment: Segment, env: &mut Env<'_>) -> bool {
    let len = segment.payload_len();
    let flags = segment.flags;
    cb_trace!(cb.l4, ?flags, seq = segment.seq_number.0, ack = segment.ack_number.0, len, "tx");

    if let Err(err) = env.device.tx(cb.l4.key.port, Packet::Tcp(segment)) {
        env.stats.tx_failed += 1;
        cb_debug!(cb.l4, %err, "segment not sent");
        return false;
    }

    if flags.rst() {
        env.stats.rst_sent += 1;
    }

    if len > 0 {
        env.stats.sent_data_pkts += 1;
        env.stats.sent_data_bytes += u64::from(len);
    } else {
        env.stats.sent_ctrl_pkts += 1;
    }

    true
}

/// Send a segment without data.
///
/// A SYN carries `ISS`, everything else `SND.NXT`.
pub(crate) fn send_ctrl(cb: &TcpCb, flags: TcpFlags, env: &mut Env<'_>) -> bool {
    let seq = if flags.syn() { cb.snd.iss } else { cb.snd.nxt };
    send_ctrl_seq(cb, flags, seq, env)
}

/// Send a segment without data with an explicit sequence number.
pub(crate) fn send_ctrl_seq(cb: &TcpCb, flags: TcpFlags, seq: TcpSeqNumber, env: &mut Env<'_>)
    -> bool
{
    transmit(cb, build(cb, flags, seq, Vec::new()), env)
}

/// Send queued data in segments of at most one mss.
///
/// `offset` is the position of the first byte in the send queue, `seq` its sequence number.
/// `SND.NXT` advances whenever new data goes out. Returns the number of bytes sent.
fn send_segments(
    cb: &mut TcpCb,
    offset: u32,
    len: u32,
    seq: TcpSeqNumber,
    flags: TcpFlags,
    env: &mut Env<'_>,
) -> u32 {
    let mss = u32::from(cb.l4.options.tcp.mss).max(1);
    let mut sent = 0;
    let mut segments = 0;

    while segments < SEGS_PER_SEND && sent < len {
        let seg_len = (len - sent).min(mss);
        let seg_seq = seq + sent;
        let payload = cb.retrans.read(offset + sent, seg_len);
        if !transmit(cb, build(cb, flags, seg_seq, payload), env) {
            break;
        }

        if seg_seq == cb.snd.nxt {
            cb.snd.nxt += seg_len;
        }

        sent += seg_len;
        segments += 1;
    }

    sent
}

/// Queue application data and send what the window allows.
///
/// Stores at most what fits the send buffer and `SEGS_PER_SEND` segments, reporting the stored
/// amount in `sent`. Fails with `NoMem` if nothing could be stored and with `Again` if only a part
/// was.
pub(crate) fn send(
    cb: &mut TcpCb,
    data: &[u8],
    push: bool,
    sent: &mut u32,
    env: &mut Env<'_>,
) -> Result<()> {
    *sent = 0;
    let mss = u32::from(cb.l4.options.tcp.mss);
    let avail = cb.snd_buf_avail().min(SEGS_PER_SEND * mss);
    let stored = (data.len() as u32).min(avail);
    if stored == 0 {
        return Err(Error::NoMem);
    }

    cb.retrans.push(&data[..stored as usize]);
    *sent = stored;

    if push || cb.unsent() >= mss {
        let mut flags = TcpFlags::ACK;
        flags.set_psh(push);
        send_unsent(cb, flags, env);
    }

    if stored as usize == data.len() {
        Ok(())
    } else {
        Err(Error::Again)
    }
}

/// Send queued data that did not fit the window so far.
///
/// Returns the number of bytes sent.
pub(crate) fn flush(cb: &mut TcpCb, env: &mut Env<'_>) -> u32 {
    send_unsent(cb, TcpFlags::ACK, env)
}

fn send_unsent(cb: &mut TcpCb, flags: TcpFlags, env: &mut Env<'_>) -> u32 {
    let unsent = cb.unsent();
    let room = cb.snd.wnd.saturating_sub(cb.snd.nxt.wrapping_diff(cb.snd.una));
    if unsent == 0 || room == 0 {
        return 0;
    }

    let offset = cb.in_flight();
    let nxt = cb.snd.nxt;
    send_segments(cb, offset, unsent.min(room), nxt, flags, env)
}

/// Send the queue again from `SND.UNA`, as far as the window allows.
pub(crate) fn retrans(cb: &mut TcpCb, env: &mut Env<'_>) -> u32 {
    if cb.retrans.is_empty() {
        return 0;
    }

    let len = cb.retrans.len().min(cb.snd.wnd);
    let una = cb.snd.una;
    send_segments(cb, 0, len, una, TcpFlags::ACK, env)
}

/// Accept received data and deliver everything that is in order.
///
/// Data before `RCV.NXT` was delivered already and is skipped. The rest is stored and every
/// chunk starting at `RCV.NXT` is handed to the application, advancing `RCV.NXT`. Returns the
/// number of bytes delivered.
pub(crate) fn handle(
    cb: &mut TcpCb,
    seq: TcpSeqNumber,
    payload: &[u8],
    env: &mut Env<'_>,
) -> u32 {
    let len = payload.len() as u32;
    if seq + len <= cb.rcv.nxt {
        return 0;
    }

    let (seq, payload) = if seq < cb.rcv.nxt {
        let skip = cb.rcv.nxt - seq;
        (cb.rcv.nxt, &payload[skip as usize..])
    } else {
        (seq, payload)
    };

    env.stats.received_bytes += payload.len() as u64;
    cb.ooo.insert(seq, payload);

    let mut delivered = 0;
    while let Some(chunk) = cb.ooo.pop_at(cb.rcv.nxt) {
        let len = chunk.len() as u32;
        cb.rcv.nxt += len;
        delivered += len;
        env.app.tcp(&cb.l4, TcpNotification::SegReceived(&chunk));
    }

    delivered
}
