//! Tcp state machine tests.
//!
//! Each test drives a single block through the state machine, playing the peer by hand: segments
//! the block sends are taken from a loopback device and the answers are built here. Timers are
//! fired directly instead of advancing the wheels.
use std::net::Ipv4Addr;

use crate::cb::{CbFlags, L4Cb, OpenParams};
use crate::hash::Toeplitz;
use crate::nic::{Journal, Loopback, Note, Packet};
use crate::pool::Pool;
use crate::time::{Duration, Instant};
use crate::timer::Wheel;
use crate::wire::{Segment, TcpFlags as Flags, TcpSeqNumber};
use crate::Error;

use super::*;
use super::sm::{on_rto, on_slow};

const LOCAL: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 0, 1), 40000);
const REMOTE: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 1, 1), 80);
const PEER_ISS: u32 = 7000;

struct Harness {
    device: Loopback,
    journal: Journal,
    rto: Wheel,
    slow: Wheel,
    tsm: TsmStats,
    stats: TcpStats,
    isn: IsnGenerator,
    now: Instant,
    pool: Pool<()>,
}

impl Harness {
    fn new() -> Self {
        Harness {
            device: Loopback::new(),
            journal: Journal::default(),
            rto: Wheel::new(Duration::from_micros(50), Duration::from_secs(30)),
            slow: Wheel::new(Duration::from_millis(100), Duration::from_secs(60)),
            tsm: TsmStats::default(),
            stats: TcpStats::default(),
            isn: IsnGenerator::from_key(0x1234, 0x5678),
            now: Instant::from_millis(1),
            pool: Pool::with_capacity(16),
        }
    }

    fn env(&mut self) -> Env<'_> {
        Env {
            now: self.now,
            device: &mut self.device,
            app: &mut self.journal,
            rto: &mut self.rto,
            slow: &mut self.slow,
            tsm: &mut self.tsm,
            stats: &mut self.stats,
            isn: &self.isn,
        }
    }

    /// A pooled and initialized block.
    fn block(&mut self, params: OpenParams) -> TcpCb {
        let mut cb = TcpCb::new(L4Cb::new(&params, &Toeplitz::new()));
        cb.l4.id = Some(self.pool.alloc(()).unwrap().id());
        initialize(&mut cb, &mut self.env());
        cb
    }

    fn client(&mut self, options: TcpOptions) -> TcpCb {
        let mut params = OpenParams::connect(0, LOCAL, REMOTE);
        params.options.tcp = options;
        self.block(params)
    }

    fn dispatch(&mut self, cb: &mut TcpCb, event: Event<'_>) -> crate::Result<()> {
        dispatch(cb, event, &mut self.env())
    }

    fn receive(&mut self, cb: &mut TcpCb, segment: &Segment) {
        self.dispatch(cb, Event::Segment(segment)).unwrap();
    }

    /// Expire the retransmission timer of a block, as the core does.
    fn fire_rto(&mut self, cb: &mut TcpCb) {
        let slot = cb.rto_timer.expect("No retransmission timer armed");
        assert!(self.rto.cancel(cb.l4.id.unwrap(), slot));
        on_rto(cb, &mut self.env()).unwrap();
    }

    /// Expire the slow timer of a block, as the core does.
    fn fire_slow(&mut self, cb: &mut TcpCb) {
        let slot = cb.slow_timer.expect("No slow timer armed");
        assert!(self.slow.cancel(cb.l4.id.unwrap(), slot));
        on_slow(cb, &mut self.env()).unwrap();
    }

    fn sent(&mut self) -> Vec<Segment> {
        self.device.take_sent()
            .into_iter()
            .map(|(port, packet)| {
                assert_eq!(port, 0);
                match packet {
                    Packet::Tcp(segment) => segment,
                    other => panic!("Unexpected packet {:?}", other),
                }
            })
            .collect()
    }

    fn notes(&self, cb: &TcpCb) -> Vec<Note> {
        self.journal.of(cb.l4.id.unwrap()).cloned().collect()
    }
}

/// A segment from the peer.
fn peer(flags: Flags, seq: u32, ack: TcpSeqNumber, payload: &[u8]) -> Segment {
    let mut segment = Segment::control(REMOTE, LOCAL, flags, TcpSeqNumber(seq), ack);
    segment.window_len = 65535;
    segment.payload = payload.to_vec();
    segment
}

fn options() -> TcpOptions {
    TcpOptions {
        mss: 1000,
        ..TcpOptions::default()
    }
}

/// Open a client and complete the handshake.
fn established(harness: &mut Harness, options: TcpOptions) -> TcpCb {
    let mut cb = harness.client(options);
    harness.dispatch(&mut cb, Event::Open { active: true }).unwrap();
    let syn_ack = peer(Flags::SYN | Flags::ACK, PEER_ISS, cb.snd.iss + 1, &[]);
    harness.receive(&mut cb, &syn_ack);
    assert_eq!(cb.state, State::Established);
    harness.sent();
    cb
}

#[test]
fn active_open() {
    let mut harness = Harness::new();
    let mut cb = harness.client(options());
    assert_eq!(harness.tsm.state(State::Init), 1);

    harness.dispatch(&mut cb, Event::Open { active: true }).unwrap();
    assert_eq!(cb.state, State::SynSent);
    assert!(cb.rto_armed());

    let syn = harness.sent();
    assert_eq!(syn.len(), 1);
    assert_eq!(syn[0].flags, Flags::SYN);
    assert_eq!(syn[0].seq_number, cb.snd.iss);
    assert_eq!((syn[0].dst_addr, syn[0].dst_port), REMOTE);

    let syn_ack = peer(Flags::SYN | Flags::ACK, PEER_ISS, cb.snd.iss + 1, &[]);
    harness.receive(&mut cb, &syn_ack);
    assert_eq!(cb.state, State::Established);
    assert!(!cb.rto_armed());
    assert_eq!(cb.rcv.nxt, TcpSeqNumber(PEER_ISS + 1));
    assert_eq!(cb.snd.una, cb.snd.nxt);

    let ack = harness.sent();
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].flags, Flags::ACK);
    assert_eq!(ack[0].ack_number, TcpSeqNumber(PEER_ISS + 1));

    let id = cb.l4.id.unwrap();
    assert_eq!(harness.journal.tcp_states(id), [State::SynSent, State::Established]);
    assert_eq!(harness.tsm.state(State::Established), 1);
    assert_eq!(harness.tsm.state(State::Init), 0);
}

#[test]
fn passive_accept() {
    let mut harness = Harness::new();
    let mut listener = harness.block(OpenParams::listen(0, LOCAL));
    harness.dispatch(&mut listener, Event::Open { active: false }).unwrap();
    assert_eq!(listener.state, State::Listen);

    let syn = peer(Flags::SYN, PEER_ISS, TcpSeqNumber(0), &[]);
    let mut params = OpenParams::connect(0, LOCAL, REMOTE);
    params.options = listener.l4.options;
    let mut cb = harness.block(params);
    accept(&mut cb, &syn, &mut harness.env()).unwrap();
    assert_eq!(cb.state, State::SynReceived);
    assert!(cb.rto_armed());

    let syn_ack = harness.sent();
    assert_eq!(syn_ack.len(), 1);
    assert_eq!(syn_ack[0].flags, Flags::SYN | Flags::ACK);
    assert_eq!(syn_ack[0].seq_number, cb.snd.iss);
    assert_eq!(syn_ack[0].ack_number, TcpSeqNumber(PEER_ISS + 1));

    let ack = peer(Flags::ACK, PEER_ISS + 1, cb.snd.iss + 1, &[]);
    harness.receive(&mut cb, &ack);
    assert_eq!(cb.state, State::Established);
    assert!(!cb.rto_armed());
    assert_eq!(listener.state, State::Listen);
    assert_eq!(harness.tsm.state(State::Listen), 1);
    assert_eq!(harness.tsm.state(State::Established), 1);
}

#[test]
fn listen_resets_ack() {
    let mut harness = Harness::new();
    let mut listener = harness.block(OpenParams::listen(0, LOCAL));
    harness.dispatch(&mut listener, Event::Open { active: false }).unwrap();

    harness.receive(&mut listener, &peer(Flags::ACK, 5, TcpSeqNumber(1234), &[]));
    let rst = harness.sent();
    assert_eq!(rst.len(), 1);
    assert_eq!(rst[0].flags, Flags::RST);
    assert_eq!(rst[0].seq_number, TcpSeqNumber(1234));

    harness.receive(&mut listener, &peer(Flags::RST, 5, TcpSeqNumber(0), &[]));
    assert!(harness.sent().is_empty());
    assert_eq!(listener.state, State::Listen);
}

#[test]
fn user_calls_before_open() {
    let mut harness = Harness::new();
    let mut cb = harness.client(options());
    assert_eq!(harness.dispatch(&mut cb, Event::Receive), Err(Error::NotConnected));
    assert_eq!(send_data(&mut cb, b"x", true, &mut harness.env()), Err(Error::NotConnected));
    assert_eq!(harness.dispatch(&mut cb, Event::Status), Ok(()));

    harness.dispatch(&mut cb, Event::Close).unwrap();
    assert_eq!(cb.state, State::Closed);
    assert_eq!(harness.notes(&cb).last(), Some(&Note::TcpTerm));
    assert!(harness.sent().is_empty());
    assert_eq!(harness.dispatch(&mut cb, Event::Close), Err(Error::NotConnected));
}

#[test]
fn unacceptable_ack_in_syn_sent() {
    let mut harness = Harness::new();
    let mut cb = harness.client(options());
    harness.dispatch(&mut cb, Event::Open { active: true }).unwrap();
    harness.sent();

    let bogus = cb.snd.iss + 100;
    harness.receive(&mut cb, &peer(Flags::SYN | Flags::ACK, PEER_ISS, bogus, &[]));
    assert_eq!(cb.state, State::SynSent);
    let rst = harness.sent();
    assert_eq!(rst[0].flags, Flags::RST);
    assert_eq!(rst[0].seq_number, bogus);

    // Reset with an acceptable ack refuses the connection.
    let seg = peer(Flags::RST | Flags::ACK, 0, cb.snd.iss + 1, &[]);
    harness.receive(&mut cb, &seg);
    assert_eq!(cb.state, State::Closed);
    assert!(!cb.rto_armed());
}

#[test]
fn simultaneous_open() {
    let mut harness = Harness::new();
    let mut cb = harness.client(options());
    harness.dispatch(&mut cb, Event::Open { active: true }).unwrap();
    harness.sent();

    harness.receive(&mut cb, &peer(Flags::SYN, PEER_ISS, TcpSeqNumber(0), &[]));
    assert_eq!(cb.state, State::SynReceived);
    let syn_ack = harness.sent();
    assert_eq!(syn_ack[0].flags, Flags::SYN | Flags::ACK);
    assert_eq!(syn_ack[0].seq_number, cb.snd.iss);
}

#[test]
fn syn_retransmission_ceiling() {
    let mut harness = Harness::new();
    let mut cb = harness.client(TcpOptions { syn_retry_cnt: 2, ..options() });
    harness.dispatch(&mut cb, Event::Open { active: true }).unwrap();
    harness.sent();

    harness.fire_rto(&mut cb);
    harness.fire_rto(&mut cb);
    assert_eq!(cb.state, State::SynSent);
    let resent = harness.sent();
    assert_eq!(resent.len(), 2);
    assert!(resent.iter().all(|seg| seg.flags == Flags::SYN && seg.seq_number == cb.snd.iss));

    harness.fire_rto(&mut cb);
    assert_eq!(cb.state, State::Closed);
    assert!(harness.sent().is_empty());
    assert_eq!(harness.tsm.syn_to, 1);
    assert_eq!(harness.notes(&cb).last(), Some(&Note::TcpTerm));
    assert!(harness.rto.is_empty());
}

#[test]
fn rto_backoff() {
    let mut harness = Harness::new();
    let mut cb = harness.client(TcpOptions { rto: Duration::from_millis(100), ..options() });
    harness.dispatch(&mut cb, Event::Open { active: true }).unwrap();

    // Nothing fires before the initial timeout, the first retransmission doubles it.
    let mut fired = Vec::new();
    let start = harness.now;
    assert_eq!(harness.rto.advance(start + Duration::from_millis(99), 10, &mut fired), 0);
    assert_eq!(harness.rto.advance(start + Duration::from_millis(100), 10, &mut fired), 1);

    harness.now = start + Duration::from_millis(100);
    assert_eq!(fired, [cb.l4.id.unwrap()]);
    on_rto(&mut cb, &mut harness.env()).unwrap();
    let now = harness.now;
    assert_eq!(harness.rto.advance(now + Duration::from_millis(199), 10, &mut fired), 0);
    assert_eq!(harness.rto.advance(now + Duration::from_millis(200), 10, &mut fired), 1);
}

#[test]
fn send_and_acknowledge() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let iss = cb.snd.iss;

    let data = vec![0xab; 2500];
    assert_eq!(send_data(&mut cb, &data, true, &mut harness.env()), Ok(2500));
    let segments = harness.sent();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[0].payload.len(), 1000);
    assert_eq!(segments[2].payload.len(), 500);
    assert_eq!(segments[1].seq_number, iss + 1001);
    assert!(segments[2].flags.psh());
    assert_eq!(cb.snd.nxt, iss + 2501);
    assert!(cb.rto_armed());

    // Partial acknowledgement.
    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 1, iss + 1001, &[]));
    assert_eq!(cb.snd.una, iss + 1001);
    assert_eq!(cb.send_queue().len(), 1500);

    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 1, iss + 2501, &[]));
    assert!(cb.send_queue().is_empty());
    let delivered: Vec<_> = harness.notes(&cb)
        .into_iter()
        .filter_map(|note| match note {
            Note::TcpDelivered(bytes) => Some(bytes),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, [1000, 1500]);
    assert_eq!(harness.stats.sent_data_bytes, 2500);
}

#[test]
fn send_buffer_limits() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, TcpOptions { win_size: 1500, ..options() });

    // Only a part fits, the caller learns how much.
    let mut sent = 0;
    let data = [1u8; 2000];
    let result = harness.dispatch(&mut cb, Event::Send { data: &data, push: true, sent: &mut sent });
    assert_eq!(result, Err(Error::Again));
    assert_eq!(sent, 1500);

    assert_eq!(send_data(&mut cb, &data, true, &mut harness.env()), Err(Error::NoMem));
}

#[test]
fn window_full() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let iss = cb.snd.iss;
    cb.snd.wnd = 1000;

    send_data(&mut cb, &[0; 1500], true, &mut harness.env()).unwrap();
    assert_eq!(harness.sent().len(), 1);
    assert!(cb.snd_win_full());
    assert_eq!(cb.unsent(), 500);
    assert_eq!(harness.tsm.snd_win_full, 1);

    let mut ack = peer(Flags::ACK, PEER_ISS + 1, iss + 1001, &[]);
    ack.window_len = 1000;
    harness.receive(&mut cb, &ack);
    assert!(!cb.snd_win_full());
    assert_eq!(harness.tsm.snd_win_full, 0);

    let notes = harness.notes(&cb);
    assert!(notes.contains(&Note::TcpWinUnavailable));
    assert!(notes.contains(&Note::TcpWinAvailable));
}

#[test]
fn fin_follows_queued_data() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let iss = cb.snd.iss;
    cb.snd.wnd = 1000;

    send_data(&mut cb, &[3; 1500], true, &mut harness.env()).unwrap();
    assert_eq!(harness.sent().len(), 1);

    // The window holds back 500 bytes, the FIN has to wait behind them.
    harness.dispatch(&mut cb, Event::Close).unwrap();
    assert_eq!(cb.state, State::FinWait1);
    assert!(harness.sent().is_empty());
    assert!(!cb.fin_sent);
    assert_eq!(cb.snd.nxt, iss + 1001);

    let mut ack = peer(Flags::ACK, PEER_ISS + 1, iss + 1001, &[]);
    ack.window_len = 1000;
    harness.receive(&mut cb, &ack);
    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].seq_number, iss + 1001);
    assert_eq!(sent[0].payload.len(), 500);
    assert_eq!(sent[1].flags, Flags::FIN | Flags::ACK);
    assert_eq!(sent[1].seq_number, iss + 1501);
    assert_eq!(cb.snd.nxt, iss + 1502);

    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 1, iss + 1502, &[]));
    assert_eq!(cb.state, State::FinWait2);
    assert!(cb.send_queue().is_empty());
    assert_eq!(cb.snd.una, cb.snd.nxt);
    assert_eq!(harness.stats.sent_data_bytes, 1500);
}

#[test]
fn last_ack_fin_follows_queued_data() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let iss = cb.snd.iss;
    let una = cb.snd.una;
    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, PEER_ISS + 1, una, &[]));
    assert_eq!(cb.state, State::CloseWait);
    harness.sent();

    cb.snd.wnd = 0;
    send_data(&mut cb, b"late", true, &mut harness.env()).unwrap();
    harness.dispatch(&mut cb, Event::Close).unwrap();
    assert_eq!(cb.state, State::LastAck);
    assert!(harness.sent().is_empty());

    // A window update releases the data and then the FIN.
    let update = peer(Flags::ACK, PEER_ISS + 2, iss + 1, &[]);
    harness.receive(&mut cb, &update);
    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].payload, b"late");
    assert_eq!(sent[1].flags, Flags::FIN | Flags::ACK);
    assert_eq!(sent[1].seq_number, iss + 5);

    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 2, iss + 6, &[]));
    assert_eq!(cb.state, State::Closed);
}

#[test]
fn data_retransmission() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, TcpOptions { data_retry_cnt: 1, ..options() });
    let iss = cb.snd.iss;
    send_data(&mut cb, &[5; 1200], true, &mut harness.env()).unwrap();
    harness.sent();

    harness.fire_rto(&mut cb);
    let resent = harness.sent();
    assert_eq!(resent.len(), 2);
    assert_eq!(resent[0].seq_number, iss + 1);
    assert_eq!(harness.tsm.retrans_bytes, 1200);
    assert_eq!(cb.snd.nxt, iss + 1201);

    harness.fire_rto(&mut cb);
    assert_eq!(cb.state, State::Closed);
    assert_eq!(harness.tsm.retry_to, 1);
}

#[test]
fn out_of_order_delivery() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let una = cb.snd.una;
    let start = PEER_ISS + 1;

    harness.receive(&mut cb, &peer(Flags::ACK, start + 5, una, b"world"));
    assert_eq!(cb.rcv.nxt, TcpSeqNumber(start));
    assert_eq!(harness.tsm.missing_seq, 1);
    assert!(harness.sent().is_empty());

    harness.receive(&mut cb, &peer(Flags::ACK, start, una, b"hello"));
    assert_eq!(cb.rcv.nxt, TcpSeqNumber(start + 10));
    assert_eq!(harness.tsm.missing_seq, 0);
    assert_eq!(harness.journal.received(cb.l4.id.unwrap()), b"helloworld");

    let ack = harness.sent();
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].ack_number, TcpSeqNumber(start + 10));

    // A retransmission overlapping delivered data only adds the new part.
    harness.receive(&mut cb, &peer(Flags::ACK, start + 8, una, b"ld!"));
    assert_eq!(harness.journal.received(cb.l4.id.unwrap()), b"helloworld!");
}

#[test]
fn unacceptable_segment_is_acked() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, TcpOptions { win_size: 100, ..options() });
    let una = cb.snd.una;

    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 1 + 500, una, b"far"));
    let ack = harness.sent();
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].ack_number, TcpSeqNumber(PEER_ISS + 1));
    assert!(cb.reassembly().is_empty());

    harness.receive(&mut cb, &peer(Flags::RST, PEER_ISS + 1 + 500, una, &[]));
    assert!(harness.sent().is_empty());
    assert_eq!(cb.state, State::Established);
}

#[test]
fn reset_closes() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    harness.receive(&mut cb, &peer(Flags::RST, PEER_ISS + 1, TcpSeqNumber(0), &[]));
    assert_eq!(cb.state, State::Closed);
    assert!(harness.sent().is_empty());
}

#[test]
fn active_close() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let id = cb.l4.id.unwrap();

    harness.dispatch(&mut cb, Event::Close).unwrap();
    assert_eq!(cb.state, State::FinWait1);
    let fin = harness.sent();
    assert_eq!(fin[0].flags, Flags::FIN | Flags::ACK);
    assert_eq!(fin[0].seq_number, cb.snd.nxt - 1);
    assert!(cb.slow_armed());
    assert_eq!(harness.dispatch(&mut cb, Event::Close), Err(Error::NotConnected));

    let nxt = cb.snd.nxt;
    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 1, nxt, &[]));
    assert_eq!(cb.state, State::FinWait2);
    assert!(!cb.rto_armed());

    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, PEER_ISS + 1, nxt, &[]));
    assert_eq!(cb.state, State::TimeWait);
    assert_eq!(harness.sent().last().map(|seg| seg.ack_number), Some(TcpSeqNumber(PEER_ISS + 2)));
    assert!(cb.slow_armed());

    harness.fire_slow(&mut cb);
    assert_eq!(cb.state, State::Closed);
    assert_eq!(harness.journal.tcp_states(id), [
        State::SynSent,
        State::Established,
        State::FinWait1,
        State::FinWait2,
        State::TimeWait,
        State::Closed,
    ]);
    assert!(State::ALL.iter().all(|&state| harness.tsm.state(state) == 0));
    assert!(harness.slow.is_empty());
}

#[test]
fn simultaneous_close() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, TcpOptions { skip_timewait: true, ..options() });
    harness.dispatch(&mut cb, Event::Close).unwrap();
    harness.sent();

    // The peer's FIN crosses ours.
    let una = cb.snd.una;
    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, PEER_ISS + 1, una, &[]));
    assert_eq!(cb.state, State::Closing);

    let nxt = cb.snd.nxt;
    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 2, nxt, &[]));
    // Without time-wait the block closes right away.
    assert_eq!(cb.state, State::Closed);
}

#[test]
fn passive_close() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let una = cb.snd.una;

    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, PEER_ISS + 1, una, b"bye"));
    assert_eq!(cb.state, State::CloseWait);
    assert_eq!(cb.rcv.nxt, TcpSeqNumber(PEER_ISS + 5));
    harness.sent();

    // Sending is still allowed.
    assert_eq!(send_data(&mut cb, b"ok", true, &mut harness.env()), Ok(2));
    harness.dispatch(&mut cb, Event::Close).unwrap();
    assert_eq!(cb.state, State::LastAck);
    let sent = harness.sent();
    assert_eq!(sent.last().map(|seg| seg.flags), Some(Flags::FIN | Flags::ACK));

    let nxt = cb.snd.nxt;
    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS + 5, nxt, &[]));
    assert_eq!(cb.state, State::Closed);
}

#[test]
fn consume_all_data_closes() {
    let mut harness = Harness::new();
    let mut params = OpenParams::connect(0, LOCAL, REMOTE);
    params.options.tcp = options();
    params.flags = CbFlags::CONSUME_ALL_DATA;
    let mut cb = harness.block(params);
    harness.dispatch(&mut cb, Event::Open { active: true }).unwrap();
    let seg = peer(Flags::SYN | Flags::ACK, PEER_ISS, cb.snd.iss + 1, &[]);
    harness.receive(&mut cb, &seg);
    harness.sent();

    let una = cb.snd.una;
    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, PEER_ISS + 1, una, &[]));
    assert_eq!(cb.state, State::LastAck);
    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].flags, Flags::FIN | Flags::ACK);
}

#[test]
fn fin_ahead_of_data() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let una = cb.snd.una;
    let start = PEER_ISS + 1;

    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, start + 3, una, b"def"));
    assert_eq!(cb.state, State::Established);
    assert_eq!(cb.fin_rcvd, Some(TcpSeqNumber(start + 6)));

    harness.receive(&mut cb, &peer(Flags::ACK, start, una, b"abc"));
    assert_eq!(cb.state, State::CloseWait);
    assert_eq!(cb.rcv.nxt, TcpSeqNumber(start + 7));
    assert_eq!(harness.journal.received(cb.l4.id.unwrap()), b"abcdef");
}

#[test]
fn fin_wait_1_orphan_timeout() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    harness.dispatch(&mut cb, Event::Close).unwrap();

    harness.fire_slow(&mut cb);
    assert_eq!(cb.state, State::Closed);
    assert!(harness.rto.is_empty());
}

#[test]
fn fin_retransmission() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    harness.dispatch(&mut cb, Event::Close).unwrap();
    harness.sent();

    harness.fire_rto(&mut cb);
    let fin = harness.sent();
    assert_eq!(fin.len(), 1);
    assert_eq!(fin[0].flags, Flags::FIN | Flags::ACK);
    assert_eq!(fin[0].seq_number, cb.snd.nxt - 1);
}

#[test]
fn time_wait_reacks() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    harness.dispatch(&mut cb, Event::Close).unwrap();
    let nxt = cb.snd.nxt;
    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, PEER_ISS + 1, nxt, &[]));
    assert_eq!(cb.state, State::TimeWait);
    harness.sent();

    // The peer did not see our ACK and sends its FIN again.
    harness.receive(&mut cb, &peer(Flags::FIN | Flags::ACK, PEER_ISS + 1, nxt, &[]));
    assert_eq!(cb.state, State::TimeWait);
    let ack = harness.sent();
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].flags, Flags::ACK);
}

#[test]
fn abort_resets() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    let nxt = cb.snd.nxt;

    harness.dispatch(&mut cb, Event::Abort).unwrap();
    assert_eq!(cb.state, State::Closed);
    let rst = harness.sent();
    assert_eq!(rst.len(), 1);
    assert_eq!(rst[0].flags, Flags::RST);
    assert_eq!(rst[0].seq_number, nxt);
    assert_eq!(harness.stats.rst_sent, 1);
    assert_eq!(harness.dispatch(&mut cb, Event::Abort), Err(Error::NotConnected));
}

#[test]
fn user_timeout() {
    let mut harness = Harness::new();
    let mut cb = established(&mut harness, options());
    harness.dispatch(&mut cb, Event::UserTimeout).unwrap();
    assert_eq!(cb.state, State::Closed);
    assert!(harness.sent().is_empty());
}

#[test]
fn closed_answers_with_reset() {
    let mut harness = Harness::new();
    let params = OpenParams::connect(0, LOCAL, REMOTE);
    let mut cb = TcpCb::new(L4Cb::new(&params, &Toeplitz::new()));
    cb.l4.flags = CbFlags::EPHEMERAL;
    cb.state = State::Closed;

    harness.receive(&mut cb, &peer(Flags::SYN, PEER_ISS, TcpSeqNumber(0), &[]));
    let rst = harness.sent();
    assert_eq!(rst[0].flags, Flags::RST | Flags::ACK);
    assert_eq!(rst[0].seq_number, TcpSeqNumber(0));
    assert_eq!(rst[0].ack_number, TcpSeqNumber(PEER_ISS + 1));

    harness.receive(&mut cb, &peer(Flags::ACK, PEER_ISS, TcpSeqNumber(99), b"data"));
    let rst = harness.sent();
    assert_eq!(rst[0].flags, Flags::RST);
    assert_eq!(rst[0].seq_number, TcpSeqNumber(99));

    harness.receive(&mut cb, &peer(Flags::RST, PEER_ISS, TcpSeqNumber(0), &[]));
    assert!(harness.sent().is_empty());
}

#[test]
fn option_maxima() {
    assert_eq!(TcpOptions::default().validate(), Ok(()));
    let too_big = [
        TcpOptions { win_size: 65536, ..TcpOptions::default() },
        TcpOptions { retry_cnt: 129, ..TcpOptions::default() },
        TcpOptions { rto: Duration::from_millis(1001), ..TcpOptions::default() },
        TcpOptions { twait_to: Duration::from_secs(11), ..TcpOptions::default() },
        TcpOptions { orphan_to: Duration::from_secs(3), ..TcpOptions::default() },
    ];
    for options in &too_big {
        assert_eq!(options.validate(), Err(Error::Invalid), "{:?}", options);
    }
}
