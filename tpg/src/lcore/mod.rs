//! The context of one data plane core.
//!
//! A [`Core`] owns everything a core works on: the control block pools, the connection tables,
//! both timer wheels, the counters, the trace filter and its device and application. Nothing in
//! here is shared, other threads reach a core only through the message fabric (see the
//! [`commands`] for the built-in messages).
//!
//! ## Lifecycle of a block
//!
//! Opening allocates a block from the pool, files it in the table, which then holds its
//! `Handle`, and hands the first event to the state machine. After every event the core checks
//! whether the block reached its closed state. The state machine has already released it at that
//! point, so the core only takes the handle out of the table and frees it.
//!
//! Inbound traffic is matched against the table with the connection hash. Tcp and udp differ only
//! in what happens when nothing matches: a listener for the destination is cloned into a new
//! block, otherwise tcp answers with a reset from a temporary block outside of the pool and udp
//! just drops.
//!
//! [`Core`]: struct.Core.html
//! [`commands`]: commands/index.html
use core::mem;
use core::ops;
use std::net::Ipv4Addr;

use tracing::{debug, error, warn};

use crate::cb::{CbFlags, L4Cb, OpenParams};
use crate::config::Config;
use crate::hash::Toeplitz;
use crate::lookup::Table;
use crate::nic::{Device, Notify, Packet};
use crate::pool::{CbId, Pool, PoolStats};
use crate::tcp::{self, Event, IsnGenerator, State, TcpCb, TcpStats, TsmStats};
use crate::time::Instant;
use crate::timer::{Wheel, WheelStats};
use crate::trace::{TraceFilter, Tracer};
use crate::udp::{self, UdpCb, UdpStats};
use crate::wire::{Datagram, FourTuple, PortId, Segment};
use crate::{Error, Result};

pub mod commands;

/// One data plane core.
pub struct Core<D: Device, N: Notify> {
    id: usize,
    hasher: Toeplitz,
    tracer: Tracer,
    tcp: TcpLayer,
    udp: UdpLayer,
    io: Io<D, N>,
    /// The time of the last poll, used by commands.
    now: Instant,
    rx_burst: usize,
    max_run: usize,
    rx_buf: Vec<(PortId, Packet)>,
    fired: Vec<CbId>,
}

/// A snapshot of the counters of a core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoreStats {
    /// Tcp packet counters.
    pub tcp: TcpStats,
    /// Tcp state machine counters and gauges.
    pub tsm: TsmStats,
    /// Udp counters.
    pub udp: UdpStats,
    /// The tcp block pool.
    pub tcp_pool: PoolStats,
    /// The udp block pool.
    pub udp_pool: PoolStats,
    /// The retransmission timers.
    pub rto: WheelStats,
    /// The connection lifetime timers.
    pub slow: WheelStats,
}

/// The transport protocol of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Proto {
    /// Tcp.
    Tcp,
    /// Udp.
    Udp,
}

struct Io<D, N> {
    device: D,
    app: N,
}

struct TcpLayer {
    pool: Pool<TcpCb>,
    table: Table,
    rto: Wheel,
    slow: Wheel,
    tsm: TsmStats,
    stats: TcpStats,
    isn: IsnGenerator,
}

struct UdpLayer {
    pool: Pool<UdpCb>,
    table: Table,
    stats: UdpStats,
}

impl<D: Device, N: Notify> Core<D, N> {
    /// Create the core with index `id`.
    ///
    /// The configuration is assumed to be validated. All pools and tables are allocated here.
    pub fn new(id: usize, config: &Config, device: D, app: N) -> Result<Self> {
        let hasher = match &config.rss_key {
            Some(key) => Toeplitz::with_key(key)?,
            None => Toeplitz::new(),
        };

        let isn = match config.isn_key {
            Some((a, b)) => IsnGenerator::from_key(a, b),
            None => IsnGenerator::from_std_hash(),
        };

        let timers = &config.timers;
        debug!(core = id, tcp = config.tcp_cb_count, udp = config.udp_cb_count, "core init");

        Ok(Core {
            id,
            hasher,
            tracer: Tracer::default(),
            tcp: TcpLayer {
                pool: Pool::with_capacity(config.tcp_cb_count),
                table: Table::new(config.table_bits, config.ports),
                rto: Wheel::new(timers.rto_step, timers.rto_max),
                slow: Wheel::new(timers.slow_step, timers.slow_max),
                tsm: TsmStats::default(),
                stats: TcpStats::default(),
                isn,
            },
            udp: UdpLayer {
                pool: Pool::with_capacity(config.udp_cb_count),
                table: Table::new(config.table_bits, config.ports),
                stats: UdpStats::default(),
            },
            io: Io { device, app },
            now: Instant::default(),
            rx_burst: config.rx_burst,
            max_run: timers.max_run,
            rx_buf: Vec::with_capacity(config.rx_burst),
            fired: Vec::new(),
        })
    }

    /// The index of the core.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The time of the last poll.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// The hasher of the core.
    pub fn hasher(&self) -> &Toeplitz {
        &self.hasher
    }

    /// The device of the core.
    pub fn device(&self) -> &D {
        &self.io.device
    }

    /// The device, for modification.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.io.device
    }

    /// The application of the core.
    pub fn app(&self) -> &N {
        &self.io.app
    }

    /// The application, for modification.
    pub fn app_mut(&mut self) -> &mut N {
        &mut self.io.app
    }

    /// A tcp block.
    pub fn tcp_cb(&self, id: CbId) -> Option<&TcpCb> {
        self.tcp.pool.get(id)
    }

    /// A udp block.
    pub fn udp_cb(&self, id: CbId) -> Option<&UdpCb> {
        self.udp.pool.get(id)
    }

    /// The number of live blocks of a protocol.
    pub fn cb_count(&self, proto: Proto) -> usize {
        match proto {
            Proto::Tcp => self.tcp.pool.in_use(),
            Proto::Udp => self.udp.pool.in_use(),
        }
    }

    /// Find the block of a protocol filed for a connection, seen from the local side.
    pub fn lookup(&self, proto: Proto, port: PortId, tuple: &FourTuple) -> Option<CbId> {
        let hash = self.hasher.connection_hash(
            tuple.remote_addr,
            tuple.local_addr,
            tuple.remote_port,
            tuple.local_port);
        let table = match proto {
            Proto::Tcp => &self.tcp.table,
            Proto::Udp => &self.udp.table,
        };
        table.find(
            port,
            hash,
            tuple.local_addr,
            tuple.remote_addr,
            tuple.local_port,
            tuple.remote_port)
    }

    /// The blocks of a protocol filed for a port.
    pub fn cbs(&self, proto: Proto, port: PortId) -> Vec<CbId> {
        match proto {
            Proto::Tcp => self.tcp.table.snapshot(port),
            Proto::Udp => self.udp.table.snapshot(port),
        }
    }

    /// A snapshot of all counters.
    pub fn stats(&self) -> CoreStats {
        CoreStats {
            tcp: self.tcp.stats,
            tsm: self.tcp.tsm,
            udp: self.udp.stats,
            tcp_pool: self.tcp.pool.stats(),
            udp_pool: self.udp.pool.stats(),
            rto: self.tcp.rto.stats(),
            slow: self.tcp.slow.stats(),
        }
    }

    /// Mark new blocks matching `filter` for tracing.
    pub fn trace_enable(&mut self, filter: TraceFilter) {
        debug!(core = self.id, ?filter, "trace enabled");
        self.tracer.enable(filter);
    }

    /// Stop marking new blocks.
    pub fn trace_disable(&mut self) {
        debug!(core = self.id, "trace disabled");
        self.tracer.disable();
    }

    /// Build the base block for open parameters, marked if it matches the trace filter.
    fn l4(&self, params: &OpenParams) -> Result<L4Cb> {
        if (params.port as usize) >= self.tcp.table.port_count() {
            return Err(Error::Invalid);
        }

        let mut l4 = L4Cb::new(params, &self.hasher);
        l4.flags.set(CbFlags::EPHEMERAL, false);
        if self.tracer.matches(&l4.key) {
            l4.flags.set(CbFlags::TRACE, true);
        }
        Ok(l4)
    }

    /// Open a tcp connection.
    ///
    /// The block is active if the remote endpoint is specified and listens otherwise.
    pub fn tcp_open(&mut self, params: &OpenParams, now: Instant) -> Result<CbId> {
        self.now = now;
        params.options.tcp.validate()?;
        let l4 = self.l4(params)?;
        let active = l4.tuple().is_active();

        let id = self.tcp.insert(TcpCb::new(l4))?;
        self.with_tcp(id, now, |cb, env| {
            tcp::initialize(cb, env);
            tcp::dispatch(cb, Event::Open { active }, env)
        })?;
        Ok(id)
    }

    /// Open a listening tcp block on the local endpoint of `params`.
    pub fn tcp_listen(&mut self, params: &OpenParams, now: Instant) -> Result<CbId> {
        let mut params = params.clone();
        params.tuple = FourTuple::listen(params.tuple.local_addr, params.tuple.local_port);
        self.tcp_open(&params, now)
    }

    /// Queue data on a connection, returning the number of bytes taken.
    pub fn tcp_send(&mut self, id: CbId, data: &[u8], push: bool, now: Instant) -> Result<u32> {
        self.with_tcp(id, now, |cb, env| tcp::send_data(cb, data, push, env))
    }

    /// Close a connection gracefully.
    pub fn tcp_close(&mut self, id: CbId, now: Instant) -> Result<()> {
        self.with_tcp(id, now, |cb, env| tcp::dispatch(cb, Event::Close, env))
    }

    /// Reset a connection.
    pub fn tcp_abort(&mut self, id: CbId, now: Instant) -> Result<()> {
        self.with_tcp(id, now, |cb, env| tcp::dispatch(cb, Event::Abort, env))
    }

    /// Give up on a connection without telling the peer.
    pub fn tcp_user_timeout(&mut self, id: CbId, now: Instant) -> Result<()> {
        self.with_tcp(id, now, |cb, env| tcp::dispatch(cb, Event::UserTimeout, env))
    }

    /// Open a udp block, towards the remote endpoint of `params` or listening.
    pub fn udp_open(&mut self, params: &OpenParams) -> Result<CbId> {
        let l4 = self.l4(params)?;
        let id = self.udp.insert(UdpCb::new(l4))?;
        self.with_udp(id, |cb, env| cb.open(env))?;
        Ok(id)
    }

    /// Open a listening udp block on the local endpoint of `params`.
    pub fn udp_listen(&mut self, params: &OpenParams) -> Result<CbId> {
        let mut params = params.clone();
        params.tuple = FourTuple::listen(params.tuple.local_addr, params.tuple.local_port);
        self.udp_open(&params)
    }

    /// Send one datagram.
    pub fn udp_send(&mut self, id: CbId, data: &[u8]) -> Result<()> {
        self.with_udp(id, |cb, env| cb.send(data, env))
    }

    /// Close a udp block and free it.
    pub fn udp_close(&mut self, id: CbId) -> Result<()> {
        self.with_udp(id, |cb, env| cb.close(env))
    }

    /// Close a block of either protocol.
    pub fn close(&mut self, proto: Proto, id: CbId, now: Instant) -> Result<()> {
        match proto {
            Proto::Tcp => self.tcp_close(id, now),
            Proto::Udp => self.udp_close(id),
        }
    }

    /// Process an inbound tcp segment.
    ///
    /// Errors are those of opening a block for a SYN to a listener, the segment itself is
    /// always consumed.
    pub fn rx_tcp(&mut self, port: PortId, segment: &Segment, now: Instant) -> Result<()> {
        self.now = now;
        self.tcp.stats.received_pkts += 1;
        self.tcp.stats.received_bytes += u64::from(segment.payload_len());

        let hash = segment.rss_hash.unwrap_or_else(|| self.hasher.header_hash(
            segment.src_addr,
            segment.dst_addr,
            segment.src_port,
            segment.dst_port));

        let found = self.tcp.table.find(
            port,
            hash,
            segment.dst_addr,
            segment.src_addr,
            segment.dst_port,
            segment.src_port);
        if let Some(id) = found {
            return self.with_tcp(id, now, |cb, env| tcp::dispatch(cb, Event::Segment(segment), env));
        }

        if let Some(listener) = self.listener(Proto::Tcp, port, segment.dst_addr, segment.dst_port) {
            let flags = segment.flags;
            let syn = flags.syn() && !flags.ack() && !flags.rst();
            let listening = self.tcp.pool.get(listener).map_or(false, |cb| cb.state == State::Listen);
            if syn && listening {
                return self.tcp_accept(listener, hash, segment, now);
            }

            return self.with_tcp(listener, now, |cb, env| {
                tcp::dispatch(cb, Event::Segment(segment), env)
            });
        }

        self.tcp_no_cb(port, segment, now);
        Ok(())
    }

    /// Process an inbound udp datagram.
    pub fn rx_udp(&mut self, port: PortId, datagram: &Datagram, now: Instant) -> Result<()> {
        self.now = now;
        let hash = datagram.rss_hash.unwrap_or_else(|| self.hasher.header_hash(
            datagram.src_addr,
            datagram.dst_addr,
            datagram.src_port,
            datagram.dst_port));

        let found = self.udp.table.find(
            port,
            hash,
            datagram.dst_addr,
            datagram.src_addr,
            datagram.dst_port,
            datagram.src_port);
        if let Some(id) = found {
            return self.with_udp(id, |cb, env| {
                cb.receive(datagram, env);
                Ok(())
            });
        }

        let listener = match self.listener(Proto::Udp, port, datagram.dst_addr, datagram.dst_port) {
            Some(listener) => listener,
            None => {
                self.udp.stats.no_cb += 1;
                return Ok(());
            },
        };

        let l4 = match self.udp.pool.get(listener) {
            Some(cb) if cb.state == udp::State::Listen => {
                self.clone_l4(&cb.l4, (datagram.src_addr, datagram.src_port), hash)
            },
            _ => return Ok(()),
        };

        let id = self.udp.insert(UdpCb::new(l4))?;
        self.with_udp(id, |cb, env| {
            cb.accept(env)?;
            cb.receive(datagram, env);
            Ok(())
        })
    }

    /// Receive and process one burst of packets from the device.
    ///
    /// Returns the number of packets processed.
    pub fn poll_device(&mut self, now: Instant) -> usize {
        self.now = now;
        let mut packets = mem::replace(&mut self.rx_buf, Vec::new());
        packets.clear();

        let count = match self.io.device.rx(self.rx_burst, &mut packets) {
            Ok(count) => count,
            Err(err) => {
                warn!(core = self.id, %err, "device receive failed");
                0
            },
        };

        for (port, packet) in packets.drain(..) {
            let result = match &packet {
                Packet::Tcp(segment) => self.rx_tcp(port, segment, now),
                Packet::Udp(datagram) => self.rx_udp(port, datagram, now),
            };

            if let Err(err) = result {
                debug!(core = self.id, port, %err, "packet dropped");
            }
        }

        self.rx_buf = packets;
        count
    }

    /// Fire all expired timers, returning how many fired.
    pub fn run_timers(&mut self, now: Instant) -> usize {
        self.now = now;
        let mut fired = mem::replace(&mut self.fired, Vec::new());
        let mut count = 0;

        fired.clear();
        count += self.tcp.rto.advance(now, self.max_run, &mut fired);
        for id in fired.drain(..) {
            self.tcp_timer(id, now, tcp::on_rto);
        }

        count += self.tcp.slow.advance(now, self.max_run, &mut fired);
        for id in fired.drain(..) {
            self.tcp_timer(id, now, tcp::on_slow);
        }

        self.fired = fired;
        count
    }

    fn tcp_timer(
        &mut self,
        id: CbId,
        now: Instant,
        event: fn(&mut TcpCb, &mut tcp::Env<'_>) -> Result<()>,
    ) {
        match self.with_tcp(id, now, event) {
            Ok(()) => {},
            // Freed with its timer still in the wheel, harmless.
            Err(Error::NotFound) => {},
            Err(err) => debug!(core = self.id, %id, %err, "timer event failed"),
        }
    }

    fn listener(&self, proto: Proto, port: PortId, addr: Ipv4Addr, local_port: u16) -> Option<CbId> {
        let hash = self.hasher.connection_hash(Ipv4Addr::UNSPECIFIED, addr, 0, local_port);
        let table = match proto {
            Proto::Tcp => &self.tcp.table,
            Proto::Udp => &self.udp.table,
        };
        table.find(port, hash, addr, Ipv4Addr::UNSPECIFIED, local_port, 0)
    }

    /// The base block of a connection accepted by a listener.
    fn clone_l4(&self, listener: &L4Cb, remote: (Ipv4Addr, u16), hash: u32) -> L4Cb {
        let mut l4 = listener.accept(remote, hash);
        if self.tracer.matches(&l4.key) {
            l4.flags.set(CbFlags::TRACE, true);
        }
        l4
    }

    fn tcp_accept(&mut self, listener: CbId, hash: u32, segment: &Segment, now: Instant)
        -> Result<()>
    {
        let l4 = match self.tcp.pool.get(listener) {
            Some(cb) => self.clone_l4(&cb.l4, (segment.src_addr, segment.src_port), hash),
            None => return Err(Error::NotFound),
        };

        let id = self.tcp.insert(TcpCb::new(l4))?;
        self.with_tcp(id, now, |cb, env| {
            tcp::initialize(cb, env);
            tcp::accept(cb, segment, env)
        })
    }

    /// Answer a segment for which no block exists.
    fn tcp_no_cb(&mut self, port: PortId, segment: &Segment, now: Instant) {
        self.tcp.stats.no_cb += 1;

        let mut params = OpenParams::connect(
            port,
            (segment.dst_addr, segment.dst_port),
            (segment.src_addr, segment.src_port));
        params.flags = CbFlags::EPHEMERAL;

        let mut cb = TcpCb::new(L4Cb::new(&params, &self.hasher));
        cb.state = State::Closed;

        let io = &mut self.io;
        let result = self.tcp.env(&mut io.device, &mut io.app, now, |env| {
            tcp::dispatch(&mut cb, Event::Segment(segment), env)
        });

        if let Err(err) = result {
            debug!(core = self.id, %err, "reset not sent");
        }
    }

    /// Run one operation on a tcp block, then free it if it closed.
    fn with_tcp<F, R>(&mut self, id: CbId, now: Instant, f: F) -> Result<R>
        where F: FnOnce(&mut TcpCb, &mut tcp::Env<'_>) -> Result<R>,
    {
        let io = &mut self.io;
        let result = self.tcp.with_cb(id, &mut io.device, &mut io.app, now, f);
        self.tcp.reap(id);
        result
    }

    /// Run one operation on a udp block, then free it if it closed.
    fn with_udp<F, R>(&mut self, id: CbId, f: F) -> Result<R>
        where F: FnOnce(&mut UdpCb, &mut udp::Env<'_>) -> Result<R>,
    {
        let io = &mut self.io;
        let result = self.udp.with_cb(id, &mut io.device, &mut io.app, f);
        self.udp.reap(id);
        result
    }
}

impl TcpLayer {
    /// Allocate and file a block, returning its id.
    fn insert(&mut self, cb: TcpCb) -> Result<CbId> {
        let (port, hash, tuple) = (cb.l4.key.port, cb.l4.hash, cb.l4.key.tuple);
        let handle = match self.pool.alloc(cb) {
            Some(handle) => handle,
            None => {
                self.stats.cb_alloc_err += 1;
                return Err(Error::NoMem);
            },
        };

        let id = handle.id();
        if let Some(cb) = self.pool.get_mut(id) {
            cb.l4.id = Some(id);
        }

        if let Err((err, handle)) = self.table.insert(port, hash, tuple, handle) {
            drop(self.pool.free(handle));
            return Err(err);
        }

        self.stats.cb_alloc += 1;
        Ok(id)
    }

    fn env<F, R>(&mut self, device: &mut dyn Device, app: &mut dyn Notify, now: Instant, f: F)
        -> R
        where F: FnOnce(&mut tcp::Env<'_>) -> R,
    {
        let mut env = tcp::Env {
            now,
            device,
            app,
            rto: &mut self.rto,
            slow: &mut self.slow,
            tsm: &mut self.tsm,
            stats: &mut self.stats,
            isn: &self.isn,
        };
        f(&mut env)
    }

    fn with_cb<F, R>(
        &mut self,
        id: CbId,
        device: &mut dyn Device,
        app: &mut dyn Notify,
        now: Instant,
        f: F,
    ) -> Result<R>
        where F: FnOnce(&mut TcpCb, &mut tcp::Env<'_>) -> Result<R>,
    {
        let TcpLayer { pool, rto, slow, tsm, stats, isn, .. } = self;
        let cb = pool.get_mut(id).ok_or(Error::NotFound)?;
        let mut env = tcp::Env { now, device, app, rto, slow, tsm, stats, isn: &*isn };
        f(cb, &mut env)
    }

    /// Free a block that reached `CLOSED`.
    fn reap(&mut self, id: CbId) {
        let (port, hash) = match self.pool.get(id) {
            Some(cb) if cb.state == State::Closed => (cb.l4.key.port, cb.l4.hash),
            _ => return,
        };

        match self.table.delete(port, hash, id) {
            Ok(handle) => {
                drop(self.pool.free(handle));
                self.stats.cb_free += 1;
            },
            Err(err) => error!(%id, %err, "closed tcp block is not filed"),
        }
    }
}

impl UdpLayer {
    fn insert(&mut self, cb: UdpCb) -> Result<CbId> {
        let (port, hash, tuple) = (cb.l4.key.port, cb.l4.hash, cb.l4.key.tuple);
        let handle = match self.pool.alloc(cb) {
            Some(handle) => handle,
            None => {
                self.stats.cb_alloc_err += 1;
                return Err(Error::NoMem);
            },
        };

        let id = handle.id();
        if let Some(cb) = self.pool.get_mut(id) {
            cb.l4.id = Some(id);
        }

        if let Err((err, handle)) = self.table.insert(port, hash, tuple, handle) {
            drop(self.pool.free(handle));
            return Err(err);
        }

        self.stats.cb_alloc += 1;
        Ok(id)
    }

    fn with_cb<F, R>(&mut self, id: CbId, device: &mut dyn Device, app: &mut dyn Notify, f: F)
        -> Result<R>
        where F: FnOnce(&mut UdpCb, &mut udp::Env<'_>) -> Result<R>,
    {
        let UdpLayer { pool, stats, .. } = self;
        let cb = pool.get_mut(id).ok_or(Error::NotFound)?;
        let mut env = udp::Env { device, app, stats };
        f(cb, &mut env)
    }

    fn reap(&mut self, id: CbId) {
        let (port, hash) = match self.pool.get(id) {
            Some(cb) if cb.state == udp::State::Closed => (cb.l4.key.port, cb.l4.hash),
            _ => return,
        };

        match self.table.delete(port, hash, id) {
            Ok(handle) => {
                drop(self.pool.free(handle));
                self.stats.cb_free += 1;
            },
            Err(err) => error!(%id, %err, "closed udp block is not filed"),
        }
    }
}

impl ops::AddAssign<&'_ CoreStats> for CoreStats {
    fn add_assign(&mut self, other: &CoreStats) {
        fn pool(sum: &mut PoolStats, other: &PoolStats) {
            sum.alloc += other.alloc;
            sum.alloc_fail += other.alloc_fail;
            sum.free += other.free;
        }

        fn wheel(sum: &mut WheelStats, other: &WheelStats) {
            sum.fired += other.fired;
            sum.timeout_overflow += other.timeout_overflow;
        }

        self.tcp += &other.tcp;
        self.tsm += &other.tsm;
        self.udp += &other.udp;
        pool(&mut self.tcp_pool, &other.tcp_pool);
        pool(&mut self.udp_pool, &other.udp_pool);
        wheel(&mut self.rto, &other.rto);
        wheel(&mut self.slow, &other.slow);
    }
}

impl<D: Device, N: Notify> core::fmt::Debug for Core<D, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Core")
            .field("id", &self.id)
            .field("tcp_cbs", &self.tcp.pool.in_use())
            .field("udp_cbs", &self.udp.pool.in_use())
            .field("now", &self.now)
            .finish()
    }
}
