//! Messages that run on a core on behalf of the control plane.
//!
//! A control block may only be touched by its core, so opening and closing connections, reading
//! the counters and changing the trace filter are messages for that core. The payloads carry the arguments and,
//! after processing, the reply. The functions in this module wrap a synchronous request each.
use core::ops::Range;

use crate::cb::OpenParams;
use crate::msg::{Fabric, Message, MsgId, SendFlags, Status};
use crate::nic::{Device, Notify};
use crate::pool::CbId;
use crate::trace::TraceFilter;
use crate::{Error, Result};

use super::{Core, CoreStats, Proto};

/// Open a connection, `Module::Core` type 1.
pub const OPEN: MsgId = MsgId(0x0001);
/// Open a listener, `Module::Core` type 2.
pub const LISTEN: MsgId = MsgId(0x0002);
/// Close a block, `Module::Core` type 3.
pub const CLOSE: MsgId = MsgId(0x0003);
/// Read the counters of a core, `Module::Core` type 4.
pub const STATS: MsgId = MsgId(0x0004);
/// Replace the trace filter, `Module::Trace` type 1.
pub const TRACE_ENABLE: MsgId = MsgId(0x0301);
/// Remove the trace filter, `Module::Trace` type 2.
pub const TRACE_DISABLE: MsgId = MsgId(0x0302);

/// Payload of `OPEN` and `LISTEN`.
#[derive(Clone, Debug)]
pub struct OpenCmd {
    /// The protocol of the new block.
    pub proto: Proto,
    /// Where to open it.
    pub params: OpenParams,
    /// The id of the opened block, filled in by the core.
    pub id: Option<CbId>,
}

/// Payload of `CLOSE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseCmd {
    /// The protocol of the block.
    pub proto: Proto,
    /// The block to close.
    pub id: CbId,
}

/// Register the handlers of all core commands.
pub fn register<D, N>(fabric: &Fabric<Core<D, N>>) -> Result<()>
    where D: Device + 'static, N: Notify + 'static,
{
    fabric.register(OPEN, |msg, core: &mut Core<D, N>| {
        let now = core.now();
        let cmd = msg.payload_mut::<OpenCmd>().ok_or(Error::Invalid)?;
        let id = match cmd.proto {
            Proto::Tcp => core.tcp_open(&cmd.params, now)?,
            Proto::Udp => core.udp_open(&cmd.params)?,
        };
        cmd.id = Some(id);
        Ok(Status::Done)
    })?;

    fabric.register(LISTEN, |msg, core: &mut Core<D, N>| {
        let now = core.now();
        let cmd = msg.payload_mut::<OpenCmd>().ok_or(Error::Invalid)?;
        let id = match cmd.proto {
            Proto::Tcp => core.tcp_listen(&cmd.params, now)?,
            Proto::Udp => core.udp_listen(&cmd.params)?,
        };
        cmd.id = Some(id);
        Ok(Status::Done)
    })?;

    fabric.register(CLOSE, |msg, core: &mut Core<D, N>| {
        let cmd = *msg.payload::<CloseCmd>().ok_or(Error::Invalid)?;
        let now = core.now();
        core.close(cmd.proto, cmd.id, now)?;
        Ok(Status::Done)
    })?;

    fabric.register(STATS, |msg, core: &mut Core<D, N>| {
        let stats = core.stats();
        let reply = msg.payload_mut::<Option<CoreStats>>().ok_or(Error::Invalid)?;
        *reply = Some(stats);
        Ok(Status::Done)
    })?;

    fabric.register(TRACE_ENABLE, |msg, core: &mut Core<D, N>| {
        let filter = msg.payload::<TraceFilter>().ok_or(Error::Invalid)?;
        core.trace_enable(filter.clone());
        Ok(Status::Done)
    })?;

    fabric.register(TRACE_DISABLE, |_, core: &mut Core<D, N>| {
        core.trace_disable();
        Ok(Status::Done)
    })
}

fn open_with<C>(fabric: &Fabric<C>, id: MsgId, core: usize, proto: Proto, params: OpenParams)
    -> Result<CbId>
{
    let cmd = OpenCmd { proto, params, id: None };
    let reply = fabric.request(None, Message::new(id, core, cmd), SendFlags::NONE, None)?;
    reply.payload::<OpenCmd>()
        .and_then(|cmd| cmd.id)
        .ok_or(Error::Invalid)
}

/// Open a block on a core and wait for its id.
pub fn open<C>(fabric: &Fabric<C>, core: usize, proto: Proto, params: OpenParams) -> Result<CbId> {
    open_with(fabric, OPEN, core, proto, params)
}

/// Open a listener on a core and wait for its id.
pub fn listen<C>(fabric: &Fabric<C>, core: usize, proto: Proto, params: OpenParams)
    -> Result<CbId>
{
    open_with(fabric, LISTEN, core, proto, params)
}

/// Close a block on a core and wait until it is closed.
pub fn close<C>(fabric: &Fabric<C>, core: usize, proto: Proto, id: CbId) -> Result<()> {
    let msg = Message::new(CLOSE, core, CloseCmd { proto, id });
    fabric.send(None, msg, SendFlags::NONE)
}

/// Read the counters of a running core.
pub fn stats<C>(fabric: &Fabric<C>, core: usize) -> Result<CoreStats> {
    let msg = Message::new(STATS, core, None::<CoreStats>);
    let reply = fabric.request(None, msg, SendFlags::NONE, None)?;
    reply.payload::<Option<CoreStats>>()
        .and_then(|stats| *stats)
        .ok_or(Error::Invalid)
}

/// Enable tracing on one core, or on all cores if `core` is `None`.
pub fn trace_enable<C>(fabric: &Fabric<C>, core: Option<usize>, filter: &TraceFilter) -> Result<()> {
    for dest in targets(fabric, core)? {
        fabric.send(None, Message::new(TRACE_ENABLE, dest, filter.clone()), SendFlags::NONE)?;
    }
    Ok(())
}

/// Disable tracing on one core, or on all cores if `core` is `None`.
pub fn trace_disable<C>(fabric: &Fabric<C>, core: Option<usize>) -> Result<()> {
    for dest in targets(fabric, core)? {
        fabric.send(None, Message::new(TRACE_DISABLE, dest, ()), SendFlags::NONE)?;
    }
    Ok(())
}

fn targets<C>(fabric: &Fabric<C>, core: Option<usize>) -> Result<Range<usize>> {
    match core {
        Some(core) if core < fabric.cores() => Ok(core..core + 1),
        Some(_) => Err(Error::Invalid),
        None => Ok(0..fabric.cores()),
    }
}
