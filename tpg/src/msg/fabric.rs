use core::{fmt, ops};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant as WallClock;

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{Message, MsgFlags, MsgId, MODULE_COUNT, TYPES_PER_MODULE};
use crate::config::MsgConfig;
use crate::time::Duration;
use crate::{Error, Result};

/// What happens to a message after its handler returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The message is done.
    Done,
    /// Queue the message again on the local queue of the core and process it later.
    Repost,
}

/// A message handler.
///
/// Runs on the destination core with that core's context `C`.
pub type Handler<C> = Arc<dyn Fn(&mut Message, &mut C) -> Result<Status> + Send + Sync>;

/// Flags of a send.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SendFlags(u8);

impl SendFlags {
    /// Wait for the message to be processed, waiting for room in a full queue.
    pub const NONE: SendFlags = SendFlags(0);
    /// Do not wait for processing, the message is dropped by the destination.
    pub const NOWAIT: SendFlags = SendFlags(0x01);
    /// Fail with `Again` instead of waiting for room in a full queue.
    pub const NOBLOCK: SendFlags = SendFlags(0x02);

    /// Check if all flags of `other` are set.
    pub fn contains(self, other: SendFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for SendFlags {
    type Output = SendFlags;

    fn bitor(self, rhs: SendFlags) -> SendFlags {
        SendFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for SendFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SendFlags")
            .field("nowait", &self.contains(SendFlags::NOWAIT))
            .field("noblock", &self.contains(SendFlags::NOBLOCK))
            .finish()
    }
}

/// Withdraws a synchronous message from another thread.
///
/// Cancelling only has an effect while the message waits in its queue. Once the destination
/// started processing it, the sender waits for the result.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Message counters of one core, updated concurrently.
#[derive(Debug, Default)]
pub struct MsgStats {
    rcvd: AtomicU64,
    snd: AtomicU64,
    poll: AtomicU64,
    err: AtomicU64,
    proc_err: AtomicU64,
    alloc: AtomicU64,
    alloc_err: AtomicU64,
    free: AtomicU64,
}

/// A snapshot of `MsgStats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsgCounters {
    /// Messages dequeued.
    pub rcvd: u64,
    /// Messages sent to the core.
    pub snd: u64,
    /// Queue polls.
    pub poll: u64,
    /// Sends that failed.
    pub err: u64,
    /// Messages whose processing failed.
    pub proc_err: u64,
    /// Messages that entered a queue.
    pub alloc: u64,
    /// Messages that found their queue full.
    pub alloc_err: u64,
    /// Messages retired after processing or withdrawal.
    pub free: u64,
}

impl MsgStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn counters(&self) -> MsgCounters {
        MsgCounters {
            rcvd: self.rcvd.load(Ordering::Relaxed),
            snd: self.snd.load(Ordering::Relaxed),
            poll: self.poll.load(Ordering::Relaxed),
            err: self.err.load(Ordering::Relaxed),
            proc_err: self.proc_err.load(Ordering::Relaxed),
            alloc: self.alloc.load(Ordering::Relaxed),
            alloc_err: self.alloc_err.load(Ordering::Relaxed),
            free: self.free.load(Ordering::Relaxed),
        }
    }
}

// The lifecycle of a synchronous message.
const QUEUED: u8 = 1;
const PROCESSING: u8 = 2;
const DEQUEUED: u8 = 3;
const WITHDRAWN: u8 = 4;

/// Where a synchronous sender waits.
struct Completion {
    state: AtomicU8,
    outcome: Mutex<Option<(Result<()>, Message)>>,
}

struct Envelope {
    message: Message,
    completion: Option<Arc<Completion>>,
    reposts: u32,
}

struct Queues {
    remote: ArrayQueue<Envelope>,
    local: ArrayQueue<Envelope>,
    stats: MsgStats,
}

/// The message queues of all cores and the handler registry.
///
/// Shared by all threads. `C` is the context a core hands to the handlers of its messages.
pub struct Fabric<C> {
    queues: Vec<CachePadded<Queues>>,
    handlers: RwLock<Vec<Option<Handler<C>>>>,
    sync_timeout: Duration,
    max_reposts: u32,
}

impl<C> Fabric<C> {
    /// Create the queues for `cores` cores.
    ///
    /// The queue depth must be a power of two.
    pub fn new(cores: usize, config: &MsgConfig) -> Result<Self> {
        let depth = config.queue_depth;
        if cores == 0 || !depth.is_power_of_two() {
            return Err(Error::Invalid);
        }

        let queues = (0..cores)
            .map(|_| CachePadded::new(Queues {
                remote: ArrayQueue::new(depth),
                local: ArrayQueue::new(depth),
                stats: MsgStats::default(),
            }))
            .collect();

        Ok(Fabric {
            queues,
            handlers: RwLock::new((0..MODULE_COUNT * TYPES_PER_MODULE).map(|_| None).collect()),
            sync_timeout: config.sync_timeout,
            max_reposts: config.max_reposts,
        })
    }

    /// The number of cores.
    pub fn cores(&self) -> usize {
        self.queues.len()
    }

    /// Register the handler of a message id.
    ///
    /// Fails with `Invalid` for an id of an unknown module and with `Exists` if the id already
    /// has a handler.
    pub fn register<F>(&self, id: MsgId, handler: F) -> Result<()>
        where F: Fn(&mut Message, &mut C) -> Result<Status> + Send + Sync + 'static,
    {
        let idx = id.index().ok_or(Error::Invalid)?;
        let mut handlers = self.handlers.write();
        let slot = handlers.get_mut(idx).ok_or(Error::Invalid)?;
        if slot.is_some() {
            return Err(Error::Exists);
        }

        debug!(msg = %id, "message handler registered");
        *slot = Some(Arc::new(handler));
        Ok(())
    }

    /// Send a message to its destination core.
    ///
    /// `origin` is the index of the sending core, `None` for threads that are not cores. A core
    /// sending to itself uses the local queue, everything else goes to the remote queue.
    ///
    /// Without `NOWAIT` this waits until the destination processed the message and returns the
    /// result of its handler.
    pub fn send(&self, origin: Option<usize>, message: Message, flags: SendFlags) -> Result<()> {
        if flags.contains(SendFlags::NOWAIT) {
            self.enqueue(origin, message, flags, None)
        } else {
            self.request(origin, message, flags, None).map(drop)
        }
    }

    /// Send a message from its destination core to itself.
    pub fn send_local(&self, message: Message, flags: SendFlags) -> Result<()> {
        let origin = Some(message.dest());
        self.send(origin, message, flags)
    }

    /// Send a message from a thread that is not a core.
    pub fn send_remote(&self, message: Message, flags: SendFlags) -> Result<()> {
        self.send(None, message, flags)
    }

    /// Send a message and wait for it to be processed, returning it.
    ///
    /// The handler may leave a reply in the payload. Waiting is bounded by the configured sync
    /// timeout and by `cancel`. A message that is withdrawn before processing started is dropped
    /// unprocessed and the call fails with `Timeout` or `Cancelled`.
    ///
    /// A core can not wait for itself, `NOWAIT` and sending to the own core are `Invalid`.
    pub fn request(
        &self,
        origin: Option<usize>,
        message: Message,
        flags: SendFlags,
        cancel: Option<&CancelToken>,
    ) -> Result<Message> {
        if flags.contains(SendFlags::NOWAIT) || origin == Some(message.dest()) {
            return Err(Error::Invalid);
        }

        let dest = message.dest();
        let completion = Arc::new(Completion {
            state: AtomicU8::new(QUEUED),
            outcome: Mutex::new(None),
        });
        self.enqueue(origin, message, flags, Some(completion.clone()))?;
        self.wait(dest, &completion, cancel)
    }

    fn enqueue(
        &self,
        origin: Option<usize>,
        mut message: Message,
        flags: SendFlags,
        completion: Option<Arc<Completion>>,
    ) -> Result<()> {
        let dest = message.dest();
        let queues = self.queues.get(dest).ok_or(Error::Invalid)?;
        let local = origin == Some(dest);
        message.flags_mut().set(MsgFlags::LOCAL, local);
        message.flags_mut().set(MsgFlags::TO_FREE, completion.is_none());
        MsgStats::inc(&queues.stats.snd);

        let queue = if local { &queues.local } else { &queues.remote };
        let mut envelope = Envelope { message, completion, reposts: 0 };
        let deadline = WallClock::now() + self.sync_timeout;
        let backoff = Backoff::new();

        loop {
            envelope = match queue.push(envelope) {
                Ok(()) => {
                    MsgStats::inc(&queues.stats.alloc);
                    return Ok(());
                },
                Err(envelope) => envelope,
            };

            if flags.contains(SendFlags::NOBLOCK) {
                MsgStats::inc(&queues.stats.alloc_err);
                MsgStats::inc(&queues.stats.err);
                return Err(Error::Again);
            }

            if WallClock::now() >= deadline {
                MsgStats::inc(&queues.stats.err);
                debug!(msg = %envelope.message.id(), dest, "message queue stays full");
                return Err(Error::Timeout);
            }

            backoff.snooze();
        }
    }

    fn wait(&self, dest: usize, completion: &Completion, cancel: Option<&CancelToken>)
        -> Result<Message>
    {
        let deadline = WallClock::now() + self.sync_timeout;
        let backoff = Backoff::new();
        let mut withdrawable = true;

        loop {
            if completion.state.load(Ordering::Acquire) == DEQUEUED {
                let (result, message) = completion.outcome.lock().take().ok_or(Error::Invalid)?;
                return result.map(|()| message);
            }

            if withdrawable {
                let reason = if cancel.map_or(false, CancelToken::is_cancelled) {
                    Some(Error::Cancelled)
                } else if WallClock::now() >= deadline {
                    Some(Error::Timeout)
                } else {
                    None
                };

                if let Some(reason) = reason {
                    let withdrawn = completion.state
                        .compare_exchange(QUEUED, WITHDRAWN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                    if withdrawn {
                        MsgStats::inc(&self.queues[dest].stats.err);
                        debug!(dest, %reason, "message withdrawn");
                        return Err(reason);
                    }
                    // Processing started, the result is on its way.
                    withdrawable = false;
                }
            }

            backoff.snooze();
        }
    }

    /// Process at most one message of the remote queue and then one of the local queue of a core.
    ///
    /// Must only be called from the core itself. Returns the number of messages dequeued. Failed
    /// handlers are reported to waiting senders and counted.
    pub fn poll(&self, core: usize, ctx: &mut C) -> usize {
        let queues = match self.queues.get(core) {
            Some(queues) => queues,
            None => return 0,
        };

        let remote = self.poll_queue(queues, &queues.remote, ctx);
        let local = self.poll_queue(queues, &queues.local, ctx);
        remote as usize + local as usize
    }

    fn poll_queue(&self, queues: &Queues, queue: &ArrayQueue<Envelope>, ctx: &mut C) -> bool {
        MsgStats::inc(&queues.stats.poll);
        let mut envelope = match queue.pop() {
            Some(envelope) => envelope,
            None => return false,
        };
        MsgStats::inc(&queues.stats.rcvd);

        if let Some(completion) = &envelope.completion {
            let started = completion.state
                .compare_exchange(QUEUED, PROCESSING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if !started {
                trace!(msg = %envelope.message.id(), "dropping withdrawn message");
                MsgStats::inc(&queues.stats.free);
                return true;
            }
        }

        match self.process(&mut envelope.message, ctx) {
            Ok(Status::Done) => self.complete(queues, envelope, Ok(())),
            Ok(Status::Repost) if envelope.reposts >= self.max_reposts => {
                self.complete(queues, envelope, Err(Error::Exhausted))
            },
            Ok(Status::Repost) => self.repost(queues, envelope),
            Err(err) => self.complete(queues, envelope, Err(err)),
        }

        true
    }

    fn process(&self, message: &mut Message, ctx: &mut C) -> Result<Status> {
        let idx = message.id().index().ok_or(Error::Invalid)?;
        let handler = self.handlers.read()
            .get(idx)
            .and_then(Option::clone)
            .ok_or(Error::NotFound)?;
        handler(message, ctx)
    }

    fn repost(&self, queues: &Queues, mut envelope: Envelope) {
        envelope.reposts += 1;
        envelope.message.flags_mut().set(MsgFlags::LOCAL, true);
        trace!(msg = %envelope.message.id(), reposts = envelope.reposts, "message reposted");

        let completion = envelope.completion.clone();
        match queues.local.push(envelope) {
            Ok(()) => if let Some(completion) = completion {
                // Only this core dequeues, the message can not have been processed yet.
                completion.state.store(QUEUED, Ordering::Release);
            },
            Err(envelope) => self.complete(queues, envelope, Err(Error::NoMem)),
        }
    }

    fn complete(&self, queues: &Queues, envelope: Envelope, result: Result<()>) {
        let Envelope { message, completion, .. } = envelope;
        if let Err(err) = &result {
            MsgStats::inc(&queues.stats.proc_err);
            debug!(msg = %message.id(), %err, "message processing failed");
        }

        MsgStats::inc(&queues.stats.free);
        if let Some(completion) = completion {
            *completion.outcome.lock() = Some((result, message));
            completion.state.store(DEQUEUED, Ordering::Release);
        }
    }

    /// The message counters of a core.
    pub fn stats(&self, core: usize) -> Option<MsgCounters> {
        self.queues.get(core).map(|queues| queues.stats.counters())
    }
}

impl<C> fmt::Debug for Fabric<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Fabric")
            .field("cores", &self.queues.len())
            .field("sync_timeout", &self.sync_timeout)
            .field("max_reposts", &self.max_reposts)
            .finish()
    }
}
