//! Hashed timer wheels.
//!
//! A core runs two wheels for tcp: the `slow` wheel with a coarse step for the connection
//! lifetime timers (orphan, fin and time-wait) and the `rto` wheel with a fine step for
//! retransmissions. Both are sized `max / step` buckets and only accept timeouts below `max`.
//!
//! Timers are identified by the `CbId` of their block. Adding returns a [`TimerSlot`] which the
//! block keeps to cancel the timer again, a block therefore has at most one timer per wheel.
//!
//! Each bucket is a doubly linked list threaded through a node arena, so cancelling a timer
//! unlinks its node without looking at the rest of the bucket. Released nodes are reused, their
//! generation tells a stale `TimerSlot` from the timer that took its place.
//!
//! [`TimerSlot`]: struct.TimerSlot.html
use tracing::{debug, warn};

use crate::pool::CbId;
use crate::time::{Duration, Instant};
use crate::{Error, Result};

/// The position of an armed timer, needed to cancel it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerSlot {
    node: u32,
    generation: u32,
}

/// Counters of one wheel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WheelStats {
    /// Timers that expired.
    pub fired: u64,
    /// Timers rejected because they exceed the wheel.
    pub timeout_overflow: u64,
}

/// A timer wheel.
#[derive(Debug)]
pub struct Wheel {
    step: i64,
    heads: Vec<Option<u32>>,
    nodes: Vec<Node>,
    free: Vec<u32>,
    /// The tick up to which the wheel has been advanced, `None` before first use.
    cursor: Option<i64>,
    armed: usize,
    stats: WheelStats,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    id: CbId,
    deadline: i64,
    bucket: u32,
    prev: Option<u32>,
    next: Option<u32>,
    generation: u32,
    linked: bool,
}

impl Wheel {
    /// Create a wheel with `max / step` buckets.
    pub fn new(step: Duration, max: Duration) -> Self {
        let step = step.as_micros() as i64;
        let max = max.as_micros() as i64;
        assert!(step > 0 && max >= step, "Timer wheel step {}us and max {}us", step, max);
        let size = (max / step) as usize;

        Wheel {
            step,
            heads: vec![None; size],
            nodes: Vec::new(),
            free: Vec::new(),
            cursor: None,
            armed: 0,
            stats: WheelStats::default(),
        }
    }

    /// The exclusive upper bound of timeouts.
    pub fn max(&self) -> Duration {
        Duration::from_micros((self.heads.len() as i64 * self.step) as u64)
    }

    fn tick(&self, time: Instant) -> i64 {
        time.total_micros().div_euclid(self.step)
    }

    fn bucket(&self, tick: i64) -> usize {
        tick.rem_euclid(self.heads.len() as i64) as usize
    }

    /// Arm a timer for a block.
    pub fn add(&mut self, id: CbId, now: Instant, timeout: Duration) -> Result<TimerSlot> {
        if timeout >= self.max() {
            self.stats.timeout_overflow += 1;
            warn!(timeout_us = timeout.as_micros() as u64, max_us = self.max().as_micros() as u64,
                "timeout exceeds timer wheel");
            return Err(Error::Overflow);
        }

        if self.cursor.is_none() {
            self.cursor = Some(self.tick(now));
        }

        let deadline = (now + timeout).total_micros();
        let bucket = self.bucket(deadline.div_euclid(self.step));
        let head = self.heads[bucket];
        let node = Node {
            id,
            deadline,
            bucket: bucket as u32,
            prev: None,
            next: head,
            generation: 0,
            linked: true,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                let generation = self.nodes[idx as usize].generation;
                self.nodes[idx as usize] = Node { generation, ..node };
                idx
            },
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            },
        };

        if let Some(head) = head {
            self.nodes[head as usize].prev = Some(idx);
        }
        self.heads[bucket] = Some(idx);
        self.armed += 1;

        Ok(TimerSlot { node: idx, generation: self.nodes[idx as usize].generation })
    }

    /// Disarm the timer of a block.
    ///
    /// Returns `false` if no such timer was armed, for example because it already fired.
    pub fn cancel(&mut self, id: CbId, slot: TimerSlot) -> bool {
        let armed = match self.nodes.get(slot.node as usize) {
            Some(node) => node.linked && node.generation == slot.generation && node.id == id,
            None => false,
        };

        if armed {
            self.release(slot.node);
            self.armed -= 1;
        }
        armed
    }

    /// Unlink a node from its bucket and put it on the free list.
    fn release(&mut self, idx: u32) {
        let Node { prev, next, bucket, .. } = self.nodes[idx as usize];
        match prev {
            Some(prev) => self.nodes[prev as usize].next = next,
            None => self.heads[bucket as usize] = next,
        }
        if let Some(next) = next {
            self.nodes[next as usize].prev = prev;
        }

        let node = &mut self.nodes[idx as usize];
        node.linked = false;
        node.prev = None;
        node.next = None;
        node.generation = node.generation.wrapping_add(1);
        self.free.push(idx);
    }

    /// Collect the expired timers.
    ///
    /// Walks the buckets from where the last call stopped up to the bucket of `now`, removing
    /// every timer whose deadline has passed and pushing its id to `fired`. Stops after `max_run`
    /// timers and resumes there on the next call. Returns the number of timers collected.
    pub fn advance(&mut self, now: Instant, max_run: usize, fired: &mut Vec<CbId>) -> usize {
        let target = self.tick(now);
        let size = self.heads.len() as i64;
        let mut tick = match self.cursor {
            // Nothing can be armed before the first add.
            None => {
                self.cursor = Some(target);
                return 0;
            },
            // More than one rotation behind, each bucket needs to be visited only once.
            Some(cursor) => cursor.max(target - size + 1),
        };

        let now = now.total_micros();
        let mut count = 0;
        while tick <= target {
            let mut cursor = self.heads[self.bucket(tick)];
            while let Some(idx) = cursor {
                if count == max_run {
                    break;
                }

                let node = self.nodes[idx as usize];
                cursor = node.next;
                if node.deadline <= now {
                    self.release(idx);
                    fired.push(node.id);
                    count += 1;
                }
            }

            if count == max_run {
                debug!(collected = count, "timer run limit reached");
                break;
            }

            tick += 1;
        }

        // The bucket of `now` may still hold timers that expire later in the same tick.
        self.cursor = Some(tick.min(target));
        self.armed -= count;
        self.stats.fired += count as u64;
        count
    }

    /// The number of armed timers.
    pub fn len(&self) -> usize {
        self.armed
    }

    /// Check if no timer is armed.
    pub fn is_empty(&self) -> bool {
        self.armed == 0
    }

    /// Counters of the wheel.
    pub fn stats(&self) -> WheelStats {
        self.stats
    }
}
