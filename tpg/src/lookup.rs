//! The per-core connection table.
//!
//! Maps the connection identity of an inbound packet to the control block that owns it. Each core
//! has its own table per protocol and nothing else ever touches it, so there is no locking.
//!
//! There is one bucket array per physical port. The bucket is selected by folding the connection
//! hash onto the table size, and each bucket is a short list in which the most recently inserted
//! block comes first.
//!
//! The table owns the `Handle` of every block stored in it. Deleting an entry hands the handle back
//! so the block can be returned to its pool, which makes it impossible to free a block that is
//! still reachable through the table.
use std::collections::VecDeque;
use std::net::Ipv4Addr;

use tracing::trace;

use crate::pool::{CbId, Handle};
use crate::wire::{FourTuple, PortId};
use crate::{Error, Result};

/// A table entry.
#[derive(Debug)]
pub struct Entry {
    /// The connection hash under which the block is filed.
    pub hash: u32,
    /// The endpoints of the block, listeners have an unspecified remote half.
    pub tuple: FourTuple,
    handle: Handle,
}

/// An entry as handed to [`Table::walk_mut`].
///
/// [`Table::walk_mut`]: struct.Table.html#method.walk_mut
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visit {
    /// The id of the control block.
    pub id: CbId,
    /// The connection hash under which the block is filed.
    pub hash: u32,
    /// The endpoints of the block.
    pub tuple: FourTuple,
}

/// Connection table of one core.
#[derive(Debug)]
pub struct Table {
    bits: u32,
    ports: Vec<Buckets>,
}

#[derive(Debug)]
struct Buckets {
    list: Vec<VecDeque<Entry>>,
    len: usize,
}

impl Entry {
    /// The id of the control block.
    pub fn id(&self) -> CbId {
        self.handle.id()
    }

    fn matches(&self, hash: u32, tuple: &FourTuple) -> bool {
        // Ports first, they differ most often between connections sharing a bucket.
        self.hash == hash
            && self.tuple.local_port == tuple.local_port
            && self.tuple.remote_port == tuple.remote_port
            && self.tuple.local_addr == tuple.local_addr
            && self.tuple.remote_addr == tuple.remote_addr
    }
}

impl Table {
    /// Create a table with `2^bits` buckets for each of `ports` physical ports.
    pub fn new(bits: u32, ports: usize) -> Self {
        assert!(bits > 0 && bits < 32, "Table bits {} out of range", bits);
        let ports = (0..ports)
            .map(|_| Buckets {
                list: (0..1usize << bits).map(|_| VecDeque::new()).collect(),
                len: 0,
            })
            .collect();
        Table { bits, ports }
    }

    fn index(&self, hash: u32) -> usize {
        let mask = (1u32 << self.bits) - 1;
        (((hash >> self.bits) ^ (hash & mask)) & mask) as usize
    }

    fn bucket(&self, port: PortId, hash: u32) -> Option<&VecDeque<Entry>> {
        let idx = self.index(hash);
        self.ports.get(port as usize).map(|buckets| &buckets.list[idx])
    }

    /// Find the block matching a connection hash and its endpoints exactly.
    ///
    /// Returns `None` for an unknown port.
    pub fn find(
        &self,
        port: PortId,
        hash: u32,
        local_addr: Ipv4Addr,
        remote_addr: Ipv4Addr,
        local_port: u16,
        remote_port: u16,
    ) -> Option<CbId> {
        let tuple = FourTuple { local_addr, remote_addr, local_port, remote_port };
        self.bucket(port, hash)?
            .iter()
            .find(|entry| entry.matches(hash, &tuple))
            .map(Entry::id)
    }

    /// File a block at the head of its bucket.
    ///
    /// Duplicate keys are not detected, the newer block shadows the older one until it is
    /// deleted.
    pub fn insert(&mut self, port: PortId, hash: u32, tuple: FourTuple, handle: Handle)
        -> core::result::Result<(), (Error, Handle)>
    {
        let idx = self.index(hash);
        let buckets = match self.ports.get_mut(port as usize) {
            Some(buckets) => buckets,
            None => return Err((Error::Invalid, handle)),
        };

        trace!(port, hash, id = %handle.id(), "table insert");
        buckets.list[idx].push_front(Entry { hash, tuple, handle });
        buckets.len += 1;
        Ok(())
    }

    /// Remove a block, returning its handle.
    pub fn delete(&mut self, port: PortId, hash: u32, id: CbId) -> Result<Handle> {
        let idx = self.index(hash);
        let buckets = self.ports.get_mut(port as usize).ok_or(Error::Invalid)?;
        let bucket = &mut buckets.list[idx];
        let pos = bucket.iter()
            .position(|entry| entry.id() == id)
            .ok_or(Error::NotFound)?;

        let entry = bucket.remove(pos).ok_or(Error::NotFound)?;
        buckets.len -= 1;
        trace!(port, id = %id, "table delete");
        Ok(entry.handle)
    }

    /// Visit every entry of a port until the callback returns `false`.
    ///
    /// The table can not be modified during the walk, see [`walk_mut`] for that.
    ///
    /// [`walk_mut`]: #method.walk_mut
    pub fn walk<F>(&self, port: PortId, mut callback: F)
        where F: FnMut(&Entry) -> bool,
    {
        let buckets = match self.ports.get(port as usize) {
            Some(buckets) => buckets,
            None => return,
        };

        for entry in buckets.list.iter().flat_map(|bucket| bucket.iter()) {
            if !callback(entry) {
                return;
            }
        }
    }

    /// Visit every entry of a port with the table at hand, until the callback returns `false`.
    ///
    /// The callback may delete the entry it is visiting. The entry after it is located before the
    /// call and the walk resumes there, so no other entry is skipped or visited twice. Entries
    /// inserted during the walk may or may not be visited.
    pub fn walk_mut<F>(&mut self, port: PortId, mut callback: F)
        where F: FnMut(&mut Table, Visit) -> bool,
    {
        let bucket_count = match self.ports.get(port as usize) {
            Some(buckets) => buckets.list.len(),
            None => return,
        };

        for idx in 0..bucket_count {
            let mut pos = 0;
            loop {
                let (visit, next) = {
                    let bucket = &self.ports[port as usize].list[idx];
                    let visit = match bucket.get(pos) {
                        Some(entry) => Visit { id: entry.id(), hash: entry.hash, tuple: entry.tuple },
                        None => break,
                    };
                    (visit, bucket.get(pos + 1).map(Entry::id))
                };

                if !callback(self, visit) {
                    return;
                }

                let bucket = &self.ports[port as usize].list[idx];
                pos = match next {
                    Some(next) => match bucket.iter().position(|entry| entry.id() == next) {
                        Some(next_pos) => next_pos,
                        None => break,
                    },
                    None => break,
                };
            }
        }
    }

    /// The ids of all blocks of a port, in walk order.
    pub fn snapshot(&self, port: PortId) -> Vec<CbId> {
        let mut ids = Vec::with_capacity(self.len(port));
        self.walk(port, |entry| {
            ids.push(entry.id());
            true
        });
        ids
    }

    /// The number of blocks filed for a port.
    pub fn len(&self, port: PortId) -> usize {
        self.ports.get(port as usize).map_or(0, |buckets| buckets.len)
    }

    /// Whether no block at all is filed.
    pub fn is_empty(&self) -> bool {
        self.ports.iter().all(|buckets| buckets.len == 0)
    }

    /// The number of physical ports.
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Check that a port exists.
    pub fn contains_port(&self, port: PortId) -> bool {
        (port as usize) < self.ports.len()
    }
}
