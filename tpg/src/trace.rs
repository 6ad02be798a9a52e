//! Per-connection trace filters.
//!
//! Logging every state machine step of millions of connections is not an option, even at `trace`
//! level the formatting alone would dominate. Instead a core holds at most one filter and blocks
//! initialized while it matches carry `CbFlags::TRACE`. Only those blocks log their activity,
//! through the `cb_trace!` and `cb_debug!` macros.
use core::ops::RangeInclusive;
use std::net::Ipv4Addr;

use crate::wire::{ConnectionKey, PortId};

/// Selects the control blocks to trace.
///
/// Each criterion that is `None` matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceFilter {
    /// The physical port.
    pub port: Option<PortId>,
    /// Range of local addresses.
    pub local_addr: Option<RangeInclusive<Ipv4Addr>>,
    /// Range of remote addresses.
    pub remote_addr: Option<RangeInclusive<Ipv4Addr>>,
    /// Range of local ports.
    pub local_port: Option<RangeInclusive<u16>>,
    /// Range of remote ports.
    pub remote_port: Option<RangeInclusive<u16>>,
}

impl TraceFilter {
    /// A filter that matches every block.
    pub fn any() -> Self {
        TraceFilter::default()
    }

    /// Check a connection against all criteria.
    pub fn matches(&self, key: &ConnectionKey) -> bool {
        fn within<T: PartialOrd>(range: &Option<RangeInclusive<T>>, value: &T) -> bool {
            range.as_ref().map_or(true, |range| range.contains(value))
        }

        let tuple = &key.tuple;
        self.port.map_or(true, |port| port == key.port)
            && within(&self.local_addr, &tuple.local_addr)
            && within(&self.remote_addr, &tuple.remote_addr)
            && within(&self.local_port, &tuple.local_port)
            && within(&self.remote_port, &tuple.remote_port)
    }
}

/// The trace state of one core.
#[derive(Clone, Debug, Default)]
pub struct Tracer {
    filter: Option<TraceFilter>,
}

impl Tracer {
    /// Replace the active filter.
    pub fn enable(&mut self, filter: TraceFilter) {
        self.filter = Some(filter);
    }

    /// Stop marking new blocks.
    ///
    /// Blocks that are already marked keep tracing until they close.
    pub fn disable(&mut self) {
        self.filter = None;
    }

    /// The active filter.
    pub fn filter(&self) -> Option<&TraceFilter> {
        self.filter.as_ref()
    }

    /// Check if a new block should be traced.
    pub fn matches(&self, key: &ConnectionKey) -> bool {
        self.filter.as_ref().map_or(false, |filter| filter.matches(key))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::FourTuple;

    fn key(port: PortId, remote_port: u16) -> ConnectionKey {
        ConnectionKey {
            port,
            tuple: FourTuple {
                local_addr: Ipv4Addr::new(10, 0, 0, 1),
                remote_addr: Ipv4Addr::new(10, 0, 1, 20),
                local_port: 80,
                remote_port,
            },
        }
    }

    #[test]
    fn criteria() {
        let filter = TraceFilter {
            port: Some(1),
            remote_addr: Some(Ipv4Addr::new(10, 0, 1, 0)..=Ipv4Addr::new(10, 0, 1, 255)),
            remote_port: Some(1000..=2000),
            ..TraceFilter::any()
        };

        assert!(filter.matches(&key(1, 1500)));
        assert!(!filter.matches(&key(0, 1500)));
        assert!(!filter.matches(&key(1, 2001)));
        assert!(TraceFilter::any().matches(&key(3, 1)));
    }

    #[test]
    fn enable_disable() {
        let mut tracer = Tracer::default();
        assert!(!tracer.matches(&key(0, 1)));
        tracer.enable(TraceFilter::any());
        assert!(tracer.matches(&key(0, 1)));
        tracer.disable();
        assert!(tracer.filter().is_none());
        assert!(!tracer.matches(&key(0, 1)));
    }
}
