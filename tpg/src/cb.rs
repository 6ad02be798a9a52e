//! The protocol independent part of a control block.
use core::{fmt, ops};
use std::net::Ipv4Addr;

use crate::hash::Toeplitz;
use crate::pool::CbId;
use crate::tcp::TcpOptions;
use crate::wire::{ConnectionKey, FourTuple, PortId};

/// Flags of a control block.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CbFlags(u32);

impl CbFlags {
    /// No flags.
    pub const NONE: CbFlags = CbFlags(0);
    /// Use the hash supplied at open instead of computing it from the tuple.
    pub const USE_L4_HASH: CbFlags = CbFlags(0x01);
    /// The block matched a trace filter when it was initialized.
    pub const TRACE: CbFlags = CbFlags(0x02);
    /// Close as soon as the peer closes, without waiting for the application.
    pub const CONSUME_ALL_DATA: CbFlags = CbFlags(0x04);
    /// The block is not backed by a pool and only lives for one event.
    pub const EPHEMERAL: CbFlags = CbFlags(0x08);

    /// Check if all flags of `other` are set.
    pub fn contains(self, other: CbFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear flags.
    pub fn set(&mut self, other: CbFlags, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl ops::BitOr for CbFlags {
    type Output = CbFlags;

    fn bitor(self, rhs: CbFlags) -> CbFlags {
        CbFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for CbFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let named = [
            (CbFlags::USE_L4_HASH, "USE_L4_HASH"),
            (CbFlags::TRACE, "TRACE"),
            (CbFlags::CONSUME_ALL_DATA, "CONSUME_ALL_DATA"),
            (CbFlags::EPHEMERAL, "EPHEMERAL"),
        ];
        let mut list = f.debug_set();
        for &(_, name) in named.iter().filter(|&&(flag, _)| self.contains(flag)) {
            list.entry(&format_args!("{}", name));
        }
        list.finish()
    }
}

/// Options independent of the transport protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct L4Options {
    /// Request transmit timestamps for the block's packets.
    pub tx_timestamp: bool,
}

/// Socket options, copied into each block by value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SockOpts {
    /// Protocol independent options.
    pub l4: L4Options,
    /// Tcp options, ignored by udp blocks.
    pub tcp: TcpOptions,
}

/// Request/response application with fixed sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawApp {
    /// Size of every request.
    pub req_size: u16,
    /// Size of every response.
    pub resp_size: u16,
    /// Bytes left of the current request or response.
    pub remaining: u16,
}

/// Http/1.1 application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HttpApp {
    /// Content length of the message in flight.
    pub content_length: u32,
}

/// Storage of the application driving a block.
///
/// The applications themselves live outside the data plane. The state is opaque here, it is
/// carried along with the block and copied when a listener is cloned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    /// No application attached.
    None,
    /// A raw request/response application.
    Raw(RawApp),
    /// An http application.
    Http(HttpApp),
}

impl Default for AppState {
    fn default() -> Self {
        AppState::None
    }
}

/// Parameters to open a tcp or udp block.
#[derive(Clone, Debug)]
pub struct OpenParams {
    /// The physical port.
    pub port: PortId,
    /// The endpoints. An unspecified remote half opens passively.
    pub tuple: FourTuple,
    /// A precomputed hash, used with `CbFlags::USE_L4_HASH`.
    pub l4_hash: u32,
    /// The test case the block belongs to.
    pub test_case: u16,
    /// Application state.
    pub app: AppState,
    /// Socket options.
    pub options: SockOpts,
    /// Initial flags.
    pub flags: CbFlags,
}

impl OpenParams {
    /// Parameters for a connection to a remote endpoint.
    pub fn connect(port: PortId, local: (Ipv4Addr, u16), remote: (Ipv4Addr, u16)) -> Self {
        OpenParams {
            port,
            tuple: FourTuple {
                local_addr: local.0,
                remote_addr: remote.0,
                local_port: local.1,
                remote_port: remote.1,
            },
            l4_hash: 0,
            test_case: 0,
            app: AppState::None,
            options: SockOpts::default(),
            flags: CbFlags::NONE,
        }
    }

    /// Parameters for a listening endpoint.
    pub fn listen(port: PortId, local: (Ipv4Addr, u16)) -> Self {
        let mut params = Self::connect(port, local, (Ipv4Addr::UNSPECIFIED, 0));
        params.tuple = FourTuple::listen(local.0, local.1);
        params
    }
}

/// The base control block shared by tcp and udp.
#[derive(Clone, Debug)]
pub struct L4Cb {
    /// The id in the owning pool, `None` until inserted.
    pub id: Option<CbId>,
    /// Identity of the connection.
    pub key: ConnectionKey,
    /// The connection hash of the return traffic.
    pub hash: u32,
    /// The test case the block belongs to.
    pub test_case: u16,
    /// Application storage.
    pub app: AppState,
    /// Socket options.
    pub options: SockOpts,
    /// Flags.
    pub flags: CbFlags,
}

impl L4Cb {
    /// Initialize the base block from open parameters.
    ///
    /// The hash is the supplied one if `USE_L4_HASH` is set, otherwise the hash that the NIC will
    /// compute for packets from the remote endpoint.
    pub fn new(params: &OpenParams, hasher: &Toeplitz) -> Self {
        let tuple = params.tuple;
        let hash = if params.flags.contains(CbFlags::USE_L4_HASH) {
            params.l4_hash
        } else {
            hasher.connection_hash(
                tuple.remote_addr,
                tuple.local_addr,
                tuple.remote_port,
                tuple.local_port)
        };

        L4Cb {
            id: None,
            key: ConnectionKey { port: params.port, tuple },
            hash,
            test_case: params.test_case,
            app: params.app,
            options: params.options,
            flags: params.flags,
        }
    }

    /// The endpoints of the block.
    pub fn tuple(&self) -> &FourTuple {
        &self.key.tuple
    }

    /// Check if activity of the block is traced.
    pub fn traced(&self) -> bool {
        self.flags.contains(CbFlags::TRACE)
    }

    /// An id for log output, also for blocks that are not pooled.
    pub fn log_id(&self) -> CbId {
        self.id.unwrap_or_else(CbId::detached)
    }

    /// Derive the block of an accepted connection from a listener.
    ///
    /// Options, application state and test case are inherited. The remote half comes from the
    /// peer and the hash is that of the peer's packets.
    pub fn accept(&self, remote: (Ipv4Addr, u16), hash: u32) -> Self {
        let mut tuple = self.key.tuple;
        tuple.remote_addr = remote.0;
        tuple.remote_port = remote.1;

        let mut flags = self.flags;
        flags.set(CbFlags::EPHEMERAL, false);

        L4Cb {
            id: None,
            key: ConnectionKey { port: self.key.port, tuple },
            hash,
            flags,
            ..self.clone()
        }
    }
}

impl fmt::Display for L4Cb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} hash={:#010x} tc={}", self.log_id(), self.key, self.hash, self.test_case)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_of_return_traffic() {
        let hasher = Toeplitz::new();
        let local = (Ipv4Addr::new(10, 0, 0, 1), 40000);
        let remote = (Ipv4Addr::new(10, 0, 1, 1), 80);
        let cb = L4Cb::new(&OpenParams::connect(0, local, remote), &hasher);

        assert_eq!(cb.hash, hasher.header_hash(remote.0, local.0, remote.1, local.1));
        assert!(cb.id.is_none());
        assert!(!cb.traced());
    }

    #[test]
    fn supplied_hash() {
        let hasher = Toeplitz::new();
        let mut params = OpenParams::listen(1, (Ipv4Addr::new(10, 0, 0, 1), 80));
        params.flags = CbFlags::USE_L4_HASH;
        params.l4_hash = 0x1234;
        let cb = L4Cb::new(&params, &hasher);
        assert_eq!(cb.hash, 0x1234);
        assert_eq!(cb.key.port, 1);
    }

    #[test]
    fn accept_inherits() {
        let hasher = Toeplitz::new();
        let mut params = OpenParams::listen(0, (Ipv4Addr::new(10, 0, 0, 1), 80));
        params.test_case = 7;
        params.app = AppState::Raw(RawApp { req_size: 100, resp_size: 200, remaining: 0 });
        params.flags = CbFlags::TRACE;
        let listener = L4Cb::new(&params, &hasher);

        let accepted = listener.accept((Ipv4Addr::new(10, 0, 1, 1), 5000), 42);
        assert_eq!(accepted.test_case, 7);
        assert_eq!(accepted.app, listener.app);
        assert_eq!(accepted.hash, 42);
        assert!(accepted.traced());
        assert_eq!(accepted.tuple().remote_port, 5000);
        assert_eq!(accepted.tuple().local_port, 80);
    }

    #[test]
    fn flags() {
        let mut flags = CbFlags::TRACE | CbFlags::USE_L4_HASH;
        assert!(flags.contains(CbFlags::TRACE));
        flags.set(CbFlags::TRACE, false);
        assert!(!flags.contains(CbFlags::TRACE));
        assert_eq!(format!("{:?}", flags), "{USE_L4_HASH}");
    }
}
