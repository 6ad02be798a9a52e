//! The data plane of a multi-core TCP and UDP traffic generator.
//!
//! ## Table of contents
//!
//! This is also a recommended reading order but feel free to skip ahead, each chapter tries to be
//! somewhat self-contained.
//!
//! 1. [Highlights](#highlights)
//! 2. [Design](#design-and-relevant-core-concepts)
//! 3. [Packet representations](wire/index.html)
//! 4. [Receive side scaling](hash/index.html)
//! 5. Per-core state
//!    1. [Control block pools](pool/index.html)
//!    1. [Connection tables](lookup/index.html)
//!    1. [Timer wheels](timer/index.html)
//!    1. [The core context](lcore/index.html)
//! 6. Protocols
//!    1. [Tcp](tcp/index.html)
//!    1. [Udp](udp/index.html)
//! 7. [Messages between cores](msg/index.html)
//! 8. [Worker threads](runtime/index.html)
//!
//! ## Highlights
//!
//! * Millions of connections terminated in user space, each owned by exactly one core
//! * No locks on the packet path, cores only talk through bounded message queues
//! * Software and hardware agree on the owner of a connection through the same Toeplitz hash
//!
//! ## Design and relevant core concepts
//!
//! The NIC spreads inbound packets over its receive queues by a hash of the addresses and ports,
//! one queue per core. The data plane computes the same hash for the connections it opens itself
//! so that every control block is created on the core that will see its return traffic. From then
//! on only that core touches the block: it lives in the core's pool, is filed in the core's
//! connection table and its timers sit in the core's wheels. Each of these is a plain struct of
//! the [`Core`], there is no global state.
//!
//! Nothing on the packet path allocates. Pools, tables and queues are sized at startup by the
//! [`Config`] and running out of any of them is reported as `Error::NoMem`, to be answered by
//! rejecting the new connection. Framing, checksums and the NIC itself are outside of this crate,
//! a [`Device`] exchanges parsed segments and datagrams with the cores.
//!
//! Anything the control plane wants from a core (opening connections, changing trace filters) is
//! a message through the [`Fabric`] which the core processes from its main loop.
//!
//! [`Core`]: lcore/struct.Core.html
//! [`Config`]: config/struct.Config.html
//! [`Device`]: nic/trait.Device.html
//! [`Fabric`]: msg/struct.Fabric.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use] mod macros;
pub mod cb;
pub mod config;
pub mod hash;
pub mod lcore;
pub mod lookup;
pub mod msg;
pub mod nic;
pub mod pool;
pub mod runtime;
pub mod tcp;
pub mod time;
pub mod timer;
pub mod trace;
pub mod udp;
pub mod wire;

mod error;

pub use self::error::{Error, Result};
