//! Messages between cores.
//!
//! Control blocks are owned by the core that allocated them, and no other thread may touch them.
//! Everything that has to happen on a specific core, such as opening a connection or enabling a
//! trace filter, is therefore a [`Message`] sent through the [`Fabric`] to that core, which
//! processes it from its main loop with [`Fabric::poll`].
//!
//! ## Ids
//!
//! A message id names the module that handles it and a type within that module, packed into 16
//! bits with the module in the high byte. Handlers are registered once per id.
//!
//! ## Queues
//!
//! Each core has two bounded queues. The remote queue takes messages from other threads while the
//! local queue takes the messages a core sends to itself, including reposts. Messages are
//! processed in order within each queue, there is no order between the two.
//!
//! [`Message`]: struct.Message.html
//! [`Fabric`]: struct.Fabric.html
//! [`Fabric::poll`]: struct.Fabric.html#method.poll
use core::fmt;

mod fabric;
mod message;

pub use self::fabric::{
    CancelToken,
    Fabric,
    Handler,
    MsgCounters,
    MsgStats,
    SendFlags,
    Status,
};

pub use self::message::{Message, MsgFlags};

/// Bits of a message id naming the type within its module.
pub const TYPE_BITS: u32 = 8;

/// Types per module.
pub const TYPES_PER_MODULE: usize = 1 << TYPE_BITS;

/// The number of assigned modules.
pub const MODULE_COUNT: usize = 6;

enum_with_unknown! {
    /// The module that handles a message.
    pub enum Module(u8) {
        /// Commands for the core itself: opening and closing connections.
        Core = 0,
        /// The tcp layer.
        Tcp = 1,
        /// The udp layer.
        Udp = 2,
        /// Trace filters.
        Trace = 3,
        /// Test management.
        Test = 4,
        /// Free for users of the crate.
        User = 5,
    }
}

/// A message id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgId(pub u16);

impl MsgId {
    /// Pack a module and a type.
    pub fn new(module: Module, kind: u8) -> Self {
        MsgId(u16::from(u8::from(module)) << TYPE_BITS | u16::from(kind))
    }

    /// The module of the message.
    pub fn module(self) -> Module {
        Module::from((self.0 >> TYPE_BITS) as u8)
    }

    /// The type within the module.
    pub fn kind(self) -> u8 {
        self.0 as u8
    }

    /// The position in a table of all assigned ids.
    ///
    /// `None` for ids of unknown modules.
    pub(crate) fn index(self) -> Option<usize> {
        let module = usize::from(u8::from(self.module()));
        if module < MODULE_COUNT {
            Some(module * TYPES_PER_MODULE + usize::from(self.kind()))
        } else {
            None
        }
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.module() {
            Module::Unknown(module) => write!(f, "{}:{}", module, self.kind()),
            module => write!(f, "{:?}:{}", module, self.kind()),
        }
    }
}
