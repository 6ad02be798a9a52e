use core::{fmt, ops};
use std::any::Any;

use super::MsgId;

/// Flags of a message, set by the fabric while sending.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MsgFlags(u8);

impl MsgFlags {
    /// No flags.
    pub const NONE: MsgFlags = MsgFlags(0);
    /// Nobody waits for the message, it is dropped after processing.
    pub const TO_FREE: MsgFlags = MsgFlags(0x01);
    /// Sent by the destination core to itself.
    pub const LOCAL: MsgFlags = MsgFlags(0x02);

    /// Check if all flags of `other` are set.
    pub fn contains(self, other: MsgFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn set(&mut self, other: MsgFlags, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl ops::BitOr for MsgFlags {
    type Output = MsgFlags;

    fn bitor(self, rhs: MsgFlags) -> MsgFlags {
        MsgFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for MsgFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MsgFlags")
            .field("to_free", &self.contains(MsgFlags::TO_FREE))
            .field("local", &self.contains(MsgFlags::LOCAL))
            .finish()
    }
}

/// A message for one core.
///
/// The payload is any sendable value. The handler registered for the id knows its type and
/// downcasts it, a synchronous sender gets the message back after processing and can read a
/// reply the handler left in the payload.
pub struct Message {
    id: MsgId,
    dest: usize,
    flags: MsgFlags,
    payload: Box<dyn Any + Send>,
}

impl Message {
    /// Create a message for the core with index `dest`.
    pub fn new<T: Any + Send>(id: MsgId, dest: usize, payload: T) -> Self {
        Message {
            id,
            dest,
            flags: MsgFlags::NONE,
            payload: Box::new(payload),
        }
    }

    /// The id selecting the handler.
    pub fn id(&self) -> MsgId {
        self.id
    }

    /// The index of the destination core.
    pub fn dest(&self) -> usize {
        self.dest
    }

    /// The flags set by the fabric.
    pub fn flags(&self) -> MsgFlags {
        self.flags
    }

    pub(crate) fn flags_mut(&mut self) -> &mut MsgFlags {
        &mut self.flags
    }

    /// The payload, if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// The payload for modification, if it has type `T`.
    pub fn payload_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.payload.downcast_mut()
    }

    /// Take the payload out of the message.
    ///
    /// Returns the message unchanged if the payload has another type.
    pub fn into_payload<T: Any>(self) -> Result<T, Self> {
        let Message { id, dest, flags, payload } = self;
        match payload.downcast::<T>() {
            Ok(payload) => Ok(*payload),
            Err(payload) => Err(Message { id, dest, flags, payload }),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &format_args!("{}", self.id))
            .field("dest", &self.dest)
            .field("flags", &self.flags)
            .finish()
    }
}
