/// The error type for data plane operations.
///
/// Only recoverable conditions are represented here. Protocol violations detected by the state
/// machines are handled by the rules of the protocol (drop, reset, ignore) and never surface as an
/// error, while corrupted invariants abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A pool or a queue is exhausted.
    ///
    /// This is the backpressure signal of the data plane. Callers should reject the new connection
    /// or try again later, never spin on it.
    #[error("out of resources")]
    NoMem,

    /// The operation could not complete now but may succeed later.
    #[error("resource temporarily unavailable")]
    Again,

    /// An argument was malformed, for example a message id out of range or an unknown port.
    #[error("invalid argument")]
    Invalid,

    /// A handler for this message id is already registered.
    #[error("already registered")]
    Exists,

    /// The control block or table entry does not exist (anymore).
    #[error("not found")]
    NotFound,

    /// The connection is in a state that does not accept this user call.
    #[error("not connected")]
    NotConnected,

    /// A timeout that does not fit into the range of its timer wheel.
    #[error("timeout beyond timer wheel range")]
    Overflow,

    /// A synchronous message was not processed before its deadline.
    #[error("timed out waiting for message completion")]
    Timeout,

    /// A synchronous message was withdrawn by its sender.
    #[error("operation cancelled")]
    Cancelled,

    /// A message handler requested to be reposted more often than allowed.
    #[error("message reposted too often")]
    Exhausted,

    /// The RSS hash engine disagrees with the known answer vector.
    #[error("rss hash self test failed: expected {expected:#010x}, got {got:#010x}")]
    SelfTest {
        /// The value the NIC computes.
        expected: u32,
        /// The value this engine computed.
        got: u32,
    },

    /// A worker thread could not be pinned to its cpu.
    #[error("failed to pin worker to cpu {0}")]
    Affinity(usize),

    /// A worker thread could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

/// The result type for data plane operations.
pub type Result<T> = core::result::Result<T, Error>;
