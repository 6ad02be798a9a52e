//! The Toeplitz hash used for receive side scaling.
//!
//! NICs distribute inbound packets over their receive queues by hashing the IPv4 addresses and
//! ports with a Toeplitz function and indexing a redirection table (RETA) with the result. The data
//! plane computes the very same function in software so that a connection it opens itself is
//! stored on the core that the NIC will deliver the return traffic to.
//!
//! The hashed input is always the 12 byte sequence
//!
//! ```text
//! first addr (4) | second addr (4) | first port (2) | second port (2)
//! ```
//!
//! in network byte order. Two entry points differ only in how they receive those values:
//! [`connection_hash`] takes host order values as a control plane has them at hand, and
//! [`packet_hash`] takes values already in network order, as read from a packet header.
//!
//! [`connection_hash`]: struct.Toeplitz.html#method.connection_hash
//! [`packet_hash`]: struct.Toeplitz.html#method.packet_hash
use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian};

use crate::{Error, Result};

/// The length of the hashed input in bytes.
const INPUT_LEN: usize = 12;

/// The shortest usable key, the input plus one 32-bit window.
pub const KEY_LEN: usize = INPUT_LEN + 4;

/// The de-facto standard RSS key, the one from the Microsoft RSS verification suite.
///
/// Most NIC drivers program this key unless configured otherwise.
pub const DEFAULT_KEY: [u8; 40] = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2,
    0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f, 0xb0,
    0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4,
    0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30, 0xf2, 0x0c,
    0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
];

/// Known answer of the first IPv4 vector of the verification suite.
mod vector {
    pub(super) const SRC: [u8; 4] = [66, 9, 149, 187];
    pub(super) const SRC_PORT: u16 = 2794;
    pub(super) const DST: [u8; 4] = [161, 142, 100, 80];
    pub(super) const DST_PORT: u16 = 1766;
    pub(super) const HASH: u32 = 0x51cc_c178;
}

/// A Toeplitz hasher for a fixed key.
///
/// Evaluating the function bit by bit is slow, so the key is expanded once into a table holding,
/// for every input byte position and every possible byte value, the xor of the key windows
/// selected by the set bits. A hash is then twelve lookups.
#[derive(Clone)]
pub struct Toeplitz {
    table: Box<[[u32; 256]; INPUT_LEN]>,
}

impl Toeplitz {
    /// A hasher for the default key.
    pub fn new() -> Self {
        Self::from_key(&DEFAULT_KEY)
    }

    /// A hasher for a custom key.
    ///
    /// The key must be at least [`KEY_LEN`] bytes long.
    ///
    /// [`KEY_LEN`]: constant.KEY_LEN.html
    pub fn with_key(key: &[u8]) -> Result<Self> {
        if key.len() < KEY_LEN {
            return Err(Error::Invalid);
        }

        Ok(Self::from_key(key))
    }

    fn from_key(key: &[u8]) -> Self {
        let key_bit = |bit: usize| -> u32 {
            let byte = key[bit / 8];
            u32::from(byte >> (7 - bit % 8) & 1)
        };

        let mut table = Box::new([[0u32; 256]; INPUT_LEN]);
        for (i, row) in table.iter_mut().enumerate() {
            // The key window belonging to each bit of input byte `i`, msb first.
            let mut windows = [0u32; 8];
            for (b, window) in windows.iter_mut().enumerate() {
                for j in 0..32 {
                    *window |= key_bit(8*i + b + j) << (31 - j);
                }
            }

            for (val, entry) in row.iter_mut().enumerate() {
                *entry = windows.iter()
                    .enumerate()
                    .filter(|&(b, _)| val & (0x80 >> b) != 0)
                    .fold(0, |acc, (_, window)| acc ^ window);
            }
        }

        Toeplitz { table }
    }

    /// Hash the raw input bytes.
    pub fn hash_bytes(&self, input: &[u8; INPUT_LEN]) -> u32 {
        input.iter()
            .zip(self.table.iter())
            .fold(0, |acc, (&byte, row)| acc ^ row[usize::from(byte)])
    }

    /// Hash a connection from the perspective of its return traffic.
    ///
    /// All values are in host order. A connection from `src:sport` to `dst:dport` receives packets
    /// with source `dst:dport`, hence the destination is hashed first. The result equals the
    /// [`packet_hash`] of such a return packet.
    ///
    /// [`packet_hash`]: #method.packet_hash
    pub fn connection_hash(&self, dst: Ipv4Addr, src: Ipv4Addr, dport: u16, sport: u16) -> u32 {
        let mut input = [0; INPUT_LEN];
        input[0..4].copy_from_slice(&dst.octets());
        input[4..8].copy_from_slice(&src.octets());
        NetworkEndian::write_u16(&mut input[8..10], dport);
        NetworkEndian::write_u16(&mut input[10..12], sport);
        self.hash_bytes(&input)
    }

    /// Hash values that are already in network order.
    ///
    /// This is the order of the raw header fields, the integers are simply reinterpreted as their
    /// in-memory bytes.
    pub fn packet_hash(&self, local: u32, remote: u32, lport: u16, rport: u16) -> u32 {
        let mut input = [0; INPUT_LEN];
        input[0..4].copy_from_slice(&local.to_ne_bytes());
        input[4..8].copy_from_slice(&remote.to_ne_bytes());
        input[8..10].copy_from_slice(&lport.to_ne_bytes());
        input[10..12].copy_from_slice(&rport.to_ne_bytes());
        self.hash_bytes(&input)
    }

    /// Hash a packet with host order header values.
    ///
    /// Convenience for `packet_hash` with the conversion to network order done here.
    pub fn header_hash(&self, src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16) -> u32 {
        self.packet_hash(
            u32::from(src).to_be(),
            u32::from(dst).to_be(),
            sport.to_be(),
            dport.to_be())
    }

    /// Check both entry points against the known answer vector.
    ///
    /// A mismatch means software and hardware disagree on which core owns a connection. Nothing
    /// works reliably in that case and start-up must be aborted.
    pub fn self_test(&self) -> Result<()> {
        let src = Ipv4Addr::from(vector::SRC);
        let dst = Ipv4Addr::from(vector::DST);

        let host = self.connection_hash(src, dst, vector::SRC_PORT, vector::DST_PORT);
        if host != vector::HASH {
            return Err(Error::SelfTest { expected: vector::HASH, got: host });
        }

        let raw = self.header_hash(src, dst, vector::SRC_PORT, vector::DST_PORT);
        if raw != vector::HASH {
            return Err(Error::SelfTest { expected: vector::HASH, got: raw });
        }

        Ok(())
    }
}

impl Default for Toeplitz {
    fn default() -> Self {
        Toeplitz::new()
    }
}

/// Select the hardware queue that the NIC uses for a hash.
///
/// Assumes the redirection table is filled round-robin over the queues.
///
/// ## Panics
/// If `reta_size` or `queue_count` is zero.
pub fn queue_index(hash: u32, reta_size: u16, queue_count: u16) -> u16 {
    ((hash % u32::from(reta_size)) % u32::from(queue_count)) as u16
}
