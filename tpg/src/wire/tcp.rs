use core::{cmp, fmt, ops};
use std::net::Ipv4Addr;

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>.
/// Sequence numbers do not have a discontiguity when compared pairwise across a signed overflow:
/// `a < b` holds when the signed difference `a - b` is negative. This makes comparisons
/// consistent for any two numbers less than 2<sup>31</sup> apart, which covers every window
/// that TCP can describe.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub u32);

impl SeqNumber {
    /// The distance from `earlier` to `self`, modulo 2<sup>32</sup>.
    ///
    /// Unlike the `Sub` operator this does not require `earlier <= self`.
    pub fn wrapping_diff(self, earlier: SeqNumber) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Check if the sequence number lies in the half-open window `[start, start + len)`.
    pub fn in_window(self, start: SeqNumber, len: u32) -> bool {
        start <= self && self < start + len
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl ops::Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}

impl ops::AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl ops::Sub for SeqNumber {
    type Output = u32;

    /// The number of bytes from `rhs` to `self`.
    ///
    /// ## Panics
    /// When `rhs` is after `self`, which indicates a bookkeeping bug.
    fn sub(self, rhs: SeqNumber) -> u32 {
        let result = self.0.wrapping_sub(rhs.0);
        if (result as i32) < 0 {
            panic!("attempt to subtract sequence numbers with underflow")
        }
        result
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        (self.0.wrapping_sub(other.0) as i32).partial_cmp(&0)
    }
}

/// A set of tcp flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

mod field {
    pub(super) const FLG_FIN: u16 = 0x001;
    pub(super) const FLG_SYN: u16 = 0x002;
    pub(super) const FLG_RST: u16 = 0x004;
    pub(super) const FLG_PSH: u16 = 0x008;
    pub(super) const FLG_ACK: u16 = 0x010;
    pub(super) const FLG_URG: u16 = 0x020;
}

impl Flags {
    /// Only the FIN flag.
    pub const FIN: Flags = Flags(field::FLG_FIN);
    /// Only the SYN flag.
    pub const SYN: Flags = Flags(field::FLG_SYN);
    /// Only the RST flag.
    pub const RST: Flags = Flags(field::FLG_RST);
    /// Only the PSH flag.
    pub const PSH: Flags = Flags(field::FLG_PSH);
    /// Only the ACK flag.
    pub const ACK: Flags = Flags(field::FLG_ACK);
    /// Only the URG flag.
    pub const URG: Flags = Flags(field::FLG_URG);

    /// Return the FIN flag.
    #[inline]
    pub fn fin(self) -> bool {
        self.0 & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    #[inline]
    pub fn syn(self) -> bool {
        self.0 & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    #[inline]
    pub fn rst(self) -> bool {
        self.0 & field::FLG_RST != 0
    }

    /// Return the PSH flag.
    #[inline]
    pub fn psh(self) -> bool {
        self.0 & field::FLG_PSH != 0
    }

    /// Return the ACK flag.
    #[inline]
    pub fn ack(self) -> bool {
        self.0 & field::FLG_ACK != 0
    }

    /// Return the URG flag.
    #[inline]
    pub fn urg(self) -> bool {
        self.0 & field::FLG_URG != 0
    }

    /// Set or clear the ACK flag.
    #[inline]
    pub fn set_ack(&mut self, value: bool) {
        let flag = if value { field::FLG_ACK } else { 0 };
        let without = self.0 & !field::FLG_ACK;
        self.0 = without | flag;
    }

    /// Set or clear the PSH flag.
    #[inline]
    pub fn set_psh(&mut self, value: bool) {
        let flag = if value { field::FLG_PSH } else { 0 };
        let without = self.0 & !field::FLG_PSH;
        self.0 = without | flag;
    }

    /// Return the length of the control flags, in terms of sequence space.
    pub fn sequence_len(self) -> u32 {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 } else { 0 })
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let named = [
            (self.urg(), 'u'),
            (self.ack(), 'a'),
            (self.psh(), 'p'),
            (self.rst(), 'r'),
            (self.syn(), 's'),
            (self.fin(), 'f'),
        ];
        for &(set, name) in named.iter() {
            write!(f, "{}", if set { name } else { '-' })?;
        }
        Ok(())
    }
}

/// A high-level representation of a Transmission Control Protocol segment.
///
/// Addresses are those of the IPv4 header and in host order. The same representation serves for
/// inbound segments, where `dst` is the local side, and for outbound ones where `src` is.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Segment {
    /// Source address from the IPv4 header.
    pub src_addr: Ipv4Addr,
    /// Destination address from the IPv4 header.
    pub dst_addr: Ipv4Addr,
    /// The source port.
    pub src_port: u16,
    /// The destination port.
    pub dst_port: u16,
    /// The control flags.
    pub flags: Flags,
    /// The sequence number of the first byte (or SYN).
    pub seq_number: SeqNumber,
    /// The acknowledgement number, meaningful only when the ACK flag is set.
    pub ack_number: SeqNumber,
    /// The advertised receive window.
    pub window_len: u16,
    /// The segment text.
    pub payload: Vec<u8>,
    /// The hash computed by the receiving NIC, if it provided one.
    pub rss_hash: Option<u32>,
}

impl Segment {
    /// Create a segment without payload.
    pub fn control(
        src: (Ipv4Addr, u16),
        dst: (Ipv4Addr, u16),
        flags: Flags,
        seq_number: SeqNumber,
        ack_number: SeqNumber,
    ) -> Self {
        Segment {
            src_addr: src.0,
            dst_addr: dst.0,
            src_port: src.1,
            dst_port: dst.1,
            flags,
            seq_number,
            ack_number,
            window_len: 0,
            payload: Vec::new(),
            rss_hash: None,
        }
    }

    /// The acknowledgement number if the ACK flag is present.
    pub fn ack(&self) -> Option<SeqNumber> {
        if self.flags.ack() {
            Some(self.ack_number)
        } else {
            None
        }
    }

    /// The number of payload bytes.
    pub fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> u32 {
        self.payload_len() + self.flags.sequence_len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn seq_wraparound() {
        assert!(SeqNumber(0xFFFF_FFFF) < SeqNumber(1));
        assert!(SeqNumber(1) > SeqNumber(0xFFFF_FFFF));
        assert!(!(SeqNumber(1) < SeqNumber(0xFFFF_FFFF)));
        assert_eq!(SeqNumber(0xFFFF_FFFF) + 2, SeqNumber(1));
        assert_eq!(SeqNumber(1) - SeqNumber(0xFFFF_FFFF), 2);
        assert_eq!(SeqNumber(1) - 2, SeqNumber(0xFFFF_FFFF));
    }

    #[test]
    #[should_panic]
    fn seq_sub_underflow() {
        let _ = SeqNumber(5) - SeqNumber(6);
    }

    #[test]
    fn seq_window() {
        let start = SeqNumber(0xFFFF_FFF0);
        assert!(start.in_window(start, 1));
        assert!((start + 0x1f).in_window(start, 0x20));
        assert!(!(start + 0x20).in_window(start, 0x20));
        assert!(!(start - 1).in_window(start, 0x20));
        assert!(!start.in_window(start, 0));
    }

    #[test]
    fn flags() {
        let mut flags = Flags::SYN | Flags::ACK;
        assert!(flags.syn() && flags.ack());
        assert!(!flags.fin() && !flags.rst());
        assert_eq!(flags.sequence_len(), 1);
        flags.set_ack(false);
        assert_eq!(flags, Flags::SYN);
        assert_eq!(format!("{:?}", Flags::FIN | Flags::ACK), "-a---f");
    }

    proptest! {
        #[test]
        fn seq_order_is_antisymmetric(a: u32, b: u32) {
            let (a, b) = (SeqNumber(a), SeqNumber(b));
            prop_assume!(a.0.wrapping_sub(b.0) != 0x8000_0000);
            if a != b {
                prop_assert!((a < b) != (b < a));
            } else {
                prop_assert!(!(a < b) && !(b < a));
            }
        }

        #[test]
        fn seq_add_moves_forward(a: u32, len in 1u32..0x8000_0000) {
            let start = SeqNumber(a);
            prop_assert!(start < start + len);
            prop_assert_eq!((start + len) - start, len);
        }
    }
}
