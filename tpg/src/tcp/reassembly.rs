//! Out of order data of a receiving connection.
use core::fmt;

use crate::wire::TcpSeqNumber;

/// Received data that can not be delivered yet.
///
/// The chunks are ordered by their starting sequence number, disjoint and never adjacent: data
/// that touches or overlaps a chunk is merged into it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Reassembly {
    chunks: Vec<Chunk>,
}

#[derive(Clone, PartialEq, Eq)]
struct Chunk {
    seq: TcpSeqNumber,
    data: Vec<u8>,
}

impl Chunk {
    fn end(&self) -> TcpSeqNumber {
        self.seq + self.data.len() as u32
    }
}

impl Reassembly {
    /// Store data starting at `seq`.
    ///
    /// Bytes already stored are kept, only the new parts of `data` are added.
    pub fn insert(&mut self, seq: TcpSeqNumber, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let end = seq + data.len() as u32;
        let idx = self.chunks.iter()
            .position(|chunk| chunk.end() >= seq)
            .unwrap_or(self.chunks.len());

        match self.chunks.get(idx) {
            Some(chunk) if chunk.seq <= end => {},
            _ => {
                self.chunks.insert(idx, Chunk { seq, data: data.to_vec() });
                return;
            },
        }

        let chunk = &mut self.chunks[idx];
        if seq < chunk.seq {
            let mut front = data[..(chunk.seq - seq) as usize].to_vec();
            front.append(&mut chunk.data);
            chunk.data = front;
            chunk.seq = seq;
        }

        if end > chunk.end() {
            let tail = (chunk.end() - seq) as usize;
            chunk.data.extend_from_slice(&data[tail..]);
        }

        // Absorb the chunks that are now covered or touched.
        while idx + 1 < self.chunks.len() && self.chunks[idx + 1].seq <= self.chunks[idx].end() {
            let next = self.chunks.remove(idx + 1);
            let chunk = &mut self.chunks[idx];
            if next.end() > chunk.end() {
                let tail = (chunk.end() - next.seq) as usize;
                chunk.data.extend_from_slice(&next.data[tail..]);
            }
        }
    }

    /// Remove the first chunk if it starts at `seq`.
    pub fn pop_at(&mut self, seq: TcpSeqNumber) -> Option<Vec<u8>> {
        match self.chunks.first() {
            Some(chunk) if chunk.seq == seq => Some(self.chunks.remove(0).data),
            _ => None,
        }
    }

    /// Whether no data is stored.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The number of disjoint chunks.
    pub fn chunks(&self) -> usize {
        self.chunks.len()
    }

    /// The number of stored bytes.
    pub fn bytes(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.data.len()).sum()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.chunks.clear()
    }
}

impl fmt::Debug for Reassembly {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        for chunk in &self.chunks {
            write!(f, "{}..{} ", chunk.seq, chunk.end())?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn seq(value: u32) -> TcpSeqNumber {
        TcpSeqNumber(value)
    }

    #[test]
    fn in_order() {
        let mut asm = Reassembly::default();
        asm.insert(seq(100), b"abc");
        assert_eq!(asm.pop_at(seq(99)), None);
        assert_eq!(asm.pop_at(seq(100)), Some(b"abc".to_vec()));
        assert!(asm.is_empty());
    }

    #[test]
    fn hole_then_fill() {
        let mut asm = Reassembly::default();
        asm.insert(seq(10), b"klm");
        asm.insert(seq(0), b"abc");
        assert_eq!(asm.chunks(), 2);

        // Fills the hole exactly, all three merge.
        asm.insert(seq(3), b"defghij");
        assert_eq!(asm.chunks(), 1);
        assert_eq!(asm.pop_at(seq(0)), Some(b"abcdefghijklm".to_vec()));
    }

    #[test]
    fn overlap_keeps_first() {
        let mut asm = Reassembly::default();
        asm.insert(seq(4), b"EFGH");
        asm.insert(seq(2), b"cdefghij");
        asm.insert(seq(5), b"x");
        assert_eq!(asm.chunks(), 1);
        assert_eq!(asm.bytes(), 8);
        assert_eq!(asm.pop_at(seq(2)), Some(b"cdEFGHij".to_vec()));
    }

    #[test]
    fn covers_several() {
        let mut asm = Reassembly::default();
        asm.insert(seq(2), b"c");
        asm.insert(seq(5), b"f");
        asm.insert(seq(8), b"ij");
        asm.insert(seq(0), b"abcdefgh");
        assert_eq!(asm.chunks(), 1);
        assert_eq!(asm.pop_at(seq(0)), Some(b"abcdefghij".to_vec()));
    }

    #[test]
    fn wrapping() {
        let mut asm = Reassembly::default();
        asm.insert(seq(0), b"cd");
        asm.insert(seq(u32::max_value() - 1), b"ab");
        assert_eq!(asm.chunks(), 1);
        assert_eq!(asm.pop_at(seq(u32::max_value() - 1)), Some(b"abcd".to_vec()));
    }

    proptest! {
        #[test]
        fn any_order(cuts in prop::collection::vec((0usize..64, 1usize..16), 1..24)) {
            let stream: Vec<u8> = (0..80u8).collect();
            let mut asm = Reassembly::default();
            for &(start, len) in &cuts {
                let end = (start + len).min(stream.len());
                asm.insert(seq(1000 + start as u32), &stream[start..end]);
            }

            // Completing the stream from its start always yields it in one piece.
            asm.insert(seq(1000), &stream);
            prop_assert_eq!(asm.chunks(), 1);
            prop_assert_eq!(asm.pop_at(seq(1000)), Some(stream));
        }
    }
}
