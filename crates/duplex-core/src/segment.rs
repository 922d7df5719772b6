//! Segment codec on top of the ring buffer
//!
//! A segment is a header `{ancillary_len, normal_len}` followed in the ring
//! by `ancillary_len` bytes of control records and then `normal_len` bytes
//! of stream data. The header of the segment being read always sits at the
//! front of the ring; consuming bytes rewrites it further along.
//!
//! Writers append to the segment at `last_header` while it stays
//! compatible: normal bytes may always extend it, ancillary bytes only while
//! it carries no normal bytes yet. Anything else opens a new segment.

use crate::ring::RingBuffer;

/// Encoded size of a segment header
pub const SEGMENT_HEADER_SIZE: usize = 8;

/// Lengths of the two regions of one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    pub ancillary_len: u32,
    pub normal_len: u32,
}

impl SegmentHeader {
    pub fn encode(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut out = [0u8; SEGMENT_HEADER_SIZE];
        out[..4].copy_from_slice(&self.ancillary_len.to_ne_bytes());
        out[4..].copy_from_slice(&self.normal_len.to_ne_bytes());
        out
    }

    pub fn decode(raw: &[u8; SEGMENT_HEADER_SIZE]) -> Self {
        Self {
            ancillary_len: u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
            normal_len: u32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    #[inline]
    pub fn body_len(&self) -> usize {
        self.ancillary_len as usize + self.normal_len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ancillary_len == 0 && self.normal_len == 0
    }

    #[inline]
    pub fn has_ancillary(&self) -> bool {
        self.ancillary_len != 0
    }
}

/// Tail state captured before writing a control message
#[derive(Debug, Clone, Copy)]
pub struct EnqueueMark {
    used: usize,
    last_header: usize,
    header: Option<SegmentHeader>,
}

/// Queue of segments stored in a `RingBuffer`
pub struct SegmentQueue {
    ring: RingBuffer,
    /// Front-relative position of the most recently opened header
    last_header: usize,
}

impl SegmentQueue {
    pub fn new(size: usize) -> Self {
        Self {
            ring: RingBuffer::new(size),
            last_header: 0,
        }
    }

    #[inline]
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.ring.used()
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn last_header_position(&self) -> usize {
        self.last_header
    }

    fn read_header(&self, position: usize) -> SegmentHeader {
        let mut raw = [0u8; SEGMENT_HEADER_SIZE];
        self.ring.read_at(position, &mut raw);
        SegmentHeader::decode(&raw)
    }

    fn write_header(&mut self, position: usize, header: SegmentHeader) {
        self.ring.write_at(position, &header.encode());
    }

    /// Header of the segment starting at `position`
    pub fn header_at(&self, position: usize) -> SegmentHeader {
        debug_assert!(position + SEGMENT_HEADER_SIZE <= self.used());
        self.read_header(position)
    }

    /// Header of the front segment, if any
    pub fn front(&self) -> Option<SegmentHeader> {
        if self.is_empty() {
            None
        } else {
            Some(self.read_header(0))
        }
    }

    /// Position of the segment following the one at `position`
    pub fn next_position(&self, position: usize) -> Option<usize> {
        let next = position + SEGMENT_HEADER_SIZE + self.header_at(position).body_len();
        if next < self.used() {
            Some(next)
        } else {
            None
        }
    }

    /// Whether the last segment can absorb bytes of the given kind
    pub fn can_extend(&self, ancillary: bool) -> bool {
        if self.is_empty() {
            return false;
        }
        !ancillary || self.read_header(self.last_header).normal_len == 0
    }

    /// Header bytes an enqueue of this kind would spend
    #[inline]
    pub fn header_cost(&self, ancillary: bool) -> usize {
        if self.can_extend(ancillary) {
            0
        } else {
            SEGMENT_HEADER_SIZE
        }
    }

    /// Payload bytes of this kind that fit right now
    pub fn writable(&self, ancillary: bool) -> usize {
        self.free().saturating_sub(self.header_cost(ancillary))
    }

    pub fn mark(&self) -> EnqueueMark {
        EnqueueMark {
            used: self.used(),
            last_header: self.last_header,
            header: self.front().map(|_| self.read_header(self.last_header)),
        }
    }

    /// Append `src` to the tail, extending or opening a segment.
    ///
    /// The caller has already checked that `writable(ancillary)` covers
    /// `src`; this never waits or fails.
    pub fn enqueue(&mut self, src: &[u8], ancillary: bool) {
        if src.is_empty() {
            return;
        }
        let len = src.len() as u32;
        let mut header = if self.can_extend(ancillary) {
            self.read_header(self.last_header)
        } else {
            self.last_header = self.used();
            self.ring.commit(SEGMENT_HEADER_SIZE);
            SegmentHeader::default()
        };
        assert!(src.len() <= self.free(), "enqueue past ring capacity");

        let tail = self.used();
        self.ring.write_at(tail, src);
        self.ring.commit(src.len());
        if ancillary {
            header.ancillary_len += len;
        } else {
            header.normal_len += len;
        }
        self.write_header(self.last_header, header);
    }

    /// Undo every enqueue since `mark`, returning the bytes removed
    pub fn unenqueue(&mut self, mark: EnqueueMark) -> usize {
        let removed = self.used() - mark.used;
        self.ring.uncommit(removed);
        self.last_header = mark.last_header;
        if let Some(header) = mark.header {
            self.write_header(self.last_header, header);
        }
        removed
    }

    /// Copy ring bytes at a front-relative position without consuming them
    pub fn copy_out(&self, position: usize, dst: &mut [u8]) {
        debug_assert!(position + dst.len() <= self.used());
        self.ring.read_at(position, dst);
    }

    /// Consume `amount` body bytes of the front segment, ancillary first.
    ///
    /// Copies them into `dst` when given. Removes the header once both
    /// regions are drained and resets the layout once the ring is empty.
    pub fn dequeue(&mut self, dst: Option<&mut [u8]>, amount: usize) {
        let mut header = match self.front() {
            Some(header) => header,
            None => return,
        };
        assert!(amount <= header.body_len(), "dequeue past segment end");
        if let Some(dst) = dst {
            self.ring.read_at(SEGMENT_HEADER_SIZE, &mut dst[..amount]);
        }

        let from_ancillary = amount.min(header.ancillary_len as usize);
        header.ancillary_len -= from_ancillary as u32;
        header.normal_len -= (amount - from_ancillary) as u32;

        if header.is_empty() {
            self.ring.advance(SEGMENT_HEADER_SIZE + amount);
            self.last_header = self
                .last_header
                .saturating_sub(SEGMENT_HEADER_SIZE + amount);
        } else {
            self.ring.advance(amount);
            self.write_header(0, header);
            self.last_header = self.last_header.saturating_sub(amount);
        }
        if self.is_empty() {
            self.last_header = 0;
        }
    }

    /// Reallocate the ring; live segments keep their relative layout
    pub fn resize(&mut self, new_size: usize) {
        self.ring.resize(new_size);
    }
}

impl std::fmt::Debug for SegmentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentQueue")
            .field("ring", &self.ring)
            .field("last_header", &self.last_header)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const H: usize = SEGMENT_HEADER_SIZE;

    fn drain_normal(q: &mut SegmentQueue) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(h) = q.front() {
            assert_eq!(h.ancillary_len, 0);
            let mut buf = vec![0u8; h.normal_len as usize];
            q.dequeue(Some(&mut buf[..]), h.normal_len as usize);
            out.extend_from_slice(&buf);
        }
        out
    }

    #[test]
    fn test_header_codec() {
        let h = SegmentHeader { ancillary_len: 12, normal_len: 7 };
        assert_eq!(SegmentHeader::decode(&h.encode()), h);
        assert_eq!(h.body_len(), 19);
    }

    #[test]
    fn test_normal_writes_share_one_segment() {
        let mut q = SegmentQueue::new(64);
        q.enqueue(b"abc", false);
        q.enqueue(b"de", false);
        assert_eq!(q.used(), H + 5);
        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 0, normal_len: 5 }));
        assert_eq!(drain_normal(&mut q), b"abcde");
        assert!(q.is_empty());
    }

    #[test]
    fn test_ancillary_after_normal_opens_segment() {
        let mut q = SegmentQueue::new(64);
        q.enqueue(b"xy", false);
        assert!(!q.can_extend(true));
        assert_eq!(q.header_cost(true), H);
        q.enqueue(b"CTRL", true);
        assert_eq!(q.last_header_position(), H + 2);
        q.enqueue(b"z", false);

        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 0, normal_len: 2 }));
        let second = q.next_position(0).unwrap();
        assert_eq!(
            q.header_at(second),
            SegmentHeader { ancillary_len: 4, normal_len: 1 }
        );
        assert_eq!(q.next_position(second), None);
    }

    #[test]
    fn test_ancillary_extends_ancillary_only_segment() {
        let mut q = SegmentQueue::new(64);
        q.enqueue(b"AA", true);
        assert!(q.can_extend(true));
        q.enqueue(b"BB", true);
        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 4, normal_len: 0 }));
    }

    #[test]
    fn test_dequeue_consumes_ancillary_first() {
        let mut q = SegmentQueue::new(64);
        q.enqueue(b"AAAA", true);
        q.enqueue(b"data", false);

        let mut anc = [0u8; 4];
        q.dequeue(Some(&mut anc[..]), 4);
        assert_eq!(&anc, b"AAAA");
        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 0, normal_len: 4 }));
        assert_eq!(q.last_header_position(), 0);

        assert_eq!(drain_normal(&mut q), b"data");
        assert_eq!(q.ring().offset(), 0);
        assert_eq!(q.last_header_position(), 0);
    }

    #[test]
    fn test_dequeue_keeps_last_header_in_sync() {
        let mut q = SegmentQueue::new(64);
        q.enqueue(b"one", false);
        q.enqueue(b"C", true);
        let last = q.last_header_position();
        assert_eq!(last, H + 3);

        q.dequeue(None, 2);
        assert_eq!(q.last_header_position(), last - 2);
        q.dequeue(None, 1);
        assert_eq!(q.last_header_position(), 0);
        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 1, normal_len: 0 }));

        // Appending normal data lands in the surviving segment
        q.enqueue(b"tail", false);
        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 1, normal_len: 4 }));
    }

    #[test]
    fn test_unenqueue_restores_extended_segment() {
        let mut q = SegmentQueue::new(64);
        q.enqueue(b"AB", true);
        let before = q.used();
        let mark = q.mark();
        q.enqueue(b"CDEF", true);
        assert_eq!(q.unenqueue(mark), 4);
        assert_eq!(q.used(), before);
        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 2, normal_len: 0 }));
    }

    #[test]
    fn test_unenqueue_removes_opened_segment() {
        let mut q = SegmentQueue::new(64);
        q.enqueue(b"data", false);
        let snapshot = {
            let mut raw = vec![0u8; q.used()];
            q.copy_out(0, &mut raw);
            raw
        };
        let mark = q.mark();
        q.enqueue(b"CTRL", true);
        assert_eq!(q.unenqueue(mark), H + 4);

        let mut raw = vec![0u8; q.used()];
        q.copy_out(0, &mut raw);
        assert_eq!(raw, snapshot);
        assert_eq!(q.last_header_position(), 0);
        assert!(q.can_extend(false));
    }

    #[test]
    fn test_wrapped_header_survives() {
        let mut q = SegmentQueue::new(24);
        q.enqueue(&[1u8; 12], false);
        q.dequeue(None, 12);
        assert!(q.is_empty());

        q.enqueue(&[2u8; 10], false);
        q.dequeue(None, 6);
        // Front header now at physical index 6; next segment header wraps
        q.enqueue(b"CT", true);
        q.enqueue(b"zz", false);
        let second = q.next_position(0).unwrap();
        assert_eq!(
            q.header_at(second),
            SegmentHeader { ancillary_len: 2, normal_len: 2 }
        );
    }

    #[test]
    fn test_resize_preserves_segments() {
        let mut q = SegmentQueue::new(32);
        q.enqueue(&[9u8; 10], false);
        q.dequeue(None, 4);
        q.enqueue(b"Q", true);
        q.resize(128);
        assert_eq!(q.size(), 128);
        assert_eq!(q.front(), Some(SegmentHeader { ancillary_len: 0, normal_len: 6 }));
        let second = q.next_position(0).unwrap();
        assert_eq!(second, q.last_header_position());
        assert_eq!(q.header_at(second).ancillary_len, 1);
    }

    proptest! {
        #[test]
        fn bytes_out_equal_bytes_in(
            size in 16usize..96,
            ops in proptest::collection::vec((any::<bool>(), 1usize..40), 1..64),
        ) {
            let mut q = SegmentQueue::new(size);
            let mut written = Vec::new();
            let mut read = Vec::new();
            let mut counter = 0u8;

            for (is_write, len) in ops {
                if is_write {
                    let room = q.writable(false).min(len);
                    let chunk: Vec<u8> = (0..room).map(|_| { counter = counter.wrapping_add(1); counter }).collect();
                    q.enqueue(&chunk, false);
                    written.extend_from_slice(&chunk);
                } else if let Some(h) = q.front() {
                    let take = (h.normal_len as usize).min(len);
                    let mut buf = vec![0u8; take];
                    q.dequeue(Some(&mut buf[..]), take);
                    read.extend_from_slice(&buf);
                }
            }
            read.extend(drain_normal(&mut q));
            prop_assert_eq!(read, written);
            prop_assert!(q.is_empty());
        }
    }
}
