//! Packet buffer with head/tail room for prepend-friendly header layering.
//!
//! Building an OpenVPN wire packet means stacking headers outward-in: the
//! data-channel codec writes packet-id and ciphertext, the control wrapper
//! prepends HMAC/tls-crypt framing around that, and a stream transport
//! prepends a 16-bit length on top of everything. Allocating a single
//! buffer with slack on both ends lets every layer prepend or append
//! in-place instead of copying into a fresh buffer at each step.

use bytes::{Bytes, BytesMut};

/// How much head-room and tail-room to reserve around a payload.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Bytes reserved before the payload for outward header prepends.
    pub head_room: usize,
    /// Bytes reserved after the payload for outward trailer appends.
    pub tail_room: usize,
    /// Expected payload size, used only to size the initial allocation.
    pub payload_hint: usize,
}

impl Frame {
    /// A frame sized for a full OpenVPN packet: enough head-room for
    /// op-byte + peer-id + control wrapping, enough tail-room for an AEAD
    /// tag, sized around a typical tunnel MTU.
    pub const STANDARD: Frame = Frame {
        head_room: 64,
        tail_room: 32,
        payload_hint: 1400,
    };

    /// A frame with no slack, for buffers built bottom-up (tests, small
    /// fixed messages).
    pub const TIGHT: Frame = Frame {
        head_room: 0,
        tail_room: 0,
        payload_hint: 0,
    };
}

/// A linear byte buffer with O(1) prepend and append.
///
/// Internally this keeps one allocation split into `[head_room |
/// payload | tail_room]`; prepend/append write into the reserved slack
/// and shrink it, so no layer of header-stacking needs to copy the whole
/// packet. Insufficient head-room or tail-room is a programming error
/// (the frame should have reserved enough for every layer that will run)
/// and panics rather than silently reallocating mid-stack.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    storage: BytesMut,
    /// Offset of the current payload start within `storage`.
    start: usize,
    /// Offset one past the current payload end within `storage`.
    end: usize,
}

impl PacketBuffer {
    /// Allocate a buffer per `frame`, with an empty payload positioned so
    /// `frame.head_room` bytes precede it and `frame.tail_room` bytes
    /// follow it.
    pub fn new(frame: Frame) -> Self {
        let capacity = frame.head_room + frame.payload_hint + frame.tail_room;
        let mut storage = BytesMut::zeroed(capacity);
        storage.truncate(capacity);
        Self {
            storage,
            start: frame.head_room,
            end: frame.head_room,
        }
    }

    /// Build a buffer from an existing payload, reserving `frame`'s
    /// head/tail room around it.
    pub fn from_payload(frame: Frame, payload: &[u8]) -> Self {
        let mut buf = Self::new(Frame {
            head_room: frame.head_room,
            tail_room: frame.tail_room,
            payload_hint: payload.len(),
        });
        buf.append(payload);
        buf
    }

    /// Current head-room: bytes available to prepend without reallocating.
    pub fn head_room(&self) -> usize {
        self.start
    }

    /// Current tail-room: bytes available to append without reallocating.
    pub fn tail_room(&self) -> usize {
        self.storage.len() - self.end
    }

    /// The current payload as a slice.
    pub fn view(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Prepend `bytes` in place. Fails fast (panics) if head-room is
    /// insufficient -- the caller under-reserved the frame, which is a
    /// programming error, not a runtime condition to recover from.
    pub fn prepend(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.head_room(),
            "PacketBuffer::prepend: insufficient head-room ({} needed, {} available)",
            bytes.len(),
            self.head_room()
        );
        self.start -= bytes.len();
        self.storage[self.start..self.start + bytes.len()].copy_from_slice(bytes);
    }

    /// Append `bytes` in place. Fails fast (panics) if tail-room is
    /// insufficient.
    pub fn append(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.tail_room(),
            "PacketBuffer::append: insufficient tail-room ({} needed, {} available)",
            bytes.len(),
            self.tail_room()
        );
        self.storage[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
    }

    /// Consume `n` bytes from the front of the payload (e.g. after
    /// stripping a verified header), advancing head-room.
    pub fn consume_front(&mut self, n: usize) {
        assert!(
            n <= self.len(),
            "PacketBuffer::consume_front: {} exceeds payload length {}",
            n,
            self.len()
        );
        self.start += n;
    }

    /// Consume `n` bytes from the back of the payload (e.g. after
    /// stripping a verified trailer).
    pub fn consume_back(&mut self, n: usize) {
        assert!(
            n <= self.len(),
            "PacketBuffer::consume_back: {} exceeds payload length {}",
            n,
            self.len()
        );
        self.end -= n;
    }

    /// Take ownership of the payload as `Bytes`, discarding the slack.
    pub fn freeze(self) -> Bytes {
        Bytes::copy_from_slice(self.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_append_roundtrip() {
        let mut buf = PacketBuffer::from_payload(Frame::STANDARD, b"payload");
        buf.prepend(b"HDR");
        buf.append(b"TAIL");
        assert_eq!(buf.view(), b"HDRpayloadTAIL");
    }

    #[test]
    fn test_consume_front_strips_header() {
        let mut buf = PacketBuffer::from_payload(Frame::STANDARD, b"HDRpayload");
        buf.consume_front(3);
        assert_eq!(buf.view(), b"payload");
    }

    #[test]
    fn test_consume_back_strips_trailer() {
        let mut buf = PacketBuffer::from_payload(Frame::STANDARD, b"payloadTAG");
        buf.consume_back(3);
        assert_eq!(buf.view(), b"paylo");
    }

    #[test]
    #[should_panic(expected = "insufficient head-room")]
    fn test_prepend_beyond_head_room_panics() {
        let mut buf = PacketBuffer::from_payload(Frame::TIGHT, b"x");
        buf.prepend(b"too much");
    }

    #[test]
    fn test_layered_header_stacking() {
        // Simulates op-byte + peer-id prepended outward over ciphertext.
        let mut buf = PacketBuffer::from_payload(Frame::STANDARD, b"ciphertext+tag");
        buf.prepend(&[0x00, 0x00, 0x01]); // peer-id
        buf.prepend(&[0x48]); // op-byte
        assert_eq!(buf.view(), b"\x48\x00\x00\x01ciphertext+tag");
    }
}
