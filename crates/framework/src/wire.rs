#![forbid(unsafe_code)]

//! Typed encoding on top of [`FrameBuffer`] and length-delimited framing.
//!
//! Integers are little endian. Strings and byte strings carry a `u32` length,
//! options a `u8` tag, lists a `u32` count. A frame is a `u32` payload length
//! followed by the payload.

use crate::buffer::FrameBuffer;
use crate::error::Error;

pub const LENGTH_PREFIX: usize = size_of::<u32>();

pub trait Encode {
    fn encode(&self, out: &mut FrameBuffer);
}

pub trait Decode: Sized {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error>;
}

macro_rules! int_codec {
    ($($ty:ty),*) => {$(
        impl Encode for $ty {
            fn encode(&self, out: &mut FrameBuffer) {
                out.append_copy(&self.to_le_bytes());
            }
        }

        impl Decode for $ty {
            fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
                let mut raw = [0u8; size_of::<$ty>()];
                buf.flatten_consume(&mut raw)?;
                Ok(<$ty>::from_le_bytes(raw))
            }
        }
    )*};
}

int_codec!(u8, u32, i32, u64, i64);

impl Encode for bool {
    fn encode(&self, out: &mut FrameBuffer) {
        u8::from(*self).encode(out);
    }
}

impl Decode for bool {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
        match u8::decode(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Protocol(format!("invalid bool tag {other}"))),
        }
    }
}

impl Encode for str {
    fn encode(&self, out: &mut FrameBuffer) {
        put_bytes(out, self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, out: &mut FrameBuffer) {
        self.as_str().encode(out);
    }
}

impl Decode for String {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
        String::from_utf8(get_bytes(buf)?)
            .map_err(|err| Error::Protocol(format!("invalid utf-8 string: {err}")))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, out: &mut FrameBuffer) {
        match self {
            Some(value) => {
                1u8.encode(out);
                value.encode(out);
            }
            None => 0u8.encode(out),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
        match u8::decode(buf)? {
            0 => Ok(None),
            1 => T::decode(buf).map(Some),
            other => Err(Error::Protocol(format!("invalid option tag {other}"))),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, out: &mut FrameBuffer) {
        put_len(out, self.len());
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
        let count = u32::decode(buf)? as usize;
        // Every element takes at least one byte, so a count above the
        // remaining size can only come from a corrupted frame.
        if count > buf.size() {
            return Err(Error::Framing {
                requested: count,
                available: buf.size(),
            });
        }
        (0..count).map(|_| T::decode(buf)).collect()
    }
}

fn put_len(out: &mut FrameBuffer, len: usize) {
    // Frames are bounded well below 4 GiB by the framing layer.
    (len as u32).encode(out);
}

/// Write a length-prefixed byte string, copying `bytes`.
pub fn put_bytes(out: &mut FrameBuffer, bytes: &[u8]) {
    put_len(out, bytes.len());
    out.append_copy(bytes);
}

/// Write a length-prefixed byte string, taking ownership of `bytes`.
pub fn put_owned_bytes(out: &mut FrameBuffer, bytes: Vec<u8>) {
    put_len(out, bytes.len());
    out.append_owned(bytes);
}

pub fn get_bytes(buf: &mut FrameBuffer) -> Result<Vec<u8>, Error> {
    let len = u32::decode(buf)? as usize;
    if len > buf.size() {
        return Err(Error::Framing {
            requested: len,
            available: buf.size(),
        });
    }
    let mut bytes = vec![0u8; len];
    buf.flatten_consume(&mut bytes)?;
    Ok(bytes)
}

/// Reject a message with bytes left after its last field.
pub fn expect_end(buf: &FrameBuffer) -> Result<(), Error> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "{} trailing bytes after message",
            buf.size()
        )))
    }
}

/// Prefix `payload` with its length.
pub fn frame(mut payload: FrameBuffer) -> FrameBuffer {
    let mut out = FrameBuffer::new();
    put_len(&mut out, payload.size());
    out.append_move_from(&mut payload);
    out
}

/// Staged bytes move into the bucket list once this many have piled up.
const STAGING_LIMIT: usize = 64 * 1024;

/// Reassembles frames from arbitrarily split reads.
///
/// Small reads are gathered in one staging vector instead of a bucket each,
/// so the storage held stays proportional to the bytes received.
#[derive(Debug)]
pub struct FrameDecoder {
    pending: FrameBuffer,
    staging: Vec<u8>,
    max_frame_size: u32,
}

impl FrameDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            pending: FrameBuffer::new(),
            staging: Vec::new(),
            max_frame_size,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.staging.extend_from_slice(bytes);
        if self.staging.len() >= STAGING_LIMIT {
            self.flush();
        }
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn pending(&self) -> usize {
        self.pending.size() + self.staging.len()
    }

    /// Upper bound of the storage held for [`pending`](Self::pending) bytes.
    pub fn retained(&self) -> usize {
        self.pending.size() + self.staging.capacity()
    }

    /// Pop the next complete frame, if one has fully arrived.
    pub fn next_frame(&mut self) -> Result<Option<FrameBuffer>, Error> {
        let Some(prefix) = self.peek_prefix() else {
            return Ok(None);
        };
        let size = u32::from_le_bytes(prefix);
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        if self.pending() < LENGTH_PREFIX + size as usize {
            return Ok(None);
        }
        self.flush();
        self.pending.consume(LENGTH_PREFIX)?;
        self.pending.split_to(size as usize).map(Some)
    }

    fn peek_prefix(&self) -> Option<[u8; LENGTH_PREFIX]> {
        if self.pending() < LENGTH_PREFIX {
            return None;
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        let head = self.pending.size().min(LENGTH_PREFIX);
        self.pending.flatten(&mut prefix[..head]).ok()?;
        prefix[head..].copy_from_slice(&self.staging[..LENGTH_PREFIX - head]);
        Some(prefix)
    }

    fn flush(&mut self) {
        let mut staged = std::mem::take(&mut self.staging);
        staged.shrink_to_fit();
        self.pending.append_owned(staged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn truncated_integer_is_a_framing_error() {
        let mut buf = FrameBuffer::from(vec![1, 2, 3]);
        assert!(matches!(
            u32::decode(&mut buf),
            Err(Error::Framing {
                requested: 4,
                available: 3
            })
        ));
        assert_eq!(buf.size(), 3);
    }

    #[test]
    fn oversized_length_fields_are_rejected_before_allocating() {
        let mut buf = FrameBuffer::new();
        u32::MAX.encode(&mut buf);
        buf.append_copy(b"short");
        assert!(matches!(get_bytes(&mut buf), Err(Error::Framing { .. })));

        let mut buf = FrameBuffer::new();
        u32::MAX.encode(&mut buf);
        assert!(matches!(
            Vec::<u64>::decode(&mut buf),
            Err(Error::Framing { .. })
        ));
    }

    #[test]
    fn invalid_tags_are_protocol_errors() {
        let mut buf = FrameBuffer::from(vec![7]);
        assert!(matches!(bool::decode(&mut buf), Err(Error::Protocol(_))));

        let mut buf = FrameBuffer::from(vec![2, 0, 0]);
        assert!(matches!(
            Option::<u8>::decode(&mut buf),
            Err(Error::Protocol(_))
        ));

        let mut buf = FrameBuffer::new();
        put_bytes(&mut buf, &[0xff, 0xfe]);
        assert!(matches!(String::decode(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn mixed_fields_decode_in_order() {
        let mut buf = FrameBuffer::new();
        (-5i32).encode(&mut buf);
        "name".encode(&mut buf);
        Some(9u64).encode(&mut buf);
        vec![String::from("a"), String::from("bc")].encode(&mut buf);
        put_owned_bytes(&mut buf, vec![1, 2, 3]);

        assert_eq!(i32::decode(&mut buf).unwrap(), -5);
        assert_eq!(String::decode(&mut buf).unwrap(), "name");
        assert_eq!(Option::<u64>::decode(&mut buf).unwrap(), Some(9));
        assert_eq!(Vec::<String>::decode(&mut buf).unwrap(), vec!["a", "bc"]);
        assert_eq!(get_bytes(&mut buf).unwrap(), vec![1, 2, 3]);
        expect_end(&buf).unwrap();
    }

    #[test]
    fn decoder_rejects_frames_above_the_limit() {
        let mut decoder = FrameDecoder::new(16);
        decoder.feed(&17u32.to_le_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(Error::FrameTooLarge { size: 17, limit: 16 })
        ));
    }

    #[test]
    fn trickled_bytes_are_held_compactly() {
        let mut decoder = FrameDecoder::new(1 << 20);
        decoder.feed(&(1u32 << 20).to_le_bytes());
        for _ in 0..200 {
            decoder.feed(&[0xab]);
            assert!(decoder.next_frame().unwrap().is_none());
        }
        assert_eq!(decoder.pending(), LENGTH_PREFIX + 200);
        assert!(decoder.retained() < 1024, "retained {}", decoder.retained());
    }

    #[test]
    fn frame_completes_across_staged_and_flushed_bytes() {
        let mut decoder = FrameDecoder::new(1 << 20);
        let payload = vec![7u8; STAGING_LIMIT + 10];
        let stream = frame(FrameBuffer::from(payload.clone())).to_vec();
        let (head, tail) = stream.split_at(STAGING_LIMIT + 2);
        decoder.feed(head);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(tail);
        assert_eq!(decoder.next_frame().unwrap().unwrap().to_vec(), payload);
        assert_eq!(decoder.pending(), 0);
    }

    proptest! {
        #[test]
        fn decoder_reassembles_split_frames(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..6),
            split in 1usize..16,
        ) {
            let mut stream = Vec::new();
            for payload in &payloads {
                stream.extend(frame(FrameBuffer::from(payload.clone())).to_vec());
            }

            let mut decoder = FrameDecoder::new(1024);
            let mut frames = Vec::new();
            for piece in stream.chunks(split) {
                decoder.feed(piece);
                while let Some(frame) = decoder.next_frame().unwrap() {
                    frames.push(frame.to_vec());
                }
            }

            prop_assert_eq!(frames, payloads);
            prop_assert_eq!(decoder.pending(), 0);
        }
    }
}
