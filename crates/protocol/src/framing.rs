//! MudMode framing: every packet on the router connection is a 4-byte
//! big-endian length followed by exactly that many bytes of LPC payload.
//!
//! [`MudModeCodec`] plugs into `tokio_util::codec::Framed` and owns all
//! partial-read buffering: the decoder never yields a misaligned frame,
//! no matter how the underlying stream splits its reads. Oversized frames
//! are rejected from the length prefix alone, before any payload is read.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::lpc::{self, LpcError, LpcValue};

const LEN_PREFIX: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds max frame size {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("malformed LPC payload: {0}")]
    Lpc(#[from] LpcError),
}

/// Codec for length-prefixed LPC frames.
///
/// An oversized frame is reported as an error once, then silently
/// discarded as its bytes stream in, so the caller can keep polling and
/// the stream never desynchronizes.
#[derive(Debug, Clone)]
pub struct MudModeCodec {
    max_frame: usize,
    /// Bytes of an oversized frame still to discard.
    skip_remaining: usize,
}

impl MudModeCodec {
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            skip_remaining: 0,
        }
    }
}

impl Decoder for MudModeCodec {
    type Item = LpcValue;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LpcValue>, CodecError> {
        // Finish discarding a previously rejected oversized frame.
        if self.skip_remaining > 0 {
            let discard = self.skip_remaining.min(src.len());
            src.advance(discard);
            self.skip_remaining -= discard;
            if self.skip_remaining > 0 {
                return Ok(None);
            }
        }

        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let frame_len = u32::from_be_bytes(len_bytes) as usize;

        if frame_len == 0 {
            src.advance(LEN_PREFIX);
            return Err(CodecError::EmptyFrame);
        }
        if frame_len > self.max_frame {
            // Reject from the prefix alone; the payload is never
            // buffered, just discarded as it arrives.
            src.advance(LEN_PREFIX);
            let discard = frame_len.min(src.len());
            src.advance(discard);
            self.skip_remaining = frame_len - discard;
            return Err(CodecError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame,
            });
        }

        if src.len() < LEN_PREFIX + frame_len {
            // Partial frame: reserve what we still need and wait for more.
            src.reserve(LEN_PREFIX + frame_len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let payload = src.split_to(frame_len);
        Ok(Some(lpc::decode(&payload)?))
    }
}

impl Encoder<LpcValue> for MudModeCodec {
    type Error = CodecError;

    fn encode(&mut self, value: LpcValue, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = lpc::encode(&value);
        if payload.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame,
            });
        }
        dst.reserve(LEN_PREFIX + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(value: &LpcValue) -> BytesMut {
        let mut codec = MudModeCodec::new(32 * 1024);
        let mut buf = BytesMut::new();
        codec.encode(value.clone(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn encode_prefixes_payload_length() {
        let buf = frame_bytes(&LpcValue::Int(7));
        // 5-byte LPC int payload behind a 4-byte prefix.
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn round_trip_one_frame() {
        let value = LpcValue::Array(vec![LpcValue::str("mudlist"), LpcValue::Int(5)]);
        let mut buf = frame_bytes(&value);
        let mut codec = MudModeCodec::new(32 * 1024);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, value);
        assert!(buf.is_empty());
    }

    #[test]
    fn two_frames_in_one_read() {
        let a = LpcValue::Int(1);
        let b = LpcValue::str("second");
        let mut buf = frame_bytes(&a);
        buf.extend_from_slice(&frame_bytes(&b));

        let mut codec = MudModeCodec::new(32 * 1024);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn one_byte_at_a_time_never_misaligns() {
        // A ~10 KiB frame fed through the decoder one byte per call.
        let value = LpcValue::Buffer(vec![0xAB; 10 * 1024]);
        let full = frame_bytes(&value);

        let mut codec = MudModeCodec::new(32 * 1024);
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for (i, byte) in full.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            match codec.decode(&mut buf).unwrap() {
                Some(v) => {
                    assert_eq!(i, full.len() - 1, "frame completed early");
                    decoded = Some(v);
                }
                None => assert!(i < full.len() - 1),
            }
        }
        assert_eq!(decoded, Some(value));
    }

    #[test]
    fn arbitrary_split_points() {
        let value = LpcValue::Array(vec![
            LpcValue::str("tell"),
            LpcValue::Int(200),
            LpcValue::str("x".repeat(4_096)),
        ]);
        let full = frame_bytes(&value);

        for split in [1, 3, 4, 5, full.len() / 2, full.len() - 1] {
            let mut codec = MudModeCodec::new(32 * 1024);
            let mut buf = BytesMut::from(&full[..split]);
            assert_eq!(codec.decode(&mut buf).unwrap(), None, "split at {split}");
            buf.extend_from_slice(&full[split..]);
            assert_eq!(
                codec.decode(&mut buf).unwrap().as_ref(),
                Some(&value),
                "split at {split}"
            );
        }
    }

    #[test]
    fn oversized_frame_rejected_from_prefix() {
        let mut codec = MudModeCodec::new(1_024);
        // Prefix claims 1 MiB; only the prefix itself is present.
        let mut buf = BytesMut::from(&(1_048_576u32).to_be_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge {
                size: 1_048_576,
                max: 1_024
            })
        ));
    }

    #[test]
    fn stream_resynchronizes_after_oversized_frame() {
        let mut codec = MudModeCodec::new(64);
        let oversized_len = 200usize;

        let mut buf = BytesMut::new();
        buf.put_u32(oversized_len as u32);
        buf.put_slice(&vec![0u8; 50]); // part of the junk payload
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { size: 200, .. })
        ));

        // Rest of the junk, then a valid frame.
        buf.put_slice(&vec![0u8; oversized_len - 50]);
        let good = LpcValue::Int(7);
        buf.extend_from_slice(&frame_bytes(&good));

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(good));
    }

    #[test]
    fn zero_length_frame_rejected() {
        let mut codec = MudModeCodec::new(1_024);
        let mut buf = BytesMut::from(&0u32.to_be_bytes()[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::EmptyFrame)));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut codec = MudModeCodec::new(16);
        let mut buf = BytesMut::new();
        let value = LpcValue::str("x".repeat(64));
        assert!(matches!(
            codec.encode(value, &mut buf),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn malformed_payload_surfaces_lpc_error() {
        let mut codec = MudModeCodec::new(1_024);
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(&[99, 0, 0]); // unknown tag
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Lpc(_))));
    }
}
