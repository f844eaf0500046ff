use crate::frame::RawFrame;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Splits the serial byte stream into [RawFrame]s and writes outbound
/// frames verbatim. Checksum validation happens a layer up, where a bad
/// frame must be answered with NAK.
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match RawFrame::parse(src) {
            Ok((remaining, frame)) => {
                let consumed = src.len() - remaining.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(nom::Err::Incomplete(needed)) => {
                if let nom::Needed::Size(n) = needed {
                    src.reserve(n.get());
                }
                Ok(None)
            }
            Err(_) => {
                // Unparseable leading byte; drop it and re-synchronize
                src.advance(1);
                Ok(None)
            }
        }
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_across_chunks() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&hex::decode("0103").unwrap());
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&hex::decode("0002fe06").unwrap());
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(frame, RawFrame::Data(_)));
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, RawFrame::Ack);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
