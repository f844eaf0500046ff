use bytes::Bytes;
use derive_try_from_primitive::*;
use homewave_core::checksum::frame_checksum;
use nom::{
    IResult,
    branch::alt,
    bytes::streaming::{tag, take, take_till1},
    combinator::{map, peek, value},
    number::streaming::be_u8,
    sequence::tuple,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlByte {
    SOF = 0x01,
    ACK = 0x06,
    NAK = 0x15,
    CAN = 0x18,
}

pub const ACK_BUFFER: [u8; 1] = [ControlByte::ACK as u8];
pub const NAK_BUFFER: [u8; 1] = [ControlByte::NAK as u8];
pub const CAN_BUFFER: [u8; 1] = [ControlByte::CAN as u8];

/// One unit of the serial byte stream: a bare control byte, a complete
/// length-delimited data frame (SOF through checksum), or garbage that
/// was skipped while re-synchronizing.
#[derive(Clone, Debug, PartialEq)]
pub enum RawFrame {
    Ack,
    Nak,
    Can,
    Data(Bytes),
    Garbage(Bytes),
}

impl RawFrame {
    /// Parses the next frame off the stream. Incomplete input yields
    /// `nom::Err::Incomplete` so the codec can wait for more bytes.
    pub fn parse(i: &[u8]) -> IResult<&[u8], RawFrame> {
        alt((skip_garbage, parse_control, parse_data))(i)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RawFrame::Ack => &ACK_BUFFER,
            RawFrame::Nak => &NAK_BUFFER,
            RawFrame::Can => &CAN_BUFFER,
            RawFrame::Data(data) => data,
            RawFrame::Garbage(data) => data,
        }
    }
}

fn skip_garbage(i: &[u8]) -> IResult<&[u8], RawFrame> {
    map(
        take_till1(|b| ControlByte::try_from(b).is_ok()),
        |g: &[u8]| RawFrame::Garbage(Bytes::copy_from_slice(g)),
    )(i)
}

fn parse_control(i: &[u8]) -> IResult<&[u8], RawFrame> {
    alt((
        value(RawFrame::Ack, tag(&ACK_BUFFER)),
        value(RawFrame::Nak, tag(&NAK_BUFFER)),
        value(RawFrame::Can, tag(&CAN_BUFFER)),
    ))(i)
}

fn parse_data(i: &[u8]) -> IResult<&[u8], RawFrame> {
    // A data frame is at least SOF, LEN, TYPE, FUNC, CHECKSUM
    peek(take(5usize))(i)?;

    // Read the length without consuming, then take the whole frame
    let (_, (_, len)) = peek(tuple((tag([ControlByte::SOF as u8]), be_u8)))(i)?;
    let (i, data) = take(len as usize + 2)(i)?;

    Ok((i, RawFrame::Data(Bytes::copy_from_slice(data))))
}

/// Validates the checksum of a complete data frame (SOF..checksum).
/// The checksum covers the length byte through the last payload byte.
pub fn verify_checksum(frame: &[u8]) -> bool {
    if frame.len() < 5 {
        return false;
    }
    let expected = frame_checksum(&frame[1..frame.len() - 1]);
    frame[frame.len() - 1] == expected
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_garbage() {
        let data = hex::decode("07080901").unwrap();
        let (remaining, frame) = RawFrame::parse(&data).unwrap();
        assert_eq!(remaining, &[0x01]);
        assert_eq!(frame, RawFrame::Garbage(Bytes::from_static(&[0x07, 0x08, 0x09])));
    }

    #[test]
    fn test_control_bytes() {
        let data = hex::decode("061518").unwrap();
        let (rest, frame) = RawFrame::parse(&data).unwrap();
        assert_eq!(frame, RawFrame::Ack);
        let (rest, frame) = RawFrame::parse(rest).unwrap();
        assert_eq!(frame, RawFrame::Nak);
        let (_, frame) = RawFrame::parse(rest).unwrap();
        assert_eq!(frame, RawFrame::Can);
    }

    #[test]
    fn test_data_frame() {
        // GET_INIT_DATA response stub followed by an ACK
        let data = hex::decode("01030008f406").unwrap();
        let (remaining, frame) = RawFrame::parse(&data).unwrap();
        assert_eq!(remaining, &[0x06]);
        let RawFrame::Data(bytes) = frame else {
            panic!("expected a data frame");
        };
        assert_eq!(bytes.as_ref(), hex::decode("01030008f4").unwrap());
    }

    #[test]
    fn test_incomplete_data_frame() {
        let data = hex::decode("010300").unwrap();
        assert!(matches!(RawFrame::parse(&data), Err(nom::Err::Incomplete(_))));
    }

    #[test]
    fn test_verify_checksum() {
        let good = hex::decode("01030002fe").unwrap();
        assert!(verify_checksum(&good));
        let bad = hex::decode("01030002ff").unwrap();
        assert!(!verify_checksum(&bad));
    }
}
