/// Computes the frame checksum: XOR of 0xff with every byte from the
/// length byte through the last payload byte.
pub fn frame_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0xff, |acc, b| acc ^ b)
}

#[test]
fn test_frame_checksum() {
    // LEN, TYPE, FUNC of a GET_INIT_DATA request
    let input = hex::decode("030002").unwrap();
    assert_eq!(frame_checksum(&input), 0xfe);

    let input = hex::decode("0300").unwrap();
    assert_eq!(frame_checksum(&input), 0xfc);
}
