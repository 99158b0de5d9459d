use bincode::config;

use super::{decode_canonical, decode_whole};

const CONFIG: config::Configuration<config::BigEndian, config::Varint> = config::standard()
    .with_big_endian()
    .with_variable_int_encoding();

#[test]
fn decode_whole_rejects_leftover_bytes() {
    let mut bytes = bincode::encode_to_vec(7u64, CONFIG).expect("Can't fail");
    assert_eq!(decode_whole::<u64, _>(&bytes, CONFIG).expect("valid"), 7);

    bytes.push(0);
    assert!(decode_whole::<u64, _>(&bytes, CONFIG).is_err());
}

#[test]
fn decode_canonical_rejects_overlong_varint() {
    // 251 = u16 marker, followed by a value that fits in a single byte
    let overlong = [251u8, 0, 7];
    assert!(decode_canonical::<u64, _>(&overlong, CONFIG).is_err());

    assert_eq!(decode_canonical::<u64, _>(&[7], CONFIG).expect("canonical"), 7);
}
