use std::collections::HashMap;

use crate::protocol::Endianness;
use crate::{Decoder, Encoder, ObjectPath, Signature, Value, Variant};

fn check_content(enc: &Encoder, expected_sig: &str, expected_data: &[u8]) {
    assert_eq!(enc.signature(), expected_sig);
    assert_eq!(enc.data(), expected_data);
}

#[test]
fn test_align() {
    let mut enc = Encoder::new();
    enc.append(1u8).unwrap();
    enc.align(1);
    check_content(&enc, "y", &[1]);
    enc.align(2);
    check_content(&enc, "y", &[1, 0]);
    enc.align(4);
    check_content(&enc, "y", &[1, 0, 0, 0]);
    enc.align(8);
    check_content(&enc, "y", &[1, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_append_byte() {
    let mut enc = Encoder::new();
    enc.append(42u8).unwrap();
    check_content(&enc, "y", &[42]);
}

#[test]
fn test_append_boolean() {
    let mut enc = Encoder::new();
    enc.append(true).unwrap();
    check_content(&enc, "b", &[1, 0, 0, 0]);
}

#[test]
fn test_append_int16() {
    let mut enc = Encoder::new();
    enc.append(42i16).unwrap();
    check_content(&enc, "n", &[42, 0]);
}

#[test]
fn test_append_uint16() {
    let mut enc = Encoder::new();
    enc.append(42u16).unwrap();
    check_content(&enc, "q", &[42, 0]);
}

#[test]
fn test_append_int32() {
    let mut enc = Encoder::new();
    enc.append(42i32).unwrap();
    check_content(&enc, "i", &[42, 0, 0, 0]);
}

#[test]
fn test_append_uint32() {
    let mut enc = Encoder::new();
    enc.append(42u32).unwrap();
    check_content(&enc, "u", &[42, 0, 0, 0]);
}

#[test]
fn test_append_int64() {
    let mut enc = Encoder::new();
    enc.append(42i64).unwrap();
    check_content(&enc, "x", &[42, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_append_uint64() {
    let mut enc = Encoder::new();
    enc.append(42u64).unwrap();
    check_content(&enc, "t", &[42, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_append_double() {
    let mut enc = Encoder::new();
    enc.append(42.0f64).unwrap();
    check_content(&enc, "d", &[0, 0, 0, 0, 0, 0, 69, 64]);
}

#[test]
fn test_append_string() {
    let mut enc = Encoder::new();
    enc.append("hello").unwrap();
    check_content(&enc, "s", &[5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o', 0]);
}

#[test]
fn test_append_object_path() {
    let mut enc = Encoder::new();
    enc.append(ObjectPath::new("/foo").unwrap()).unwrap();
    check_content(&enc, "o", &[4, 0, 0, 0, b'/', b'f', b'o', b'o', 0]);
}

#[test]
fn test_append_signature() {
    let mut enc = Encoder::new();
    enc.append(Signature::new("ai").unwrap()).unwrap();
    check_content(&enc, "g", &[2, b'a', b'i', 0]);
}

#[test]
fn test_append_array() {
    let mut enc = Encoder::new();
    enc.append(vec![42i32, 420]).unwrap();
    check_content(&enc, "ai", &[8, 0, 0, 0, 42, 0, 0, 0, 164, 1, 0, 0]);
}

#[test]
fn test_append_map() {
    let mut enc = Encoder::new();
    let mut map = HashMap::new();
    map.insert("true".to_owned(), true);
    enc.append(map).unwrap();
    check_content(
        &enc,
        "a{sb}",
        &[
            20, 0, 0, 0, // array content length
            0, 0, 0, 0, // padding to 8 bytes
            4, 0, 0, 0, b't', b'r', b'u', b'e', 0, // "true"
            0, 0, 0, // padding to 4 bytes
            1, 0, 0, 0, // true
        ],
    );
}

#[test]
fn test_append_struct() {
    let mut enc = Encoder::new();
    enc.append((42i32, "hello".to_owned())).unwrap();
    check_content(
        &enc,
        "(is)",
        &[42, 0, 0, 0, 5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o', 0],
    );
}

#[test]
fn test_append_variant() {
    let mut enc = Encoder::new();
    enc.append(Variant::new(42i32)).unwrap();
    check_content(&enc, "v", &[1, b'i', 0, 0, 42, 0, 0, 0]);
}

#[test]
fn test_append_alignment() {
    let mut enc = Encoder::new();
    enc.append(42u8).unwrap();
    enc.append(42i16).unwrap();
    enc.append(true).unwrap();
    enc.append(42i32).unwrap();
    enc.append(42i64).unwrap();
    check_content(
        &enc,
        "ynbix",
        &[
            42, // byte
            0,  // padding to 2 bytes
            42, 0, // int16
            1, 0, 0, 0, // true
            42, 0, 0, 0, // int32
            0, 0, 0, 0, // padding to 8 bytes
            42, 0, 0, 0, 0, 0, 0, 0, // int64
        ],
    );
}

#[test]
fn test_child_encoder_base_alignment() {
    // A child encoder told it starts at offset 6 of the parent pads as the
    // parent would.
    let mut enc = Encoder::with_base(Endianness::Little, 6);
    enc.append(42i32).unwrap();
    check_content(&enc, "i", &[0, 0, 42, 0, 0, 0]);
}

#[test]
fn test_decode_variant_yields_inner_value() {
    let data = [1, b'i', 0, 0, 42, 0, 0, 0];
    let signature = Signature::new("v").unwrap();
    let mut dec = Decoder::new(&signature, &data, Endianness::Little);
    assert_eq!(dec.read_value().unwrap(), Value::Int32(42));
    assert!(!dec.has_more());
}

#[test]
fn test_decode_big_endian() {
    let data = [0, 0, 1, 164];
    let signature = Signature::new("u").unwrap();
    let mut dec = Decoder::new(&signature, &data, Endianness::Big);
    assert_eq!(dec.read_value().unwrap(), Value::Uint32(420));
}

#[test]
fn test_decode_buffer_too_short() {
    let data = [42, 0];
    let signature = Signature::new("u").unwrap();
    let mut dec = Decoder::new(&signature, &data, Endianness::Little);
    assert!(dec.read_value().is_err());
}

#[test]
fn test_decode_signature_too_short() {
    let signature = Signature::new("y").unwrap();
    let mut dec = Decoder::new(&signature, &[42], Endianness::Little);
    dec.read_value().unwrap();
    assert!(!dec.has_more());
    assert!(dec.read_value().is_err());
}

#[test]
fn test_decode_type_mismatch() {
    let signature = Signature::new("i").unwrap();
    let mut dec = Decoder::new(&signature, &[42, 0, 0, 0], Endianness::Little);
    assert!(dec.read::<String>().is_err());
}

fn roundtrip(values: Vec<Value>) {
    let mut enc = Encoder::new();

    for value in &values {
        enc.append_value(value).unwrap();
    }

    let (signature, data) = enc.finish();
    let mut dec = Decoder::new(&signature, &data, Endianness::Little);

    let mut decoded = Vec::new();

    while dec.has_more() {
        decoded.push(dec.read_value().unwrap());
    }

    assert_eq!(decoded, values, "roundtrip through signature {signature}");
}

#[test]
fn test_roundtrip_scalars() {
    roundtrip(vec![
        Value::Byte(255),
        Value::Bool(false),
        Value::Int16(-2),
        Value::Uint16(65535),
        Value::Int32(-42),
        Value::Uint32(42),
        Value::Int64(-1),
        Value::Uint64(u64::MAX),
        Value::Double(3.5),
        Value::Str("hello world".into()),
        Value::Path(ObjectPath::new("/org/freedesktop/DBus").unwrap()),
        Value::Sig(Signature::new("a{sv}").unwrap()),
    ]);
}

#[test]
fn test_roundtrip_containers() {
    roundtrip(vec![
        Value::from(vec![1u8, 2, 3]),
        Value::from(Vec::<i64>::new()),
        Value::Dict {
            key: Signature::new("s").unwrap(),
            value: Signature::new("i").unwrap(),
            entries: vec![(Value::Str("one".into()), Value::Int32(1))],
        },
        Value::Struct(vec![
            Value::Byte(1),
            Value::Struct(vec![Value::Str("nested".into()), Value::Int64(9)]),
        ]),
        Value::from(vec![(1u32, "one".to_owned()), (2, "two".to_owned())]),
    ]);
}

#[test]
fn test_alignment_law() {
    // Every fixed-size value must land on an offset divisible by its
    // alignment, regardless of what precedes it.
    let mut enc = Encoder::new();
    enc.append(1u8).unwrap();
    enc.append(2u64).unwrap();
    enc.append(3u8).unwrap();
    enc.append(4u16).unwrap();
    enc.append(5u8).unwrap();
    enc.append(6u32).unwrap();

    let (signature, data) = enc.finish();
    assert_eq!(signature, "ytyqyu");
    assert_eq!(data.len(), 28);

    // u64 at 8, u16 at 18, u32 at 24.
    assert_eq!(&data[8..16], &[2, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(&data[18..20], &[4, 0]);
    assert_eq!(&data[24..28], &[6, 0, 0, 0]);
}

#[test]
fn test_variant_signature_elides_payload() {
    // The variant contributes only `v` to the parent signature; the payload
    // signature travels inside the value.
    let mut enc = Encoder::new();
    enc.append(1u32).unwrap();
    enc.append(Variant::new("inner")).unwrap();
    enc.append(2u32).unwrap();
    assert_eq!(enc.signature(), "uvu");
}
