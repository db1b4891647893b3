use crate::protocol::{Flags, MessageType};
use crate::{Message, ObjectPath, Value};

#[rustfmt::skip]
const TEST_MESSAGE: &[u8] = &[
    b'l', // Byte order
    1,    // Message type
    0,    // Flags
    1,    // Protocol
    8, 0, 0, 0, // Body length
    1, 0, 0, 0, // Serial
    127, 0, 0, 0, // Header fields array length
    1, 1, b'o', 0, // Path, type OBJECT_PATH
    21, 0, 0, 0, b'/', b'o', b'r', b'g', b'/', b'f', b'r', b'e', b'e', b'd', b'e', b's', b'k', b't', b'o', b'p', b'/', b'D', b'B', b'u', b's', 0,
    0, 0,
    2, 1, b's', 0, // Interface, type STRING
    20, 0, 0, 0, b'o', b'r', b'g', b'.', b'f', b'r', b'e', b'e', b'd', b'e', b's', b'k', b't', b'o', b'p', b'.', b'D', b'B', b'u', b's', 0,
    0, 0, 0,
    3, 1, b's', 0, // Member, type STRING
    12, 0, 0, 0, b'N', b'a', b'm', b'e', b'H', b'a', b's', b'O', b'w', b'n', b'e', b'r', 0,
    0, 0, 0,
    6, 1, b's', 0, // Destination, type STRING
    20, 0, 0, 0, b'o', b'r', b'g', b'.', b'f', b'r', b'e', b'e', b'd', b'e', b's', b'k', b't', b'o', b'p', b'.', b'D', b'B', b'u', b's', 0,
    0, 0, 0,
    8, 1, b'g', 0, // Signature, type SIGNATURE
    1, b's', 0,
    0,
    // Message body
    3, 0, 0, 0,
    b'x', b'y', b'z', 0,
];

#[test]
fn test_unmarshal_message() {
    let (msg, consumed) = Message::from_bytes(TEST_MESSAGE).unwrap();

    assert_eq!(consumed, TEST_MESSAGE.len());
    assert_eq!(msg.message_type(), MessageType::MethodCall);
    assert_eq!(msg.serial(), 1);
    assert_eq!(msg.path().map(|p| p.as_str()), Some("/org/freedesktop/DBus"));
    assert_eq!(msg.destination(), Some("org.freedesktop.DBus"));
    assert_eq!(msg.interface(), Some("org.freedesktop.DBus"));
    assert_eq!(msg.member(), Some("NameHasOwner"));
    assert_eq!(msg.signature(), "s");
    assert_eq!(msg.body_values().unwrap(), vec![Value::Str("xyz".into())]);
}

#[test]
fn test_marshal_message() {
    let mut msg = Message::method_call(
        ObjectPath::new("/org/freedesktop/DBus").unwrap(),
        "NameHasOwner",
    )
    .with_destination("org.freedesktop.DBus")
    .with_interface("org.freedesktop.DBus");

    msg.append("xyz").unwrap();
    msg.set_serial(1);

    assert_eq!(msg.to_bytes().unwrap(), TEST_MESSAGE);
}

#[test]
fn test_marshal_requires_serial() {
    let msg = Message::method_call(ObjectPath::new("/foo").unwrap(), "Bar");
    assert!(msg.to_bytes().is_err());
}

#[test]
fn test_marshal_roundtrip_with_flags() {
    let mut msg = Message::signal(
        ObjectPath::new("/com/example").unwrap(),
        "com.example.Iface",
        "Changed",
    )
    .with_sender(":1.7")
    .with_flags(Flags::NO_REPLY_EXPECTED);

    msg.append(42u32).unwrap();
    msg.append((1u8, "x".to_owned())).unwrap();
    msg.set_serial(99);

    let bytes = msg.to_bytes().unwrap();
    let (decoded, consumed) = Message::from_bytes(&bytes).unwrap();

    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, msg);
}

#[test]
fn test_method_return_correlates() {
    let (call, _) = Message::from_bytes(TEST_MESSAGE).unwrap();

    let reply = call.method_return();
    assert_eq!(reply.message_type(), MessageType::MethodReturn);
    assert_eq!(reply.reply_serial(), Some(call.serial()));
}

#[test]
fn test_error_reply() {
    let (call, _) = Message::from_bytes(TEST_MESSAGE).unwrap();

    let reply = call
        .error_reply("org.freedesktop.DBus.Error.UnknownObject", "no such object")
        .unwrap();

    assert_eq!(reply.message_type(), MessageType::Error);
    assert_eq!(reply.error_name(), Some("org.freedesktop.DBus.Error.UnknownObject"));
    assert_eq!(reply.reply_serial(), Some(call.serial()));

    let err = reply.as_remote_error();
    assert_eq!(err.remote_name(), Some("org.freedesktop.DBus.Error.UnknownObject"));
    assert_eq!(err.to_string(), "org.freedesktop.DBus.Error.UnknownObject: no such object");
}

#[test]
fn test_decode_args() {
    let (msg, _) = Message::from_bytes(TEST_MESSAGE).unwrap();
    let name: String = msg.args().unwrap();
    assert_eq!(name, "xyz");
}

#[tokio::test]
async fn test_read_from_stream() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    tokio::io::AsyncWriteExt::write_all(&mut server, TEST_MESSAGE)
        .await
        .unwrap();

    let msg = Message::read_from(&mut client).await.unwrap();
    assert_eq!(msg.member(), Some("NameHasOwner"));
    assert_eq!(msg.body_values().unwrap(), vec![Value::Str("xyz".into())]);
}
