use std::collections::HashMap;

use crate::{ObjectPath, Signature, Value, ValueType, Variant};

#[test]
fn test_scalar_signatures() {
    assert_eq!(Value::from(42u8).signature(), "y");
    assert_eq!(Value::from(true).signature(), "b");
    assert_eq!(Value::from(42i16).signature(), "n");
    assert_eq!(Value::from(42u16).signature(), "q");
    assert_eq!(Value::from(42i32).signature(), "i");
    assert_eq!(Value::from(42u32).signature(), "u");
    assert_eq!(Value::from(42i64).signature(), "x");
    assert_eq!(Value::from(42u64).signature(), "t");
    assert_eq!(Value::from(42.0f64).signature(), "d");
    assert_eq!(Value::from("hello").signature(), "s");
    assert_eq!(
        Value::from(ObjectPath::new("/foo").unwrap()).signature(),
        "o"
    );
    assert_eq!(Value::from(Signature::new("ai").unwrap()).signature(), "g");
}

#[test]
fn test_container_signatures() {
    assert_eq!(Value::from(vec![1i32, 2, 3]).signature(), "ai");
    assert_eq!(Value::from(Vec::<String>::new()).signature(), "as");

    let map: HashMap<String, bool> = HashMap::new();
    assert_eq!(Value::from(map).signature(), "a{sb}");

    assert_eq!(Value::from((42i32, "hello".to_owned())).signature(), "(is)");
    assert_eq!(Value::from(Variant::new(42i32)).signature(), "v");
}

#[test]
fn test_nested_signatures() {
    let value = Value::from(vec![(1u32, "one".to_owned()), (2, "two".to_owned())]);
    assert_eq!(value.signature(), "a(us)");

    let mut map = HashMap::new();
    map.insert("inner".to_owned(), vec![1u8, 2]);
    assert_eq!(Value::from(map).signature(), "a{say}");
}

#[test]
fn test_typed_roundtrip() {
    let value = vec![1i32, 2, 3].into_value();
    assert_eq!(<Vec<i32>>::from_value(value).unwrap(), vec![1, 2, 3]);

    let value = (1u32, "one".to_owned()).into_value();
    assert_eq!(
        <(u32, String)>::from_value(value).unwrap(),
        (1, "one".to_owned())
    );

    assert!(<String>::from_value(Value::Int32(42)).is_err());
}

#[test]
fn test_variant_absorbs_any_value() {
    let variant = Variant::from_value(Value::Int32(42)).unwrap();
    assert_eq!(variant.signature(), "i");
    assert_eq!(*variant.value(), Value::Int32(42));
}
